//! YAML schema documents
//!
//! ```text
//! SchemaDocument
//!   ├── entities: Vec<EntityDef>
//!   └── serializers: name -> SerializerDef
//!       ├── entity: String
//!       ├── fields: Option<Vec<String>>   (absent = all)
//!       ├── read_only / write_only: Vec<String>
//!       └── nested: field -> serializer name
//! ```

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{EntityDef, SchemaRegistry};
use crate::errors::{SchemaError, SchemaResult};
use crate::serializers::Serializer;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SerializerDef {
    pub entity: String,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub read_only: Vec<String>,
    #[serde(default)]
    pub write_only: Vec<String>,
    #[serde(default)]
    pub nested: IndexMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct SchemaDocument {
    #[serde(default)]
    pub entities: Vec<EntityDef>,
    #[serde(default)]
    pub serializers: IndexMap<String, SerializerDef>,
}

/// A built registry together with its named serializers
#[derive(Clone, Debug)]
pub struct LoadedSchema {
    pub registry: Arc<SchemaRegistry>,
    pub serializers: IndexMap<String, Arc<Serializer>>,
}

impl LoadedSchema {
    pub fn serializer(&self, name: &str) -> SchemaResult<&Arc<Serializer>> {
        self.serializers
            .get(name)
            .ok_or_else(|| SchemaError::UnknownSerializer(name.to_string()))
    }
}

impl SchemaDocument {
    pub fn from_yaml(text: &str) -> SchemaResult<Self> {
        serde_yaml::from_str(text).map_err(|e| SchemaError::InvalidDocument(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> SchemaResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SchemaError::InvalidDocument(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&text)
    }

    /// Build the registry, then every serializer, checking each against it
    pub fn load(self) -> SchemaResult<LoadedSchema> {
        let registry = SchemaRegistry::build(self.entities)?;

        let mut built = IndexMap::new();
        for name in self.serializers.keys() {
            build_serializer(name, &self.serializers, &mut built, &mut Vec::new())?;
        }
        for serializer in built.values() {
            serializer.check(&registry)?;
        }

        debug!(
            "Loaded schema with {} entities and {} serializers",
            registry.entities().count(),
            built.len()
        );

        // Keep declaration order
        let serializers = self
            .serializers
            .keys()
            .filter_map(|name| built.get(name).map(|s| (name.clone(), s.clone())))
            .collect();

        Ok(LoadedSchema {
            registry: Arc::new(registry),
            serializers,
        })
    }
}

/// Read and build a schema document
pub fn load_schema(path: impl AsRef<Path>) -> SchemaResult<LoadedSchema> {
    SchemaDocument::from_file(path)?.load()
}

fn build_serializer(
    name: &str,
    defs: &IndexMap<String, SerializerDef>,
    built: &mut IndexMap<String, Arc<Serializer>>,
    stack: &mut Vec<String>,
) -> SchemaResult<Arc<Serializer>> {
    if let Some(serializer) = built.get(name) {
        return Ok(serializer.clone());
    }
    if stack.iter().any(|s| s == name) {
        stack.push(name.to_string());
        return Err(SchemaError::SerializerCycle(stack.join(" -> ")));
    }
    let def = defs
        .get(name)
        .ok_or_else(|| SchemaError::UnknownSerializer(name.to_string()))?;

    stack.push(name.to_string());
    let mut serializer = Serializer::new(name, def.entity.as_str())
        .read_only(def.read_only.iter().cloned())
        .write_only(def.write_only.iter().cloned());
    if let Some(fields) = &def.fields {
        serializer = serializer.fields(fields.iter().cloned());
    }
    for (field, nested) in &def.nested {
        let nested = build_serializer(nested, defs, built, stack)?;
        serializer = serializer.nested_shared(field.as_str(), nested);
    }
    stack.pop();

    let serializer = Arc::new(serializer);
    built.insert(name.to_string(), serializer.clone());
    Ok(serializer)
}
