//! Entity metadata and the relation descriptor table
//!
//! A [`SchemaRegistry`] is built once from static [`EntityDef`]s. Building
//! validates every cross-reference and classifies every relation, so the
//! writer never has to inspect the schema at write time.

pub mod ddl;
pub mod entity;
pub mod loader;
pub mod relations;

use std::collections::HashMap;

use indexmap::IndexMap;

pub use entity::{
    ConstraintDef, EntityDef, FieldDef, FieldKind, ForwardRelationDef, OnDelete, RelationKind,
};
pub use relations::{Cardinality, Direction, RelationDescriptor, RelationLink, RelationMap};

use crate::errors::{SchemaError, SchemaResult};

#[derive(Clone, Debug)]
pub struct SchemaRegistry {
    entities: IndexMap<String, EntityDef>,
    relations: HashMap<String, RelationMap>,
}

impl SchemaRegistry {
    pub fn build(defs: impl IntoIterator<Item = EntityDef>) -> SchemaResult<Self> {
        let mut entities = IndexMap::new();
        for def in defs {
            if entities.contains_key(&def.name) {
                return Err(SchemaError::DuplicateEntity(def.name));
            }
            entities.insert(def.name.clone(), def);
        }

        for entity in entities.values() {
            Self::check_entity(entity)?;
        }

        let relations = relations::classify(&entities)?;
        Ok(Self {
            entities,
            relations,
        })
    }

    fn check_entity(entity: &EntityDef) -> SchemaResult<()> {
        if entity.fields.contains_key(&entity.primary_key) {
            return Err(SchemaError::AccessorClash {
                entity: entity.name.clone(),
                field: entity.primary_key.clone(),
            });
        }
        for relation in &entity.relations {
            if entity.fields.contains_key(&relation.name) {
                return Err(SchemaError::AccessorClash {
                    entity: entity.name.clone(),
                    field: relation.name.clone(),
                });
            }
        }
        for constraint in &entity.constraints {
            let mut referenced: Vec<&str> = constraint.field().into_iter().collect();
            if let ConstraintDef::Unique { fields, .. } = constraint {
                referenced.extend(fields.iter().map(String::as_str));
            }
            for field in referenced {
                if entity.column_for(field).is_none() {
                    return Err(SchemaError::UnknownField {
                        entity: entity.name.clone(),
                        field: field.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn entity(&self, name: &str) -> SchemaResult<&EntityDef> {
        self.entities
            .get(name)
            .ok_or_else(|| SchemaError::UnknownEntity(name.to_string()))
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityDef> {
        self.entities.values()
    }

    pub fn entity_for_table(&self, table: &str) -> Option<&EntityDef> {
        self.entities.values().find(|e| e.table == table)
    }

    /// Relation descriptors of `entity`, keyed by field name
    pub fn relations(&self, entity: &str) -> SchemaResult<&RelationMap> {
        self.relations
            .get(entity)
            .ok_or_else(|| SchemaError::UnknownEntity(entity.to_string()))
    }

    pub fn relation(&self, entity: &str, field: &str) -> Option<&RelationDescriptor> {
        self.relations.get(entity).and_then(|m| m.get(field))
    }

    /// The descriptor for the same relation seen from the other side
    pub fn remote_descriptor(&self, descriptor: &RelationDescriptor) -> Option<&RelationDescriptor> {
        self.relation(&descriptor.target, &descriptor.remote_field)
    }
}
