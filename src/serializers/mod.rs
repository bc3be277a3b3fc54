//! Declarative serializers
//!
//! A [`Serializer`] decides which fields of an entity a caller may read and
//! write, and which relations are written as nested objects. Validating
//! untrusted JSON through it produces the typed [`InputTree`] consumed by
//! the nested writer, or field-addressed [`ValidationErrors`].
//!
//! ```rust
//! use nesting::schema::{EntityDef, FieldDef, ForwardRelationDef, SchemaRegistry};
//! use nesting::serializers::{Mode, Serializer};
//! use serde_json::json;
//!
//! let registry = SchemaRegistry::build(vec![
//!     EntityDef::new("Sub", "sub").field("field", FieldDef::text(50)),
//!     EntityDef::new("Main", "main")
//!         .relation(ForwardRelationDef::one_to_one("sub_entry", "Sub")),
//! ])
//! .unwrap();
//!
//! let serializer = Serializer::new("MainSerializer", "Main")
//!     .fields(["pk", "sub_entry"])
//!     .nested("sub_entry", Serializer::new("SubSerializer", "Sub").fields(["pk", "field"]));
//! serializer.check(&registry).unwrap();
//!
//! let input = serializer
//!     .validate(&registry, &json!({"sub_entry": {"field": "value"}}), Mode::Create)
//!     .unwrap();
//! assert!(input.contains_key("sub_entry"));
//! ```

pub mod input;
pub mod representation;
pub mod validation;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

pub use input::{input_from_json, InputTree, InputValue, NestedInput};

use crate::database::{Pk, Record};
use crate::errors::{MutationError, MutationResult, SchemaError, SchemaResult, ValidationErrors};
use crate::schema::{RelationDescriptor, RelationLink, SchemaRegistry};
use validation::{coerce_scalar, type_name};

pub const NON_FIELD_ERRORS: &str = "non_field_errors";

pub type FieldValidator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;
pub type ObjectValidator = Arc<dyn Fn(&InputTree) -> Result<(), ValidationErrors> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Every required field must be present
    Create,
    /// Partial input
    Update,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldSelection {
    /// Scalars, forward relations and nested relations
    All,
    Only(Vec<String>),
}

#[derive(Clone)]
pub struct Serializer {
    name: String,
    entity: String,
    fields: FieldSelection,
    read_only: Vec<String>,
    write_only: Vec<String>,
    nested: IndexMap<String, Arc<Serializer>>,
    validators: IndexMap<String, Vec<FieldValidator>>,
    object_validators: Vec<ObjectValidator>,
}

impl fmt::Debug for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serializer")
            .field("name", &self.name)
            .field("entity", &self.entity)
            .field("fields", &self.fields)
            .field("read_only", &self.read_only)
            .field("write_only", &self.write_only)
            .field("nested", &self.nested)
            .field("validators", &self.validators.keys().collect::<Vec<_>>())
            .finish()
    }
}

struct Context<'a> {
    registry: &'a SchemaRegistry,
    non_field_key: &'a str,
}

fn to_strings<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

fn as_pk(value: &Value) -> Option<Pk> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn not_a_list(field: &str, value: &Value) -> MutationError {
    ValidationErrors::single(
        field,
        format!(
            "Expected a list of items but got type \"{}\".",
            type_name(value)
        ),
        "not_a_list",
    )
    .into()
}

impl Serializer {
    pub fn new(name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity: entity.into(),
            fields: FieldSelection::All,
            read_only: Vec::new(),
            write_only: Vec::new(),
            nested: IndexMap::new(),
            validators: IndexMap::new(),
            object_validators: Vec::new(),
        }
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = FieldSelection::Only(to_strings(fields));
        self
    }

    pub fn read_only<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.read_only = to_strings(fields);
        self
    }

    pub fn write_only<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.write_only = to_strings(fields);
        self
    }

    /// Write `field` as nested objects through `serializer`
    pub fn nested(mut self, field: impl Into<String>, serializer: Serializer) -> Self {
        self.nested.insert(field.into(), Arc::new(serializer));
        self
    }

    pub fn nested_shared(mut self, field: impl Into<String>, serializer: Arc<Serializer>) -> Self {
        self.nested.insert(field.into(), serializer);
        self
    }

    /// Extra check on a coerced field value; the error message is reported with code `invalid`
    pub fn validator<F>(mut self, field: impl Into<String>, validator: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validators
            .entry(field.into())
            .or_default()
            .push(Arc::new(validator));
        self
    }

    /// Check over the whole validated object, run when every field passed
    pub fn object_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&InputTree) -> Result<(), ValidationErrors> + Send + Sync + 'static,
    {
        self.object_validators.push(Arc::new(validator));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn nested_serializer(&self, field: &str) -> Option<&Arc<Serializer>> {
        self.nested.get(field)
    }

    /// Verify every referenced name against the schema, recursively
    pub fn check(&self, registry: &SchemaRegistry) -> SchemaResult<()> {
        let entity = registry.entity(&self.entity)?;
        let relations = registry.relations(&self.entity)?;
        let known = |field: &str| {
            field == "pk"
                || field == entity.primary_key
                || entity.fields.contains_key(field)
                || relations.contains_key(field)
        };
        let unknown = |field: &str| SchemaError::UnknownField {
            entity: entity.name.clone(),
            field: field.to_string(),
        };

        let mut referenced: Vec<&str> = Vec::new();
        if let FieldSelection::Only(fields) = &self.fields {
            referenced.extend(fields.iter().map(String::as_str));
        }
        referenced.extend(self.read_only.iter().map(String::as_str));
        referenced.extend(self.write_only.iter().map(String::as_str));
        referenced.extend(self.validators.keys().map(String::as_str));
        if let Some(field) = referenced.into_iter().find(|f| !known(f)) {
            return Err(unknown(field));
        }

        for (field, serializer) in &self.nested {
            let descriptor = relations.get(field).ok_or_else(|| unknown(field))?;
            if serializer.entity != descriptor.target {
                return Err(SchemaError::SerializerMismatch {
                    serializer: serializer.name.clone(),
                    entity: entity.name.clone(),
                    field: field.clone(),
                    expected: descriptor.target.clone(),
                    found: serializer.entity.clone(),
                });
            }
            serializer.check(registry)?;
        }
        Ok(())
    }

    /// Validate JSON input into a typed input tree
    pub fn validate(&self, registry: &SchemaRegistry, data: &Value, mode: Mode) -> MutationResult<InputTree> {
        self.validate_with(registry, data, mode, NON_FIELD_ERRORS)
    }

    /// [`Serializer::validate`] reporting object-level errors under `non_field_key`
    pub fn validate_with(
        &self,
        registry: &SchemaRegistry,
        data: &Value,
        mode: Mode,
        non_field_key: &str,
    ) -> MutationResult<InputTree> {
        let ctx = Context {
            registry,
            non_field_key,
        };
        self.validate_object(&ctx, data, mode, None)
    }

    /// Value of `field` from input, else from the instance, else the field default
    pub fn get_or_default(
        &self,
        registry: &SchemaRegistry,
        field: &str,
        attrs: &Map<String, Value>,
        instance: Option<&Record>,
    ) -> SchemaResult<Option<Value>> {
        if let Some(value) = attrs.get(field) {
            return Ok(Some(value.clone()));
        }
        if let Some(value) = instance.and_then(|record| record.get(field)) {
            return Ok(Some(value.clone()));
        }
        let entity = registry.entity(&self.entity)?;
        match entity.fields.get(field) {
            Some(def) => Ok(def.default.clone()),
            None if registry.relation(&entity.name, field).is_some() => Ok(None),
            None => Err(SchemaError::UnknownField {
                entity: entity.name.clone(),
                field: field.to_string(),
            }),
        }
    }

    fn writable_fields(&self, registry: &SchemaRegistry) -> MutationResult<Vec<String>> {
        let entity = registry.entity(&self.entity)?;
        let mut fields = match &self.fields {
            FieldSelection::Only(fields) => fields.clone(),
            FieldSelection::All => {
                let mut fields: Vec<String> = entity.fields.keys().cloned().collect();
                for descriptor in registry.relations(&self.entity)?.values() {
                    if descriptor.is_forward() || self.nested.contains_key(&descriptor.field) {
                        fields.push(descriptor.field.clone());
                    }
                }
                fields
            }
        };
        fields.retain(|f| f != "pk" && *f != entity.primary_key && !self.read_only.contains(f));
        Ok(fields)
    }

    fn run_validators(&self, field: &str, value: &Value) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        for validator in self.validators.get(field).into_iter().flatten() {
            if let Err(message) = validator(value) {
                errors.add(field, message, "invalid");
            }
        }
        errors
    }

    fn validate_object(
        &self,
        ctx: &Context<'_>,
        data: &Value,
        mode: Mode,
        exclude: Option<&str>,
    ) -> MutationResult<InputTree> {
        let entity = ctx.registry.entity(&self.entity)?;
        let relations = ctx.registry.relations(&self.entity)?;
        let Value::Object(map) = data else {
            return Err(ValidationErrors::single(
                ctx.non_field_key,
                format!(
                    "Invalid data. Expected a dictionary, but got {}.",
                    type_name(data)
                ),
                "invalid",
            )
            .into());
        };

        let writable = self.writable_fields(ctx.registry)?;
        let mut tree = InputTree::new();
        let mut errors = ValidationErrors::new();

        for (key, value) in map {
            if key == "pk" || *key == entity.primary_key || self.read_only.contains(key) {
                continue;
            }
            if exclude == Some(key.as_str()) {
                continue;
            }
            if !writable.contains(key) {
                errors.add(key, "Unknown field.", "unknown_field");
                continue;
            }

            if let Some(def) = entity.fields.get(key) {
                match coerce_scalar(def, value) {
                    Ok(coerced) => {
                        let failures = self.run_validators(key, &coerced);
                        if failures.is_empty() {
                            tree.insert(key.clone(), InputValue::Scalar(coerced));
                        } else {
                            errors.merge(failures);
                        }
                    }
                    Err((message, code)) => errors.add(key, message, code),
                }
                continue;
            }

            let descriptor = relations.get(key).ok_or_else(|| SchemaError::UnknownField {
                entity: entity.name.clone(),
                field: key.clone(),
            })?;
            match self.relation_input(ctx, descriptor, key, value) {
                Ok(input) => {
                    tree.insert(key.clone(), input);
                }
                Err(MutationError::Validation(e)) => errors.merge(e),
                Err(other) => return Err(other),
            }
        }

        if mode == Mode::Create {
            for field in &writable {
                if tree.contains_key(field) || errors.contains(field) || exclude == Some(field.as_str()) {
                    continue;
                }
                let required = match entity.fields.get(field) {
                    Some(def) => def.is_required(),
                    None => relations.get(field).is_some_and(|d| {
                        matches!(d.link, RelationLink::LocalColumn { nullable: false, .. })
                    }),
                };
                if required {
                    errors.add(field, "This field is required.", "required");
                }
            }
        }

        if errors.is_empty() {
            for validator in &self.object_validators {
                if let Err(e) = validator(&tree) {
                    errors.merge(e);
                }
            }
        }

        errors.into_result(tree).map_err(MutationError::from)
    }

    fn relation_input(
        &self,
        ctx: &Context<'_>,
        descriptor: &RelationDescriptor,
        key: &str,
        value: &Value,
    ) -> MutationResult<InputValue> {
        let nullable = match &descriptor.link {
            RelationLink::LocalColumn { nullable, .. } | RelationLink::RemoteColumn { nullable, .. } => {
                *nullable
            }
            RelationLink::JoinTable { .. } => true,
        };
        if value.is_null() {
            return if descriptor.is_to_many() || nullable {
                Ok(InputValue::Null)
            } else {
                Err(ValidationErrors::single(key, "This field may not be null.", "null").into())
            };
        }

        match (self.nested.get(key), descriptor.is_to_many()) {
            (Some(serializer), false) => {
                let exclude = descriptor
                    .is_reverse()
                    .then_some(descriptor.remote_field.as_str());
                serializer
                    .nested_input(ctx, value, exclude)
                    .map(InputValue::nested)
                    .map_err(|e| e.nested(key))
            }
            (Some(serializer), true) => {
                let Value::Array(items) = value else {
                    return Err(not_a_list(key, value));
                };
                let exclude = descriptor
                    .one_to_many()
                    .then_some(descriptor.remote_field.as_str());
                let mut inputs = Vec::with_capacity(items.len());
                let mut errors = ValidationErrors::new();
                for (index, item) in items.iter().enumerate() {
                    match serializer.nested_input(ctx, item, exclude) {
                        Ok(input) => inputs.push(input),
                        Err(MutationError::Validation(e)) => {
                            errors.merge(e.nested(&format!("{}.{}", key, index)))
                        }
                        Err(other) => return Err(other),
                    }
                }
                errors
                    .into_result(InputValue::NestedList(inputs))
                    .map_err(MutationError::from)
            }
            (None, false) => as_pk(value).map(InputValue::Key).ok_or_else(|| {
                ValidationErrors::single(
                    key,
                    format!(
                        "Incorrect type. Expected pk value, received {}.",
                        type_name(value)
                    ),
                    "incorrect_type",
                )
                .into()
            }),
            (None, true) => {
                let Value::Array(items) = value else {
                    return Err(not_a_list(key, value));
                };
                let mut pks = Vec::with_capacity(items.len());
                for item in items {
                    match as_pk(item) {
                        Some(pk) => pks.push(pk),
                        None => {
                            return Err(ValidationErrors::single(
                                key,
                                format!(
                                    "Incorrect type. Expected pk value, received {}.",
                                    type_name(item)
                                ),
                                "incorrect_type",
                            )
                            .into())
                        }
                    }
                }
                Ok(InputValue::KeyList(pks))
            }
        }
    }

    fn nested_input(&self, ctx: &Context<'_>, value: &Value, exclude: Option<&str>) -> MutationResult<NestedInput> {
        let entity = ctx.registry.entity(&self.entity)?;
        let Value::Object(map) = value else {
            return Err(ValidationErrors::single(
                ctx.non_field_key,
                format!(
                    "Invalid data. Expected a dictionary, but got {}.",
                    type_name(value)
                ),
                "invalid",
            )
            .into());
        };

        let pk = map
            .get("pk")
            .or_else(|| map.get(&entity.primary_key))
            .filter(|v| !v.is_null());
        match pk {
            Some(raw) => {
                let pk = as_pk(raw).ok_or_else(|| {
                    MutationError::from(ValidationErrors::single(
                        "pk",
                        format!(
                            "Incorrect type. Expected pk value, received {}.",
                            type_name(raw)
                        ),
                        "incorrect_type",
                    ))
                })?;
                let fields = self.validate_object(ctx, value, Mode::Update, exclude)?;
                Ok(NestedInput::ByPrimaryKey { pk, fields })
            }
            None => Ok(NestedInput::NewEntity(self.validate_object(
                ctx,
                value,
                Mode::Create,
                exclude,
            )?)),
        }
    }
}
