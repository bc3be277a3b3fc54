//! Typed input tree consumed by the nested writer

use indexmap::IndexMap;
use serde_json::Value;

use crate::database::Pk;
use crate::errors::{SchemaError, SchemaResult};
use crate::schema::{EntityDef, SchemaRegistry};

/// Field name to input value, for one entity
pub type InputTree = IndexMap<String, InputValue>;

#[derive(Clone, Debug, PartialEq)]
pub enum InputValue {
    /// Value of a scalar field
    Scalar(Value),
    /// Explicit null for a relation
    Null,
    /// Existing related row, by primary key
    Key(Pk),
    /// Existing related rows, by primary key
    KeyList(Vec<Pk>),
    /// Single related object written alongside the root
    Nested(Box<NestedInput>),
    /// Related objects written alongside the root
    NestedList(Vec<NestedInput>),
}

impl InputValue {
    pub fn nested(input: NestedInput) -> Self {
        InputValue::Nested(Box::new(input))
    }

    pub fn shape(&self) -> &'static str {
        match self {
            InputValue::Scalar(_) => "scalar",
            InputValue::Null => "null",
            InputValue::Key(_) => "key",
            InputValue::KeyList(_) => "key list",
            InputValue::Nested(_) => "nested object",
            InputValue::NestedList(_) => "nested list",
        }
    }
}

/// A nested object either updates an existing row or creates a new one
#[derive(Clone, Debug, PartialEq)]
pub enum NestedInput {
    ByPrimaryKey { pk: Pk, fields: InputTree },
    NewEntity(InputTree),
}

impl NestedInput {
    pub fn pk(&self) -> Option<Pk> {
        match self {
            NestedInput::ByPrimaryKey { pk, .. } => Some(*pk),
            NestedInput::NewEntity(_) => None,
        }
    }

    pub fn fields(&self) -> &InputTree {
        match self {
            NestedInput::ByPrimaryKey { fields, .. } | NestedInput::NewEntity(fields) => fields,
        }
    }
}

/// Structural conversion of a JSON object into an input tree, without validation
///
/// Scalars are taken as-is. For relations, numbers are keys, arrays of
/// numbers are key lists, and objects (or arrays of objects) are nested
/// inputs; an object carrying `pk` or the primary key column updates that row.
pub fn input_from_json(registry: &SchemaRegistry, entity: &str, json: &Value) -> SchemaResult<InputTree> {
    let entity = registry.entity(entity)?;
    let Value::Object(map) = json else {
        return Err(SchemaError::ShapeMismatch {
            entity: entity.name.clone(),
            field: String::new(),
            expected: "an object".to_string(),
        });
    };

    let mut tree = InputTree::new();
    for (field, value) in map {
        if entity.fields.contains_key(field) {
            tree.insert(field.clone(), InputValue::Scalar(value.clone()));
            continue;
        }
        let descriptor = registry
            .relation(&entity.name, field)
            .ok_or_else(|| SchemaError::UnknownField {
                entity: entity.name.clone(),
                field: field.clone(),
            })?;
        let mismatch = || SchemaError::ShapeMismatch {
            entity: entity.name.clone(),
            field: field.clone(),
            expected: "a key, a nested object, or a list of either".to_string(),
        };

        let input = match value {
            Value::Null => InputValue::Null,
            Value::Number(n) => InputValue::Key(n.as_i64().ok_or_else(mismatch)?),
            Value::Object(_) => InputValue::nested(nested_from_json(registry, &descriptor.target, value)?),
            Value::Array(items) if items.iter().all(Value::is_number) => {
                InputValue::KeyList(
                    items
                        .iter()
                        .map(|item| item.as_i64().ok_or_else(mismatch))
                        .collect::<SchemaResult<_>>()?,
                )
            }
            Value::Array(items) => InputValue::NestedList(
                items
                    .iter()
                    .map(|item| nested_from_json(registry, &descriptor.target, item))
                    .collect::<SchemaResult<_>>()?,
            ),
            _ => return Err(mismatch()),
        };
        tree.insert(field.clone(), input);
    }
    Ok(tree)
}

fn split_pk(entity: &EntityDef, json: &Value) -> (Option<Pk>, Value) {
    let mut json = json.clone();
    let mut pk = None;
    if let Value::Object(map) = &mut json {
        for key in ["pk", entity.primary_key.as_str()] {
            if let Some(value) = map.remove(key) {
                pk = pk.or_else(|| value.as_i64());
            }
        }
    }
    (pk, json)
}

fn nested_from_json(registry: &SchemaRegistry, entity: &str, json: &Value) -> SchemaResult<NestedInput> {
    let def = registry.entity(entity)?;
    let (pk, rest) = split_pk(def, json);
    let fields = input_from_json(registry, entity, &rest)?;
    Ok(match pk {
        Some(pk) => NestedInput::ByPrimaryKey { pk, fields },
        None => NestedInput::NewEntity(fields),
    })
}
