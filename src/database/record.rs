use indexmap::IndexMap;
use sea_orm::sea_query::Value as DbValue;
use serde::Serialize;
use serde_json::{json, Value};

use crate::errors::ValidationErrors;
use crate::schema::{EntityDef, FieldKind, RelationKind};

/// Primary key of every entity
pub type Pk = i64;

/// One row of an entity, keyed by field name
///
/// Scalar fields appear under their own name. Foreign key relations appear
/// under the relation name, holding the related primary key or null.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Record {
    pub entity: String,
    pub pk: Pk,
    pub values: IndexMap<String, Value>,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    /// Primary key held by a foreign key relation
    pub fn fk(&self, relation: &str) -> Option<Pk> {
        self.get_i64(relation)
    }

    /// Build a record from a raw row object keyed by column name
    pub(crate) fn from_row(entity: &EntityDef, row: &Value) -> Option<Self> {
        let pk = row.get(&entity.primary_key).and_then(as_pk)?;

        let mut values = IndexMap::new();
        for (name, def) in &entity.fields {
            let raw = row.get(name).cloned().unwrap_or(Value::Null);
            values.insert(name.clone(), normalize(def.kind, raw));
        }
        for relation in &entity.relations {
            if relation.kind == RelationKind::ManyToMany {
                continue;
            }
            let raw = row
                .get(relation.column_name())
                .and_then(as_pk)
                .map(Value::from)
                .unwrap_or(Value::Null);
            values.insert(relation.name.clone(), raw);
        }

        Some(Self {
            entity: entity.name.clone(),
            pk,
            values,
        })
    }
}

fn as_pk(value: &Value) -> Option<Pk> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Bring a value read back from storage into its canonical JSON form
fn normalize(kind: FieldKind, value: Value) -> Value {
    match (kind, value) {
        (_, Value::Null) => Value::Null,
        (FieldKind::Boolean, Value::Number(n)) => Value::Bool(n.as_i64().unwrap_or(0) != 0),
        (FieldKind::Float, Value::Number(n)) => n.as_f64().map(|f| json!(f)).unwrap_or(Value::Null),
        (FieldKind::Json, Value::String(s)) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        (_, value) => value,
    }
}

/// Convert a canonical JSON value into a storage value for `kind`
///
/// Fails with an `invalid` error on `field` when the value has the wrong shape.
pub(crate) fn to_db_value(field: &str, kind: FieldKind, value: &Value) -> Result<DbValue, ValidationErrors> {
    let invalid = || ValidationErrors::single(field, "Invalid value.", "invalid");

    let converted = match (kind, value) {
        (FieldKind::Integer | FieldKind::BigInteger | FieldKind::Duration, Value::Null) => {
            DbValue::BigInt(None)
        }
        (FieldKind::Integer | FieldKind::BigInteger | FieldKind::Duration, Value::Number(n)) => {
            DbValue::BigInt(Some(n.as_i64().ok_or_else(invalid)?))
        }
        (FieldKind::Float, Value::Null) => DbValue::Double(None),
        (FieldKind::Float, Value::Number(n)) => DbValue::Double(Some(n.as_f64().ok_or_else(invalid)?)),
        (FieldKind::Boolean, Value::Null) => DbValue::Bool(None),
        (FieldKind::Boolean, Value::Bool(b)) => DbValue::Bool(Some(*b)),
        (FieldKind::Text | FieldKind::Email | FieldKind::Date | FieldKind::DateTime, Value::Null) => {
            DbValue::String(None)
        }
        (FieldKind::Text | FieldKind::Email | FieldKind::Date | FieldKind::DateTime, Value::String(s)) => {
            DbValue::String(Some(Box::new(s.clone())))
        }
        (FieldKind::Json, Value::Null) => DbValue::String(None),
        (FieldKind::Json, other) => DbValue::String(Some(Box::new(other.to_string()))),
        _ => return Err(invalid()),
    };
    Ok(converted)
}

/// Storage value for a foreign key column
pub(crate) fn pk_value(pk: Option<Pk>) -> DbValue {
    DbValue::BigInt(pk)
}
