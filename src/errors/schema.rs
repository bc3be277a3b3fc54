//! Schema configuration errors
//!
//! These indicate a misconfigured schema or serializer rather than bad
//! input. Callers are not expected to recover from them.

use thiserror::Error;

/// Schema and serializer configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Entity name is not registered
    #[error("Unknown entity '{0}'")]
    UnknownEntity(String),

    /// Entity registered twice
    #[error("Entity '{0}' is declared more than once")]
    DuplicateEntity(String),

    /// A relation points at an unregistered entity
    #[error("Relation {entity}.{relation} targets unknown entity '{target}'")]
    UnknownTarget {
        entity: String,
        relation: String,
        target: String,
    },

    /// Field name is neither a column nor a relation of the entity
    #[error("Entity '{entity}' has no field named '{field}'")]
    UnknownField { entity: String, field: String },

    /// Two attributes of one entity resolve to the same name
    #[error("Field name '{field}' on '{entity}' clashes with another field or reverse accessor")]
    AccessorClash { entity: String, field: String },

    /// `symmetrical` only applies to self-referencing many-to-many relations
    #[error("Relation {entity}.{relation} is symmetrical but does not target its own entity")]
    SymmetricalTarget { entity: String, relation: String },

    /// A write supplied a value shape that does not fit the relation
    #[error("Field {entity}.{field} expects {expected}")]
    ShapeMismatch {
        entity: String,
        field: String,
        expected: String,
    },

    /// Serializer name is not registered
    #[error("Unknown serializer '{0}'")]
    UnknownSerializer(String),

    /// A nested serializer is bound to the wrong entity
    #[error("Serializer '{serializer}' for {entity}.{field} serializes '{found}', expected '{expected}'")]
    SerializerMismatch {
        serializer: String,
        entity: String,
        field: String,
        expected: String,
        found: String,
    },

    /// Nested serializers refer back to themselves
    #[error("Serializer cycle detected: {0}")]
    SerializerCycle(String),

    /// Schema document could not be read or parsed
    #[error("Invalid schema document: {0}")]
    InvalidDocument(String),
}
