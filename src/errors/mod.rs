//! Error types for nested writes and mutations
//!
//! # Error Categories
//!
//! - **SchemaError**: misconfigured entities or serializers, never caused by input
//! - **MutationError**: runtime failures of a write (not found, validation,
//!   permission, database)
//! - **ValidationErrors**: field-addressed messages keyed by dotted path
//!
//! Database integrity violations are translated by the
//! [`ConstraintRegistry`] into validation errors before they reach callers.
//!
//! # Examples
//!
//! ```rust
//! use nesting::errors::{MutationError, ValidationErrors};
//!
//! let err = MutationError::from(ValidationErrors::single("name", "Too long.", "max_length"));
//! assert!(err.is_validation());
//!
//! let err = err.nested("forward_one_to_one_field");
//! assert!(err.validation_errors().unwrap().contains("forward_one_to_one_field.name"));
//! ```

pub mod common;
pub mod constraints;
pub mod mutation;
pub mod schema;
pub mod validation;

pub use constraints::{integrity_message, ConstraintRegistry, ConstraintViolation};
pub use mutation::MutationError;
pub use schema::SchemaError;
pub use validation::{camelize_path, ErrorDetail, FieldError, ValidationErrors};

#[cfg(feature = "graphql")]
pub use common::ToGraphQLError;

/// Result type alias for writes and mutations
pub type MutationResult<T> = Result<T, MutationError>;

/// Result type alias for schema construction
pub type SchemaResult<T> = Result<T, SchemaError>;
