//! Runtime errors raised by nested writes and mutations

use sea_orm::DbErr;
use thiserror::Error;

use super::schema::SchemaError;
use super::validation::{FieldError, ValidationErrors};
use crate::config::Settings;

/// Errors surfaced to the caller of a write
#[derive(Error, Debug)]
pub enum MutationError {
    /// A referenced row does not exist
    #[error("`{entity}` object matching query `{lookup}` does not exist.")]
    NotFound { entity: String, lookup: String },

    /// Field-level validation failed, including translated constraint violations
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// The actor may not perform the operation
    #[error("{message}")]
    PermissionDenied { code: String, message: String },

    /// Schema misconfiguration
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl From<ValidationErrors> for MutationError {
    fn from(errors: ValidationErrors) -> Self {
        MutationError::Validation(errors)
    }
}

impl MutationError {
    pub fn not_found(entity: impl Into<String>, lookup: impl Into<String>) -> Self {
        MutationError::NotFound {
            entity: entity.into(),
            lookup: lookup.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, MutationError::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, MutationError::Validation(_))
    }

    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            MutationError::Validation(errors) => Some(errors),
            _ => None,
        }
    }

    /// Re-key validation errors under a relation path, other variants pass through
    pub fn nested(self, prefix: &str) -> Self {
        match self {
            MutationError::Validation(errors) => MutationError::Validation(errors.nested(prefix)),
            other => other,
        }
    }

    /// Get error code for GraphQL/API responses
    pub fn error_code(&self, settings: &Settings) -> String {
        match self {
            MutationError::NotFound { .. } => settings.not_found_error_code.clone(),
            MutationError::Validation(_) => settings.mutation_validation_error_code.clone(),
            MutationError::PermissionDenied { code, .. } => code.clone(),
            MutationError::Schema(_) => "SCHEMA_ERROR".to_string(),
            MutationError::Database(_) => "DATABASE_ERROR".to_string(),
        }
    }

    /// Flattened field errors for mutation payloads
    pub fn field_errors(&self, settings: &Settings) -> Vec<FieldError> {
        match self {
            MutationError::Validation(errors) => errors.to_field_errors(settings.camelcase_errors),
            MutationError::PermissionDenied { code, message } => vec![FieldError {
                field: settings.non_field_errors_key.clone(),
                message: message.clone(),
                code: code.clone(),
            }],
            MutationError::NotFound { .. } => vec![FieldError {
                field: settings.non_field_errors_key.clone(),
                message: self.to_string(),
                code: settings.not_found_error_code.clone(),
            }],
            MutationError::Schema(_) | MutationError::Database(_) => Vec::new(),
        }
    }
}
