//! Field-addressed validation errors
//!
//! Errors are stored flat, keyed by the dotted path of the offending field.
//! Errors raised inside a nested object are re-keyed under the relation
//! field that holds it, so a failure in `forward_one_to_one_field.name`
//! can be attributed to the right object by the caller.
//!
//! ```rust
//! use nesting::errors::ValidationErrors;
//!
//! let mut inner = ValidationErrors::new();
//! inner.add("post_code", "Enter a valid post code.", "invalid");
//!
//! let errors = inner.nested("billing_address");
//! assert!(errors.contains("billing_address.post_code"));
//! ```

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single error message with a machine readable code
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub code: String,
}

impl ErrorDetail {
    pub fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
        }
    }
}

/// One flattened error entry, as returned to API clients
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    pub code: String,
}

/// Ordered collection of validation errors keyed by dotted field path
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    errors: IndexMap<String, Vec<ErrorDetail>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for an error collection holding exactly one message
    pub fn single(
        field: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        let mut errors = Self::new();
        errors.add(field, message, code);
        errors
    }

    pub fn add(
        &mut self,
        field: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(ErrorDetail::new(message, code));
    }

    pub fn merge(&mut self, other: ValidationErrors) {
        for (field, details) in other.errors {
            self.errors.entry(field).or_default().extend(details);
        }
    }

    /// Re-key every error under `prefix`, e.g. `name` -> `parent.name`
    pub fn nested(self, prefix: &str) -> Self {
        let errors = self
            .errors
            .into_iter()
            .map(|(field, details)| (format!("{}.{}", prefix, field), details))
            .collect();
        Self { errors }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.values().map(Vec::len).sum()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&[ErrorDetail]> {
        self.errors.get(field).map(Vec::as_slice)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(String::as_str)
    }

    /// `Ok(value)` when no error was collected
    pub fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }

    /// Flatten into one entry per message, optionally camelCasing paths
    pub fn to_field_errors(&self, camelcase: bool) -> Vec<FieldError> {
        self.errors
            .iter()
            .flat_map(|(field, details)| {
                let field = if camelcase {
                    camelize_path(field)
                } else {
                    field.clone()
                };
                details.iter().map(move |detail| FieldError {
                    field: field.clone(),
                    message: detail.message.clone(),
                    code: detail.code.clone(),
                })
            })
            .collect()
    }

    /// Group messages per field, the shape used by mutation payloads
    pub fn messages_by_field(&self, camelcase: bool) -> IndexMap<String, Vec<String>> {
        self.errors
            .iter()
            .map(|(field, details)| {
                let field = if camelcase {
                    camelize_path(field)
                } else {
                    field.clone()
                };
                let messages = details.iter().map(|d| d.message.clone()).collect();
                (field, messages)
            })
            .collect()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, details) in &self.errors {
            for detail in details {
                if !first {
                    write!(f, "; ")?;
                }
                write!(f, "{}: {}", field, detail.message)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// `billing_address.post_code` -> `billingAddress.postCode`
pub fn camelize_path(path: &str) -> String {
    path.split('.')
        .map(camelize)
        .collect::<Vec<_>>()
        .join(".")
}

fn camelize(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut upper = false;
    for (i, c) in segment.chars().enumerate() {
        if c == '_' && i > 0 {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}
