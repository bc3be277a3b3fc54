//! GraphQL payload types for mutation results

use async_graphql::SimpleObject;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::errors::MutationError;
pub use crate::errors::ToGraphQLError;
pub use crate::mutations::DeletePayload;

/// All messages for one field of a failed mutation
#[derive(SimpleObject, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorType {
    /// Dotted path of the field, or the non-field key
    pub field: String,
    /// May contain more than one message for the same field
    pub messages: Vec<String>,
}

impl ErrorType {
    /// Group the field errors of `err` by field, in first-seen order
    pub fn from_error(err: &MutationError, settings: &Settings) -> Vec<ErrorType> {
        let mut grouped: IndexMap<String, Vec<String>> = IndexMap::new();
        for error in err.field_errors(settings) {
            grouped.entry(error.field).or_default().push(error.message);
        }
        grouped
            .into_iter()
            .map(|(field, messages)| ErrorType { field, messages })
            .collect()
    }
}
