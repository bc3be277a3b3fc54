//! GraphQL conversion of mutation errors
//!
//! ```rust,ignore
//! use nesting::config::Settings;
//! use nesting::errors::{MutationError, ToGraphQLError};
//!
//! let err = MutationError::not_found("Example", "pk=1");
//! let graphql_err = err.to_graphql_error(&Settings::default());
//! ```

#[cfg(feature = "graphql")]
use async_graphql::{Error as GraphQLError, ErrorExtensions, Value};

#[cfg(feature = "graphql")]
use super::MutationError;
#[cfg(feature = "graphql")]
use crate::config::Settings;

/// Convert mutation errors to GraphQL errors with error codes
#[cfg(feature = "graphql")]
pub trait ToGraphQLError {
    /// Convert to GraphQL error with structured extensions
    fn to_graphql_error(&self, settings: &Settings) -> GraphQLError;
}

#[cfg(feature = "graphql")]
impl ToGraphQLError for MutationError {
    fn to_graphql_error(&self, settings: &Settings) -> GraphQLError {
        let code = self.error_code(settings);
        let message = match self {
            MutationError::Validation(_) => settings.mutation_validation_error_message.clone(),
            other => other.to_string(),
        };

        GraphQLError::new(message).extend_with(|_, e| {
            e.set("code", code);

            if let MutationError::Validation(_) = self {
                let errors = serde_json::to_value(self.field_errors(settings))
                    .ok()
                    .and_then(|json| Value::from_json(json).ok());
                if let Some(errors) = errors {
                    e.set("errors", errors);
                }
            }
        })
    }
}

#[cfg(all(test, feature = "graphql"))]
mod tests {
    use super::*;
    use crate::errors::ValidationErrors;

    #[test]
    fn test_validation_error_extensions() {
        let settings = Settings::default();
        let err = MutationError::from(ValidationErrors::single("email_address", "Taken.", "invalid"));
        let graphql_err = err.to_graphql_error(&settings);

        assert_eq!(graphql_err.message, "Mutation was unsuccessful.");
        let extensions = graphql_err.extensions.expect("extensions");
        assert_eq!(
            extensions.get("code"),
            Some(&Value::from("MUTATION_VALIDATION_ERROR"))
        );
        let errors = extensions.get("errors").expect("errors").clone().into_json().unwrap();
        assert_eq!(errors[0]["field"], "emailAddress");
        assert_eq!(errors[0]["message"], "Taken.");
    }

    #[test]
    fn test_not_found_extensions() {
        let settings = Settings::default();
        let graphql_err = MutationError::not_found("Example", "pk=1").to_graphql_error(&settings);
        let extensions = graphql_err.extensions.expect("extensions");
        assert_eq!(extensions.get("code"), Some(&Value::from("NOT_FOUND")));
        assert!(extensions.get("errors").is_none());
    }
}
