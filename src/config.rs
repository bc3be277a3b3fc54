use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Error codes, messages and error shaping options
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub query_permission_error_message: String,
    pub query_permission_error_code: String,
    pub filter_permission_error_message: String,
    pub filter_permission_error_code: String,
    pub field_permission_error_message: String,
    pub field_permission_error_code: String,
    pub mutation_permission_denied_message: String,
    pub mutation_permission_denied_code: String,
    pub create_permission_denied_message: String,
    pub create_permission_denied_code: String,
    pub update_permission_denied_message: String,
    pub update_permission_denied_code: String,
    pub delete_permission_denied_message: String,
    pub delete_permission_denied_code: String,
    pub mutation_validation_error_message: String,
    pub mutation_validation_error_code: String,
    pub not_found_error_code: String,
    /// Key used for errors that belong to no single field
    pub non_field_errors_key: String,
    /// camelCase every segment of error field paths
    pub camelcase_errors: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            query_permission_error_message: "No permission to access node.".to_string(),
            query_permission_error_code: "NODE_PERMISSION_DENIED".to_string(),
            filter_permission_error_message: "No permission to access node.".to_string(),
            filter_permission_error_code: "FILTER_PERMISSION_DENIED".to_string(),
            field_permission_error_message: "No permission to access field.".to_string(),
            field_permission_error_code: "FIELD_PERMISSION_DENIED".to_string(),
            mutation_permission_denied_message: "No permission to mutate.".to_string(),
            mutation_permission_denied_code: "MUTATION_PERMISSION_DENIED".to_string(),
            create_permission_denied_message: "No permission to create.".to_string(),
            create_permission_denied_code: "CREATE_PERMISSION_DENIED".to_string(),
            update_permission_denied_message: "No permission to update.".to_string(),
            update_permission_denied_code: "UPDATE_PERMISSION_DENIED".to_string(),
            delete_permission_denied_message: "No permission to delete.".to_string(),
            delete_permission_denied_code: "DELETE_PERMISSION_DENIED".to_string(),
            mutation_validation_error_message: "Mutation was unsuccessful.".to_string(),
            mutation_validation_error_code: "MUTATION_VALIDATION_ERROR".to_string(),
            not_found_error_code: "NOT_FOUND".to_string(),
            non_field_errors_key: "non_field_errors".to_string(),
            camelcase_errors: true,
        }
    }
}

impl Settings {
    /// Load settings from a `.yaml`/`.yml` or `.toml` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&contents)
                .with_context(|| format!("Invalid YAML settings in {}", path.display())),
            Some("toml") => toml::from_str(&contents)
                .with_context(|| format!("Invalid TOML settings in {}", path.display())),
            other => Err(anyhow!(
                "Unsupported settings format {:?} for {}",
                other,
                path.display()
            )),
        }
    }
}
