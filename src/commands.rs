//! Command implementations behind the `nesting` binary

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::Settings;
use crate::database::{establish_connection, get_database_url};
use crate::errors::MutationError;
use crate::mutations::{CreateMutation, DeleteMutation, MutationContext, UpdateMutation};
use crate::schema::loader::load_schema;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOperation {
    Create,
    Update,
}

fn load_settings(settings: Option<&Path>) -> Result<Settings> {
    match settings {
        Some(path) => Settings::from_file(path),
        None => Ok(Settings::default()),
    }
}

/// Validation, permission and not-found failures become an `errors` payload;
/// anything else is a command failure
fn payload_or_error(result: Result<Value, MutationError>, settings: &Settings) -> Result<Value> {
    match result {
        Ok(value) => Ok(value),
        Err(err @ (MutationError::Validation(_)
        | MutationError::PermissionDenied { .. }
        | MutationError::NotFound { .. })) => {
            warn!("Mutation failed: {}", err);
            Ok(json!({
                "message": settings.mutation_validation_error_message,
                "code": err.error_code(settings),
                "errors": err.field_errors(settings),
            }))
        }
        Err(err) => Err(err.into()),
    }
}

/// Create every table of the schema
pub async fn init_db(schema: &Path, database: &str) -> Result<()> {
    let loaded = load_schema(schema).with_context(|| format!("loading {}", schema.display()))?;
    let db = establish_connection(&get_database_url(Some(database))).await?;
    loaded.registry.create_tables(&db).await?;
    info!(
        "Created tables for {} entities in {}",
        loaded.registry.entities().count(),
        database
    );
    Ok(())
}

/// Run a create or update through the named serializer
pub async fn write(
    operation: WriteOperation,
    schema: &Path,
    database: &str,
    serializer: &str,
    input: &Path,
    settings: Option<&Path>,
) -> Result<Value> {
    let loaded = load_schema(schema).with_context(|| format!("loading {}", schema.display()))?;
    let serializer = loaded.serializer(serializer)?.clone();
    let settings = load_settings(settings)?;
    let input: Value = serde_json::from_str(
        &fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?,
    )?;

    let db = establish_connection(&get_database_url(Some(database))).await?;
    let ctx = MutationContext::new(db, loaded.registry.clone()).with_settings(settings.clone());

    let result = match operation {
        WriteOperation::Create => CreateMutation::new(serializer).mutate(&ctx, &input).await,
        WriteOperation::Update => UpdateMutation::new(serializer).mutate(&ctx, &input).await,
    };
    payload_or_error(result, &settings)
}

/// Delete one row by primary key
pub async fn delete(schema: &Path, database: &str, entity: &str, pk: i64) -> Result<Value> {
    let loaded = load_schema(schema).with_context(|| format!("loading {}", schema.display()))?;
    let db = establish_connection(&get_database_url(Some(database))).await?;
    let ctx = MutationContext::new(db, loaded.registry.clone());
    let settings = Settings::default();

    let result = DeleteMutation::new(entity)
        .mutate(&ctx, &json!({ "pk": pk }))
        .await
        .map(|payload| json!({ "deleted": payload.deleted, "row_count": payload.row_count }));
    payload_or_error(result, &settings)
}
