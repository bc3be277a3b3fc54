//! Create, update and delete mutations
//!
//! A mutation ties a [`Serializer`] to the nested writer: it checks
//! permissions, resolves the instance being changed, validates the input,
//! writes the object graph and represents the result.

pub mod permissions;

use std::sync::Arc;

use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Settings;
use crate::database::persistence;
use crate::database::Record;
use crate::errors::{MutationError, MutationResult, ValidationErrors};
use crate::schema::{EntityDef, SchemaRegistry};
use crate::serializers::{Mode, Serializer};
use crate::services::nested_writer::NestedWriter;
pub use permissions::{
    Actor, AllowAny, AllowAuthenticated, AllowStaff, AllowSuperuser, MutationPermission,
};

/// Extra check run before a row is deleted
pub type DeleteValidator = Arc<dyn Fn(&Record, &Value) -> Result<(), ValidationErrors> + Send + Sync>;

/// Everything a mutation needs from its caller
#[derive(Clone)]
pub struct MutationContext {
    pub db: DatabaseConnection,
    pub registry: Arc<SchemaRegistry>,
    pub settings: Arc<Settings>,
    pub actor: Actor,
    writer: NestedWriter,
}

impl MutationContext {
    pub fn new(db: DatabaseConnection, registry: Arc<SchemaRegistry>) -> Self {
        let settings = Settings::default();
        let writer = NestedWriter::new(db.clone(), registry.clone())
            .with_non_field_key(settings.non_field_errors_key.as_str());
        Self {
            db,
            registry,
            settings: Arc::new(settings),
            actor: Actor::anonymous(),
            writer,
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.writer = self
            .writer
            .with_non_field_key(settings.non_field_errors_key.as_str());
        self.settings = Arc::new(settings);
        self
    }

    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = actor;
        self
    }

    fn writer(&self) -> &NestedWriter {
        &self.writer
    }
}

/// Result of a delete mutation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "graphql", derive(async_graphql::SimpleObject))]
pub struct DeletePayload {
    /// Whether the object was deleted
    pub deleted: bool,
    /// Number of rows deleted
    pub row_count: u64,
}

fn denied(code: &str, message: &str) -> MutationError {
    MutationError::PermissionDenied {
        code: code.to_string(),
        message: message.to_string(),
    }
}

/// Row selected by `lookup_field` in the mutation input
async fn get_instance(
    ctx: &MutationContext,
    entity: &EntityDef,
    lookup_field: &str,
    input: &Value,
) -> MutationResult<Record> {
    let value = input
        .get(lookup_field)
        .filter(|v| !v.is_null())
        .ok_or_else(|| ValidationErrors::single(lookup_field, "This field is required.", "required"))?;

    let does_not_exist = || -> MutationError {
        ValidationErrors::single(
            ctx.settings.non_field_errors_key.as_str(),
            "Object does not exist.",
            "invalid",
        )
        .into()
    };

    let is_primary_key = entity.column_for(lookup_field).as_deref() == Some(entity.primary_key.as_str());
    let value = if is_primary_key {
        let pk = match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        Value::from(pk.ok_or_else(does_not_exist)?)
    } else {
        value.clone()
    };

    persistence::find_by(&ctx.db, entity, lookup_field, value)
        .await?
        .ok_or_else(does_not_exist)
}

/// Create a row, and its nested relations, from serializer input
pub struct CreateMutation {
    serializer: Arc<Serializer>,
    permissions: Vec<Arc<dyn MutationPermission>>,
}

impl CreateMutation {
    pub fn new(serializer: Arc<Serializer>) -> Self {
        Self {
            serializer,
            permissions: Vec::new(),
        }
    }

    /// Require `permission`; with none the mutation allows anyone
    pub fn permission(mut self, permission: impl MutationPermission + 'static) -> Self {
        self.permissions.push(Arc::new(permission));
        self
    }

    pub async fn mutate(&self, ctx: &MutationContext, input: &Value) -> MutationResult<Value> {
        for permission in &self.permissions {
            if !permission.has_create_permission(&ctx.actor, input).await {
                return Err(denied(
                    &ctx.settings.create_permission_denied_code,
                    &ctx.settings.create_permission_denied_message,
                ));
            }
        }

        let tree = self.serializer.validate_with(
            &ctx.registry,
            input,
            Mode::Create,
            &ctx.settings.non_field_errors_key,
        )?;
        debug!("{} validated create input", self.serializer.name());

        let record = ctx.writer().create(self.serializer.entity(), tree).await?;
        info!("Created {} {}", record.entity, record.pk);
        self.serializer.represent(&ctx.db, &ctx.registry, &record).await
    }
}

/// Partially update the row selected by the lookup field
pub struct UpdateMutation {
    serializer: Arc<Serializer>,
    lookup_field: String,
    permissions: Vec<Arc<dyn MutationPermission>>,
}

impl UpdateMutation {
    pub fn new(serializer: Arc<Serializer>) -> Self {
        Self {
            serializer,
            lookup_field: "pk".to_string(),
            permissions: Vec::new(),
        }
    }

    pub fn lookup_field(mut self, field: impl Into<String>) -> Self {
        self.lookup_field = field.into();
        self
    }

    pub fn permission(mut self, permission: impl MutationPermission + 'static) -> Self {
        self.permissions.push(Arc::new(permission));
        self
    }

    pub async fn mutate(&self, ctx: &MutationContext, input: &Value) -> MutationResult<Value> {
        let entity = ctx.registry.entity(self.serializer.entity())?;
        let instance = get_instance(ctx, entity, &self.lookup_field, input).await?;

        for permission in &self.permissions {
            if !permission.has_update_permission(&instance, &ctx.actor, input).await {
                return Err(denied(
                    &ctx.settings.update_permission_denied_code,
                    &ctx.settings.update_permission_denied_message,
                ));
            }
        }

        let tree = self.serializer.validate_with(
            &ctx.registry,
            input,
            Mode::Update,
            &ctx.settings.non_field_errors_key,
        )?;
        let record = ctx.writer().update(&entity.name, instance.pk, tree).await?;
        info!("Updated {} {}", record.entity, record.pk);
        self.serializer.represent(&ctx.db, &ctx.registry, &record).await
    }
}

/// Delete the row selected by the lookup field
pub struct DeleteMutation {
    entity: String,
    lookup_field: String,
    permissions: Vec<Arc<dyn MutationPermission>>,
    validator: Option<DeleteValidator>,
}

impl DeleteMutation {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            lookup_field: "pk".to_string(),
            permissions: Vec::new(),
            validator: None,
        }
    }

    pub fn lookup_field(mut self, field: impl Into<String>) -> Self {
        self.lookup_field = field.into();
        self
    }

    pub fn permission(mut self, permission: impl MutationPermission + 'static) -> Self {
        self.permissions.push(Arc::new(permission));
        self
    }

    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Record, &Value) -> Result<(), ValidationErrors> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub async fn mutate(&self, ctx: &MutationContext, input: &Value) -> MutationResult<DeletePayload> {
        let entity = ctx.registry.entity(&self.entity)?;
        let instance = get_instance(ctx, entity, &self.lookup_field, input).await?;

        for permission in &self.permissions {
            if !permission.has_delete_permission(&instance, &ctx.actor, input).await {
                return Err(denied(
                    &ctx.settings.delete_permission_denied_code,
                    &ctx.settings.delete_permission_denied_message,
                ));
            }
        }
        if let Some(validator) = &self.validator {
            validator(&instance, input)?;
        }

        let row_count = match persistence::delete(&ctx.db, entity, instance.pk).await {
            Ok(count) => count,
            Err(err) => {
                let translated = ctx
                    .writer()
                    .constraints()
                    .translate(&err, &ctx.settings.non_field_errors_key);
                return Err(match translated {
                    Some(errors) => MutationError::Validation(errors),
                    None => MutationError::Database(err),
                });
            }
        };
        info!("Deleted {} {} ({} rows)", entity.name, instance.pk, row_count);

        Ok(DeletePayload {
            deleted: row_count > 0,
            row_count,
        })
    }
}
