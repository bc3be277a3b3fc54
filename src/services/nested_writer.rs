//! Atomic nested writes of an object graph
//!
//! A write runs in three passes per entity, recursively:
//!
//! 1. **pre-save**: forward one-to-one and many-to-one relations are written
//!    first, and their primary keys become column values of the row itself.
//!    Every other relation is deferred.
//! 2. **root write**: the row is inserted or partially updated.
//! 3. **post-save**: deferred relations are written now that the row has a
//!    primary key. Reverse one-to-one rows are re-pointed, one-to-many
//!    children are created/updated and the rest deleted, and many-to-many
//!    membership is replaced.
//!
//! The whole graph is written in one transaction. On failure it is rolled
//! back before integrity violations are translated into validation errors.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use sea_orm::{ConnectionTrait, DatabaseConnection, TransactionTrait};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::database::persistence::{self, Assignments};
use crate::database::{Pk, Record};
use crate::errors::{
    ConstraintRegistry, MutationError, MutationResult, SchemaError, ValidationErrors,
};
use crate::schema::{Cardinality, EntityDef, RelationDescriptor, RelationLink, SchemaRegistry};
use crate::serializers::input::{InputTree, InputValue, NestedInput};

/// A relation whose write waits for the owning row's primary key
#[derive(Debug)]
struct PendingRelation<'r> {
    descriptor: &'r RelationDescriptor,
    value: InputValue,
}

/// Service writing nested input trees in a single transaction
#[derive(Clone)]
pub struct NestedWriter {
    db: DatabaseConnection,
    registry: Arc<SchemaRegistry>,
    constraints: Arc<ConstraintRegistry>,
    non_field_key: String,
}

impl NestedWriter {
    pub fn new(db: DatabaseConnection, registry: Arc<SchemaRegistry>) -> Self {
        let constraints = Arc::new(ConstraintRegistry::from_schema(&registry));
        Self {
            db,
            registry,
            constraints,
            non_field_key: "non_field_errors".to_string(),
        }
    }

    /// Key used for translated violations that belong to no field
    pub fn with_non_field_key(mut self, key: impl Into<String>) -> Self {
        self.non_field_key = key.into();
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn constraints(&self) -> &ConstraintRegistry {
        &self.constraints
    }

    /// Create a new root row with all of its nested relations
    pub async fn create(&self, entity: &str, input: InputTree) -> MutationResult<Record> {
        let entity = self.registry.entity(entity)?;
        let txn = self.db.begin().await?;

        let result = self.save(&txn, entity, None, input, Assignments::new()).await;
        self.finish(txn, entity, result).await
    }

    /// Partially update the root row `pk` and write its nested relations
    pub async fn update(&self, entity: &str, pk: Pk, input: InputTree) -> MutationResult<Record> {
        let entity = self.registry.entity(entity)?;
        let txn = self.db.begin().await?;

        let result = match persistence::get_or_404(&txn, entity, pk).await {
            Ok(_) => self.save(&txn, entity, Some(pk), input, Assignments::new()).await,
            Err(e) => Err(e),
        };
        self.finish(txn, entity, result).await
    }

    async fn finish(
        &self,
        txn: sea_orm::DatabaseTransaction,
        entity: &EntityDef,
        result: MutationResult<Record>,
    ) -> MutationResult<Record> {
        match result {
            Ok(record) => {
                if let Err(e) = txn.commit().await {
                    return Err(self.translate(MutationError::Database(e)));
                }
                info!("Saved {} {} with nested relations", entity.name, record.pk);
                Ok(record)
            }
            Err(err) => {
                warn!("Rolling back nested write of {}: {}", entity.name, err);
                if let Err(rollback_err) = txn.rollback().await {
                    error!("Rollback of {} failed: {}", entity.name, rollback_err);
                }
                Err(self.translate(err))
            }
        }
    }

    /// Turn integrity violations into field-addressed validation errors
    fn translate(&self, err: MutationError) -> MutationError {
        match err {
            MutationError::Database(db_err) => {
                match self.constraints.translate(&db_err, &self.non_field_key) {
                    Some(errors) => MutationError::Validation(errors),
                    None => MutationError::Database(db_err),
                }
            }
            other => other,
        }
    }

    /// pre-save, root write, post-save for one entity
    async fn save<C: ConnectionTrait>(
        &self,
        conn: &C,
        entity: &EntityDef,
        existing: Option<Pk>,
        input: InputTree,
        preset: Assignments,
    ) -> MutationResult<Record> {
        let (mut assignments, pending) = self.pre_save(conn, entity, input).await?;
        assignments.extend(preset);

        let record = match existing {
            Some(pk) => persistence::update(conn, entity, pk, &assignments).await?,
            None => persistence::insert(conn, entity, &assignments).await?,
        };
        debug!("Wrote {} {}", entity.name, record.pk);

        self.post_save(conn, &record, pending).await?;
        Ok(record)
    }

    /// Recursive entry point for one nested object
    fn get_update_or_create<'s, C: ConnectionTrait>(
        &'s self,
        conn: &'s C,
        entity: &'s EntityDef,
        nested: NestedInput,
        preset: Assignments,
    ) -> BoxFuture<'s, MutationResult<Record>> {
        Box::pin(async move {
            match nested {
                NestedInput::ByPrimaryKey { pk, fields } => {
                    persistence::get_or_404(conn, entity, pk).await?;
                    self.save(conn, entity, Some(pk), fields, preset).await
                }
                NestedInput::NewEntity(fields) => self.save(conn, entity, None, fields, preset).await,
            }
        })
    }

    fn target(&self, descriptor: &RelationDescriptor) -> MutationResult<&EntityDef> {
        Ok(self.registry.entity(&descriptor.target)?)
    }

    async fn pre_save<'r, C: ConnectionTrait>(
        &'r self,
        conn: &C,
        entity: &EntityDef,
        input: InputTree,
    ) -> MutationResult<(Assignments, Vec<PendingRelation<'r>>)> {
        let relations = self.registry.relations(&entity.name)?;
        let mut assignments = Assignments::new();
        let mut pending = Vec::new();

        for (field, value) in input {
            if entity.fields.contains_key(&field) {
                let value = match value {
                    InputValue::Scalar(v) => v,
                    InputValue::Null => Value::Null,
                    other => return Err(shape_mismatch(entity, &field, "a scalar value", &other)),
                };
                assignments.insert(field, value);
                continue;
            }

            let descriptor = relations.get(&field).ok_or_else(|| SchemaError::UnknownField {
                entity: entity.name.clone(),
                field: field.clone(),
            })?;

            if !descriptor.resolves_before_save() {
                debug!("Deferring {}.{}", entity.name, field);
                pending.push(PendingRelation { descriptor, value });
                continue;
            }

            let target = self.target(descriptor)?;
            let pk = match value {
                InputValue::Null => None,
                InputValue::Key(pk) => {
                    persistence::get_or_404(conn, target, pk)
                        .await
                        .map_err(|e| e.nested(&field))?;
                    Some(pk)
                }
                InputValue::Nested(nested) => {
                    let record = self
                        .get_update_or_create(conn, target, *nested, Assignments::new())
                        .await
                        .map_err(|e| e.nested(&field))?;
                    Some(record.pk)
                }
                other => {
                    return Err(shape_mismatch(
                        entity,
                        &field,
                        "a key or a single nested object",
                        &other,
                    ))
                }
            };
            debug!("Resolved {}.{} to {:?}", entity.name, field, pk);
            assignments.insert(field, pk.map(Value::from).unwrap_or(Value::Null));
        }

        Ok((assignments, pending))
    }

    async fn post_save<C: ConnectionTrait>(
        &self,
        conn: &C,
        root: &Record,
        pending: Vec<PendingRelation<'_>>,
    ) -> MutationResult<()> {
        for PendingRelation { descriptor, value } in pending {
            let field = descriptor.field.as_str();
            match descriptor.cardinality {
                Cardinality::OneToOne => {
                    self.save_reverse_one_to_one(conn, root, descriptor, value).await?
                }
                Cardinality::OneToMany => self.save_one_to_many(conn, root, descriptor, value).await?,
                Cardinality::ManyToMany => {
                    self.save_many_to_many(conn, root, descriptor, value).await?
                }
                Cardinality::ManyToOne => {
                    return Err(SchemaError::ShapeMismatch {
                        entity: root.entity.clone(),
                        field: field.to_string(),
                        expected: "a relation resolved before save".to_string(),
                    }
                    .into())
                }
            }
        }
        Ok(())
    }

    /// Remove every row linked to `owner` through `column` except `keep`
    ///
    /// Rows are detached when the back-reference is nullable, deleted otherwise.
    async fn release_others<C: ConnectionTrait>(
        &self,
        conn: &C,
        target: &EntityDef,
        column: &str,
        nullable: bool,
        owner: Pk,
        keep: &[Pk],
    ) -> MutationResult<u64> {
        let affected = if nullable {
            persistence::detach_related_except(conn, target, column, owner, keep).await?
        } else {
            persistence::delete_related_except(conn, target, column, owner, keep).await?
        };
        Ok(affected)
    }

    /// Detach the row currently linked through a reverse one-to-one unless it is in `keep`
    ///
    /// A non-nullable back-reference cannot be cleared, so replacing its row
    /// is a validation error on the relation field.
    async fn detach_previous<C: ConnectionTrait>(
        &self,
        conn: &C,
        root: &Record,
        descriptor: &RelationDescriptor,
        keep: &[Pk],
    ) -> MutationResult<()> {
        let target = self.target(descriptor)?;
        let (column, nullable) = remote_column(descriptor)?;

        if nullable {
            let detached = persistence::detach_related_except(conn, target, column, root.pk, keep).await?;
            debug!("Detached {} {} from {} {}", detached, target.name, root.entity, root.pk);
            return Ok(());
        }
        let linked = persistence::related_records(conn, target, column, root.pk).await?;
        if linked.iter().any(|record| !keep.contains(&record.pk)) {
            return Err(ValidationErrors::single(
                descriptor.field.as_str(),
                format!(
                    "{} is already linked to this {} and cannot be detached.",
                    target.name, root.entity
                ),
                "invalid",
            )
            .into());
        }
        Ok(())
    }

    async fn save_reverse_one_to_one<C: ConnectionTrait>(
        &self,
        conn: &C,
        root: &Record,
        descriptor: &RelationDescriptor,
        value: InputValue,
    ) -> MutationResult<()> {
        let field = descriptor.field.as_str();
        let target = self.target(descriptor)?;
        let (column, nullable) = remote_column(descriptor)?;

        match value {
            InputValue::Null => {
                if !nullable {
                    return Err(ValidationErrors::single(field, "This field may not be null.", "null").into());
                }
                let detached = persistence::detach_related_except(conn, target, column, root.pk, &[]).await?;
                debug!("Detached {} {} from {} {}", detached, target.name, root.entity, root.pk);
            }
            InputValue::Key(pk) => {
                persistence::get_or_404(conn, target, pk)
                    .await
                    .map_err(|e| e.nested(field))?;
                self.detach_previous(conn, root, descriptor, &[pk]).await?;
                persistence::relink(conn, target, pk, column, Some(root.pk)).await?;
            }
            InputValue::Nested(nested) => {
                let keep: Vec<Pk> = nested.pk().into_iter().collect();
                self.detach_previous(conn, root, descriptor, &keep).await?;
                let preset = back_reference(descriptor, root.pk);
                self.get_update_or_create(conn, target, *nested, preset)
                    .await
                    .map_err(|e| e.nested(field))?;
            }
            other => {
                return Err(shape_mismatch_for(
                    &root.entity,
                    field,
                    "a key or a single nested object",
                    &other,
                ))
            }
        }
        Ok(())
    }

    async fn save_one_to_many<C: ConnectionTrait>(
        &self,
        conn: &C,
        root: &Record,
        descriptor: &RelationDescriptor,
        value: InputValue,
    ) -> MutationResult<()> {
        let field = descriptor.field.as_str();
        let target = self.target(descriptor)?;
        let (column, nullable) = remote_column(descriptor)?;

        match value {
            InputValue::Null => {}
            InputValue::NestedList(items) => {
                let mut touched = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    let preset = back_reference(descriptor, root.pk);
                    let record = self
                        .get_update_or_create(conn, target, item, preset)
                        .await
                        .map_err(|e| e.nested(&format!("{}.{}", field, index)))?;
                    touched.push(record.pk);
                }
                let deleted =
                    persistence::delete_related_except(conn, target, column, root.pk, &touched).await?;
                debug!(
                    "{}.{}: kept {:?}, deleted {} orphans",
                    root.entity, field, touched, deleted
                );
            }
            InputValue::KeyList(pks) => {
                for (index, pk) in pks.iter().enumerate() {
                    persistence::get_or_404(conn, target, *pk)
                        .await
                        .map_err(|e| e.nested(&format!("{}.{}", field, index)))?;
                    persistence::relink(conn, target, *pk, column, Some(root.pk)).await?;
                }
                self.release_others(conn, target, column, nullable, root.pk, &pks)
                    .await?;
                debug!("{}.{}: membership set to {:?}", root.entity, field, pks);
            }
            other => {
                return Err(shape_mismatch_for(
                    &root.entity,
                    field,
                    "a list of keys or nested objects",
                    &other,
                ))
            }
        }
        Ok(())
    }

    async fn save_many_to_many<C: ConnectionTrait>(
        &self,
        conn: &C,
        root: &Record,
        descriptor: &RelationDescriptor,
        value: InputValue,
    ) -> MutationResult<()> {
        let field = descriptor.field.as_str();
        let target = self.target(descriptor)?;

        let members = match value {
            InputValue::Null => return Ok(()),
            InputValue::NestedList(items) => {
                let mut members = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    let record = self
                        .get_update_or_create(conn, target, item, Assignments::new())
                        .await
                        .map_err(|e| e.nested(&format!("{}.{}", field, index)))?;
                    members.push(record.pk);
                }
                members
            }
            InputValue::KeyList(pks) => {
                for (index, pk) in pks.iter().enumerate() {
                    persistence::get_or_404(conn, target, *pk)
                        .await
                        .map_err(|e| e.nested(&format!("{}.{}", field, index)))?;
                }
                pks
            }
            other => {
                return Err(shape_mismatch_for(
                    &root.entity,
                    field,
                    "a list of keys or nested objects",
                    &other,
                ))
            }
        };

        persistence::set_membership(conn, &descriptor.link, root.pk, &members).await?;
        debug!("{}.{}: linked {:?}", root.entity, field, members);
        Ok(())
    }
}

/// Assignment pointing a related row's back-reference at `owner`
fn back_reference(descriptor: &RelationDescriptor, owner: Pk) -> Assignments {
    let mut preset = Assignments::new();
    preset.insert(descriptor.remote_field.clone(), Value::from(owner));
    preset
}

fn remote_column(descriptor: &RelationDescriptor) -> MutationResult<(&str, bool)> {
    match &descriptor.link {
        RelationLink::RemoteColumn { column, nullable } => Ok((column.as_str(), *nullable)),
        _ => Err(SchemaError::ShapeMismatch {
            entity: descriptor.target.clone(),
            field: descriptor.remote_field.clone(),
            expected: "a foreign key back-reference".to_string(),
        }
        .into()),
    }
}

fn shape_mismatch(entity: &EntityDef, field: &str, expected: &str, got: &InputValue) -> MutationError {
    shape_mismatch_for(&entity.name, field, expected, got)
}

fn shape_mismatch_for(entity: &str, field: &str, expected: &str, got: &InputValue) -> MutationError {
    SchemaError::ShapeMismatch {
        entity: entity.to_string(),
        field: field.to_string(),
        expected: format!("{}, got {}", expected, got.shape()),
    }
    .into()
}
