use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use sea_orm::ConnectionTrait;
use serde_json::{Map, Value};

use super::Serializer;
use crate::database::persistence;
use crate::database::Record;
use crate::errors::{MutationResult, SchemaError};
use crate::schema::{RelationDescriptor, RelationLink, SchemaRegistry};

/// Related rows of `record` through `descriptor`
async fn related<C: ConnectionTrait>(
    conn: &C,
    registry: &SchemaRegistry,
    record: &Record,
    descriptor: &RelationDescriptor,
) -> MutationResult<Vec<Record>> {
    let target = registry.entity(&descriptor.target)?;
    match &descriptor.link {
        RelationLink::LocalColumn { .. } => match record.fk(&descriptor.field) {
            Some(pk) => Ok(persistence::get(conn, target, pk).await?.into_iter().collect()),
            None => Ok(Vec::new()),
        },
        RelationLink::RemoteColumn { column, .. } => {
            persistence::related_records(conn, target, column, record.pk).await
        }
        RelationLink::JoinTable { .. } => {
            let pks = persistence::linked_pks(conn, &descriptor.link, record.pk).await?;
            persistence::records_by_pks(conn, target, &pks).await
        }
    }
}

impl Serializer {
    /// Output mapping of `record`, nested relations represented recursively
    pub fn represent<'s, C: ConnectionTrait>(
        &'s self,
        conn: &'s C,
        registry: &'s SchemaRegistry,
        record: &'s Record,
    ) -> BoxFuture<'s, MutationResult<Value>> {
        Box::pin(async move {
            let entity = registry.entity(&self.entity)?;
            let relations = registry.relations(&self.entity)?;
            let mut output = Map::new();

            for field in self.output_fields(registry)? {
                if field == "pk" || field == entity.primary_key {
                    output.insert(field, Value::from(record.pk));
                    continue;
                }
                if entity.fields.contains_key(&field) {
                    let value = record.get(&field).cloned().unwrap_or(Value::Null);
                    output.insert(field, value);
                    continue;
                }

                let descriptor = relations.get(&field).ok_or_else(|| SchemaError::UnknownField {
                    entity: entity.name.clone(),
                    field: field.clone(),
                })?;
                let rows = related(conn, registry, record, descriptor).await?;
                let nested = self.nested.get(&field);

                let value = match (nested, descriptor.is_to_many()) {
                    (Some(serializer), true) => {
                        let mut items = Vec::with_capacity(rows.len());
                        for row in &rows {
                            items.push(serializer.represent(conn, registry, row).await?);
                        }
                        Value::Array(items)
                    }
                    (Some(serializer), false) => match rows.first() {
                        Some(row) => serializer.represent(conn, registry, row).await?,
                        None => Value::Null,
                    },
                    (None, true) => Value::Array(rows.iter().map(|r| Value::from(r.pk)).collect()),
                    (None, false) => rows.first().map(|r| Value::from(r.pk)).unwrap_or(Value::Null),
                };
                output.insert(field, value);
            }

            Ok(Value::Object(output))
        })
    }

    /// Names emitted by [`Serializer::represent`], in order
    pub(crate) fn output_fields(&self, registry: &SchemaRegistry) -> MutationResult<Vec<String>> {
        let entity = registry.entity(&self.entity)?;
        let mut names: IndexMap<String, ()> = IndexMap::new();

        match &self.fields {
            super::FieldSelection::Only(fields) => {
                for field in fields {
                    names.insert(field.clone(), ());
                }
            }
            super::FieldSelection::All => {
                names.insert("pk".to_string(), ());
                for field in entity.fields.keys() {
                    names.insert(field.clone(), ());
                }
                for descriptor in registry.relations(&entity.name)?.values() {
                    if descriptor.is_forward() || self.nested.contains_key(&descriptor.field) {
                        names.insert(descriptor.field.clone(), ());
                    }
                }
            }
        }
        for field in &self.write_only {
            names.shift_remove(field);
        }
        Ok(names.into_keys().collect())
    }
}
