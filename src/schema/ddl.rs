use std::collections::HashSet;

use sea_orm::sea_query::{Alias, ColumnDef, ForeignKey, ForeignKeyAction, Index, Table};
use sea_orm::{ConnectionTrait, DbErr, Statement};
use tracing::debug;

use super::entity::{ConstraintDef, EntityDef, FieldDef, FieldKind, OnDelete, RelationKind};
use super::relations::RelationLink;
use super::SchemaRegistry;

fn action(on_delete: OnDelete) -> ForeignKeyAction {
    match on_delete {
        OnDelete::Cascade => ForeignKeyAction::Cascade,
        OnDelete::SetNull => ForeignKeyAction::SetNull,
        OnDelete::Restrict => ForeignKeyAction::Restrict,
    }
}

fn scalar_column(name: &str, def: &FieldDef) -> ColumnDef {
    let mut column = ColumnDef::new(Alias::new(name));
    match def.kind {
        FieldKind::Integer => column.integer(),
        FieldKind::BigInteger | FieldKind::Duration => column.big_integer(),
        FieldKind::Float => column.double(),
        FieldKind::Boolean => column.boolean(),
        FieldKind::Text | FieldKind::Email => match def.max_length {
            Some(len) => column.string_len(len as u32),
            None => column.text(),
        },
        FieldKind::Date => column.date(),
        FieldKind::DateTime => column.date_time(),
        FieldKind::Json => column.json(),
    };
    if def.nullable {
        column.null();
    } else {
        column.not_null();
    }
    if def.unique {
        column.unique_key();
    }
    column
}

fn primary_key_column(name: &str) -> ColumnDef {
    let mut column = ColumnDef::new(Alias::new(name));
    column.integer().not_null().auto_increment().primary_key();
    column
}

/// Add `CONSTRAINT "name" CHECK (expr)` clauses to a rendered CREATE TABLE
fn splice_checks(statement: &mut Statement, checks: &[(&str, &str)]) {
    if checks.is_empty() {
        return;
    }
    let Some(end) = statement.sql.rfind(" )") else {
        return;
    };
    let clauses: String = checks
        .iter()
        .map(|(name, expression)| format!(", CONSTRAINT \"{}\" CHECK ({})", name, expression))
        .collect();
    statement.sql.insert_str(end, &clauses);
}

fn entity_table(registry: &SchemaRegistry, entity: &EntityDef, conn: &impl ConnectionTrait) -> Result<Statement, DbErr> {
    let mut table = Table::create();
    table
        .table(Alias::new(&entity.table))
        .if_not_exists()
        .col(&mut primary_key_column(&entity.primary_key));

    for (name, def) in &entity.fields {
        table.col(&mut scalar_column(name, def));
    }

    for relation in &entity.relations {
        if relation.kind == RelationKind::ManyToMany {
            continue;
        }
        let target = registry
            .entity(&relation.target)
            .map_err(|e| DbErr::Custom(e.to_string()))?;
        let column_name = relation.column_name();

        let mut column = ColumnDef::new(Alias::new(&column_name));
        column.integer();
        if relation.nullable {
            column.null();
        } else {
            column.not_null();
        }
        if relation.kind == RelationKind::OneToOne {
            column.unique_key();
        }
        table.col(&mut column);
        table.foreign_key(
            ForeignKey::create()
                .from(Alias::new(&entity.table), Alias::new(&column_name))
                .to(Alias::new(&target.table), Alias::new(&target.primary_key))
                .on_delete(action(relation.on_delete)),
        );
    }

    let mut checks = Vec::new();
    for constraint in &entity.constraints {
        match constraint {
            ConstraintDef::Unique { name, fields, .. } => {
                let mut index = Index::create();
                index.name(name.as_str()).unique();
                for field in fields {
                    if let Some(column) = entity.column_for(field) {
                        index.col(Alias::new(&column));
                    }
                }
                table.index(&mut index);
            }
            ConstraintDef::Check {
                name, expression, ..
            } => checks.push((name.as_str(), expression.as_str())),
        }
    }

    let mut statement = conn.get_database_backend().build(&table);
    splice_checks(&mut statement, &checks);
    Ok(statement)
}

fn join_table(
    table_name: &str,
    source: (&str, &EntityDef),
    target: (&str, &EntityDef),
    conn: &impl ConnectionTrait,
) -> Statement {
    let mut table = Table::create();
    table
        .table(Alias::new(table_name))
        .if_not_exists()
        .col(&mut primary_key_column("id"));

    for (column, entity) in [source, target] {
        table.col(ColumnDef::new(Alias::new(column)).integer().not_null());
        table.foreign_key(
            ForeignKey::create()
                .from(Alias::new(table_name), Alias::new(column))
                .to(Alias::new(&entity.table), Alias::new(&entity.primary_key))
                .on_delete(ForeignKeyAction::Cascade),
        );
    }
    table.index(
        Index::create()
            .name(format!("{}_unique", table_name))
            .col(Alias::new(source.0))
            .col(Alias::new(target.0))
            .unique(),
    );

    conn.get_database_backend().build(&table)
}

/// Entities ordered so that foreign key targets come before their referrers
fn creation_order(registry: &SchemaRegistry) -> Vec<&EntityDef> {
    let mut ordered: Vec<&EntityDef> = Vec::new();
    let mut placed: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<&EntityDef> = registry.entities().collect();

    while !remaining.is_empty() {
        let before = remaining.len();
        remaining.retain(|entity| {
            let ready = entity.relations.iter().all(|r| {
                r.kind == RelationKind::ManyToMany
                    || r.target == entity.name
                    || placed.contains(r.target.as_str())
            });
            if ready {
                placed.insert(entity.name.as_str());
                ordered.push(entity);
            }
            !ready
        });
        if remaining.len() == before {
            // Foreign key cycle, fall back to declaration order
            ordered.append(&mut remaining);
        }
    }
    ordered
}

impl SchemaRegistry {
    /// Create every entity table and join table that does not exist yet
    pub async fn create_tables(&self, conn: &impl ConnectionTrait) -> Result<(), DbErr> {
        for entity in creation_order(self) {
            let statement = entity_table(self, entity, conn)?;
            debug!("Creating table {}", entity.table);
            conn.execute(statement).await?;
        }

        for entity in self.entities() {
            let relations = self
                .relations(&entity.name)
                .map_err(|e| DbErr::Custom(e.to_string()))?;
            for descriptor in relations.values().filter(|d| d.is_forward()) {
                if let RelationLink::JoinTable {
                    table,
                    source_column,
                    target_column,
                    ..
                } = &descriptor.link
                {
                    let target = self
                        .entity(&descriptor.target)
                        .map_err(|e| DbErr::Custom(e.to_string()))?;
                    let statement = join_table(
                        table,
                        (source_column, entity),
                        (target_column, target),
                        conn,
                    );
                    debug!("Creating join table {}", table);
                    conn.execute(statement).await?;
                }
            }
        }
        Ok(())
    }
}
