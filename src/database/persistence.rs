//! Persistence primitives
//!
//! Thin statement builders over any [`ConnectionTrait`], so every call can
//! run inside the caller's transaction. Statements are built dynamically
//! from the entity definitions with `sea_query`.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use sea_orm::sea_query::{Alias, Asterisk, Expr, Func, Order, Query, SimpleExpr};
use sea_orm::{ConnectionTrait, DbErr, FromQueryResult, JsonValue};
use serde_json::Value;

use super::record::{pk_value, to_db_value, Pk, Record};
use crate::errors::{MutationError, MutationResult, SchemaError, ValidationErrors};
use crate::schema::{EntityDef, RelationKind, RelationLink};

/// Field name to value assignments for one row
///
/// Forward foreign key relations are assigned by relation name with the
/// related primary key (or null) as value.
pub type Assignments = IndexMap<String, Value>;

fn lookup_text(pk: Pk) -> String {
    format!("pk={}", pk)
}

fn decode(entity: &EntityDef, row: JsonValue) -> MutationResult<Record> {
    Record::from_row(entity, &row).ok_or_else(|| {
        MutationError::Database(DbErr::Custom(format!(
            "Row of {} has no usable primary key",
            entity.table
        )))
    })
}

/// Resolve assignments into (column, value) pairs
fn columns_and_values(
    entity: &EntityDef,
    values: &Assignments,
) -> MutationResult<Vec<(String, SimpleExpr)>> {
    let mut errors = ValidationErrors::new();
    let mut pairs = Vec::with_capacity(values.len());

    for (field, value) in values {
        if let Some(def) = entity.fields.get(field) {
            match to_db_value(field, def.kind, value) {
                Ok(db_value) => pairs.push((field.clone(), SimpleExpr::Value(db_value))),
                Err(e) => errors.merge(e),
            }
            continue;
        }

        match entity.forward_relation(field) {
            Some(relation) if relation.kind != RelationKind::ManyToMany => {
                let pk = match value {
                    Value::Null => None,
                    other => match other.as_i64() {
                        Some(pk) => Some(pk),
                        None => {
                            errors.add(field, "Invalid primary key.", "invalid");
                            continue;
                        }
                    },
                };
                pairs.push((relation.column_name(), SimpleExpr::Value(pk_value(pk))));
            }
            _ => {
                return Err(SchemaError::UnknownField {
                    entity: entity.name.clone(),
                    field: field.clone(),
                }
                .into())
            }
        }
    }

    errors.into_result(pairs).map_err(MutationError::from)
}

/// Insert one row, filling declared defaults for absent fields
pub async fn insert(
    conn: &impl ConnectionTrait,
    entity: &EntityDef,
    values: &Assignments,
) -> MutationResult<Record> {
    let mut values = values.clone();
    let mut missing = ValidationErrors::new();

    for (name, def) in &entity.fields {
        if values.contains_key(name) {
            continue;
        }
        match &def.default {
            Some(default) => {
                values.insert(name.clone(), default.clone());
            }
            None if !def.nullable => missing.add(name, "This field is required.", "required"),
            None => {}
        }
    }
    for relation in &entity.relations {
        if relation.kind != RelationKind::ManyToMany
            && !relation.nullable
            && !values.contains_key(&relation.name)
        {
            missing.add(&relation.name, "This field is required.", "required");
        }
    }
    if !missing.is_empty() {
        return Err(missing.into());
    }

    let pairs = columns_and_values(entity, &values)?;
    let mut stmt = Query::insert();
    stmt.into_table(Alias::new(&entity.table));
    if pairs.is_empty() {
        stmt.or_default_values();
    } else {
        let (columns, exprs): (Vec<_>, Vec<_>) = pairs
            .into_iter()
            .map(|(column, expr)| (Alias::new(column), expr))
            .unzip();
        stmt.columns(columns);
        stmt.values(exprs)
            .map_err(|e| DbErr::Custom(e.to_string()))?;
    }
    stmt.returning_all();

    let row = JsonValue::find_by_statement(conn.get_database_backend().build(&stmt))
        .one(conn)
        .await?
        .ok_or_else(|| DbErr::RecordNotInserted)?;
    decode(entity, row)
}

/// Apply a partial update and return the updated row
pub async fn update(
    conn: &impl ConnectionTrait,
    entity: &EntityDef,
    pk: Pk,
    values: &Assignments,
) -> MutationResult<Record> {
    let pairs = columns_and_values(entity, values)?;
    if !pairs.is_empty() {
        let stmt = Query::update()
            .table(Alias::new(&entity.table))
            .values(
                pairs
                    .into_iter()
                    .map(|(column, expr)| (Alias::new(column), expr)),
            )
            .and_where(Expr::col(Alias::new(&entity.primary_key)).eq(pk))
            .to_owned();
        conn.execute(conn.get_database_backend().build(&stmt)).await?;
    }
    get_or_404(conn, entity, pk).await
}

pub async fn get(conn: &impl ConnectionTrait, entity: &EntityDef, pk: Pk) -> MutationResult<Option<Record>> {
    find_by(conn, entity, &entity.primary_key, Value::from(pk)).await
}

/// Fetch a row or fail with a not-found error naming the lookup
pub async fn get_or_404(conn: &impl ConnectionTrait, entity: &EntityDef, pk: Pk) -> MutationResult<Record> {
    get(conn, entity, pk)
        .await?
        .ok_or_else(|| MutationError::not_found(&entity.name, lookup_text(pk)))
}

/// First row whose `field` equals `value`
pub async fn find_by(
    conn: &impl ConnectionTrait,
    entity: &EntityDef,
    field: &str,
    value: Value,
) -> MutationResult<Option<Record>> {
    let column = entity.column_for(field).ok_or_else(|| SchemaError::UnknownField {
        entity: entity.name.clone(),
        field: field.to_string(),
    })?;
    let db_value = match entity.fields.get(field) {
        Some(def) => to_db_value(field, def.kind, &value)?,
        None => pk_value(value.as_i64()),
    };

    let stmt = Query::select()
        .column(Asterisk)
        .from(Alias::new(&entity.table))
        .and_where(Expr::col(Alias::new(column)).eq(db_value))
        .limit(1)
        .to_owned();
    let row = JsonValue::find_by_statement(conn.get_database_backend().build(&stmt))
        .one(conn)
        .await?;
    row.map(|row| decode(entity, row)).transpose()
}

pub async fn delete(conn: &impl ConnectionTrait, entity: &EntityDef, pk: Pk) -> Result<u64, DbErr> {
    let stmt = Query::delete()
        .from_table(Alias::new(&entity.table))
        .and_where(Expr::col(Alias::new(&entity.primary_key)).eq(pk))
        .to_owned();
    let result = conn.execute(conn.get_database_backend().build(&stmt)).await?;
    Ok(result.rows_affected())
}

/// Delete rows of `entity` pointing at `owner` through `column`, except `keep`
pub async fn delete_related_except(
    conn: &impl ConnectionTrait,
    entity: &EntityDef,
    column: &str,
    owner: Pk,
    keep: &[Pk],
) -> Result<u64, DbErr> {
    let mut stmt = Query::delete();
    stmt.from_table(Alias::new(&entity.table))
        .and_where(Expr::col(Alias::new(column)).eq(owner));
    if !keep.is_empty() {
        stmt.and_where(Expr::col(Alias::new(&entity.primary_key)).is_not_in(keep.iter().copied()));
    }
    let result = conn.execute(conn.get_database_backend().build(&stmt)).await?;
    Ok(result.rows_affected())
}

/// Clear `column` on rows of `entity` pointing at `owner`, except `keep`
pub async fn detach_related_except(
    conn: &impl ConnectionTrait,
    entity: &EntityDef,
    column: &str,
    owner: Pk,
    keep: &[Pk],
) -> Result<u64, DbErr> {
    let mut stmt = Query::update();
    stmt.table(Alias::new(&entity.table))
        .value(Alias::new(column), pk_value(None))
        .and_where(Expr::col(Alias::new(column)).eq(owner));
    if !keep.is_empty() {
        stmt.and_where(Expr::col(Alias::new(&entity.primary_key)).is_not_in(keep.iter().copied()));
    }
    let result = conn.execute(conn.get_database_backend().build(&stmt)).await?;
    Ok(result.rows_affected())
}

/// Point `column` of row `pk` at `owner`, or clear it
pub async fn relink(
    conn: &impl ConnectionTrait,
    entity: &EntityDef,
    pk: Pk,
    column: &str,
    owner: Option<Pk>,
) -> Result<u64, DbErr> {
    let stmt = Query::update()
        .table(Alias::new(&entity.table))
        .value(Alias::new(column), pk_value(owner))
        .and_where(Expr::col(Alias::new(&entity.primary_key)).eq(pk))
        .to_owned();
    let result = conn.execute(conn.get_database_backend().build(&stmt)).await?;
    Ok(result.rows_affected())
}

/// Rows of `entity` whose `column` points at `owner`, in primary key order
pub async fn related_records(
    conn: &impl ConnectionTrait,
    entity: &EntityDef,
    column: &str,
    owner: Pk,
) -> MutationResult<Vec<Record>> {
    let stmt = Query::select()
        .column(Asterisk)
        .from(Alias::new(&entity.table))
        .and_where(Expr::col(Alias::new(column)).eq(owner))
        .order_by(Alias::new(&entity.primary_key), Order::Asc)
        .to_owned();
    let rows = JsonValue::find_by_statement(conn.get_database_backend().build(&stmt))
        .all(conn)
        .await?;
    rows.into_iter().map(|row| decode(entity, row)).collect()
}

/// Rows of `entity` with the given primary keys, in primary key order
pub async fn records_by_pks(
    conn: &impl ConnectionTrait,
    entity: &EntityDef,
    pks: &[Pk],
) -> MutationResult<Vec<Record>> {
    if pks.is_empty() {
        return Ok(Vec::new());
    }
    let stmt = Query::select()
        .column(Asterisk)
        .from(Alias::new(&entity.table))
        .and_where(Expr::col(Alias::new(&entity.primary_key)).is_in(pks.iter().copied()))
        .order_by(Alias::new(&entity.primary_key), Order::Asc)
        .to_owned();
    let rows = JsonValue::find_by_statement(conn.get_database_backend().build(&stmt))
        .all(conn)
        .await?;
    rows.into_iter().map(|row| decode(entity, row)).collect()
}

fn join_columns(link: &RelationLink) -> Result<(&str, &str, &str, bool), DbErr> {
    match link {
        RelationLink::JoinTable {
            table,
            source_column,
            target_column,
            symmetrical,
        } => Ok((table.as_str(), source_column.as_str(), target_column.as_str(), *symmetrical)),
        _ => Err(DbErr::Custom("Relation is not stored in a join table".to_string())),
    }
}

/// Primary keys linked to `owner` through a join table
pub async fn linked_pks(conn: &impl ConnectionTrait, link: &RelationLink, owner: Pk) -> Result<Vec<Pk>, DbErr> {
    let (table, source, target, _) = join_columns(link)?;
    let stmt = Query::select()
        .expr_as(Expr::col(Alias::new(target)), Alias::new("pk"))
        .from(Alias::new(table))
        .and_where(Expr::col(Alias::new(source)).eq(owner))
        .order_by(Alias::new(target), Order::Asc)
        .to_owned();
    let rows = JsonValue::find_by_statement(conn.get_database_backend().build(&stmt))
        .all(conn)
        .await?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get("pk").and_then(Value::as_i64))
        .collect())
}

async fn unlink_except(
    conn: &impl ConnectionTrait,
    table: &str,
    source: &str,
    target: &str,
    owner: Pk,
    keep: &[Pk],
) -> Result<(), DbErr> {
    let mut stmt = Query::delete();
    stmt.from_table(Alias::new(table))
        .and_where(Expr::col(Alias::new(source)).eq(owner));
    if !keep.is_empty() {
        stmt.and_where(Expr::col(Alias::new(target)).is_not_in(keep.iter().copied()));
    }
    conn.execute(conn.get_database_backend().build(&stmt)).await?;
    Ok(())
}

async fn link(conn: &impl ConnectionTrait, table: &str, source: &str, target: &str, from: Pk, to: Pk) -> Result<(), DbErr> {
    let mut stmt = Query::insert();
    stmt.into_table(Alias::new(table))
        .columns([Alias::new(source), Alias::new(target)])
        .values([SimpleExpr::from(from), SimpleExpr::from(to)])
        .map_err(|e| DbErr::Custom(e.to_string()))?;
    conn.execute(conn.get_database_backend().build(&stmt)).await?;
    Ok(())
}

/// Replace the join table membership of `owner` with exactly `targets`
///
/// Related rows themselves are never touched. Symmetrical links are kept
/// in both directions.
pub async fn set_membership(
    conn: &impl ConnectionTrait,
    link_def: &RelationLink,
    owner: Pk,
    targets: &[Pk],
) -> Result<(), DbErr> {
    let (table, source, target, symmetrical) = join_columns(link_def)?;
    let wanted: BTreeSet<Pk> = targets.iter().copied().collect();
    let wanted_list: Vec<Pk> = wanted.iter().copied().collect();

    unlink_except(conn, table, source, target, owner, &wanted_list).await?;
    if symmetrical {
        unlink_except(conn, table, target, source, owner, &wanted_list).await?;
    }

    let existing: BTreeSet<Pk> = linked_pks(conn, link_def, owner).await?.into_iter().collect();
    for &other in wanted.difference(&existing) {
        link(conn, table, source, target, owner, other).await?;
    }

    if symmetrical {
        let reverse = RelationLink::JoinTable {
            table: table.to_string(),
            source_column: target.to_string(),
            target_column: source.to_string(),
            symmetrical,
        };
        let existing: BTreeSet<Pk> = linked_pks(conn, &reverse, owner).await?.into_iter().collect();
        for &other in wanted.difference(&existing) {
            if other == owner {
                continue;
            }
            link(conn, table, source, target, other, owner).await?;
        }
    }
    Ok(())
}

/// Number of rows in `table`
pub async fn count(conn: &impl ConnectionTrait, table: &str) -> Result<u64, DbErr> {
    let stmt = Query::select()
        .expr_as(Func::count(Expr::col(Asterisk)), Alias::new("count"))
        .from(Alias::new(table))
        .to_owned();
    let row = conn
        .query_one(conn.get_database_backend().build(&stmt))
        .await?
        .ok_or_else(|| DbErr::RecordNotFound(format!("count of {}", table)))?;
    let count: i64 = row.try_get("", "count")?;
    u64::try_from(count).map_err(|_| DbErr::Custom(format!("negative count {} for {}", count, table)))
}
