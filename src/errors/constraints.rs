//! Translation of database integrity violations
//!
//! The storage engine reports a violated constraint as free text. The
//! [`ConstraintRegistry`] recognises the Postgres and SQLite phrasings and
//! maps them back to the message declared on the entity, together with the
//! field the error belongs to. Anything it does not recognise is passed
//! through unchanged.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{DbErr, RuntimeErr, SqlxError};

use super::validation::ValidationErrors;
use crate::schema::{ConstraintDef, RelationKind, SchemaRegistry};

static POSTGRES_CHECK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^new row for relation "(?P<relation>\w+)" violates check constraint "(?P<constraint>\w+)""#)
        .expect("valid regex")
});
static POSTGRES_UNIQUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^duplicate key value violates unique constraint "(?P<constraint>\w+)""#)
        .expect("valid regex")
});
static SQLITE_CHECK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^CHECK constraint failed: (?P<constraint>\w+)$").expect("valid regex"));
static SQLITE_UNIQUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^UNIQUE constraint failed: (?P<fields>[\w., ]+)$").expect("valid regex"));

/// Outcome of translating one raw violation message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstraintViolation {
    pub message: String,
    /// Owning field, `None` for table-level constraints
    pub field: Option<String>,
}

#[derive(Clone, Debug)]
struct RegisteredConstraint {
    table: String,
    name: String,
    /// Columns of a unique constraint, `None` for checks
    columns: Option<BTreeSet<String>>,
    message: String,
    field: Option<String>,
}

/// Lookup of constraint names and column sets to violation messages
#[derive(Clone, Debug, Default)]
pub struct ConstraintRegistry {
    constraints: Vec<RegisteredConstraint>,
}

impl ConstraintRegistry {
    pub fn from_schema(registry: &SchemaRegistry) -> Self {
        let mut constraints = Vec::new();

        for entity in registry.entities() {
            for constraint in &entity.constraints {
                let columns = match constraint {
                    ConstraintDef::Unique { fields, .. } => Some(
                        fields
                            .iter()
                            .filter_map(|f| entity.column_for(f))
                            .collect::<BTreeSet<_>>(),
                    ),
                    ConstraintDef::Check { .. } => None,
                };
                constraints.push(RegisteredConstraint {
                    table: entity.table.clone(),
                    name: constraint.name().to_string(),
                    columns,
                    message: constraint.message().to_string(),
                    field: constraint.field().map(str::to_string),
                });
            }

            // Single column uniqueness declared on the field itself
            let implicit = entity
                .fields
                .iter()
                .filter(|(_, def)| def.unique)
                .map(|(name, _)| (name.clone(), name.clone()))
                .chain(
                    entity
                        .relations
                        .iter()
                        .filter(|r| r.kind == RelationKind::OneToOne)
                        .map(|r| (r.name.clone(), r.column_name())),
                );
            for (field, column) in implicit {
                constraints.push(RegisteredConstraint {
                    table: entity.table.clone(),
                    name: format!("{}_{}_key", entity.table, column),
                    columns: Some(BTreeSet::from([column])),
                    message: format!(
                        "{} with this {} already exists.",
                        entity.name,
                        field.replace('_', " ")
                    ),
                    field: Some(field),
                });
            }
        }

        Self { constraints }
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    fn find(&self, predicate: impl Fn(&RegisteredConstraint) -> bool) -> Option<ConstraintViolation> {
        self.constraints
            .iter()
            .find(|c| predicate(c))
            .map(|c| ConstraintViolation {
                message: c.message.clone(),
                field: c.field.clone(),
            })
    }

    /// Look up the declared message for a raw violation message
    pub fn message_for(&self, raw: &str) -> ConstraintViolation {
        self.lookup(raw).unwrap_or_else(|| ConstraintViolation {
            message: raw.to_string(),
            field: None,
        })
    }

    fn lookup(&self, raw: &str) -> Option<ConstraintViolation> {
        if let Some(caps) = POSTGRES_CHECK.captures(raw) {
            let table = &caps["relation"];
            let name = &caps["constraint"];
            return self.find(|c| c.columns.is_none() && c.table == table && c.name == name);
        }

        if let Some(caps) = POSTGRES_UNIQUE.captures(raw) {
            let name = &caps["constraint"];
            return self.find(|c| c.columns.is_some() && c.name == name);
        }

        if let Some(caps) = SQLITE_CHECK.captures(raw) {
            let name = &caps["constraint"];
            return self.find(|c| c.columns.is_none() && c.name == name);
        }

        if let Some(caps) = SQLITE_UNIQUE.captures(raw) {
            let mut table = None;
            let mut columns = BTreeSet::new();
            for qualified in caps["fields"].split(',').map(str::trim) {
                let (t, column) = qualified.split_once('.')?;
                if table.is_some_and(|existing| existing != t) {
                    return None;
                }
                table = Some(t);
                columns.insert(column.to_string());
            }
            let table = table?;
            return self.find(|c| c.table == table && c.columns.as_ref() == Some(&columns));
        }

        None
    }

    /// Translate an integrity violation into field-addressed validation errors
    ///
    /// Returns `None` when `err` is not an integrity violation.
    pub fn translate(&self, err: &DbErr, non_field_key: &str) -> Option<ValidationErrors> {
        let raw = integrity_message(err)?;
        let violation = self.message_for(&raw);
        let field = violation.field.as_deref().unwrap_or(non_field_key);
        Some(ValidationErrors::single(field, violation.message, "invalid"))
    }
}

fn is_integrity_code(code: &str) -> bool {
    // SQLSTATE class 23 on Postgres, primary result code 19 on SQLite
    if code.len() == 5 && code.starts_with("23") {
        return true;
    }
    code.parse::<i32>().map(|c| c & 0xff == 19).unwrap_or(false)
}

/// Raw engine message of an integrity violation, if `err` is one
pub fn integrity_message(err: &DbErr) -> Option<String> {
    match err {
        DbErr::Exec(RuntimeErr::SqlxError(SqlxError::Database(e)))
        | DbErr::Query(RuntimeErr::SqlxError(SqlxError::Database(e))) => {
            let integrity = e.is_unique_violation()
                || e.is_check_violation()
                || e.is_foreign_key_violation()
                || e.code().map(|code| is_integrity_code(&code)).unwrap_or(false);
            integrity.then(|| e.message().to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntityDef, FieldDef, FieldKind};

    fn registry() -> ConstraintRegistry {
        let schema = SchemaRegistry::build(vec![EntityDef::new("Example", "example_example")
            .field("name", FieldDef::text(255))
            .field("number", FieldDef::new(FieldKind::Integer))
            .field("email", FieldDef::new(FieldKind::Email).unique())
            .constraint(ConstraintDef::unique(
                "unique_name",
                ["name", "number"],
                "Example unique violation message.",
            ))
            .constraint(ConstraintDef::check(
                "check_example",
                "name LIKE '%foo%'",
                "Example constraint violation message.",
            ))])
        .unwrap();
        ConstraintRegistry::from_schema(&schema)
    }

    fn message(raw: &str) -> String {
        registry().message_for(raw).message
    }

    #[test]
    fn test_check_postgres() {
        let msg = r#"new row for relation "example_example" violates check constraint "check_example""#;
        assert_eq!(message(msg), "Example constraint violation message.");
    }

    #[test]
    fn test_check_postgres_unknown_constraint() {
        let msg = r#"new row for relation "example_example" violates check constraint "foo""#;
        assert_eq!(message(msg), msg);
    }

    #[test]
    fn test_check_postgres_wrong_relation() {
        let msg = r#"new row for relation "other" violates check constraint "check_example""#;
        assert_eq!(message(msg), msg);
    }

    #[test]
    fn test_unique_postgres() {
        let msg = r#"duplicate key value violates unique constraint "unique_name""#;
        assert_eq!(message(msg), "Example unique violation message.");
    }

    #[test]
    fn test_unique_postgres_unknown_constraint() {
        let msg = r#"duplicate key value violates unique constraint "foo""#;
        assert_eq!(message(msg), msg);
    }

    #[test]
    fn test_check_sqlite() {
        assert_eq!(
            message("CHECK constraint failed: check_example"),
            "Example constraint violation message."
        );
    }

    #[test]
    fn test_check_sqlite_unknown_constraint() {
        let msg = "CHECK constraint failed: foo";
        assert_eq!(message(msg), msg);
    }

    #[test]
    fn test_unique_sqlite() {
        assert_eq!(
            message("UNIQUE constraint failed: example_example.name, example_example.number"),
            "Example unique violation message."
        );
        assert_eq!(
            message("UNIQUE constraint failed: example_example.number, example_example.name"),
            "Example unique violation message."
        );
    }

    #[test]
    fn test_unique_sqlite_unknown_fields() {
        let msg = "UNIQUE constraint failed: example_example.foo, example_example.bar";
        assert_eq!(message(msg), msg);
    }

    #[test]
    fn test_unique_field_is_attributed() {
        let violation = registry().message_for("UNIQUE constraint failed: example_example.email");
        assert_eq!(violation.message, "Example with this email already exists.");
        assert_eq!(violation.field.as_deref(), Some("email"));
    }

    #[test]
    fn test_unknown_message() {
        assert_eq!(message("Unknown message."), "Unknown message.");
    }

    #[test]
    fn test_integrity_codes() {
        assert!(is_integrity_code("23505"));
        assert!(is_integrity_code("2067"));
        assert!(is_integrity_code("275"));
        assert!(!is_integrity_code("1"));
        assert!(!is_integrity_code("42P01"));
    }

    #[test]
    fn test_non_driver_error_is_not_integrity() {
        assert_eq!(integrity_message(&DbErr::Custom("boom".to_string())), None);
    }
}
