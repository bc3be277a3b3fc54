//! Static entity definitions
//!
//! An [`EntityDef`] describes one table: its scalar columns, the relations it
//! owns (the side holding the foreign key or declaring the many-to-many),
//! and its named constraints. Reverse relations are never declared here;
//! they are derived by the classifier in [`super::relations`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Integer,
    BigInteger,
    Float,
    Boolean,
    Text,
    Email,
    Date,
    DateTime,
    /// Stored as whole seconds
    Duration,
    Json,
}

/// A scalar column
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDef {
    pub kind: FieldKind,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub blank: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub choices: Option<Vec<Value>>,
    #[serde(default)]
    pub unique: bool,
}

impl FieldDef {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            nullable: false,
            blank: false,
            default: None,
            max_length: None,
            min_value: None,
            max_value: None,
            choices: None,
            unique: false,
        }
    }

    pub fn text(max_length: usize) -> Self {
        Self::new(FieldKind::Text).max_length(max_length)
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn blank(mut self) -> Self {
        self.blank = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn min_value(mut self, min: f64) -> Self {
        self.min_value = Some(min);
        self
    }

    pub fn max_value(mut self, max: f64) -> Self {
        self.max_value = Some(max);
        self
    }

    pub fn choices<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Field must be supplied when creating a row
    pub fn is_required(&self) -> bool {
        !self.nullable && self.default.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    ForeignKey,
    OneToOne,
    ManyToMany,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    #[default]
    Cascade,
    SetNull,
    Restrict,
}

/// A relation declared on the owning side
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForwardRelationDef {
    pub name: String,
    pub kind: RelationKind,
    pub target: String,
    /// Name of the reverse accessor on the target entity
    #[serde(default)]
    pub related_name: Option<String>,
    /// Foreign key column, defaults to `<name>_id`
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub on_delete: OnDelete,
    /// Join table for many-to-many, defaults to `<table>_<name>`
    #[serde(default)]
    pub through: Option<String>,
    /// Self many-to-many relations default to symmetrical
    #[serde(default)]
    pub symmetrical: Option<bool>,
}

impl ForwardRelationDef {
    fn new(name: impl Into<String>, kind: RelationKind, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            target: target.into(),
            related_name: None,
            column: None,
            nullable: false,
            on_delete: OnDelete::Cascade,
            through: None,
            symmetrical: None,
        }
    }

    pub fn foreign_key(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, RelationKind::ForeignKey, target)
    }

    pub fn one_to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, RelationKind::OneToOne, target)
    }

    pub fn many_to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, RelationKind::ManyToMany, target)
    }

    pub fn related_name(mut self, related_name: impl Into<String>) -> Self {
        self.related_name = Some(related_name.into());
        self
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// Nullable foreign key, cleared instead of cascading on delete
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self.on_delete = OnDelete::SetNull;
        self
    }

    pub fn on_delete(mut self, on_delete: OnDelete) -> Self {
        self.on_delete = on_delete;
        self
    }

    pub fn through(mut self, table: impl Into<String>) -> Self {
        self.through = Some(table.into());
        self
    }

    pub fn symmetrical(mut self, symmetrical: bool) -> Self {
        self.symmetrical = Some(symmetrical);
        self
    }

    pub fn column_name(&self) -> String {
        self.column
            .clone()
            .unwrap_or_else(|| format!("{}_id", self.name))
    }
}

/// Named table constraint with the message shown when it is violated
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum ConstraintDef {
    Unique {
        name: String,
        fields: Vec<String>,
        message: String,
        /// Field the error is attributed to
        #[serde(default)]
        field: Option<String>,
    },
    Check {
        name: String,
        /// SQL boolean expression
        expression: String,
        message: String,
        #[serde(default)]
        field: Option<String>,
    },
}

impl ConstraintDef {
    pub fn unique<I, S>(name: impl Into<String>, fields: I, message: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ConstraintDef::Unique {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            message: message.into(),
            field: None,
        }
    }

    pub fn check(
        name: impl Into<String>,
        expression: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ConstraintDef::Check {
            name: name.into(),
            expression: expression.into(),
            message: message.into(),
            field: None,
        }
    }

    /// Attribute violations to `field` instead of the non-field key
    pub fn on_field(self, target: impl Into<String>) -> Self {
        let target = Some(target.into());
        match self {
            ConstraintDef::Unique {
                name,
                fields,
                message,
                ..
            } => ConstraintDef::Unique {
                name,
                fields,
                message,
                field: target,
            },
            ConstraintDef::Check {
                name,
                expression,
                message,
                ..
            } => ConstraintDef::Check {
                name,
                expression,
                message,
                field: target,
            },
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ConstraintDef::Unique { name, .. } | ConstraintDef::Check { name, .. } => name,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ConstraintDef::Unique { message, .. } | ConstraintDef::Check { message, .. } => message,
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            ConstraintDef::Unique { field, .. } | ConstraintDef::Check { field, .. } => {
                field.as_deref()
            }
        }
    }
}

fn default_primary_key() -> String {
    "pk".to_string()
}

/// One entity type and its table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityDef {
    pub name: String,
    pub table: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default)]
    pub fields: IndexMap<String, FieldDef>,
    #[serde(default)]
    pub relations: Vec<ForwardRelationDef>,
    #[serde(default)]
    pub constraints: Vec<ConstraintDef>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            primary_key: default_primary_key(),
            fields: IndexMap::new(),
            relations: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    pub fn field(mut self, name: impl Into<String>, def: FieldDef) -> Self {
        self.fields.insert(name.into(), def);
        self
    }

    pub fn relation(mut self, relation: ForwardRelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn constraint(mut self, constraint: ConstraintDef) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn forward_relation(&self, name: &str) -> Option<&ForwardRelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Lowercased entity name used in default accessor and column names
    pub fn model_name(&self) -> String {
        self.name.to_lowercase()
    }

    /// Column backing a scalar field or a foreign key relation
    pub fn column_for(&self, field: &str) -> Option<String> {
        if field == self.primary_key || field == "pk" {
            return Some(self.primary_key.clone());
        }
        if self.fields.contains_key(field) {
            return Some(field.to_string());
        }
        self.forward_relation(field)
            .filter(|r| r.kind != RelationKind::ManyToMany)
            .map(ForwardRelationDef::column_name)
    }
}
