//! Shared fixtures: the `Example` schema with one relation of every kind
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use nesting::database::{establish_connection, Record};
use nesting::schema::{
    ConstraintDef, EntityDef, FieldDef, FieldKind, ForwardRelationDef, SchemaRegistry,
};
use nesting::serializers::{input_from_json, Serializer};
use nesting::services::NestedWriter;
use sea_orm::DatabaseConnection;
use serde_json::{json, Value};

fn named(entity: &str, table: &str) -> EntityDef {
    EntityDef::new(entity, table).field("name", FieldDef::text(255))
}

pub fn example_entities() -> Vec<EntityDef> {
    vec![
        named("ForwardOneToOne", "forward_one_to_one"),
        named("ForwardManyToOne", "forward_many_to_one"),
        named("ForwardManyToMany", "forward_many_to_many"),
        named("Example", "example")
            .field("number", FieldDef::new(FieldKind::Integer))
            .field("email", FieldDef::new(FieldKind::Email).max_length(254).unique())
            .field("duration", FieldDef::new(FieldKind::Duration).nullable())
            .field(
                "example_state",
                FieldDef::text(255)
                    .choices(["ACTIVE", "INACTIVE"])
                    .with_default("ACTIVE"),
            )
            .relation(ForwardRelationDef::many_to_many("symmetrical_field", "Example"))
            .relation(
                ForwardRelationDef::one_to_one("forward_one_to_one_field", "ForwardOneToOne")
                    .related_name("example_rel"),
            )
            .relation(
                ForwardRelationDef::foreign_key("forward_many_to_one_field", "ForwardManyToOne")
                    .related_name("example_rels"),
            )
            .relation(
                ForwardRelationDef::many_to_many("forward_many_to_many_fields", "ForwardManyToMany")
                    .related_name("example_rels"),
            )
            .constraint(ConstraintDef::unique(
                "unique_name",
                ["name", "number"],
                "Example unique violation message.",
            ))
            .constraint(ConstraintDef::check(
                "check_example",
                "name LIKE '%foo%'",
                "Example constraint violation message.",
            )),
        named("ReverseOneToOne", "reverse_one_to_one").relation(
            ForwardRelationDef::one_to_one("example_field", "Example")
                .related_name("reverse_one_to_one_rel"),
        ),
        named("ReverseOneToMany", "reverse_one_to_many").relation(
            ForwardRelationDef::foreign_key("example_field", "Example")
                .related_name("reverse_one_to_many_rels"),
        ),
        named("ReverseManyToMany", "reverse_many_to_many").relation(
            ForwardRelationDef::many_to_many("example_fields", "Example")
                .related_name("reverse_many_to_many_rels"),
        ),
    ]
}

pub fn example_registry() -> Arc<SchemaRegistry> {
    Arc::new(SchemaRegistry::build(example_entities()).expect("example schema is valid"))
}

fn name_only(serializer: &str, entity: &str) -> Serializer {
    Serializer::new(serializer, entity).fields(["pk", "name"])
}

/// Every relation of `Example` written as nested objects
pub fn example_serializer() -> Serializer {
    Serializer::new("ExampleSerializer", "Example")
        .fields([
            "pk",
            "name",
            "number",
            "email",
            "duration",
            "example_state",
            "forward_one_to_one_field",
            "forward_many_to_one_field",
            "forward_many_to_many_fields",
            "reverse_one_to_one_rel",
            "reverse_one_to_many_rels",
            "reverse_many_to_many_rels",
        ])
        .nested("forward_one_to_one_field", name_only("ForwardOneToOneSerializer", "ForwardOneToOne"))
        .nested("forward_many_to_one_field", name_only("ForwardManyToOneSerializer", "ForwardManyToOne"))
        .nested(
            "forward_many_to_many_fields",
            name_only("ForwardManyToManySerializer", "ForwardManyToMany"),
        )
        .nested("reverse_one_to_one_rel", name_only("ReverseOneToOneSerializer", "ReverseOneToOne"))
        .nested("reverse_one_to_many_rels", name_only("ReverseOneToManySerializer", "ReverseOneToMany"))
        .nested(
            "reverse_many_to_many_rels",
            name_only("ReverseManyToManySerializer", "ReverseManyToMany"),
        )
        .validator("number", |value| match value.as_i64() {
            Some(n) if n < 0 => Err("Number must be positive.".to_string()),
            _ => Ok(()),
        })
}

/// Same fields, every relation written as primary keys
pub fn example_serializer_flat() -> Serializer {
    Serializer::new("ExampleSerializerNoFields", "Example").fields([
        "pk",
        "name",
        "number",
        "email",
        "duration",
        "example_state",
        "forward_one_to_one_field",
        "forward_many_to_one_field",
        "forward_many_to_many_fields",
        "reverse_one_to_one_rel",
        "reverse_one_to_many_rels",
        "reverse_many_to_many_rels",
    ])
}

pub fn example_data() -> Value {
    json!({
        "name": "foo",
        "number": 1,
        "email": "foofoo@email.com",
        "duration": 900,
        "example_state": "ACTIVE",
        "forward_one_to_one_field": {"name": "one"},
        "forward_many_to_one_field": {"name": "two"},
        "forward_many_to_many_fields": [{"name": "three"}],
        "reverse_one_to_one_rel": {"name": "four"},
        "reverse_one_to_many_rels": [{"name": "five"}],
        "reverse_many_to_many_rels": [{"name": "six"}],
    })
}

/// In-memory database with every table of the example schema
pub async fn setup() -> Result<(DatabaseConnection, Arc<SchemaRegistry>)> {
    let db = establish_connection("sqlite::memory:").await?;
    let registry = example_registry();
    registry.create_tables(&db).await?;
    Ok((db, registry))
}

/// Write `json` as a new `entity` row, relations included, without serializer validation
pub async fn create(writer: &NestedWriter, entity: &str, json: Value) -> Result<Record> {
    let input = input_from_json(writer.registry(), entity, &json)?;
    Ok(writer.create(entity, input).await?)
}

/// An `Example` with fresh forward relations and no reverse rows
pub async fn example_factory(writer: &NestedWriter, name: &str, number: i64, email: &str) -> Result<Record> {
    create(
        writer,
        "Example",
        json!({
            "name": name,
            "number": number,
            "email": email,
            "forward_one_to_one_field": {"name": format!("{}-o2o", name)},
            "forward_many_to_one_field": {"name": format!("{}-m2o", name)},
        }),
    )
    .await
}
