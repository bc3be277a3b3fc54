//! Nested create/update behaviour of the writer against the example schema

mod common;

use std::sync::Arc;

use anyhow::Result;
use nesting::database::{establish_connection, persistence};
use nesting::errors::{MutationError, SchemaError};
use nesting::schema::{EntityDef, FieldDef, ForwardRelationDef, RelationLink, SchemaRegistry};
use nesting::serializers::{input_from_json, Mode};
use nesting::services::NestedWriter;
use serde_json::{json, Value};

use common::{create, example_data, example_factory, example_serializer, example_serializer_flat, setup};

fn names(items: &Value) -> Vec<String> {
    items
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_create_with_every_relation_kind() -> Result<()> {
    let (db, registry) = setup().await?;
    let writer = NestedWriter::new(db.clone(), registry.clone());
    let serializer = example_serializer();

    let input = serializer.validate(&registry, &example_data(), Mode::Create)?;
    let record = writer.create("Example", input).await?;
    let output = serializer.represent(&db, &registry, &record).await?;

    assert_eq!(persistence::count(&db, "example").await?, 1);
    assert_eq!(output["name"], "foo");
    assert_eq!(output["duration"], 900);
    assert_eq!(output["example_state"], "ACTIVE");

    // Forward relations
    assert_eq!(output["forward_one_to_one_field"]["name"], "one");
    assert_eq!(output["forward_many_to_one_field"]["name"], "two");
    assert_eq!(names(&output["forward_many_to_many_fields"]), vec!["three"]);

    // Reverse relations
    assert_eq!(output["reverse_one_to_one_rel"]["name"], "four");
    assert_eq!(names(&output["reverse_one_to_many_rels"]), vec!["five"]);
    assert_eq!(names(&output["reverse_many_to_many_rels"]), vec!["six"]);
    Ok(())
}

#[tokio::test]
async fn test_update_reuses_forward_rows_by_pk() -> Result<()> {
    let (db, registry) = setup().await?;
    let writer = NestedWriter::new(db.clone(), registry.clone());
    let serializer = example_serializer();

    let example = example_factory(&writer, "foo", 1, "first@email.com").await?;
    let oto_pk = example.fk("forward_one_to_one_field").unwrap_or_default();
    let mto_pk = example.fk("forward_many_to_one_field").unwrap_or_default();

    let mut data = example_data();
    data["pk"] = json!(example.pk);
    data["forward_one_to_one_field"]["pk"] = json!(oto_pk);
    data["forward_many_to_one_field"] = json!({"pk": mto_pk});

    let input = serializer.validate(&registry, &data, Mode::Update)?;
    let record = writer.update("Example", example.pk, input).await?;
    let output = serializer.represent(&db, &registry, &record).await?;

    assert_eq!(persistence::count(&db, "example").await?, 1);
    assert_eq!(output["forward_one_to_one_field"], json!({"pk": oto_pk, "name": "one"}));
    assert_eq!(output["forward_many_to_one_field"], json!({"pk": mto_pk, "name": "foo-m2o"}));
    assert_eq!(persistence::count(&db, "forward_one_to_one").await?, 1);
    assert_eq!(names(&output["forward_many_to_many_fields"]), vec!["three"]);
    assert_eq!(output["reverse_one_to_one_rel"]["name"], "four");
    assert_eq!(names(&output["reverse_one_to_many_rels"]), vec!["five"]);
    assert_eq!(names(&output["reverse_many_to_many_rels"]), vec!["six"]);
    Ok(())
}

#[tokio::test]
async fn test_create_with_primary_keys_only() -> Result<()> {
    let (db, registry) = setup().await?;
    let writer = NestedWriter::new(db.clone(), registry.clone());
    let serializer = example_serializer_flat();

    let f_o2o = create(&writer, "ForwardOneToOne", json!({"name": "one"})).await?;
    let f_m2o = create(&writer, "ForwardManyToOne", json!({"name": "two"})).await?;
    let f_m2m = create(&writer, "ForwardManyToMany", json!({"name": "three"})).await?;
    let other = example_factory(&writer, "foo other", 2, "other@email.com").await?;
    let r_o2m = create(
        &writer,
        "ReverseOneToMany",
        json!({"name": "five", "example_field": other.pk}),
    )
    .await?;
    let r_m2m = create(&writer, "ReverseManyToMany", json!({"name": "six"})).await?;

    let data = json!({
        "name": "foo",
        "number": 1,
        "email": "foofoo@email.com",
        "forward_one_to_one_field": f_o2o.pk,
        "forward_many_to_one_field": f_m2o.pk,
        "forward_many_to_many_fields": [f_m2m.pk],
        "reverse_one_to_many_rels": [r_o2m.pk],
        "reverse_many_to_many_rels": [r_m2m.pk],
    });
    let input = serializer.validate(&registry, &data, Mode::Create)?;
    let record = writer.create("Example", input).await?;
    let output = serializer.represent(&db, &registry, &record).await?;

    assert_eq!(output["forward_one_to_one_field"], json!(f_o2o.pk));
    assert_eq!(output["forward_many_to_one_field"], json!(f_m2o.pk));
    assert_eq!(output["forward_many_to_many_fields"], json!([f_m2m.pk]));
    assert_eq!(output["reverse_one_to_many_rels"], json!([r_o2m.pk]));
    assert_eq!(output["reverse_many_to_many_rels"], json!([r_m2m.pk]));
    assert_eq!(output["reverse_one_to_one_rel"], Value::Null);
    Ok(())
}

#[tokio::test]
async fn test_repeated_update_is_idempotent() -> Result<()> {
    let (db, registry) = setup().await?;
    let writer = NestedWriter::new(db.clone(), registry.clone());
    let serializer = example_serializer();

    let record = writer
        .create("Example", serializer.validate(&registry, &example_data(), Mode::Create)?)
        .await?;
    let output = serializer.represent(&db, &registry, &record).await?;

    // Feed the representation straight back in, twice
    for _ in 0..2 {
        let input = serializer.validate(&registry, &output, Mode::Update)?;
        writer.update("Example", record.pk, input).await?;
    }

    for table in [
        "forward_one_to_one",
        "forward_many_to_one",
        "forward_many_to_many",
        "reverse_one_to_one",
        "reverse_one_to_many",
        "reverse_many_to_many",
    ] {
        assert_eq!(persistence::count(&db, table).await?, 1, "{}", table);
    }
    let again = serializer.represent(&db, &registry, &record).await?;
    assert_eq!(again, output);
    Ok(())
}

#[tokio::test]
async fn test_one_to_many_orphans_are_deleted() -> Result<()> {
    let (db, registry) = setup().await?;
    let writer = NestedWriter::new(db.clone(), registry.clone());
    let serializer = example_serializer();

    let mut data = example_data();
    data["reverse_one_to_many_rels"] = json!([{"name": "a"}, {"name": "b"}]);
    let record = writer
        .create("Example", serializer.validate(&registry, &data, Mode::Create)?)
        .await?;
    let output = serializer.represent(&db, &registry, &record).await?;
    let kept = output["reverse_one_to_many_rels"][0]["pk"].clone();

    let update = json!({"reverse_one_to_many_rels": [{"pk": kept, "name": "a2"}, {"name": "c"}]});
    writer
        .update("Example", record.pk, serializer.validate(&registry, &update, Mode::Update)?)
        .await?;

    let output = serializer.represent(&db, &registry, &record).await?;
    assert_eq!(names(&output["reverse_one_to_many_rels"]), vec!["a2", "c"]);
    assert_eq!(output["reverse_one_to_many_rels"][0]["pk"], kept);
    assert_eq!(persistence::count(&db, "reverse_one_to_many").await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_one_to_many_key_list_repoints_rows() -> Result<()> {
    let (db, registry) = setup().await?;
    let writer = NestedWriter::new(db.clone(), registry.clone());

    let first = example_factory(&writer, "foo 1", 1, "one@email.com").await?;
    let second = example_factory(&writer, "foo 2", 2, "two@email.com").await?;
    let a = create(&writer, "ReverseOneToMany", json!({"name": "a", "example_field": first.pk})).await?;
    let b = create(&writer, "ReverseOneToMany", json!({"name": "b", "example_field": second.pk})).await?;

    let input = input_from_json(&registry, "Example", &json!({"reverse_one_to_many_rels": [b.pk]}))?;
    writer.update("Example", first.pk, input).await?;

    let entity = registry.entity("ReverseOneToMany")?;
    let moved = persistence::get_or_404(&db, entity, b.pk).await?;
    assert_eq!(moved.fk("example_field"), Some(first.pk));
    // The back-reference is required, so the released row is deleted
    assert!(persistence::get(&db, entity, a.pk).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_many_to_many_replacement_keeps_rows() -> Result<()> {
    let (db, registry) = setup().await?;
    let writer = NestedWriter::new(db.clone(), registry.clone());
    let serializer = example_serializer();

    let mut data = example_data();
    data["forward_many_to_many_fields"] = json!([{"name": "x"}, {"name": "y"}]);
    let record = writer
        .create("Example", serializer.validate(&registry, &data, Mode::Create)?)
        .await?;

    let update = json!({"forward_many_to_many_fields": [{"name": "z"}]});
    writer
        .update("Example", record.pk, serializer.validate(&registry, &update, Mode::Update)?)
        .await?;

    let output = serializer.represent(&db, &registry, &record).await?;
    assert_eq!(names(&output["forward_many_to_many_fields"]), vec!["z"]);
    assert_eq!(persistence::count(&db, "forward_many_to_many").await?, 3);
    Ok(())
}

#[tokio::test]
async fn test_omitted_relations_are_untouched() -> Result<()> {
    let (db, registry) = setup().await?;
    let writer = NestedWriter::new(db.clone(), registry.clone());
    let serializer = example_serializer();

    let record = writer
        .create("Example", serializer.validate(&registry, &example_data(), Mode::Create)?)
        .await?;
    let before = serializer.represent(&db, &registry, &record).await?;

    let input = serializer.validate(&registry, &json!({"name": "foo renamed"}), Mode::Update)?;
    let updated = writer.update("Example", record.pk, input).await?;

    let after = serializer.represent(&db, &registry, &updated).await?;
    assert_eq!(after["name"], "foo renamed");
    for field in [
        "forward_many_to_many_fields",
        "reverse_one_to_one_rel",
        "reverse_one_to_many_rels",
        "reverse_many_to_many_rels",
    ] {
        assert_eq!(after[field], before[field], "{}", field);
    }
    Ok(())
}

#[tokio::test]
async fn test_reverse_one_to_one_replacement_keeps_required_row() -> Result<()> {
    let (db, registry) = setup().await?;
    let writer = NestedWriter::new(db.clone(), registry.clone());
    let serializer = example_serializer();

    let record = writer
        .create("Example", serializer.validate(&registry, &example_data(), Mode::Create)?)
        .await?;
    let before = serializer.represent(&db, &registry, &record).await?;

    let update = json!({"name": "renamed", "reverse_one_to_one_rel": {"name": "replacement"}});
    let err = writer
        .update("Example", record.pk, serializer.validate(&registry, &update, Mode::Update)?)
        .await
        .unwrap_err();
    let errors = err.validation_errors().expect("validation error");
    assert_eq!(errors.get("reverse_one_to_one_rel").unwrap()[0].code, "invalid");

    let after = serializer.represent(&db, &registry, &record).await?;
    assert_eq!(after, before);
    assert_eq!(persistence::count(&db, "reverse_one_to_one").await?, 1);

    // Re-sending the linked row by pk is not a replacement
    let linked = before["reverse_one_to_one_rel"]["pk"].clone();
    let update = json!({"reverse_one_to_one_rel": {"pk": linked, "name": "four again"}});
    writer
        .update("Example", record.pk, serializer.validate(&registry, &update, Mode::Update)?)
        .await?;
    let after = serializer.represent(&db, &registry, &record).await?;
    assert_eq!(after["reverse_one_to_one_rel"], json!({"pk": linked, "name": "four again"}));
    Ok(())
}

#[tokio::test]
async fn test_reverse_one_to_one_null_on_required_back_reference() -> Result<()> {
    let (db, registry) = setup().await?;
    let writer = NestedWriter::new(db.clone(), registry.clone());

    let example = example_factory(&writer, "foo", 1, "foo@email.com").await?;
    let input = input_from_json(&registry, "Example", &json!({"reverse_one_to_one_rel": null}))?;
    let err = writer.update("Example", example.pk, input).await.unwrap_err();

    let errors = err.validation_errors().expect("validation error");
    assert_eq!(errors.get("reverse_one_to_one_rel").unwrap()[0].code, "null");
    Ok(())
}

#[tokio::test]
async fn test_reverse_one_to_one_null_detaches_row() -> Result<()> {
    let registry = Arc::new(SchemaRegistry::build([
        EntityDef::new("Account", "account").field("name", FieldDef::text(50)),
        EntityDef::new("Profile", "profile")
            .field("bio", FieldDef::text(50))
            .relation(
                ForwardRelationDef::one_to_one("account", "Account")
                    .nullable()
                    .related_name("profile"),
            ),
    ])?);
    let db = establish_connection("sqlite::memory:").await?;
    registry.create_tables(&db).await?;
    let writer = NestedWriter::new(db.clone(), registry.clone());

    let account = create(&writer, "Account", json!({"name": "a", "profile": {"bio": "hi"}})).await?;
    let profile_def = registry.entity("Profile")?;
    let linked = persistence::find_by(&db, profile_def, "account", json!(account.pk)).await?;
    let profile_pk = linked.map(|profile| profile.pk).expect("profile linked");

    let input = input_from_json(&registry, "Account", &json!({"profile": null}))?;
    writer.update("Account", account.pk, input).await?;

    let profile = persistence::get(&db, profile_def, profile_pk).await?.expect("profile kept");
    assert_eq!(profile.fk("account"), None);
    assert_eq!(persistence::count(&db, "profile").await?, 1);

    // Replacing a nullable link detaches the previous row as well
    let input = input_from_json(&registry, "Account", &json!({"profile": profile_pk}))?;
    writer.update("Account", account.pk, input).await?;
    let input = input_from_json(&registry, "Account", &json!({"profile": {"bio": "new"}}))?;
    writer.update("Account", account.pk, input).await?;

    let old = persistence::get(&db, profile_def, profile_pk).await?.expect("profile kept");
    assert_eq!(old.fk("account"), None);
    let current = persistence::find_by(&db, profile_def, "account", json!(account.pk)).await?;
    assert_eq!(current.and_then(|p| p.get_str("bio").map(str::to_string)), Some("new".to_string()));
    assert_eq!(persistence::count(&db, "profile").await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_two_level_nesting() -> Result<()> {
    let registry = Arc::new(SchemaRegistry::build([
        EntityDef::new("Grand", "grand").field("name", FieldDef::text(20)),
        EntityDef::new("Parent", "parent")
            .field("name", FieldDef::text(20))
            .relation(ForwardRelationDef::foreign_key("grand", "Grand").related_name("ps")),
        EntityDef::new("Child", "child")
            .field("name", FieldDef::text(20))
            .relation(ForwardRelationDef::foreign_key("parent", "Parent").related_name("cs")),
    ])?);
    let db = establish_connection("sqlite::memory:").await?;
    registry.create_tables(&db).await?;
    let writer = NestedWriter::new(db.clone(), registry.clone());

    let grand = create(
        &writer,
        "Grand",
        json!({"name": "g", "ps": [{"name": "p", "cs": [{"name": "c1"}, {"name": "c2"}]}]}),
    )
    .await?;
    assert_eq!(persistence::count(&db, "parent").await?, 1);
    assert_eq!(persistence::count(&db, "child").await?, 2);

    let parent_def = registry.entity("Parent")?;
    let child_def = registry.entity("Child")?;
    let parent = persistence::find_by(&db, parent_def, "grand", json!(grand.pk))
        .await?
        .expect("parent linked");
    let first = persistence::find_by(&db, child_def, "name", json!("c1"))
        .await?
        .expect("child created");
    assert_eq!(first.fk("parent"), Some(parent.pk));

    // Dropping a grandchild from the nested list deletes it
    let input = input_from_json(
        &registry,
        "Grand",
        &json!({"ps": [{"pk": parent.pk, "cs": [{"pk": first.pk}]}]}),
    )?;
    writer.update("Grand", grand.pk, input).await?;
    assert_eq!(persistence::count(&db, "parent").await?, 1);
    assert_eq!(persistence::count(&db, "child").await?, 1);

    let input = input_from_json(
        &registry,
        "Grand",
        &json!({"ps": [{"pk": parent.pk, "cs": [{"pk": first.pk, "name": "changed"}, {}]}]}),
    )?;
    let err = writer.update("Grand", grand.pk, input).await.unwrap_err();
    let errors = err.validation_errors().expect("validation error");
    assert_eq!(errors.get("ps.0.cs.1.name").unwrap()[0].code, "required");

    assert_eq!(persistence::count(&db, "parent").await?, 1);
    assert_eq!(persistence::count(&db, "child").await?, 1);
    let first = persistence::get(&db, child_def, first.pk).await?.expect("child kept");
    assert_eq!(first.get_str("name"), Some("c1"));
    Ok(())
}

#[tokio::test]
async fn test_symmetrical_membership_both_ways() -> Result<()> {
    let (db, registry) = setup().await?;
    let writer = NestedWriter::new(db.clone(), registry.clone());

    let a = example_factory(&writer, "foo a", 1, "a@email.com").await?;
    let b = example_factory(&writer, "foo b", 2, "b@email.com").await?;

    let input = input_from_json(&registry, "Example", &json!({"symmetrical_field": [b.pk]}))?;
    writer.update("Example", a.pk, input).await?;

    let link = registry
        .relation("Example", "symmetrical_field")
        .map(|d| d.link.clone())
        .expect("symmetrical relation");
    assert!(matches!(link, RelationLink::JoinTable { symmetrical: true, .. }));
    assert_eq!(persistence::linked_pks(&db, &link, a.pk).await?, vec![b.pk]);
    assert_eq!(persistence::linked_pks(&db, &link, b.pk).await?, vec![a.pk]);
    Ok(())
}

#[tokio::test]
async fn test_unique_violation_rolls_back_everything() -> Result<()> {
    let (db, registry) = setup().await?;
    let writer = NestedWriter::new(db.clone(), registry.clone());
    let serializer = example_serializer();

    example_factory(&writer, "foo", 1, "first@email.com").await?;

    let input = serializer.validate(&registry, &example_data(), Mode::Create)?;
    let err = writer.create("Example", input).await.unwrap_err();

    let errors = err.validation_errors().expect("validation error");
    assert_eq!(
        errors.get("non_field_errors").unwrap()[0].message,
        "Example unique violation message."
    );
    // Rows written before the failing insert are gone too
    assert_eq!(persistence::count(&db, "example").await?, 1);
    assert_eq!(persistence::count(&db, "forward_one_to_one").await?, 1);
    assert_eq!(persistence::count(&db, "forward_many_to_one").await?, 1);
    assert_eq!(persistence::count(&db, "forward_many_to_many").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_check_violation_message() -> Result<()> {
    let (db, registry) = setup().await?;
    let writer = NestedWriter::new(db.clone(), registry.clone());
    let serializer = example_serializer();

    let mut data = example_data();
    data["name"] = json!("bar");
    let input = serializer.validate(&registry, &data, Mode::Create)?;
    let err = writer.create("Example", input).await.unwrap_err();

    let errors = err.validation_errors().expect("validation error");
    assert_eq!(
        errors.get("non_field_errors").unwrap()[0].message,
        "Example constraint violation message."
    );
    assert_eq!(persistence::count(&db, "forward_one_to_one").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_unique_field_violation_keyed_by_field() -> Result<()> {
    let (db, registry) = setup().await?;
    let writer = NestedWriter::new(db.clone(), registry.clone()).with_non_field_key("__all__");

    example_factory(&writer, "foo", 1, "same@email.com").await?;
    let err = example_factory(&writer, "foo", 2, "same@email.com")
        .await
        .unwrap_err()
        .downcast::<MutationError>()?;

    let errors = err.validation_errors().expect("validation error");
    assert_eq!(
        errors.get("email").unwrap()[0].message,
        "Example with this email already exists."
    );
    assert!(!errors.contains("__all__"));
    Ok(())
}

#[tokio::test]
async fn test_nested_errors_carry_relation_path() -> Result<()> {
    let (db, registry) = setup().await?;
    let writer = NestedWriter::new(db.clone(), registry.clone());

    let example = example_factory(&writer, "foo", 1, "foo@email.com").await?;
    let input = input_from_json(
        &registry,
        "Example",
        &json!({
            "forward_one_to_one_field": {},
            "reverse_one_to_many_rels": [{"name": "ok"}, {}],
        }),
    )?;
    let err = writer.update("Example", example.pk, input).await.unwrap_err();
    let errors = err.validation_errors().expect("validation error");
    assert_eq!(errors.get("forward_one_to_one_field.name").unwrap()[0].code, "required");

    let input = input_from_json(
        &registry,
        "Example",
        &json!({"reverse_one_to_many_rels": [{"name": "ok"}, {}]}),
    )?;
    let err = writer.update("Example", example.pk, input).await.unwrap_err();
    let errors = err.validation_errors().expect("validation error");
    assert_eq!(errors.get("reverse_one_to_many_rels.1.name").unwrap()[0].code, "required");
    assert_eq!(persistence::count(&db, "reverse_one_to_many").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_missing_rows_and_unknown_fields() -> Result<()> {
    let (db, registry) = setup().await?;
    let writer = NestedWriter::new(db.clone(), registry.clone());

    let example = example_factory(&writer, "foo", 1, "foo@email.com").await?;

    let input = input_from_json(&registry, "Example", &json!({"forward_many_to_one_field": 999}))?;
    let err = writer.update("Example", example.pk, input).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(
        err.to_string(),
        "`ForwardManyToOne` object matching query `pk=999` does not exist."
    );

    let input = input_from_json(&registry, "Example", &json!({"name": "foo"}))?;
    assert!(writer.update("Example", 999, input).await.unwrap_err().is_not_found());

    let mut input = input_from_json(&registry, "Example", &json!({"name": "foo"}))?;
    input.insert(
        "not_a_field".to_string(),
        nesting::serializers::InputValue::Scalar(json!(1)),
    );
    let err = writer.update("Example", example.pk, input).await.unwrap_err();
    assert!(matches!(err, MutationError::Schema(SchemaError::UnknownField { .. })));
    Ok(())
}
