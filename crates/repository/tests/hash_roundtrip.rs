#![forbid(unsafe_code)]

use std::sync::Arc;

use keyform_core::{Error, FieldType, FieldValue, IdStrategy, ID_ALPHABET, ID_LEN};
use keyform_repository::Repository;
use keyform_schema::{Entity, FieldDeclaration, Schema, SchemaOptions};
use keyform_store::{MemoryStore, Record, StoreClient};

fn fields() -> Vec<FieldDeclaration> {
    vec![
        FieldDeclaration::new("aString", FieldType::String),
        FieldDeclaration::new("aNumber", FieldType::Number),
        FieldDeclaration::new("aBoolean", FieldType::Boolean),
        FieldDeclaration::new("anArray", FieldType::Array),
    ]
}

fn setup(options: SchemaOptions) -> (Arc<MemoryStore>, Repository) {
    let schema = Arc::new(Schema::new("HashEntity", fields(), options).unwrap());
    let store = Arc::new(MemoryStore::new());
    let repo = Repository::new(schema, store.clone());
    (store, repo)
}

fn populated(repo: &Repository, id: &str) -> Entity {
    Entity::with_values(
        repo.schema().clone(),
        id,
        [
            ("aString", FieldValue::from("x")),
            ("aNumber", FieldValue::from(42)),
            ("aBoolean", FieldValue::from(true)),
            ("anArray", FieldValue::from(["a", "b"])),
        ],
    )
    .unwrap()
}

async fn raw(store: &MemoryStore, key: &str) -> Option<Record> {
    store.get_record(key).await.unwrap()
}

#[tokio::test]
async fn saved_entity_fetches_back_identically() {
    let (store, repo) = setup(SchemaOptions::default());
    let mut e = populated(&repo, "e1");

    let id = repo.save(&mut e).await.unwrap();
    assert_eq!(id, "e1");

    let rec = raw(&store, "HashEntity:e1").await.unwrap();
    assert_eq!(rec.get("anArray").map(String::as_str), Some("a|b"));
    assert_eq!(rec.get("aBoolean").map(String::as_str), Some("1"));
    assert_eq!(rec.get("aNumber").map(String::as_str), Some("42"));

    let back = repo.fetch("e1").await.unwrap();
    assert_eq!(back.id(), Some("e1"));
    assert_eq!(back.get_str("aString").unwrap(), Some("x"));
    assert_eq!(back.get_number("aNumber").unwrap(), Some(42.0));
    assert_eq!(back.get_bool("aBoolean").unwrap(), Some(true));
    assert_eq!(back.get_array("anArray").unwrap(), Some(&["a".to_string(), "b".to_string()][..]));
}

#[tokio::test]
async fn null_array_has_no_slot() {
    let (store, repo) = setup(SchemaOptions::default());
    let mut e = populated(&repo, "e1");
    e.clear("anArray").unwrap();
    repo.save(&mut e).await.unwrap();

    let rec = raw(&store, "HashEntity:e1").await.unwrap();
    assert!(!rec.contains_key("anArray"));
    assert_eq!(repo.fetch("e1").await.unwrap().get("anArray").unwrap(), None);
}

#[tokio::test]
async fn cleared_field_does_not_survive_resave() {
    let (store, repo) = setup(SchemaOptions::default());
    let mut e = populated(&repo, "e1");
    repo.save(&mut e).await.unwrap();

    e.clear("aString").unwrap();
    e.clear("aNumber").unwrap();
    repo.save(&mut e).await.unwrap();

    let rec = raw(&store, "HashEntity:e1").await.unwrap();
    assert!(!rec.contains_key("aString"));
    assert!(!rec.contains_key("aNumber"));

    let back = repo.fetch("e1").await.unwrap();
    assert_eq!(back.get("aString").unwrap(), None);
    assert_eq!(back.get("aNumber").unwrap(), None);
    assert_eq!(back.get_bool("aBoolean").unwrap(), Some(true));
}

#[tokio::test]
async fn all_null_entity_round_trips_as_all_null() {
    let (store, repo) = setup(SchemaOptions::default());
    let mut e = populated(&repo, "e1");
    repo.save(&mut e).await.unwrap();
    for f in ["aString", "aNumber", "aBoolean", "anArray"] {
        e.clear(f).unwrap();
    }
    repo.save(&mut e).await.unwrap();

    assert!(raw(&store, "HashEntity:e1").await.is_none());
    let back = repo.fetch("e1").await.unwrap();
    assert_eq!(back.id(), Some("e1"));
    assert!(back.values().all(|(_, v)| v.is_none()));
}

#[tokio::test]
async fn empty_array_collapses_to_null() {
    let (store, repo) = setup(SchemaOptions::default());
    let mut e = populated(&repo, "e1");
    e.set("anArray", Vec::<String>::new()).unwrap();
    repo.save(&mut e).await.unwrap();

    assert!(!raw(&store, "HashEntity:e1").await.unwrap().contains_key("anArray"));
    assert_eq!(repo.fetch("e1").await.unwrap().get("anArray").unwrap(), None);
}

#[tokio::test]
async fn fetch_of_missing_key_is_all_null() {
    let (_store, repo) = setup(SchemaOptions::default());
    let e = repo.fetch("nope").await.unwrap();
    assert_eq!(e.id(), Some("nope"));
    assert!(e.values().all(|(_, v)| v.is_none()));
}

#[tokio::test]
async fn save_generates_default_ids() {
    let (store, repo) = setup(SchemaOptions::default());
    let mut e = Entity::new(repo.schema().clone());
    e.set("aString", "x").unwrap();
    let id = repo.save(&mut e).await.unwrap();
    assert_eq!(id.len(), ID_LEN);
    assert!(id.bytes().all(|c| ID_ALPHABET.contains(&c)));
    assert_eq!(e.id(), Some(id.as_str()));
    assert!(store.exists(&format!("HashEntity:{}", id)).await.unwrap());

    // saving again keeps the id
    assert_eq!(repo.save(&mut e).await.unwrap(), id);
}

#[tokio::test]
async fn overrides_change_key_and_id() {
    let options = SchemaOptions::default().prefix("custom").id_strategy(IdStrategy::new(|| "fixed".to_string()));
    let (store, repo) = setup(options);
    let e = repo.create_and_save([("aString", "hello")]).await.unwrap();
    assert_eq!(e.id(), Some("fixed"));
    assert_eq!(repo.key_for("fixed"), "custom:fixed");
    assert_eq!(store.keys().await, vec!["custom:fixed".to_string()]);
}

#[tokio::test]
async fn failing_id_strategy_propagates() {
    let options = SchemaOptions::default().id_strategy(IdStrategy::fallible(|| anyhow::bail!("no ids left")));
    let (store, repo) = setup(options);
    let mut e = Entity::new(repo.schema().clone());
    assert!(matches!(repo.save(&mut e).await, Err(Error::Id(_))));
    assert!(matches!(repo.create_entity(), Err(Error::Id(_))));
    assert!(store.keys().await.is_empty());
}

#[tokio::test]
async fn remove_is_idempotent() {
    let (store, repo) = setup(SchemaOptions::default());
    let mut e = populated(&repo, "e1");
    repo.save(&mut e).await.unwrap();
    repo.remove("e1").await.unwrap();
    repo.remove("e1").await.unwrap();
    assert!(store.keys().await.is_empty());
}

#[tokio::test]
async fn bad_stored_number_is_a_decode_error() {
    let (store, repo) = setup(SchemaOptions::default());
    store
        .set_fields("HashEntity:bad", &[("aNumber".to_string(), "forty".to_string())])
        .await
        .unwrap();
    assert!(matches!(repo.fetch("bad").await, Err(Error::Decode(_))));
}

#[tokio::test]
async fn entity_from_another_schema_is_rejected() {
    let (_store, repo) = setup(SchemaOptions::default());
    let other = Arc::new(Schema::new("Other", fields(), SchemaOptions::default()).unwrap());
    let mut e = Entity::with_id(other, "x");
    assert!(matches!(repo.save(&mut e).await, Err(Error::SchemaMismatch { .. })));
}

#[tokio::test]
async fn expire_applies_to_stored_entities_only() {
    let (_store, repo) = setup(SchemaOptions::default());
    assert!(!repo.expire("e1", 60).await.unwrap());
    let mut e = populated(&repo, "e1");
    repo.save(&mut e).await.unwrap();
    assert!(repo.expire("e1", 60).await.unwrap());
    assert_eq!(repo.fetch("e1").await.unwrap().get_str("aString").unwrap(), Some("x"));
}

#[tokio::test]
async fn unjoinable_array_items_never_reach_the_store() {
    let (store, repo) = setup(SchemaOptions::default());
    let mut e = populated(&repo, "e1");
    assert!(matches!(e.set("anArray", ["a|b"]), Err(Error::InvalidArrayItem { .. })));
    assert!(matches!(e.set("anArray", [""]), Err(Error::InvalidArrayItem { .. })));
    repo.save(&mut e).await.unwrap();

    assert_eq!(raw(&store, "HashEntity:e1").await.unwrap().get("anArray").map(String::as_str), Some("a|b"));
    let expected = ["a", "b"].map(String::from);
    assert_eq!(repo.fetch("e1").await.unwrap().get_array("anArray").unwrap(), Some(&expected[..]));
}

#[tokio::test]
async fn save_draws_ids_from_the_repository_schema() {
    let repo_opts = SchemaOptions::default().id_strategy(IdStrategy::new(|| "repo".to_string()));
    let (store, repo) = setup(repo_opts);
    let lookalike = Arc::new(
        Schema::new("HashEntity", fields(), SchemaOptions::default().id_strategy(IdStrategy::new(|| "other".to_string())))
            .unwrap(),
    );
    let mut e = Entity::new(lookalike);
    e.set("aString", "x").unwrap();

    assert_eq!(repo.save(&mut e).await.unwrap(), "repo");
    assert_eq!(e.id(), Some("repo"));
    assert_eq!(store.keys().await, vec!["HashEntity:repo".to_string()]);
}
