#![forbid(unsafe_code)]

use std::sync::Arc;

use keyform_core::{FieldType, FieldValue};
use keyform_repository::Repository;
use keyform_schema::{DataStructure, Entity, FieldDeclaration, Schema, SchemaOptions};
use keyform_store::{MemoryStore, StoreClient};
use serde_json::{json, Value};

const KEY: &str = "JsonEntity:full";

fn schema() -> Arc<Schema> {
    let fields = vec![
        FieldDeclaration::new("aString", FieldType::String),
        FieldDeclaration::new("anotherString", FieldType::String),
        FieldDeclaration::new("aFullTextString", FieldType::Text),
        FieldDeclaration::new("anotherFullTextString", FieldType::Text),
        FieldDeclaration::new("aNumber", FieldType::Number),
        FieldDeclaration::new("anotherNumber", FieldType::Number),
        FieldDeclaration::new("aBoolean", FieldType::Boolean),
        FieldDeclaration::new("anotherBoolean", FieldType::Boolean),
        FieldDeclaration::new("anArray", FieldType::Array),
        FieldDeclaration::new("anotherArray", FieldType::Array),
    ];
    let options = SchemaOptions::default().data_structure(DataStructure::Json);
    Arc::new(Schema::new("JsonEntity", fields, options).unwrap())
}

fn an_entity() -> Value {
    json!({
        "aString": "foo",
        "anotherString": "bar",
        "aFullTextString": "The quick brown fox jumped over the lazy dog.",
        "anotherFullTextString": "The five boxing wizards jump quickly.",
        "aNumber": 42,
        "anotherNumber": 23,
        "aBoolean": true,
        "anotherBoolean": false,
        "anArray": "alfa|bravo|charlie",
        "anotherArray": "bravo|charlie|delta",
    })
}

fn another_entity() -> Vec<(&'static str, FieldValue)> {
    vec![
        ("aString", FieldValue::from("baz")),
        ("anotherString", FieldValue::from("qux")),
        ("aFullTextString", FieldValue::from("Sphinx of black quartz, judge my vow.")),
        ("anotherFullTextString", FieldValue::from("Pack my box with five dozen liquor jugs.")),
        ("aNumber", FieldValue::from(13)),
        ("anotherNumber", FieldValue::from(7)),
        ("aBoolean", FieldValue::from(false)),
        ("anotherBoolean", FieldValue::from(true)),
        ("anArray", FieldValue::from(["echo", "foxtrot", "golf"])),
        ("anotherArray", FieldValue::from(["foxtrot", "golf", "hotel"])),
    ]
}

async fn setup() -> (Arc<MemoryStore>, Repository) {
    let store = Arc::new(MemoryStore::new());
    store.set_document(KEY, &an_entity()).await.unwrap();
    let repo = Repository::new(schema(), store.clone());
    (store, repo)
}

async fn stored(store: &MemoryStore) -> Value {
    store.get_document(KEY).await.unwrap().unwrap()
}

#[tokio::test]
async fn fetch_decodes_the_loaded_document() {
    let (_store, repo) = setup().await;
    let e = repo.fetch("full").await.unwrap();
    assert_eq!(e.get_str("aFullTextString").unwrap(), Some("The quick brown fox jumped over the lazy dog."));
    assert_eq!(e.get_number("anotherNumber").unwrap(), Some(23.0));
    assert_eq!(e.get_bool("anotherBoolean").unwrap(), Some(false));
    let expected = ["alfa", "bravo", "charlie"].map(String::from);
    assert_eq!(e.get_array("anArray").unwrap(), Some(&expected[..]));
}

#[tokio::test]
async fn updating_a_fully_populated_entity() {
    let (store, repo) = setup().await;
    let mut e = repo.fetch("full").await.unwrap();
    for (field, value) in another_entity() {
        e.set(field, value).unwrap();
    }
    let id = repo.save(&mut e).await.unwrap();
    assert_eq!(id, "full");

    let data = stored(&store).await;
    assert_eq!(data["aString"], "baz");
    assert_eq!(data["anotherString"], "qux");
    assert_eq!(data["aFullTextString"], "Sphinx of black quartz, judge my vow.");
    assert_eq!(data["anotherFullTextString"], "Pack my box with five dozen liquor jugs.");
    assert_eq!(data["aNumber"], 13);
    assert_eq!(data["anotherNumber"], 7);
    assert_eq!(data["aBoolean"], false);
    assert_eq!(data["anotherBoolean"], true);
    assert_eq!(data["anArray"], "echo|foxtrot|golf");
    assert_eq!(data["anotherArray"], "foxtrot|golf|hotel");
}

#[tokio::test]
async fn updating_a_partially_populated_entity() {
    let (store, repo) = setup().await;
    let mut e = repo.fetch("full").await.unwrap();
    for (field, value) in another_entity() {
        if field.starts_with("another") {
            e.clear(field).unwrap();
        } else {
            e.set(field, value).unwrap();
        }
    }
    assert_eq!(repo.save(&mut e).await.unwrap(), "full");

    let data = stored(&store).await;
    assert_eq!(data["aString"], "baz");
    assert_eq!(data["anotherString"], Value::Null);
    assert_eq!(data["aFullTextString"], "Sphinx of black quartz, judge my vow.");
    assert_eq!(data["anotherFullTextString"], Value::Null);
    assert_eq!(data["aNumber"], 13);
    assert_eq!(data["anotherNumber"], Value::Null);
    assert_eq!(data["aBoolean"], false);
    assert_eq!(data["anotherBoolean"], Value::Null);
    assert_eq!(data["anArray"], "echo|foxtrot|golf");
    assert_eq!(data["anotherArray"], Value::Null);

    // nulls are explicit keys, not omissions
    let obj = data.as_object().unwrap();
    assert_eq!(obj.len(), 10);
    assert!(obj.contains_key("anotherArray"));
}

#[tokio::test]
async fn updating_to_an_empty_entity() {
    let (store, repo) = setup().await;
    let mut e = repo.fetch("full").await.unwrap();
    let names: Vec<String> = e.values().map(|(d, _)| d.name.clone()).collect();
    for name in &names {
        e.clear(name).unwrap();
    }
    assert_eq!(repo.save(&mut e).await.unwrap(), "full");

    let data = stored(&store).await;
    for name in &names {
        assert_eq!(data[name.as_str()], Value::Null, "{} should be null", name);
    }

    let back = repo.fetch("full").await.unwrap();
    assert!(back.values().all(|(_, v)| v.is_none()));
}

#[tokio::test]
async fn new_json_entities_round_trip() {
    let (store, repo) = setup().await;
    let mut e = Entity::new(repo.schema().clone());
    e.set("aString", "x").unwrap();
    e.set("aNumber", 2.5).unwrap();
    e.set("anArray", ["a", "b"]).unwrap();
    let id = repo.save(&mut e).await.unwrap();

    let data = store.get_document(&repo.key_for(&id)).await.unwrap().unwrap();
    assert_eq!(data["anArray"], "a|b");
    assert_eq!(data["aBoolean"], Value::Null);

    let back = repo.fetch(&id).await.unwrap();
    assert_eq!(back.get_number("aNumber").unwrap(), Some(2.5));
    assert_eq!(back.get_array("anArray").unwrap().map(|a| a.len()), Some(2));
    assert_eq!(back.get("aBoolean").unwrap(), None);
}

#[tokio::test]
async fn missing_keys_in_stored_documents_decode_to_null() {
    let store = Arc::new(MemoryStore::new());
    store.set_document("JsonEntity:sparse", &json!({"aString": "only"})).await.unwrap();
    let repo = Repository::new(schema(), store);
    let e = repo.fetch("sparse").await.unwrap();
    assert_eq!(e.get_str("aString").unwrap(), Some("only"));
    assert_eq!(e.get("anotherString").unwrap(), None);
    assert_eq!(e.get("anArray").unwrap(), None);
}
