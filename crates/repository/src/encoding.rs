//! Entity encodings. Each one owns its null-vs-absent rules; the repository
//! only picks one per schema.

use keyform_core::{DecodeError, Error, FieldValue, Result, TransportError};
use keyform_schema::{DataStructure, Entity, Schema};
use keyform_store::{Record, StoreClient};
use serde_json::{Map, Value};

/// Decoded field values in schema declaration order.
pub type Decoded = Vec<Option<FieldValue>>;

#[async_trait::async_trait]
pub trait EntityCodec: Send + Sync {
    fn name(&self) -> &'static str;

    /// Write `entity` under `key`, leaving no stale value for a cleared field.
    async fn write(&self, store: &dyn StoreClient, key: &str, entity: &Entity) -> Result<()>;

    /// Read and decode `key`; `None` when the key does not exist.
    async fn read(&self, store: &dyn StoreClient, key: &str, schema: &Schema) -> Result<Option<Decoded>>;
}

pub fn codec_for(ds: DataStructure) -> Box<dyn EntityCodec> {
    match ds {
        DataStructure::Hash => Box::new(FlatRecordCodec),
        DataStructure::Json => Box::new(DocumentCodec),
    }
}

/// Slot writes and slot deletions produced from one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatRecord {
    pub set: Vec<(String, String)>,
    pub delete: Vec<String>,
}

/// One string slot per field; a null field has no slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatRecordCodec;

impl FlatRecordCodec {
    pub fn encode_entity(entity: &Entity) -> FlatRecord {
        let mut out = FlatRecord::default();
        for (desc, value) in entity.values() {
            match desc.encode_flat(value) {
                Some(raw) => out.set.push((desc.storage_name.clone(), raw)),
                None => out.delete.push(desc.storage_name.clone()),
            }
        }
        out
    }

    pub fn decode_entity(schema: &Schema, record: &Record) -> std::result::Result<Decoded, DecodeError> {
        schema
            .fields()
            .iter()
            .map(|desc| desc.decode_flat(record.get(&desc.storage_name).map(String::as_str)))
            .collect()
    }
}

#[async_trait::async_trait]
impl EntityCodec for FlatRecordCodec {
    fn name(&self) -> &'static str { "hash" }

    async fn write(&self, store: &dyn StoreClient, key: &str, entity: &Entity) -> Result<()> {
        let rec = Self::encode_entity(entity);
        if !rec.set.is_empty() {
            store.set_fields(key, &rec.set).await.map_err(TransportError)?;
        }
        // Slots from an earlier save must go, not linger.
        if !rec.delete.is_empty() {
            store.delete_fields(key, &rec.delete).await.map_err(TransportError)?;
        }
        Ok(())
    }

    async fn read(&self, store: &dyn StoreClient, key: &str, schema: &Schema) -> Result<Option<Decoded>> {
        let Some(record) = store.get_record(key).await.map_err(TransportError)? else {
            return Ok(None);
        };
        Ok(Some(Self::decode_entity(schema, &record)?))
    }
}

/// One JSON object per entity; every field is a key, null included.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentCodec;

impl DocumentCodec {
    pub fn encode_entity(entity: &Entity) -> Value {
        let mut map = Map::new();
        for (desc, value) in entity.values() {
            map.insert(desc.storage_name.clone(), desc.encode_json(value));
        }
        Value::Object(map)
    }

    pub fn decode_entity(schema: &Schema, key: &str, doc: &Value) -> Result<Decoded> {
        let Value::Object(map) = doc else {
            return Err(Error::NotAnObject(key.to_string()));
        };
        let mut out = Vec::with_capacity(schema.fields().len());
        for desc in schema.fields() {
            out.push(desc.decode_json(map.get(&desc.storage_name))?);
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl EntityCodec for DocumentCodec {
    fn name(&self) -> &'static str { "json" }

    async fn write(&self, store: &dyn StoreClient, key: &str, entity: &Entity) -> Result<()> {
        let doc = Self::encode_entity(entity);
        store.set_document(key, &doc).await.map_err(TransportError)?;
        Ok(())
    }

    async fn read(&self, store: &dyn StoreClient, key: &str, schema: &Schema) -> Result<Option<Decoded>> {
        let Some(doc) = store.get_document(key).await.map_err(TransportError)? else {
            return Ok(None);
        };
        Ok(Some(Self::decode_entity(schema, key, &doc)?))
    }
}
