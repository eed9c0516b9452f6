//! keyform repository: persists entities of one schema through a store client.
//!
//! The storage encoding (flat record or JSON document) is chosen once, from the
//! schema, when the repository is built. All I/O goes through `StoreClient`;
//! transport errors are surfaced as-is and never retried.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use keyform_core::{EntityId, Error, FieldValue, Result, TransportError};
use keyform_schema::{Entity, Schema};
use keyform_store::StoreClient;
use metrics::{counter, histogram};
use tracing::{debug, info};

pub mod encoding;

pub use encoding::{DocumentCodec, EntityCodec, FlatRecord, FlatRecordCodec};

pub struct Repository {
    schema: Arc<Schema>,
    store: Arc<dyn StoreClient>,
    codec: Box<dyn EntityCodec>,
}

impl Repository {
    pub fn new(schema: Arc<Schema>, store: Arc<dyn StoreClient>) -> Self {
        let codec = encoding::codec_for(schema.data_structure());
        debug!(prefix = schema.prefix(), encoding = codec.name(), "repository ready");
        Self { schema, store, codec }
    }

    pub fn schema(&self) -> &Arc<Schema> { &self.schema }

    /// Storage key for `id`: `prefix:id`.
    pub fn key_for(&self, id: &str) -> String {
        self.schema.key_for(id)
    }

    /// Fresh entity carrying a newly generated id and no values.
    pub fn create_entity(&self) -> Result<Entity> {
        let id = self.schema.generate_id()?;
        Ok(Entity::with_id(Arc::clone(&self.schema), id))
    }

    pub async fn create_and_save<I, K, V>(&self, values: I) -> Result<Entity>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<FieldValue>,
    {
        let mut entity = self.create_entity()?;
        for (k, v) in values {
            entity.set(k.as_ref(), v)?;
        }
        self.save(&mut entity).await?;
        Ok(entity)
    }

    fn check_schema(&self, entity: &Entity) -> Result<()> {
        let theirs = entity.schema();
        let same = Arc::ptr_eq(theirs, &self.schema)
            || (theirs.prefix() == self.schema.prefix() && theirs.fields() == self.schema.fields());
        if same {
            return Ok(());
        }
        Err(Error::SchemaMismatch {
            expected: self.schema.entity_name().to_string(),
            actual: theirs.entity_name().to_string(),
        })
    }

    /// Write `entity`, assigning an id first if it has none. Returns the id.
    pub async fn save(&self, entity: &mut Entity) -> Result<EntityId> {
        self.check_schema(entity)?;
        let started = Instant::now();
        let id = entity.ensure_id_from(&self.schema)?.to_string();
        let key = self.key_for(&id);
        self.codec.write(self.store.as_ref(), &key, entity).await?;
        histogram!("keyform_save_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("keyform_save_total", 1u64);
        debug!(key = %key, encoding = self.codec.name(), "entity saved");
        Ok(id)
    }

    /// Load `id`. A missing key yields an entity whose fields are all null.
    pub async fn fetch(&self, id: &str) -> Result<Entity> {
        let started = Instant::now();
        let key = self.key_for(id);
        let decoded = self.codec.read(self.store.as_ref(), &key, &self.schema).await?;
        let entity = match decoded {
            Some(values) => Entity::from_parts(Arc::clone(&self.schema), id, values)?,
            None => {
                debug!(key = %key, "fetch of missing key");
                Entity::with_id(Arc::clone(&self.schema), id)
            }
        };
        histogram!("keyform_fetch_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("keyform_fetch_total", 1u64);
        Ok(entity)
    }

    /// Delete `id`. Removing a missing id is not an error.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let key = self.key_for(id);
        self.store.delete(&key).await.map_err(TransportError)?;
        counter!("keyform_remove_total", 1u64);
        debug!(key = %key, "entity removed");
        Ok(())
    }

    /// Set a time-to-live on `id`. Returns false when nothing is stored there.
    pub async fn expire(&self, id: &str, ttl_secs: u64) -> Result<bool> {
        let key = self.key_for(id);
        let applied = self.store.expire(&key, Duration::from_secs(ttl_secs)).await.map_err(TransportError)?;
        info!(key = %key, ttl_secs, applied, "expiry set");
        Ok(applied)
    }
}
