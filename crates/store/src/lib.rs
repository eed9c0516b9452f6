//! keyform store: the narrow client contract the repository consumes, plus an
//! in-process client with Redis-like key semantics.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

/// Flat record as read back from the store: slot name -> string value.
pub type Record = HashMap<String, String>;

/// Primitive operations against a key-value document store.
///
/// Errors are transport-level; callers propagate them without retrying.
#[async_trait::async_trait]
pub trait StoreClient: Send + Sync {
    /// All slots of a flat record, or `None` when the key does not exist.
    async fn get_record(&self, key: &str) -> Result<Option<Record>>;

    /// Create or overwrite the given slots. Other slots are left untouched.
    async fn set_fields(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    /// Remove slots. A record left with no slots disappears.
    async fn delete_fields(&self, key: &str, fields: &[String]) -> Result<()>;

    async fn get_document(&self, key: &str) -> Result<Option<Value>>;

    /// Replace the whole document stored at `key`.
    async fn set_document(&self, key: &str, doc: &Value) -> Result<()>;

    /// Remove the key whatever it holds. Missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Set a time-to-live. Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;
}

#[derive(Debug, Clone)]
enum Entry {
    Hash(FxHashMap<String, String>),
    Json(Value),
}

#[derive(Debug, Clone)]
struct Slot {
    entry: Entry,
    expires_at: Option<Instant>,
}

const WRONGTYPE: &str = "WRONGTYPE operation against a key holding the wrong kind of value";

/// In-memory client. Expired keys are evicted lazily on access.
#[derive(Debug, Default)]
pub struct MemoryStore {
    keys: Mutex<FxHashMap<String, Slot>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    /// Live keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut map = self.keys.lock().await;
        let now = Instant::now();
        map.retain(|_, s| s.expires_at.map_or(true, |t| t > now));
        let mut out: Vec<String> = map.keys().cloned().collect();
        out.sort();
        out
    }

    pub async fn flush(&self) {
        self.keys.lock().await.clear();
    }
}

fn live<'a>(map: &'a mut FxHashMap<String, Slot>, key: &str) -> Option<&'a mut Slot> {
    let expired = map.get(key).and_then(|s| s.expires_at).is_some_and(|t| t <= Instant::now());
    if expired {
        debug!(key, "evicting expired key");
        map.remove(key);
        return None;
    }
    map.get_mut(key)
}

#[async_trait::async_trait]
impl StoreClient for MemoryStore {
    async fn get_record(&self, key: &str) -> Result<Option<Record>> {
        let mut map = self.keys.lock().await;
        match live(&mut map, key).map(|s| &s.entry) {
            None => Ok(None),
            Some(Entry::Hash(h)) => Ok(Some(h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())),
            Some(Entry::Json(_)) => bail!(WRONGTYPE),
        }
    }

    async fn set_fields(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut map = self.keys.lock().await;
        if live(&mut map, key).is_none() {
            map.insert(key.to_string(), Slot { entry: Entry::Hash(FxHashMap::default()), expires_at: None });
        }
        match map.get_mut(key).map(|s| &mut s.entry) {
            Some(Entry::Hash(h)) => {
                for (f, v) in fields {
                    h.insert(f.clone(), v.clone());
                }
                Ok(())
            }
            _ => bail!(WRONGTYPE),
        }
    }

    async fn delete_fields(&self, key: &str, fields: &[String]) -> Result<()> {
        let mut map = self.keys.lock().await;
        let now_empty = match live(&mut map, key).map(|s| &mut s.entry) {
            None => return Ok(()),
            Some(Entry::Hash(h)) => {
                for f in fields {
                    h.remove(f);
                }
                h.is_empty()
            }
            Some(Entry::Json(_)) => bail!(WRONGTYPE),
        };
        if now_empty {
            map.remove(key);
        }
        Ok(())
    }

    async fn get_document(&self, key: &str) -> Result<Option<Value>> {
        let mut map = self.keys.lock().await;
        match live(&mut map, key).map(|s| &s.entry) {
            None => Ok(None),
            Some(Entry::Json(v)) => Ok(Some(v.clone())),
            Some(Entry::Hash(_)) => bail!(WRONGTYPE),
        }
    }

    async fn set_document(&self, key: &str, doc: &Value) -> Result<()> {
        let mut map = self.keys.lock().await;
        match live(&mut map, key) {
            None => {
                map.insert(key.to_string(), Slot { entry: Entry::Json(doc.clone()), expires_at: None });
                Ok(())
            }
            Some(Slot { entry: Entry::Json(v), .. }) => {
                *v = doc.clone();
                Ok(())
            }
            Some(_) => bail!(WRONGTYPE),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.keys.lock().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut map = self.keys.lock().await;
        Ok(live(&mut map, key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut map = self.keys.lock().await;
        match live(&mut map, key) {
            Some(slot) => {
                slot.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
