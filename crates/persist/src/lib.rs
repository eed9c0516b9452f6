//! keyform persistence: SQLite-backed store client.
//! Flat records live one row per slot, documents one row per key.

#![forbid(unsafe_code)]

use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use keyform_store::{Record, StoreClient};
use metrics::{counter, histogram};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::debug;

const WRONGTYPE: &str = "WRONGTYPE operation against a key holding the wrong kind of value";

/// SQLite-backed client. One connection behind a `std::sync::Mutex`, held
/// for the length of each blocking SQLite call.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("KEYFORM_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                key   TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (key, field)
            );
            CREATE TABLE IF NOT EXISTS documents (
                key  TEXT PRIMARY KEY,
                body TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS expirations (
                key TEXT PRIMARY KEY,
                at  INTEGER NOT NULL
            );",
        )
        .context("creating keyform tables")?;
        let me = Self { db: Mutex::new(db) };
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(path, "sqlite store opened");
        Ok(me)
    }

    fn with_db<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut db = self.db.lock().map_err(|_| anyhow!("sqlite connection lock poisoned"))?;
        f(&mut db)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let started = std::time::Instant::now();
        let out = self.with_db(f)?;
        histogram!("persist_write_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_write_total", 1u64);
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Record,
    Document,
}

fn drop_key(db: &Connection, key: &str) -> Result<()> {
    db.execute("DELETE FROM records WHERE key = ?1", [key])?;
    db.execute("DELETE FROM documents WHERE key = ?1", [key])?;
    db.execute("DELETE FROM expirations WHERE key = ?1", [key])?;
    Ok(())
}

/// Kind of value stored at `key`, evicting it first if its TTL has passed.
fn live_kind(db: &Connection, key: &str) -> Result<Option<Kind>> {
    let expired: bool = db.query_row(
        "SELECT EXISTS(SELECT 1 FROM expirations WHERE key = ?1 AND at <= ?2)",
        params![key, now_ms()],
        |r| r.get(0),
    )?;
    if expired {
        debug!(key, "evicting expired key");
        drop_key(db, key)?;
        return Ok(None);
    }
    let is_doc: bool = db.query_row("SELECT EXISTS(SELECT 1 FROM documents WHERE key = ?1)", [key], |r| r.get(0))?;
    if is_doc {
        return Ok(Some(Kind::Document));
    }
    let is_rec: bool = db.query_row("SELECT EXISTS(SELECT 1 FROM records WHERE key = ?1)", [key], |r| r.get(0))?;
    Ok(is_rec.then_some(Kind::Record))
}

#[async_trait::async_trait]
impl StoreClient for SqliteStore {
    async fn get_record(&self, key: &str) -> Result<Option<Record>> {
        self.with_db(|db| {
            match live_kind(db, key)? {
                None => return Ok(None),
                Some(Kind::Document) => bail!(WRONGTYPE),
                Some(Kind::Record) => {}
            }
            let mut stmt = db.prepare("SELECT field, value FROM records WHERE key = ?1")?;
            let mut rows = stmt.query([key])?;
            let mut out = Record::new();
            while let Some(row) = rows.next()? {
                out.insert(row.get(0)?, row.get(1)?);
            }
            Ok(Some(out))
        })
    }

    async fn set_fields(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        self.write(|db| {
            let tx = db.transaction()?;
            if live_kind(&tx, key)? == Some(Kind::Document) {
                bail!(WRONGTYPE);
            }
            for (field, value) in fields {
                tx.execute(
                    "INSERT INTO records(key, field, value) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key, field) DO UPDATE SET value = excluded.value",
                    params![key, field, value],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    async fn delete_fields(&self, key: &str, fields: &[String]) -> Result<()> {
        self.write(|db| {
            let tx = db.transaction()?;
            match live_kind(&tx, key)? {
                None => return Ok(()),
                Some(Kind::Document) => bail!(WRONGTYPE),
                Some(Kind::Record) => {}
            }
            for field in fields {
                tx.execute("DELETE FROM records WHERE key = ?1 AND field = ?2", params![key, field])?;
            }
            // A record without slots no longer exists; its TTL goes with it.
            if live_kind(&tx, key)?.is_none() {
                tx.execute("DELETE FROM expirations WHERE key = ?1", [key])?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    async fn get_document(&self, key: &str) -> Result<Option<Value>> {
        self.with_db(|db| {
            match live_kind(db, key)? {
                None => return Ok(None),
                Some(Kind::Record) => bail!(WRONGTYPE),
                Some(Kind::Document) => {}
            }
            let body: Option<String> = db
                .query_row("SELECT body FROM documents WHERE key = ?1", [key], |r| r.get(0))
                .optional()?;
            match body {
                Some(b) => Ok(Some(serde_json::from_str(&b).with_context(|| format!("corrupt document at {}", key))?)),
                None => Ok(None),
            }
        })
    }

    async fn set_document(&self, key: &str, doc: &Value) -> Result<()> {
        let body = serde_json::to_string(doc)?;
        self.write(|db| {
            let tx = db.transaction()?;
            if live_kind(&tx, key)? == Some(Kind::Record) {
                bail!(WRONGTYPE);
            }
            tx.execute(
                "INSERT INTO documents(key, body) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET body = excluded.body",
                params![key, body],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.write(|db| {
            let tx = db.transaction()?;
            drop_key(&tx, key)?;
            tx.commit()?;
            Ok(())
        })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.with_db(|db| Ok(live_kind(db, key)?.is_some()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let at = now_ms().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));
        self.write(|db| {
            if live_kind(db, key)?.is_none() {
                return Ok(false);
            }
            db.execute(
                "INSERT INTO expirations(key, at) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET at = excluded.at",
                params![key, at],
            )?;
            Ok(true)
        })
    }
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".keyform");
        let _ = std::fs::create_dir_all(&p);
        p.push("keyform.db");
        return p.to_string_lossy().to_string();
    }
    // Fallback to current directory
    "keyform.db".to_string()
}

/// Milliseconds since epoch.
pub fn now_ms() -> i64 {
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    now.as_millis() as i64
}
