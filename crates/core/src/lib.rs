//! keyform core types: logical field types and values, the field codec set,
//! identifier generation and the error taxonomy shared by every crate.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod codec;
pub mod id;

pub use id::{random_id, IdStrategy, ID_ALPHABET, ID_LEN};

/// Opaque entity identifier. Never includes the keyspace prefix.
pub type EntityId = String;

/// Storage key for an entity: `prefix:id`. Computed, never stored as a field.
pub fn entity_key(prefix: &str, id: &str) -> String {
    format!("{}:{}", prefix, id)
}

/// Declared logical type of a field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    /// Ordered sequence of strings, stored `|`-joined.
    #[serde(alias = "string[]")]
    Array,
    /// Full-text string; stored exactly like `String`.
    Text,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Text => "text",
        };
        f.write_str(s)
    }
}

/// A non-null logical field value. Null is modelled as `Option::None` at every
/// use site, so any field can always be cleared regardless of its type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Boolean(bool),
    Array(Vec<String>),
}

impl FieldValue {
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Text(_) => "string",
            FieldValue::Number(_) => "number",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::Array(_) => "array",
        }
    }

    /// Whether this value is of the logical type `ty`.
    pub fn fits(&self, ty: FieldType) -> bool {
        matches!(
            (self, ty),
            (FieldValue::Text(_), FieldType::String | FieldType::Text)
                | (FieldValue::Number(_), FieldType::Number)
                | (FieldValue::Boolean(_), FieldType::Boolean)
                | (FieldValue::Array(_), FieldType::Array)
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self { FieldValue::Text(s) => Some(s), _ => None }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self { FieldValue::Number(n) => Some(*n), _ => None }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self { FieldValue::Boolean(b) => Some(*b), _ => None }
    }

    pub fn as_array(&self) -> Option<&[String]> {
        match self { FieldValue::Array(v) => Some(v), _ => None }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self { FieldValue::Text(v.to_string()) }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self { FieldValue::Text(v) }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self { FieldValue::Number(v) }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self { FieldValue::Number(v as f64) }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self { FieldValue::Number(v as f64) }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self { FieldValue::Boolean(v) }
}

impl From<Vec<String>> for FieldValue {
    fn from(v: Vec<String>) -> Self { FieldValue::Array(v) }
}

impl From<Vec<&str>> for FieldValue {
    fn from(v: Vec<&str>) -> Self { FieldValue::Array(v.into_iter().map(str::to_string).collect()) }
}

impl<const N: usize> From<[&str; N]> for FieldValue {
    fn from(v: [&str; N]) -> Self { FieldValue::Array(v.iter().map(|s| s.to_string()).collect()) }
}

// ---- errors ----

/// Malformed or conflicting field declarations, raised while compiling a schema.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("duplicate field `{0}`")]
    DuplicateField(String),
    #[error("field `{field}` stores into `{storage}`, which another field already uses")]
    DuplicateStorageName { field: String, storage: String },
    #[error("field names must not be empty")]
    EmptyFieldName,
    #[error("keyspace prefix must not be empty")]
    EmptyPrefix,
}

/// A stored value could not be coerced to the field's declared type.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("field `{field}`: cannot decode {raw} as {expected}")]
pub struct DecodeError {
    pub field: String,
    pub expected: FieldType,
    pub raw: String,
}

impl DecodeError {
    pub fn new(field: &str, expected: FieldType, raw: impl fmt::Display) -> Self {
        Self { field: field.to_string(), expected, raw: raw.to_string() }
    }
}

/// Failure reported by the store client. Passed through untouched.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct TransportError(pub anyhow::Error);

/// A configured identifier strategy failed.
#[derive(Debug, thiserror::Error)]
#[error("identifier strategy failed: {0:#}")]
pub struct IdError(pub anyhow::Error);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Id(#[from] IdError),
    #[error("unknown field `{0}`")]
    UnknownField(String),
    #[error("field `{field}` expects {expected}, got {actual}")]
    TypeMismatch { field: String, expected: FieldType, actual: &'static str },
    #[error("field `{field}`: array item {item:?} cannot be stored `|`-joined")]
    InvalidArrayItem { field: String, item: String },
    #[error("schema declares {expected} fields, got {actual} values")]
    FieldCount { expected: usize, actual: usize },
    #[error("document at `{0}` is not a JSON object")]
    NotAnObject(String),
    #[error("entity of `{actual}` handed to the `{expected}` repository")]
    SchemaMismatch { expected: String, actual: String },
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use super::{
        entity_key, EntityId, Error, FieldType, FieldValue, IdStrategy, Result, SchemaError,
    };
}
