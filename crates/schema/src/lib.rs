//! keyform schema: compiles field declarations into an immutable descriptor
//! table consumed by `Entity` and the repository.

#![forbid(unsafe_code)]

use std::path::Path;

use anyhow::{Context, Result as AnyResult};
use keyform_core::codec;
use keyform_core::{
    entity_key, DecodeError, EntityId, Error, FieldType, FieldValue, IdError, IdStrategy, SchemaError,
};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

mod entity;

pub use entity::Entity;

/// Physical representation used for every entity of a schema.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataStructure {
    /// Flat record of string slots; an absent slot is null.
    #[default]
    Hash,
    /// One JSON document; every field is present, null is explicit.
    Json,
}

/// One declared field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldDeclaration {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
    /// Name of the storage slot / document key, when it differs from `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl FieldDeclaration {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self { name: name.into(), ty, alias: None }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

/// Optional schema configuration.
#[derive(Debug, Clone, Default)]
pub struct SchemaOptions {
    pub prefix: Option<String>,
    pub id_strategy: Option<IdStrategy>,
    pub data_structure: DataStructure,
}

impl SchemaOptions {
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = Some(strategy);
        self
    }

    pub fn data_structure(mut self, ds: DataStructure) -> Self {
        self.data_structure = ds;
        self
    }
}

/// Compiled accessor/codec entry for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub ty: FieldType,
    /// Slot name in a flat record, key name in a document.
    pub storage_name: String,
}

impl FieldDescriptor {
    pub fn decode_flat(&self, raw: Option<&str>) -> Result<Option<FieldValue>, DecodeError> {
        codec::decode_flat(&self.name, self.ty, raw)
    }

    pub fn encode_flat(&self, value: Option<&FieldValue>) -> Option<String> {
        codec::encode_flat(value)
    }

    pub fn decode_json(&self, raw: Option<&serde_json::Value>) -> Result<Option<FieldValue>, DecodeError> {
        codec::decode_json(&self.name, self.ty, raw)
    }

    pub fn encode_json(&self, value: Option<&FieldValue>) -> serde_json::Value {
        codec::encode_json(value)
    }

    /// Type check only. Null always passes.
    pub fn check_type(&self, value: Option<&FieldValue>) -> Result<(), Error> {
        match value {
            Some(v) if !v.fits(self.ty) => Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.ty,
                actual: v.kind(),
            }),
            _ => Ok(()),
        }
    }

    /// Validate a value about to be stored in an entity. Array items must be
    /// non-empty and free of the separator, or they would not survive the join.
    pub fn check(&self, value: Option<&FieldValue>) -> Result<(), Error> {
        self.check_type(value)?;
        if let Some(FieldValue::Array(items)) = value {
            if let Some(bad) = items.iter().find(|i| i.is_empty() || i.contains(codec::ARRAY_SEPARATOR)) {
                return Err(Error::InvalidArrayItem { field: self.name.clone(), item: bad.clone() });
            }
        }
        Ok(())
    }
}

/// Immutable mapping contract between an entity type and its storage form.
#[derive(Debug, Clone)]
pub struct Schema {
    entity: String,
    prefix: String,
    id_strategy: IdStrategy,
    data_structure: DataStructure,
    fields: Vec<FieldDescriptor>,
    by_name: FxHashMap<String, usize>,
}

impl Schema {
    /// Compile `fields` for the entity type named `entity`. Never touches the store.
    pub fn new(
        entity: impl Into<String>,
        fields: impl IntoIterator<Item = FieldDeclaration>,
        options: SchemaOptions,
    ) -> Result<Self, SchemaError> {
        let entity = entity.into();
        let prefix = options.prefix.unwrap_or_else(|| entity.clone());
        if prefix.is_empty() {
            return Err(SchemaError::EmptyPrefix);
        }

        let mut descriptors: Vec<FieldDescriptor> = Vec::new();
        let mut by_name: FxHashMap<String, usize> = FxHashMap::default();
        let mut storage: FxHashMap<String, usize> = FxHashMap::default();
        for decl in fields {
            if decl.name.is_empty() || decl.alias.as_deref() == Some("") {
                return Err(SchemaError::EmptyFieldName);
            }
            if by_name.contains_key(&decl.name) {
                return Err(SchemaError::DuplicateField(decl.name));
            }
            let storage_name = decl.alias.unwrap_or_else(|| decl.name.clone());
            if storage.contains_key(&storage_name) {
                return Err(SchemaError::DuplicateStorageName { field: decl.name, storage: storage_name });
            }
            let idx = descriptors.len();
            by_name.insert(decl.name.clone(), idx);
            storage.insert(storage_name.clone(), idx);
            descriptors.push(FieldDescriptor { name: decl.name, ty: decl.ty, storage_name });
        }

        debug!(entity = %entity, prefix = %prefix, fields = descriptors.len(), "schema compiled");
        Ok(Self {
            entity,
            prefix,
            id_strategy: options.id_strategy.unwrap_or_default(),
            data_structure: options.data_structure,
            fields: descriptors,
            by_name,
        })
    }

    /// Like `new`, naming the entity after `T` (module path and generics stripped).
    pub fn for_type<T: ?Sized>(
        fields: impl IntoIterator<Item = FieldDeclaration>,
        options: SchemaOptions,
    ) -> Result<Self, SchemaError> {
        Self::new(short_type_name::<T>(), fields, options)
    }

    pub fn entity_name(&self) -> &str { &self.entity }
    pub fn prefix(&self) -> &str { &self.prefix }
    pub fn data_structure(&self) -> DataStructure { self.data_structure }
    pub fn fields(&self) -> &[FieldDescriptor] { &self.fields }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    pub(crate) fn index_of(&self, name: &str) -> Result<usize, Error> {
        self.by_name.get(name).copied().ok_or_else(|| Error::UnknownField(name.to_string()))
    }

    /// New identifier from the configured strategy.
    pub fn generate_id(&self) -> Result<EntityId, IdError> {
        self.id_strategy.generate()
    }

    pub fn key_for(&self, id: &str) -> String {
        entity_key(&self.prefix, id)
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// On-disk schema declaration, e.g.
/// `{"entity":"Person","dataStructure":"JSON","fields":[{"name":"age","type":"number"}]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaFile {
    pub entity: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub data_structure: DataStructure,
    pub fields: Vec<FieldDeclaration>,
}

impl SchemaFile {
    pub fn load(path: impl AsRef<Path>) -> AnyResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading schema file {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing schema file {}", path.display()))
    }

    pub fn compile(self) -> Result<Schema, SchemaError> {
        let mut options = SchemaOptions::default().data_structure(self.data_structure);
        if let Some(prefix) = self.prefix {
            options = options.prefix(prefix);
        }
        Schema::new(self.entity, self.fields, options)
    }
}
