use std::collections::HashMap;
use std::sync::Arc;

use keyform_core::{EntityId, Error, FieldType, FieldValue, IdError, Result};
use serde_json::{Map, Value};

use crate::{FieldDescriptor, Schema};

/// A record instance. Every declared field is present; unset fields are `None`.
/// All reads and writes go through the schema's field descriptors.
#[derive(Debug, Clone)]
pub struct Entity {
    schema: Arc<Schema>,
    id: Option<EntityId>,
    values: Vec<Option<FieldValue>>,
}

impl Entity {
    /// Entity with no id yet and every field null. The id is assigned on save.
    pub fn new(schema: Arc<Schema>) -> Self {
        let values = vec![None; schema.fields().len()];
        Self { schema, id: None, values }
    }

    pub fn with_id(schema: Arc<Schema>, id: impl Into<EntityId>) -> Self {
        let mut e = Self::new(schema);
        e.id = Some(id.into());
        e
    }

    /// Seed typed values by field name; fields not mentioned stay null.
    pub fn with_values<I, K, V>(schema: Arc<Schema>, id: impl Into<EntityId>, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<FieldValue>,
    {
        let mut e = Self::with_id(schema, id);
        for (k, v) in values {
            e.set(k.as_ref(), v)?;
        }
        Ok(e)
    }

    /// Seed from flat-record strings keyed by field name, e.g. `{"aNumber": "42"}`.
    pub fn from_raw(schema: Arc<Schema>, id: impl Into<EntityId>, raw: &HashMap<String, String>) -> Result<Self> {
        let mut e = Self::with_id(schema, id);
        for (k, v) in raw {
            e.set_raw(k, v)?;
        }
        Ok(e)
    }

    /// Assemble from values already decoded in descriptor order.
    pub fn from_parts(schema: Arc<Schema>, id: impl Into<EntityId>, values: Vec<Option<FieldValue>>) -> Result<Self> {
        let fields = schema.fields();
        if values.len() != fields.len() {
            return Err(Error::FieldCount { expected: fields.len(), actual: values.len() });
        }
        for (desc, v) in fields.iter().zip(&values) {
            desc.check_type(v.as_ref())?;
        }
        Ok(Self { schema, id: Some(id.into()), values })
    }

    pub fn schema(&self) -> &Arc<Schema> { &self.schema }

    pub fn id(&self) -> Option<&str> { self.id.as_deref() }

    /// Assign an id from the schema's strategy unless one is already set.
    pub fn ensure_id(&mut self) -> std::result::Result<&str, IdError> {
        let schema = Arc::clone(&self.schema);
        self.ensure_id_from(&schema)
    }

    /// Like `ensure_id`, drawing a missing id from `schema`'s strategy.
    pub fn ensure_id_from(&mut self, schema: &Schema) -> std::result::Result<&str, IdError> {
        if self.id.is_none() {
            self.id = Some(schema.generate_id()?);
        }
        Ok(self.id.as_deref().unwrap_or_default())
    }

    pub fn get(&self, field: &str) -> Result<Option<&FieldValue>> {
        let idx = self.schema.index_of(field)?;
        Ok(self.values[idx].as_ref())
    }

    fn typed(&self, field: &str, want: &'static str, ok: fn(FieldType) -> bool) -> Result<Option<&FieldValue>> {
        let idx = self.schema.index_of(field)?;
        let desc = &self.schema.fields()[idx];
        if !ok(desc.ty) {
            return Err(Error::TypeMismatch { field: field.to_string(), expected: desc.ty, actual: want });
        }
        Ok(self.values[idx].as_ref())
    }

    pub fn get_str(&self, field: &str) -> Result<Option<&str>> {
        let v = self.typed(field, "string", |t| matches!(t, FieldType::String | FieldType::Text))?;
        Ok(v.and_then(FieldValue::as_str))
    }

    pub fn get_number(&self, field: &str) -> Result<Option<f64>> {
        let v = self.typed(field, "number", |t| t == FieldType::Number)?;
        Ok(v.and_then(FieldValue::as_number))
    }

    pub fn get_bool(&self, field: &str) -> Result<Option<bool>> {
        let v = self.typed(field, "boolean", |t| t == FieldType::Boolean)?;
        Ok(v.and_then(FieldValue::as_bool))
    }

    pub fn get_array(&self, field: &str) -> Result<Option<&[String]>> {
        let v = self.typed(field, "array", |t| t == FieldType::Array)?;
        Ok(v.and_then(FieldValue::as_array))
    }

    /// Store a value, or clear the field with `None`.
    pub fn set_value(&mut self, field: &str, value: Option<FieldValue>) -> Result<()> {
        let idx = self.schema.index_of(field)?;
        self.schema.fields()[idx].check(value.as_ref())?;
        self.values[idx] = value;
        Ok(())
    }

    pub fn set(&mut self, field: &str, value: impl Into<FieldValue>) -> Result<()> {
        self.set_value(field, Some(value.into()))
    }

    pub fn clear(&mut self, field: &str) -> Result<()> {
        self.set_value(field, None)
    }

    /// Store a flat-record string, decoding it through the field's codec.
    pub fn set_raw(&mut self, field: &str, raw: &str) -> Result<()> {
        let idx = self.schema.index_of(field)?;
        self.values[idx] = self.schema.fields()[idx].decode_flat(Some(raw))?;
        Ok(())
    }

    /// Descriptor and current value for every declared field, in declaration order.
    pub fn values(&self) -> impl Iterator<Item = (&FieldDescriptor, Option<&FieldValue>)> {
        self.schema.fields().iter().zip(self.values.iter().map(Option::as_ref))
    }

    /// Plain JSON view: `entityId` plus every field, arrays as JSON arrays.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("entityId".to_string(), self.id.clone().map(Value::String).unwrap_or(Value::Null));
        for (desc, v) in self.values() {
            let json = match v {
                Some(FieldValue::Array(items)) => Value::from(items.clone()),
                other => desc.encode_json(other),
            };
            map.insert(desc.name.clone(), json);
        }
        Value::Object(map)
    }
}
