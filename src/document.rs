use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tantivy::{
    TantivyDocument,
    schema::{Schema, Value},
};

use crate::schema::is_reserved;

/// A typed field value of an ingested document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    U64(u64),
    I64(i64),
    Bytes(Vec<u8>),
    /// A category in the named dimension. For hierarchical dimensions the
    /// value is a `/` separated path.
    Facet(String),
}

/// A document as handed to the write toolbox.
///
/// Plain fields must exist in the index schema. Facet fields name a
/// dimension and are turned into taxonomy ordinals and drill-down terms
/// on ingestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    fields: Vec<(String, FieldValue)>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(
        mut self,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.fields.push((field.into(), FieldValue::Text(value.into())));
        self
    }

    pub fn u64(mut self, field: impl Into<String>, value: u64) -> Self {
        self.fields.push((field.into(), FieldValue::U64(value)));
        self
    }

    pub fn i64(mut self, field: impl Into<String>, value: i64) -> Self {
        self.fields.push((field.into(), FieldValue::I64(value)));
        self
    }

    pub fn bytes(
        mut self,
        field: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        self.fields.push((field.into(), FieldValue::Bytes(value.into())));
        self
    }

    pub fn facet(
        mut self,
        dim: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.fields.push((dim.into(), FieldValue::Facet(value.into())));
        self
    }

    pub fn push(&mut self, field: impl Into<String>, value: FieldValue) {
        self.fields.push((field.into(), value));
    }

    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A stored field value read back from the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredValue {
    Text(String),
    U64(u64),
    I64(i64),
    Bytes(Vec<u8>),
}

impl StoredValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StoredValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            StoredValue::U64(value) => Some(*value),
            _ => None,
        }
    }
}

/// The stored fields of one hit, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    fields: BTreeMap<String, Vec<StoredValue>>,
}

impl StoredDocument {
    /// Extracts stored values from `doc`. An empty `only` loads every
    /// stored user field.
    pub(crate) fn from_tantivy(
        doc: &TantivyDocument,
        schema: &Schema,
        only: &[String],
    ) -> Self {
        let mut fields = BTreeMap::new();

        for (field, entry) in schema.fields() {
            let name = entry.name();
            if is_reserved(name) || !entry.is_stored() {
                continue;
            }
            if !only.is_empty() && !only.iter().any(|wanted| wanted == name) {
                continue;
            }

            let values: Vec<StoredValue> = doc
                .get_all(field)
                .filter_map(|v| {
                    if let Some(text) = v.as_str() {
                        Some(StoredValue::Text(text.to_string()))
                    } else if let Some(n) = v.as_u64() {
                        Some(StoredValue::U64(n))
                    } else if let Some(n) = v.as_i64() {
                        Some(StoredValue::I64(n))
                    } else {
                        v.as_bytes().map(|b| StoredValue::Bytes(b.to_vec()))
                    }
                })
                .collect();

            if !values.is_empty() {
                fields.insert(name.to_string(), values);
            }
        }

        Self { fields }
    }

    pub fn get(&self, field: &str) -> &[StoredValue] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first_text(&self, field: &str) -> Option<&str> {
        self.get(field).first().and_then(StoredValue::as_str)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}
