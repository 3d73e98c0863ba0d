//! Order records and the two ways a submission can lay them out.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Which representation a deployment accepts for order records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordLayout {
    /// Objects keyed by column name.
    #[default]
    Keyed,
    /// Arrays whose positions follow the fixed column order.
    Positional,
}

/// Read access to a record's value for a given column.
pub trait FieldLookup {
    fn value_for(&self, column: &str) -> Option<&str>;
}

/// A record whose fields are addressed by column name, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyedRecord {
    fields: Vec<(String, String)>,
}

impl KeyedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing an earlier value for the same key in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for KeyedRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

impl FieldLookup for KeyedRecord {
    fn value_for(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == column)
            .map(|(_, v)| v.as_str())
    }
}

/// A positional record bound to the fixed column order it is read against.
#[derive(Debug, Clone, Copy)]
pub struct PositionalView<'a> {
    values: &'a [String],
    fixed: &'a [String],
}

impl FieldLookup for PositionalView<'_> {
    fn value_for(&self, column: &str) -> Option<&str> {
        let index = self.fixed.iter().position(|c| c == column)?;
        self.values.get(index).map(String::as_str)
    }
}

/// One submitted order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderRecord {
    Keyed(KeyedRecord),
    Positional(Vec<String>),
}

/// Borrowed lookup view over an [`OrderRecord`].
#[derive(Debug, Clone, Copy)]
pub enum RecordView<'a> {
    Keyed(&'a KeyedRecord),
    Positional(PositionalView<'a>),
}

impl FieldLookup for RecordView<'_> {
    fn value_for(&self, column: &str) -> Option<&str> {
        match self {
            Self::Keyed(record) => record.value_for(column),
            Self::Positional(view) => view.value_for(column),
        }
    }
}

impl OrderRecord {
    /// Parses one JSON order in the configured layout.
    pub fn from_json(value: &Value, layout: RecordLayout) -> Result<Self> {
        match (layout, value) {
            (RecordLayout::Keyed, Value::Object(map)) => Ok(Self::Keyed(
                map.iter()
                    .map(|(k, v)| (k.trim().to_string(), cell_text(v)))
                    .filter(|(k, _)| !k.is_empty())
                    .collect(),
            )),
            (RecordLayout::Positional, Value::Array(items)) => {
                Ok(Self::Positional(items.iter().map(cell_text).collect()))
            }
            (RecordLayout::Keyed, _) => Err(Error::InvalidInput(
                "orders must be JSON objects keyed by column name".into(),
            )),
            (RecordLayout::Positional, _) => Err(Error::InvalidInput(
                "orders must be JSON arrays of column values".into(),
            )),
        }
    }

    /// Parses a JSON array of orders. A single order object or array is
    /// accepted as a batch of one.
    pub fn batch_from_json(text: &str, layout: RecordLayout) -> Result<Vec<Self>> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::InvalidInput(format!("malformed orders JSON: {e}")))?;
        match (&value, layout) {
            (Value::Array(items), RecordLayout::Keyed) => {
                items.iter().map(|v| Self::from_json(v, layout)).collect()
            }
            // For positional layouts an array of strings is one order.
            (Value::Array(items), RecordLayout::Positional)
                if items.iter().all(Value::is_array) =>
            {
                items.iter().map(|v| Self::from_json(v, layout)).collect()
            }
            _ => Ok(vec![Self::from_json(&value, layout)?]),
        }
    }

    pub fn view<'a>(&'a self, fixed: &'a [String]) -> RecordView<'a> {
        match self {
            Self::Keyed(record) => RecordView::Keyed(record),
            Self::Positional(values) => RecordView::Positional(PositionalView { values, fixed }),
        }
    }

    pub fn layout(&self) -> RecordLayout {
        match self {
            Self::Keyed(_) => RecordLayout::Keyed,
            Self::Positional(_) => RecordLayout::Positional,
        }
    }

    /// Field names carried by a keyed record; positional records have none.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Self::Keyed(record) => record.keys().collect(),
            Self::Positional(_) => Vec::new(),
        }
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}
