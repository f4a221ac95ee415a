use std::collections::BTreeMap;

use crate::errors::{ConfigError, ConfigResult};
use crate::value::{FieldRef, Value};

/// In-memory values supplied by the application, keyed by `(set, field)`.
///
/// Overrides are untyped until resolution: a value of the wrong type is
/// reported as a violation of the field it targets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    values: BTreeMap<FieldRef, Value>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, set: &str, field: &str, value: impl Into<Value>) -> Self {
        self.set(set, field, value);
        self
    }

    pub fn set(&mut self, set: &str, field: &str, value: impl Into<Value>) {
        self.values.insert(FieldRef::new(set, field), value.into());
    }

    pub fn get(&self, set: &str, field: &str) -> Option<&Value> {
        self.values.get(&FieldRef::new(set, field))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldRef, &Value)> {
        self.values.iter()
    }

    /// Layers `other` on top of `self`; values in `other` win.
    pub fn merge(mut self, other: Overrides) -> Self {
        self.values.extend(other.values);
        self
    }

    /// Reads `{ "set": { "field": value } }`.
    pub fn from_json(document: &serde_json::Value) -> ConfigResult<Self> {
        let sets = document
            .as_object()
            .ok_or_else(|| ConfigError::Parse("top level must be an object of field-sets".to_string()))?;

        let mut overrides = Self::new();
        for (set, fields) in sets {
            let fields = fields.as_object().ok_or_else(|| {
                ConfigError::Parse(format!("field-set '{set}' must be an object of fields"))
            })?;
            for (field, raw) in fields {
                let value = Value::from_json(raw).ok_or_else(|| {
                    ConfigError::Parse(format!(
                        "unsupported value for {set}.{field}: {raw}"
                    ))
                })?;
                overrides.set(set, field, value);
            }
        }
        Ok(overrides)
    }

    /// Parses a JSON document from text.
    pub fn from_json_str(text: &str) -> ConfigResult<Self> {
        let document: serde_json::Value = serde_json::from_str(text)?;
        Self::from_json(&document)
    }
}

impl<'a> IntoIterator for &'a Overrides {
    type Item = (&'a FieldRef, &'a Value);
    type IntoIter = std::collections::btree_map::Iter<'a, FieldRef, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}
