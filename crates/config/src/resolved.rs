use std::collections::BTreeMap;

use crate::errors::{ConfigError, ConfigResult};
use crate::value::{FieldRef, FieldType, Value};

pub(crate) fn typed<'v, T>(
    set: &str,
    field: &str,
    value: Option<&'v Value>,
    expected: FieldType,
    extract: impl Fn(&'v Value) -> Option<T>,
) -> ConfigResult<Option<T>> {
    match value {
        None => Ok(None),
        Some(value) => extract(value).map(Some).ok_or_else(|| ConfigError::WrongType {
            set: set.to_string(),
            field: field.to_string(),
            expected,
            actual: value.field_type(),
        }),
    }
}

/// The outcome of a successful resolution pass.
///
/// Immutable: it is only ever produced whole by [`crate::Registry::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedConfig {
    values: BTreeMap<FieldRef, Value>,
}

impl ResolvedConfig {
    pub(crate) fn new(values: BTreeMap<FieldRef, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, set: &str, field: &str) -> Option<&Value> {
        self.values.get(&FieldRef::new(set, field))
    }

    pub fn contains(&self, set: &str, field: &str) -> bool {
        self.get(set, field).is_some()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldRef, &Value)> {
        self.values.iter()
    }

    pub fn get_bool(&self, set: &str, field: &str) -> ConfigResult<Option<bool>> {
        typed(set, field, self.get(set, field), FieldType::Bool, Value::as_bool)
    }

    pub fn get_int(&self, set: &str, field: &str) -> ConfigResult<Option<i64>> {
        typed(set, field, self.get(set, field), FieldType::Int, Value::as_int)
    }

    pub fn get_string(&self, set: &str, field: &str) -> ConfigResult<Option<&str>> {
        typed(set, field, self.get(set, field), FieldType::String, Value::as_str)
    }

    pub fn get_strings(&self, set: &str, field: &str) -> ConfigResult<Option<&[String]>> {
        typed(
            set,
            field,
            self.get(set, field),
            FieldType::StringList,
            Value::as_strings,
        )
    }

    // Projection helpers: a missing value here means the registry that
    // produced this config does not match the projection reading it.

    pub fn require_bool(&self, set: &str, field: &str) -> ConfigResult<bool> {
        self.get_bool(set, field)?
            .ok_or_else(|| missing(set, field))
    }

    pub fn require_int(&self, set: &str, field: &str) -> ConfigResult<i64> {
        self.get_int(set, field)?.ok_or_else(|| missing(set, field))
    }

    pub fn require_string(&self, set: &str, field: &str) -> ConfigResult<&str> {
        self.get_string(set, field)?
            .ok_or_else(|| missing(set, field))
    }

    pub fn require_strings(&self, set: &str, field: &str) -> ConfigResult<&[String]> {
        self.get_strings(set, field)?
            .ok_or_else(|| missing(set, field))
    }
}

fn missing(set: &str, field: &str) -> ConfigError {
    ConfigError::Projection {
        set: set.to_string(),
        field: field.to_string(),
        reason: "value absent from resolved configuration".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ResolvedConfig {
        let mut values = BTreeMap::new();
        values.insert(FieldRef::new("log", "color"), Value::Bool(true));
        values.insert(FieldRef::new("log", "level"), Value::from("info"));
        values.insert(FieldRef::new("otlp", "port"), Value::Int(6831));
        values.insert(FieldRef::new("otel", "exporters"), Value::from(["console"]));
        ResolvedConfig::new(values)
    }

    #[test]
    fn test_typed_getters() {
        let config = sample();
        assert_eq!(config.get_bool("log", "color").unwrap(), Some(true));
        assert_eq!(config.get_string("log", "level").unwrap(), Some("info"));
        assert_eq!(config.get_int("otlp", "port").unwrap(), Some(6831));
        assert_eq!(
            config.get_strings("otel", "exporters").unwrap(),
            Some(&["console".to_string()][..])
        );
        assert_eq!(config.get_string("otlp", "host").unwrap(), None);
    }

    #[test]
    fn test_wrong_type_is_an_error() {
        let err = sample().get_int("log", "level").unwrap_err();
        assert_eq!(
            err,
            ConfigError::WrongType {
                set: "log".to_string(),
                field: "level".to_string(),
                expected: FieldType::Int,
                actual: FieldType::String,
            }
        );
    }

    #[test]
    fn test_require_reports_projection_error() {
        let err = sample().require_string("otlp", "host").unwrap_err();
        assert!(matches!(err, ConfigError::Projection { ref set, ref field, .. } if set == "otlp" && field == "host"));
    }
}
