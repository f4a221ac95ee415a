use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::errors::{ConfigError, ConfigResult};
use crate::resolved::typed;
use crate::value::{FieldRef, FieldType, Value};

/// Predicate deciding whether the gated fields of a field-set are required.
pub type Predicate = Arc<dyn Fn(&ValueLookup<'_>) -> ConfigResult<bool> + Send + Sync>;

/// Read access to the values resolved so far in a registry pass.
///
/// A lookup handed to a [`LoadCondition`] predicate is scoped to the fields the
/// condition declared with [`LoadCondition::depends_on`]; reading anything
/// else fails with [`ConfigError::UndeclaredDependency`].
#[derive(Clone, Copy)]
pub struct ValueLookup<'a> {
    values: &'a BTreeMap<FieldRef, Value>,
    failed: &'a BTreeSet<FieldRef>,
    allowed: Option<&'a BTreeSet<FieldRef>>,
}

impl<'a> ValueLookup<'a> {
    pub fn new(values: &'a BTreeMap<FieldRef, Value>, failed: &'a BTreeSet<FieldRef>) -> Self {
        Self {
            values,
            failed,
            allowed: None,
        }
    }

    fn scoped<'b>(&self, allowed: &'b BTreeSet<FieldRef>) -> ValueLookup<'b>
    where
        'a: 'b,
    {
        ValueLookup {
            values: self.values,
            failed: self.failed,
            allowed: Some(allowed),
        }
    }

    /// Whether the field failed validation earlier in this pass.
    pub fn is_failed(&self, field: &FieldRef) -> bool {
        self.failed.contains(field)
    }

    pub fn get(&self, set: &str, field: &str) -> ConfigResult<Option<&'a Value>> {
        let key = FieldRef::new(set, field);
        if let Some(allowed) = self.allowed {
            if !allowed.contains(&key) {
                return Err(ConfigError::UndeclaredDependency {
                    set: key.set,
                    field: key.field,
                });
            }
        }
        Ok(self.values.get(&key))
    }

    pub fn get_bool(&self, set: &str, field: &str) -> ConfigResult<Option<bool>> {
        typed(set, field, self.get(set, field)?, FieldType::Bool, Value::as_bool)
    }

    pub fn get_int(&self, set: &str, field: &str) -> ConfigResult<Option<i64>> {
        typed(set, field, self.get(set, field)?, FieldType::Int, Value::as_int)
    }

    pub fn get_string(&self, set: &str, field: &str) -> ConfigResult<Option<&'a str>> {
        typed(set, field, self.get(set, field)?, FieldType::String, Value::as_str)
    }

    pub fn get_strings(&self, set: &str, field: &str) -> ConfigResult<Option<&'a [String]>> {
        typed(
            set,
            field,
            self.get(set, field)?,
            FieldType::StringList,
            Value::as_strings,
        )
    }
}

/// Result of evaluating a load condition in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionOutcome {
    /// Predicate held: gated fields keep their declared requiredness.
    Active,
    /// Predicate did not hold: gated fields are not required.
    Inactive,
    /// A dependency failed validation, so the predicate was not run.
    Blocked,
    /// The predicate returned an error.
    Failed(String),
}

/// Gates the requiredness of fields in one field-set on values of other sets.
#[derive(Clone)]
pub struct LoadCondition {
    predicate: Predicate,
    depends_on: BTreeSet<FieldRef>,
    gates: Vec<String>,
}

impl fmt::Debug for LoadCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadCondition")
            .field("depends_on", &self.depends_on)
            .field("gates", &self.gates)
            .finish_non_exhaustive()
    }
}

impl LoadCondition {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&ValueLookup<'_>) -> ConfigResult<bool> + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            depends_on: BTreeSet::new(),
            gates: Vec::new(),
        }
    }

    /// Declares a field of another field-set the predicate reads.
    pub fn depends_on(mut self, set: impl Into<String>, field: impl Into<String>) -> Self {
        self.depends_on.insert(FieldRef::new(set, field));
        self
    }

    /// Restricts the condition to one field of the owning set. Without any
    /// gated field the condition applies to every field of the set.
    pub fn gates(mut self, field: impl Into<String>) -> Self {
        self.gates.push(field.into());
        self
    }

    pub fn dependencies(&self) -> &BTreeSet<FieldRef> {
        &self.depends_on
    }

    pub fn gated_fields(&self) -> &[String] {
        &self.gates
    }

    pub fn applies_to(&self, field: &str) -> bool {
        self.gates.is_empty() || self.gates.iter().any(|g| g == field)
    }

    pub fn evaluate(&self, lookup: &ValueLookup<'_>) -> ConditionOutcome {
        if self.depends_on.iter().any(|dep| lookup.is_failed(dep)) {
            return ConditionOutcome::Blocked;
        }

        let scoped = lookup.scoped(&self.depends_on);
        match (self.predicate)(&scoped) {
            Ok(true) => ConditionOutcome::Active,
            Ok(false) => ConditionOutcome::Inactive,
            Err(err) => ConditionOutcome::Failed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exporters_contain_otlp() -> LoadCondition {
        LoadCondition::new(|lookup| {
            let exporters = lookup.get_strings("otel", "exporters")?.unwrap_or_default();
            Ok(exporters.iter().any(|e| e == "otlp"))
        })
        .depends_on("otel", "exporters")
    }

    fn values(exporters: &[&str]) -> BTreeMap<FieldRef, Value> {
        let mut values = BTreeMap::new();
        values.insert(
            FieldRef::new("otel", "exporters"),
            Value::from(exporters.to_vec()),
        );
        values.insert(FieldRef::new("log", "level"), Value::from("info"));
        values
    }

    #[test]
    fn test_predicate_outcomes() {
        let failed = BTreeSet::new();
        let with_otlp = values(&["console", "otlp"]);
        let without = values(&["console"]);

        let condition = exporters_contain_otlp();
        assert_eq!(
            condition.evaluate(&ValueLookup::new(&with_otlp, &failed)),
            ConditionOutcome::Active
        );
        assert_eq!(
            condition.evaluate(&ValueLookup::new(&without, &failed)),
            ConditionOutcome::Inactive
        );
    }

    #[test]
    fn test_undeclared_read_fails_condition() {
        let condition = LoadCondition::new(|lookup| {
            Ok(lookup.get_string("log", "level")?.is_some())
        })
        .depends_on("otel", "exporters");

        let values = values(&["console"]);
        let failed = BTreeSet::new();
        match condition.evaluate(&ValueLookup::new(&values, &failed)) {
            ConditionOutcome::Failed(message) => assert!(message.contains("log.level")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_failed_dependency_blocks_predicate() {
        let values = BTreeMap::new();
        let mut failed = BTreeSet::new();
        failed.insert(FieldRef::new("otel", "exporters"));

        assert_eq!(
            exporters_contain_otlp().evaluate(&ValueLookup::new(&values, &failed)),
            ConditionOutcome::Blocked
        );
    }

    #[test]
    fn test_wrong_type_is_reported() {
        let mut values = BTreeMap::new();
        values.insert(FieldRef::new("otel", "exporters"), Value::from("otlp"));
        let failed = BTreeSet::new();

        let outcome = exporters_contain_otlp().evaluate(&ValueLookup::new(&values, &failed));
        assert!(matches!(outcome, ConditionOutcome::Failed(ref m) if m.contains("expected string list")));
    }

    #[test]
    fn test_gating() {
        let all = exporters_contain_otlp();
        assert!(all.applies_to("host"));
        assert!(all.applies_to("port"));

        let host_only = exporters_contain_otlp().gates("host");
        assert!(host_only.applies_to("host"));
        assert!(!host_only.applies_to("port"));
    }
}
