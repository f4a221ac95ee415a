use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::condition::{ConditionOutcome, LoadCondition, ValueLookup};
use crate::errors::{SchemaError, Violation, ViolationKind};
use crate::field::Field;
use crate::overrides::Overrides;
use crate::value::Value;

/// Field key used when a violation concerns a whole field-set.
pub const WHOLE_SET: &str = "*";

/// A named, ordered group of fields plus the load conditions gating them.
#[derive(Debug, Clone)]
pub struct FieldSet {
    key: String,
    fields: Vec<Field>,
    conditions: Vec<LoadCondition>,
}

impl FieldSet {
    pub fn builder(key: impl Into<String>) -> FieldSetBuilder {
        FieldSetBuilder {
            key: key.into(),
            fields: Vec::new(),
            conditions: Vec::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.key() == key)
    }

    pub fn load_conditions(&self) -> &[LoadCondition] {
        &self.conditions
    }

    /// Keys of the other field-sets this set's conditions read from.
    pub fn depends_on_sets(&self) -> BTreeSet<&str> {
        self.conditions
            .iter()
            .flat_map(|c| c.dependencies())
            .map(|dep| dep.set.as_str())
            .collect()
    }

    /// Resolves every field of this set.
    ///
    /// For each field: effective requiredness from the matching load
    /// conditions, then override, then default, then the field's constraints.
    /// Every violation is collected.
    pub fn resolve(
        &self,
        overrides: &Overrides,
        lookup: &ValueLookup<'_>,
    ) -> Result<BTreeMap<String, Value>, Vec<Violation>> {
        let (values, violations) = self.resolve_partial(overrides, lookup);
        if violations.is_empty() {
            Ok(values)
        } else {
            Err(violations)
        }
    }

    /// Like [`FieldSet::resolve`] but also returns the fields that did resolve.
    pub(crate) fn resolve_partial(
        &self,
        overrides: &Overrides,
        lookup: &ValueLookup<'_>,
    ) -> (BTreeMap<String, Value>, Vec<Violation>) {
        let mut values = BTreeMap::new();
        let mut violations = Vec::new();

        for (key, _) in overrides.iter().filter(|(k, _)| k.set == self.key) {
            if self.field(&key.field).is_none() {
                violations.push(Violation::new(&self.key, &key.field, ViolationKind::UnknownField));
            }
        }

        let outcomes: Vec<ConditionOutcome> = self
            .conditions
            .iter()
            .map(|condition| condition.evaluate(lookup))
            .collect();

        for (condition, outcome) in self.conditions.iter().zip(&outcomes) {
            debug!(field_set.key = %self.key, outcome = ?outcome, "load condition evaluated");
            if let ConditionOutcome::Failed(message) = outcome {
                let field = condition
                    .gated_fields()
                    .first()
                    .map(String::as_str)
                    .unwrap_or(WHOLE_SET);
                violations.push(Violation::new(
                    &self.key,
                    field,
                    ViolationKind::ConditionFailed {
                        message: message.clone(),
                    },
                ));
            }
        }

        for field in &self.fields {
            let required = field.is_required()
                && self
                    .conditions
                    .iter()
                    .zip(&outcomes)
                    .filter(|(condition, _)| condition.applies_to(field.key()))
                    .all(|(_, outcome)| *outcome == ConditionOutcome::Active);

            let value = match overrides.get(&self.key, field.key()) {
                Some(value) => Some(value.clone()),
                None => field.default_for_resolution(),
            };

            match value {
                Some(value) if required && value.is_blank() => violations.push(Violation::new(
                    &self.key,
                    field.key(),
                    ViolationKind::MissingRequired,
                )),
                Some(value) => match field.validate(&value) {
                    Ok(()) => {
                        values.insert(field.key().to_string(), value);
                    }
                    Err(violation) => violations.push(violation.within(&self.key)),
                },
                None if required => violations.push(Violation::new(
                    &self.key,
                    field.key(),
                    ViolationKind::MissingRequired,
                )),
                None => {}
            }
        }

        (values, violations)
    }
}

pub struct FieldSetBuilder {
    key: String,
    fields: Vec<Field>,
    conditions: Vec<LoadCondition>,
}

impl FieldSetBuilder {
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = Field>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn load_condition(mut self, condition: LoadCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Checks the set's own definition. Cross-set references are checked by
    /// the registry.
    pub fn build(self) -> Result<FieldSet, SchemaError> {
        let mut seen = BTreeSet::new();
        for field in &self.fields {
            if !seen.insert(field.key()) {
                return Err(SchemaError::DuplicateField {
                    set: self.key.clone(),
                    field: field.key().to_string(),
                });
            }
            field.check_definition(&self.key)?;
        }

        for condition in &self.conditions {
            if let Some(gated) = condition
                .gated_fields()
                .iter()
                .find(|gated| !seen.contains(gated.as_str()))
            {
                return Err(SchemaError::UnknownGatedField {
                    set: self.key.clone(),
                    field: gated.clone(),
                });
            }
            if let Some(own) = condition.dependencies().iter().find(|dep| dep.set == self.key) {
                return Err(SchemaError::SelfReference {
                    set: self.key.clone(),
                    field: own.field.clone(),
                });
            }
        }

        Ok(FieldSet {
            key: self.key,
            fields: self.fields,
            conditions: self.conditions,
        })
    }
}
