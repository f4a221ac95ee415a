use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, warn};

use crate::condition::ValueLookup;
use crate::errors::{ResolutionError, SchemaError, Violation, ViolationKind};
use crate::field_set::{FieldSet, WHOLE_SET};
use crate::overrides::Overrides;
use crate::resolved::ResolvedConfig;
use crate::value::{FieldRef, FieldType, Value};

/// A validated collection of field-sets and the order they resolve in.
///
/// Construction checks every cross-set reference and rejects cyclic load
/// conditions, so a `Registry` that exists can always attempt a resolution.
#[derive(Debug, Clone)]
pub struct Registry {
    sets: Vec<FieldSet>,
    order: Vec<usize>,
}

impl Registry {
    pub fn new(sets: impl IntoIterator<Item = FieldSet>) -> Result<Self, SchemaError> {
        let sets: Vec<FieldSet> = sets.into_iter().collect();

        let mut index = HashMap::new();
        for (position, set) in sets.iter().enumerate() {
            if index.insert(set.key().to_string(), position).is_some() {
                return Err(SchemaError::DuplicateFieldSet {
                    set: set.key().to_string(),
                });
            }
        }

        for set in &sets {
            for condition in set.load_conditions() {
                for dependency in condition.dependencies() {
                    if dependency.set == set.key() {
                        return Err(SchemaError::SelfReference {
                            set: set.key().to_string(),
                            field: dependency.field.clone(),
                        });
                    }
                    let known = index
                        .get(&dependency.set)
                        .map(|&position| sets[position].field(&dependency.field).is_some())
                        .unwrap_or(false);
                    if !known {
                        return Err(SchemaError::UnknownDependency {
                            set: set.key().to_string(),
                            dependency: dependency.to_string(),
                        });
                    }
                }
            }
        }

        let order = resolution_order(&sets, &index)?;
        debug!(
            field_sets = sets.len(),
            order = ?order.iter().map(|&i| sets[i].key()).collect::<Vec<_>>(),
            "field registry built"
        );
        Ok(Self { sets, order })
    }

    /// Field-sets in declaration order.
    pub fn field_sets(&self) -> &[FieldSet] {
        &self.sets
    }

    pub fn field_set(&self, key: &str) -> Option<&FieldSet> {
        self.sets.iter().find(|set| set.key() == key)
    }

    /// Keys of the field-sets in the order they are resolved.
    pub fn resolution_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.sets[i].key()).collect()
    }

    /// Resolves every field-set in dependency order.
    ///
    /// Violations from all sets are collected; a config is returned only when
    /// there are none.
    pub fn resolve(&self, overrides: &Overrides) -> Result<ResolvedConfig, ResolutionError> {
        let mut values: BTreeMap<FieldRef, Value> = BTreeMap::new();
        let mut failed: BTreeSet<FieldRef> = BTreeSet::new();
        let mut violations = Vec::new();

        for (key, _) in overrides {
            if self.field_set(&key.set).is_none() {
                violations.push(Violation::new(&key.set, &key.field, ViolationKind::UnknownField));
            }
        }

        for &position in &self.order {
            let set = &self.sets[position];
            let (resolved, set_violations) =
                set.resolve_partial(overrides, &ValueLookup::new(&values, &failed));

            debug!(
                field_set.key = %set.key(),
                resolved = resolved.len(),
                violations = set_violations.len(),
                "field-set resolved"
            );

            for violation in &set_violations {
                if violation.field == WHOLE_SET {
                    failed.extend(set.fields().iter().map(|f| FieldRef::new(set.key(), f.key())));
                } else {
                    failed.insert(FieldRef::new(&violation.field_set, &violation.field));
                }
            }
            for (field, value) in resolved {
                values.insert(FieldRef::new(set.key(), field), value);
            }
            violations.extend(set_violations);
        }

        if violations.is_empty() {
            Ok(ResolvedConfig::new(values))
        } else {
            warn!(violations = violations.len(), "configuration resolution failed");
            Err(ResolutionError::new(violations))
        }
    }

    /// Environment variable name for a field: `{PREFIX}{SET}_{FIELD}`, upper-cased.
    pub fn env_var_name(prefix: &str, set: &str, field: &str) -> String {
        format!("{prefix}{set}_{field}").to_uppercase()
    }

    /// Reads overrides from the process environment.
    pub fn overrides_from_env(&self, prefix: &str) -> Result<Overrides, ResolutionError> {
        self.overrides_from_vars(prefix, std::env::vars())
    }

    /// Reads overrides from `(name, value)` pairs, parsing each value as the
    /// type of the field it names. Names matching no field are ignored.
    pub fn overrides_from_vars<I, K, V>(
        &self,
        prefix: &str,
        vars: I,
    ) -> Result<Overrides, ResolutionError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let names: HashMap<String, (&str, &str, FieldType)> = self
            .sets
            .iter()
            .flat_map(|set| {
                set.fields().iter().map(move |field| {
                    (
                        Self::env_var_name(prefix, set.key(), field.key()),
                        (set.key(), field.key(), field.field_type()),
                    )
                })
            })
            .collect();

        let mut overrides = Overrides::new();
        let mut violations = Vec::new();
        for (name, raw) in vars {
            let Some(&(set, field, field_type)) = names.get(name.as_ref()) else {
                continue;
            };
            match field_type.parse(raw.as_ref()) {
                Ok(value) => overrides.set(set, field, value),
                Err(kind) => violations.push(Violation::new(set, field, kind)),
            }
        }

        if violations.is_empty() {
            Ok(overrides)
        } else {
            Err(ResolutionError::new(violations))
        }
    }
}

/// Kahn's algorithm over field-set positions. Among sets that are ready, the
/// earliest declared goes first, so the order is stable for a given input.
fn resolution_order(
    sets: &[FieldSet],
    index: &HashMap<String, usize>,
) -> Result<Vec<usize>, SchemaError> {
    let prerequisites: Vec<BTreeSet<usize>> = sets
        .iter()
        .map(|set| {
            set.depends_on_sets()
                .into_iter()
                .filter_map(|key| index.get(key).copied())
                .collect()
        })
        .collect();

    let mut in_degree: Vec<usize> = prerequisites.iter().map(BTreeSet::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); sets.len()];
    for (position, prereqs) in prerequisites.iter().enumerate() {
        for &prereq in prereqs {
            dependents[prereq].push(position);
        }
    }

    let mut ready: BTreeSet<usize> = (0..sets.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(sets.len());

    while let Some(current) = ready.pop_first() {
        order.push(current);
        for &dependent in &dependents[current] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() != sets.len() {
        let remaining: BTreeSet<usize> = (0..sets.len()).filter(|i| !order.contains(i)).collect();
        return Err(SchemaError::DependencyCycle {
            sets: find_cycle(&prerequisites, &remaining)
                .into_iter()
                .map(|i| sets[i].key().to_string())
                .collect(),
        });
    }

    Ok(order)
}

/// Walks prerequisites among the unsorted sets until one repeats. Every
/// unsorted set has an unsorted prerequisite, so the walk always closes.
fn find_cycle(prerequisites: &[BTreeSet<usize>], remaining: &BTreeSet<usize>) -> Vec<usize> {
    let Some(&start) = remaining.first() else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut current = start;
    while let Some(&next) = prerequisites[current].iter().find(|p| remaining.contains(p)) {
        if let Some(seen) = path.iter().position(|&p| p == next) {
            let mut cycle = path.split_off(seen);
            cycle.push(next);
            return cycle;
        }
        path.push(next);
        current = next;
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::LoadCondition;
    use crate::field::Field;

    fn gated_on(set: &str, dependency: (&str, &str)) -> FieldSet {
        let (dep_set, dep_field) = (dependency.0.to_string(), dependency.1.to_string());
        let (read_set, read_field) = (dep_set.clone(), dep_field.clone());
        FieldSet::builder(set)
            .field(Field::new("value", FieldType::String))
            .load_condition(
                LoadCondition::new(move |lookup| {
                    Ok(lookup.get(&read_set, &read_field)?.is_some())
                })
                .depends_on(dep_set, dep_field),
            )
            .build()
            .unwrap()
    }

    fn plain(set: &str) -> FieldSet {
        FieldSet::builder(set)
            .field(Field::new("value", FieldType::String))
            .build()
            .unwrap()
    }

    #[test]
    fn test_order_follows_dependencies_then_declaration() {
        let registry = Registry::new(vec![
            gated_on("c", ("b", "value")),
            plain("b"),
            plain("a"),
        ])
        .unwrap();
        assert_eq!(registry.resolution_order(), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_cycle_is_rejected_before_resolution() {
        let err = Registry::new(vec![
            gated_on("a", ("b", "value")),
            gated_on("b", ("a", "value")),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            SchemaError::DependencyCycle {
                sets: vec!["a".to_string(), "b".to_string(), "a".to_string()],
            }
        );
    }

    #[test]
    fn test_duplicate_set_is_rejected() {
        let err = Registry::new(vec![plain("a"), plain("a")]).unwrap_err();
        assert_eq!(err, SchemaError::DuplicateFieldSet { set: "a".to_string() });
    }

    #[test]
    fn test_unknown_dependency_is_rejected() {
        let err = Registry::new(vec![plain("a"), gated_on("b", ("a", "missing"))]).unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnknownDependency {
                set: "b".to_string(),
                dependency: "a.missing".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_set_override_is_a_violation() {
        let registry = Registry::new(vec![plain("a")]).unwrap();
        let err = registry
            .resolve(&Overrides::new().with("b", "value", "x"))
            .unwrap_err();
        assert_eq!(
            err.violations(),
            &[Violation::new("b", "value", ViolationKind::UnknownField)]
        );
    }

    #[test]
    fn test_env_vars_are_parsed_per_field_type() {
        let registry = Registry::new(vec![FieldSet::builder("otlp")
            .field(Field::new("host", FieldType::String))
            .field(Field::new("port", FieldType::Int))
            .build()
            .unwrap()])
        .unwrap();

        let overrides = registry
            .overrides_from_vars(
                "APP_",
                [("APP_OTLP_HOST", "collector"), ("APP_OTLP_PORT", "4317"), ("PATH", "/bin")],
            )
            .unwrap();
        assert_eq!(overrides.get("otlp", "host"), Some(&Value::from("collector")));
        assert_eq!(overrides.get("otlp", "port"), Some(&Value::Int(4317)));
        assert_eq!(overrides.len(), 2);

        let err = registry
            .overrides_from_vars("APP_", [("APP_OTLP_PORT", "four")])
            .unwrap_err();
        assert!(matches!(
            err.violations()[0].kind,
            ViolationKind::Unparseable { expected: FieldType::Int, .. }
        ));
    }
}
