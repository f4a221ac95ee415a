use std::fmt;
use std::sync::Arc;

use crate::errors::{FieldViolation, SchemaError, ViolationKind};
use crate::value::{FieldType, Value};

/// Type alias for custom validator function to reduce type complexity
pub type ValidatorFn = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Produces a default value at resolution time.
pub type DefaultGenerator = Arc<dyn Fn() -> Value + Send + Sync>;

/// A named custom check applied after the type and enumeration checks.
#[derive(Clone)]
pub struct CustomValidator {
    name: String,
    check: ValidatorFn,
}

impl CustomValidator {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for CustomValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomValidator")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// One rule a field value must satisfy.
///
/// Constraints are checked in declaration order: type, then enumeration, then
/// the custom validator. The first failure wins.
#[derive(Debug, Clone)]
pub enum Constraint {
    Type(FieldType),
    /// Allowed members. For `StringList` fields every element must be a member.
    Enumeration(Vec<Value>),
    Custom(CustomValidator),
}

impl Constraint {
    pub fn check(&self, value: &Value) -> Result<(), ViolationKind> {
        match self {
            Constraint::Type(expected) => {
                let actual = value.field_type();
                if actual != *expected {
                    return Err(ViolationKind::TypeMismatch {
                        expected: *expected,
                        actual,
                    });
                }
                Ok(())
            }
            Constraint::Enumeration(members) => {
                let not_member = |candidate: Value| ViolationKind::NotInEnumeration {
                    value: candidate.to_string(),
                    allowed: members.iter().map(ToString::to_string).collect(),
                };

                match value {
                    Value::StringList(items) => {
                        for item in items {
                            let candidate = Value::String(item.clone());
                            if !members.contains(&candidate) {
                                return Err(not_member(candidate));
                            }
                        }
                        Ok(())
                    }
                    scalar if members.contains(scalar) => Ok(()),
                    scalar => Err(not_member(scalar.clone())),
                }
            }
            Constraint::Custom(validator) => {
                (validator.check)(value).map_err(|message| ViolationKind::ValidatorRejected {
                    validator: validator.name.clone(),
                    message,
                })
            }
        }
    }
}

#[derive(Clone)]
enum DefaultValue {
    Static(Value),
    Generated(DefaultGenerator),
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Static(value) => f.debug_tuple("Static").field(value).finish(),
            DefaultValue::Generated(_) => f.write_str("Generated"),
        }
    }
}

/// Definition of a single typed configuration value.
#[derive(Debug, Clone)]
pub struct Field {
    key: String,
    field_type: FieldType,
    default: Option<DefaultValue>,
    required: bool,
    enumeration: Option<Vec<Value>>,
    validator: Option<CustomValidator>,
}

impl Field {
    pub fn new(key: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            key: key.into(),
            field_type,
            default: None,
            required: false,
            enumeration: None,
            validator: None,
        }
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Static(value.into()));
        self
    }

    /// Defaults to a freshly generated value on every resolution.
    pub fn default_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Generated(Arc::new(generator)));
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn enumeration<I, V>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.enumeration = Some(members.into_iter().map(Into::into).collect());
        self
    }

    pub fn validator<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(CustomValidator::new(name, check));
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// The default for this resolution, generating one if needed.
    pub fn default_for_resolution(&self) -> Option<Value> {
        match &self.default {
            Some(DefaultValue::Static(value)) => Some(value.clone()),
            Some(DefaultValue::Generated(generator)) => Some(generator()),
            None => None,
        }
    }

    /// Constraints in the order they are applied.
    pub fn constraints(&self) -> Vec<Constraint> {
        let mut constraints = vec![Constraint::Type(self.field_type)];
        if let Some(members) = &self.enumeration {
            constraints.push(Constraint::Enumeration(members.clone()));
        }
        if let Some(validator) = &self.validator {
            constraints.push(Constraint::Custom(validator.clone()));
        }
        constraints
    }

    /// Applies type, enumeration and custom checks; the first failure short-circuits.
    pub fn validate(&self, value: &Value) -> Result<(), FieldViolation> {
        for constraint in self.constraints() {
            constraint.check(value).map_err(|kind| FieldViolation {
                field: self.key.clone(),
                kind,
            })?;
        }
        Ok(())
    }

    pub(crate) fn check_definition(&self, set: &str) -> Result<(), SchemaError> {
        if self.required && self.default.is_some() {
            return Err(SchemaError::RequiredWithDefault {
                set: set.to_string(),
                field: self.key.clone(),
            });
        }

        if let Some(members) = &self.enumeration {
            let expected = match self.field_type {
                FieldType::StringList => FieldType::String,
                scalar => scalar,
            };
            if let Some(bad) = members.iter().find(|m| m.field_type() != expected) {
                return Err(SchemaError::InvalidEnumeration {
                    set: set.to_string(),
                    field: self.key.clone(),
                    expected,
                    actual: bad.field_type(),
                });
            }
        }

        if let Some(DefaultValue::Static(value)) = &self.default {
            self.validate(value)
                .map_err(|violation| SchemaError::InvalidDefault {
                    set: set.to_string(),
                    field: self.key.clone(),
                    reason: violation.kind.to_string(),
                })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level_field() -> Field {
        Field::new("level", FieldType::String)
            .default_value("info")
            .enumeration(["debug", "info", "warn"])
    }

    #[test]
    fn test_validate_accepts_member() {
        assert!(level_field().validate(&Value::from("warn")).is_ok());
    }

    #[test]
    fn test_type_check_runs_before_enumeration() {
        let err = level_field().validate(&Value::Int(3)).unwrap_err();
        assert_eq!(err.field, "level");
        assert_eq!(
            err.kind,
            ViolationKind::TypeMismatch {
                expected: FieldType::String,
                actual: FieldType::Int,
            }
        );
    }

    #[test]
    fn test_enumeration_applies_to_list_elements() {
        let field = Field::new("exporters", FieldType::StringList).enumeration(["console", "otlp"]);
        assert!(field.validate(&Value::from(["otlp", "console"])).is_ok());

        let err = field.validate(&Value::from(["console", "zipkin"])).unwrap_err();
        assert!(matches!(
            err.kind,
            ViolationKind::NotInEnumeration { ref value, .. } if value == "zipkin"
        ));
    }

    #[test]
    fn test_custom_validator_runs_last() {
        let field = Field::new("port", FieldType::Int).validator("port_range", |v| match v.as_int() {
            Some(p) if (1..=65535).contains(&p) => Ok(()),
            _ => Err("port must be between 1 and 65535".to_string()),
        });

        assert!(field.validate(&Value::Int(4317)).is_ok());
        let err = field.validate(&Value::Int(0)).unwrap_err();
        assert_eq!(
            err.kind,
            ViolationKind::ValidatorRejected {
                validator: "port_range".to_string(),
                message: "port must be between 1 and 65535".to_string(),
            }
        );

        // type mismatch short-circuits before the validator sees the value
        let err = field.validate(&Value::from("4317")).unwrap_err();
        assert!(matches!(err.kind, ViolationKind::TypeMismatch { .. }));
    }

    #[test]
    fn test_constraints_are_introspectable() {
        let constraints = level_field().constraints();
        assert_eq!(constraints.len(), 2);
        assert!(matches!(constraints[0], Constraint::Type(FieldType::String)));
        assert!(matches!(constraints[1], Constraint::Enumeration(ref m) if m.len() == 3));
    }

    #[test]
    fn test_definition_rejects_required_with_default() {
        let field = Field::new("host", FieldType::String)
            .required()
            .default_value("localhost");
        assert_eq!(
            field.check_definition("otlp"),
            Err(SchemaError::RequiredWithDefault {
                set: "otlp".to_string(),
                field: "host".to_string(),
            })
        );
    }

    #[test]
    fn test_definition_rejects_default_outside_enumeration() {
        let field = Field::new("format", FieldType::String)
            .default_value("xml")
            .enumeration(["console", "json"]);
        assert!(matches!(
            field.check_definition("log"),
            Err(SchemaError::InvalidDefault { .. })
        ));
    }

    #[test]
    fn test_definition_rejects_mistyped_enumeration() {
        let field = Field::new("port", FieldType::Int).enumeration(["4317"]);
        assert!(matches!(
            field.check_definition("otlp"),
            Err(SchemaError::InvalidEnumeration { .. })
        ));
    }

    #[test]
    fn test_generated_default_is_produced_per_call() {
        let counter = std::sync::atomic::AtomicI64::new(0);
        let counter = Arc::new(counter);
        let shared = Arc::clone(&counter);
        let field = Field::new("seq", FieldType::Int).default_generator(move || {
            Value::Int(shared.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
        });

        assert_eq!(field.default_for_resolution(), Some(Value::Int(0)));
        assert_eq!(field.default_for_resolution(), Some(Value::Int(1)));
        assert!(field.has_default());
    }
}
