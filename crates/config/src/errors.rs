use std::fmt;

use thiserror::Error;

use crate::value::FieldType;

/// Errors in the definition of fields, field-sets and registries.
///
/// These are raised while building a [`crate::Registry`] and never depend on
/// override values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("Duplicate field-set key: {set}")]
    DuplicateFieldSet { set: String },

    #[error("Duplicate field key {field} in field-set {set}")]
    DuplicateField { set: String, field: String },

    #[error("Field {set}.{field} is required and cannot declare a default")]
    RequiredWithDefault { set: String, field: String },

    #[error("Default for field {set}.{field} is invalid: {reason}")]
    InvalidDefault {
        set: String,
        field: String,
        reason: String,
    },

    #[error("Enumeration of field {set}.{field} holds a {actual} value, expected {expected}")]
    InvalidEnumeration {
        set: String,
        field: String,
        expected: FieldType,
        actual: FieldType,
    },

    #[error("Load condition on field-set {set} gates unknown field {field}")]
    UnknownGatedField { set: String, field: String },

    #[error("Load condition on field-set {set} depends on its own field {field}")]
    SelfReference { set: String, field: String },

    #[error("Load condition on field-set {set} depends on unknown field {dependency}")]
    UnknownDependency { set: String, dependency: String },

    #[error("Cyclic load-condition dependencies between field-sets: {}", .sets.join(" -> "))]
    DependencyCycle { sets: Vec<String> },
}

/// The rule a value broke while a field-set was being resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViolationKind {
    #[error("required field is missing")]
    MissingRequired,

    #[error("expected a {expected} value, got {actual}")]
    TypeMismatch {
        expected: FieldType,
        actual: FieldType,
    },

    #[error("value '{value}' is not one of [{}]", .allowed.join(", "))]
    NotInEnumeration { value: String, allowed: Vec<String> },

    #[error("validator '{validator}' rejected value: {message}")]
    ValidatorRejected { validator: String, message: String },

    #[error("load condition could not be evaluated: {message}")]
    ConditionFailed { message: String },

    #[error("unknown field")]
    UnknownField,

    #[error("cannot parse '{raw}' as {expected}")]
    Unparseable { raw: String, expected: FieldType },
}

/// A single failed rule, addressed by field-set and field key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field_set: String,
    pub field: String,
    pub kind: ViolationKind,
}

impl Violation {
    pub fn new(field_set: impl Into<String>, field: impl Into<String>, kind: ViolationKind) -> Self {
        Self {
            field_set: field_set.into(),
            field: field.into(),
            kind,
        }
    }

    /// Dotted `set.field` address of the violating field.
    pub fn key(&self) -> String {
        format!("{}.{}", self.field_set, self.field)
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.field_set, self.field, self.kind)
    }
}

/// Failure of a [`crate::Field`]'s own constraints, before a field-set key is known.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {kind}")]
pub struct FieldViolation {
    pub field: String,
    pub kind: ViolationKind,
}

impl FieldViolation {
    pub fn within(self, field_set: &str) -> Violation {
        Violation::new(field_set, self.field, self.kind)
    }
}

/// Every violation found in one resolution pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("configuration resolution failed with {} violation(s): {}", .violations.len(), render(.violations))]
pub struct ResolutionError {
    violations: Vec<Violation>,
}

fn render(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ResolutionError {
    pub fn new(violations: Vec<Violation>) -> Self {
        Self { violations }
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn into_violations(self) -> Vec<Violation> {
        self.violations
    }

    /// Finds the first violation reported for `set.field`.
    pub fn find(&self, set: &str, field: &str) -> Option<&Violation> {
        self.violations
            .iter()
            .find(|v| v.field_set == set && v.field == field)
    }
}

/// Configuration error type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("Field {set}.{field} was read without being declared as a dependency")]
    UndeclaredDependency { set: String, field: String },

    #[error("Field {set}.{field} holds a {actual} value, expected {expected}")]
    WrongType {
        set: String,
        field: String,
        expected: FieldType,
        actual: FieldType,
    },

    #[error("Resolved configuration is inconsistent at {set}.{field}: {reason}")]
    Projection {
        set: String,
        field: String,
        reason: String,
    },

    #[error("Invalid override document: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// 统一的Result类型
pub type ConfigResult<T> = Result<T, ConfigError>;
