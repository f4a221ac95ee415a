//! Declarative configuration fields.
//!
//! Applications describe their configuration as [`FieldSet`]s of typed
//! [`Field`]s. A [`Registry`] checks the definitions once, then resolves
//! in-memory [`Overrides`] against them into an immutable [`ResolvedConfig`],
//! reporting every violation of a pass together.
//!
//! [`LoadCondition`]s make fields of one set required only when values of
//! other sets say so; the registry orders sets so those values are resolved
//! first.

pub mod condition;
pub mod errors;
pub mod field;
pub mod field_set;
pub mod overrides;
pub mod registry;
pub mod resolved;
pub mod value;

// Re-export commonly used types
pub use condition::{ConditionOutcome, LoadCondition, Predicate, ValueLookup};
pub use errors::{
    ConfigError, ConfigResult, FieldViolation, ResolutionError, SchemaError, Violation,
    ViolationKind,
};
pub use field::{Constraint, CustomValidator, DefaultGenerator, Field, ValidatorFn};
pub use field_set::{FieldSet, FieldSetBuilder, WHOLE_SET};
pub use overrides::Overrides;
pub use registry::Registry;
pub use resolved::ResolvedConfig;
pub use value::{FieldRef, FieldType, Value};
