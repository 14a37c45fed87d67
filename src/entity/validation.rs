//! Property validation rules.
//!
//! Each tracked property carries an ordered chain of [`Validator`]s. The
//! chain runs against the property's current value whenever it changes on
//! an attached entity, or on demand through the aspect. A failing rule
//! produces a [`ValidationError`]; failures never block mutation.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::Value;

/// A failed validation rule recorded against an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// `None` for entity-level errors.
    pub property_name: Option<String>,
    pub validator_name: String,
    pub error_message: String,
}

impl ValidationError {
    pub fn new(
        property_name: Option<&str>,
        validator_name: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            property_name: property_name.map(str::to_string),
            validator_name: validator_name.into(),
            error_message: error_message.into(),
        }
    }

    /// Errors are identified by property and rule; re-running a rule replaces its error.
    pub fn same_rule(&self, other: &ValidationError) -> bool {
        self.property_name == other.property_name && self.validator_name == other.validator_name
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error_message)
    }
}

/// Serializable form of the built-in rules, used by metadata export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidatorSpec {
    Required,
    MaxLength { max_length: usize },
}

impl ValidatorSpec {
    pub fn build(&self) -> Arc<dyn Validator> {
        match self {
            Self::Required => Arc::new(RequiredValidator),
            Self::MaxLength { max_length } => Arc::new(MaxLengthValidator::new(*max_length)),
        }
    }
}

/// A single validation rule (Chain of Responsibility element).
pub trait Validator: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Returns the error message when `value` violates the rule.
    fn validate(&self, property_name: &str, value: &Value) -> Option<String>;

    /// Built-in rules report their serializable form; custom rules return `None`
    /// and do not travel with exported metadata.
    fn spec(&self) -> Option<ValidatorSpec> {
        None
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequiredValidator;

impl Validator for RequiredValidator {
    fn name(&self) -> &str {
        "required"
    }

    fn validate(&self, property_name: &str, value: &Value) -> Option<String> {
        let missing = match value {
            Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            _ => false,
        };
        missing.then(|| format!("'{}' is required", property_name))
    }

    fn spec(&self) -> Option<ValidatorSpec> {
        Some(ValidatorSpec::Required)
    }
}

#[derive(Debug, Clone)]
pub struct MaxLengthValidator {
    max_length: usize,
}

impl MaxLengthValidator {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }
}

impl Validator for MaxLengthValidator {
    fn name(&self) -> &str {
        "maxLength"
    }

    fn validate(&self, property_name: &str, value: &Value) -> Option<String> {
        // Null and non-text values are someone else's problem
        let text = value.as_str()?;
        (text.chars().count() > self.max_length).then(|| {
            format!(
                "'{}' must be a string with {} characters or less",
                property_name, self.max_length
            )
        })
    }

    fn spec(&self) -> Option<ValidatorSpec> {
        Some(ValidatorSpec::MaxLength {
            max_length: self.max_length,
        })
    }
}

type CheckFn = dyn Fn(&Value) -> bool + Send + Sync;

/// Rule backed by a closure; `message` may use `{property}` as a placeholder.
#[derive(Clone)]
pub struct CustomValidator {
    name: String,
    message: String,
    check: Arc<CheckFn>,
}

impl CustomValidator {
    pub fn new(
        name: impl Into<String>,
        message: impl Into<String>,
        check: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            check: Arc::new(check),
        }
    }
}

impl fmt::Debug for CustomValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomValidator")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Validator for CustomValidator {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, property_name: &str, value: &Value) -> Option<String> {
        (!(self.check)(value)).then(|| self.message.replace("{property}", property_name))
    }
}

/// Runs a validator chain, collecting every failure in order.
pub fn run_validators(
    property_name: &str,
    value: &Value,
    validators: &[Arc<dyn Validator>],
) -> Vec<ValidationError> {
    validators
        .iter()
        .filter_map(|v| {
            v.validate(property_name, value)
                .map(|msg| ValidationError::new(Some(property_name), v.name(), msg))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_length_message_mentions_property() {
        let v = MaxLengthValidator::new(5);
        assert!(v.validate("foo", &Value::from("funky")).is_none());
        let msg = v.validate("foo", &Value::from("funky and fresh")).unwrap();
        assert!(msg.contains("foo"));
        assert!(msg.ends_with("or less"));
    }

    #[test]
    fn test_required_rejects_null_and_blank() {
        let v = RequiredValidator;
        assert!(v.validate("LastName", &Value::Null).is_some());
        assert!(v.validate("LastName", &Value::from("  ")).is_some());
        assert!(v.validate("LastName", &Value::from("Smith")).is_none());
        assert!(v.validate("Count", &Value::Integer(0)).is_none());
    }

    #[test]
    fn test_custom_validator_placeholder() {
        let v = CustomValidator::new("positive", "'{property}' must be positive", |v| {
            v.as_i64().is_some_and(|n| n > 0)
        });
        let errs = run_validators("Quantity", &Value::Integer(-1), &[Arc::new(v)]);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].error_message, "'Quantity' must be positive");
        assert_eq!(errs[0].validator_name, "positive");
    }

    #[test]
    fn test_spec_roundtrip_builds_same_rule() {
        let spec = MaxLengthValidator::new(3).spec().unwrap();
        assert_eq!(spec.build().spec(), Some(spec));
    }
}
