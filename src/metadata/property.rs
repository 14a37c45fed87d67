use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::{DataType, Value};
use crate::entity::validation::{MaxLengthValidator, RequiredValidator, Validator, ValidatorSpec};

/// Describes one tracked property of an entity type.
///
/// A property is either mapped (known to the remote schema) or declared
/// unmapped. Anything else attached to an entity is an ad hoc extension
/// and never gets a descriptor.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    name: String,
    data_type: DataType,
    is_unmapped: bool,
    is_part_of_key: bool,
    is_nullable: bool,
    default_value: Option<Value>,
    max_length: Option<usize>,
    validators: Vec<Arc<dyn Validator>>,
    /// Declared by inference from a registered constructor.
    inferred: bool,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            is_unmapped: false,
            is_part_of_key: false,
            is_nullable: true,
            default_value: None,
            max_length: None,
            validators: Vec::new(),
            inferred: false,
        }
    }

    pub fn key(mut self) -> Self {
        self.is_part_of_key = true;
        self.is_nullable = false;
        self
    }

    pub fn unmapped(mut self) -> Self {
        self.is_unmapped = true;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.is_nullable = nullable;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self.validators
            .push(Arc::new(MaxLengthValidator::new(max_length)));
        self
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    pub(crate) fn inferred_from_constructor(name: &str, literal: &Value) -> Self {
        let data_type = DataType::infer(literal).unwrap_or(DataType::Text);
        let mut descriptor = Self::new(name, data_type)
            .unmapped()
            .default_value(literal.clone());
        descriptor.inferred = true;
        descriptor
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn is_unmapped(&self) -> bool {
        self.is_unmapped
    }

    pub fn is_mapped(&self) -> bool {
        !self.is_unmapped
    }

    pub fn is_part_of_key(&self) -> bool {
        self.is_part_of_key
    }

    pub fn is_nullable(&self) -> bool {
        self.is_nullable
    }

    pub fn is_inferred(&self) -> bool {
        self.inferred
    }

    pub fn max_length_limit(&self) -> Option<usize> {
        self.max_length
    }

    /// Explicit default, else `Null` for nullable properties, else the type default.
    pub fn default_value_or_type_default(&self) -> Value {
        match &self.default_value {
            Some(value) => value.clone(),
            None if self.is_nullable => Value::Null,
            None => self.data_type.default_value(),
        }
    }

    pub fn validators(&self) -> &[Arc<dyn Validator>] {
        &self.validators
    }

    /// Appends a rule; applies to entities materialized afterwards.
    pub fn push_validator(&mut self, validator: Arc<dyn Validator>) {
        self.validators.push(validator);
    }

    pub(crate) fn ensure_required_validator(&mut self) {
        if self.is_unmapped || self.is_part_of_key || self.is_nullable {
            return;
        }
        let has_required = self
            .validators
            .iter()
            .any(|v| v.spec() == Some(ValidatorSpec::Required));
        if !has_required {
            self.validators.insert(0, Arc::new(RequiredValidator));
        }
    }

    pub fn declaration(&self) -> PropertyDeclaration {
        PropertyDeclaration {
            name: self.name.clone(),
            data_type: self.data_type,
            is_unmapped: self.is_unmapped,
            is_part_of_key: self.is_part_of_key,
            is_nullable: self.is_nullable,
            default_value: self.default_value.clone(),
            validators: self.validators.iter().filter_map(|v| v.spec()).collect(),
        }
    }

    pub fn from_declaration(declaration: &PropertyDeclaration) -> Self {
        let max_length = declaration.validators.iter().find_map(|spec| match spec {
            ValidatorSpec::MaxLength { max_length } => Some(*max_length),
            ValidatorSpec::Required => None,
        });
        Self {
            name: declaration.name.clone(),
            data_type: declaration.data_type,
            is_unmapped: declaration.is_unmapped,
            is_part_of_key: declaration.is_part_of_key,
            is_nullable: declaration.is_nullable,
            default_value: declaration.default_value.clone(),
            max_length,
            validators: declaration.validators.iter().map(ValidatorSpec::build).collect(),
            inferred: false,
        }
    }
}

/// Serializable property declaration (no custom validators).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDeclaration {
    pub name: String,
    pub data_type: DataType,
    pub is_unmapped: bool,
    pub is_part_of_key: bool,
    pub is_nullable: bool,
    pub default_value: Option<Value>,
    pub validators: Vec<ValidatorSpec>,
}
