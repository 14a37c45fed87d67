use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

use super::constructor::{EntityConstructor, EntityInitializer};
use super::property::{PropertyDeclaration, PropertyDescriptor};
use crate::core::{EntityKey, Result, TrackError, Value};

/// Who produces the permanent key of a newly added entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AutoGeneratedKeyType {
    /// The client supplies the key.
    #[default]
    None,
    /// The store assigns the key on insert; a temporary key is used until then.
    Identity,
    /// A server-side generator assigns the key on save; same client handling as `Identity`.
    KeyGenerator,
    /// The client mints a fresh Guid when the key is left at its default.
    ClientGuid,
}

impl AutoGeneratedKeyType {
    pub fn is_store_generated(&self) -> bool {
        matches!(self, Self::Identity | Self::KeyGenerator)
    }
}

#[derive(Clone)]
pub struct EntityType {
    name: String,
    resource_name: String,
    properties: Vec<PropertyDescriptor>,
    auto_generated_key_type: AutoGeneratedKeyType,
    constructor: Option<EntityConstructor>,
    initializer: Option<EntityInitializer>,
}

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            resource_name: format!("{}s", name),
            name,
            properties: Vec::new(),
            auto_generated_key_type: AutoGeneratedKeyType::None,
            constructor: None,
            initializer: None,
        }
    }

    pub fn resource_name(mut self, resource_name: impl Into<String>) -> Self {
        self.resource_name = resource_name.into();
        self
    }

    pub fn auto_generated_key(mut self, key_type: AutoGeneratedKeyType) -> Self {
        self.auto_generated_key_type = key_type;
        self
    }

    /// Builder form of [`EntityType::add_property`]. On a name collision the
    /// first declaration is kept and the duplicate is logged.
    pub fn property(mut self, descriptor: PropertyDescriptor) -> Self {
        if self.get_property(descriptor.name()).is_some() {
            warn!(
                "Duplicate property '{}' on '{}' ignored",
                descriptor.name(),
                self.name
            );
            return self;
        }
        self.properties.push(descriptor);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn auto_generated_key_type(&self) -> AutoGeneratedKeyType {
        self.auto_generated_key_type
    }

    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    /// `None` means the name is not a tracked property; it may still be an ad hoc field.
    pub fn get_property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name() == name)
    }

    pub fn get_property_mut(&mut self, name: &str) -> Option<&mut PropertyDescriptor> {
        self.properties.iter_mut().find(|p| p.name() == name)
    }

    pub fn key_properties(&self) -> Vec<&PropertyDescriptor> {
        self.properties.iter().filter(|p| p.is_part_of_key()).collect()
    }

    pub fn mapped_properties(&self) -> Vec<&PropertyDescriptor> {
        self.properties.iter().filter(|p| p.is_mapped()).collect()
    }

    pub fn unmapped_properties(&self) -> Vec<&PropertyDescriptor> {
        self.properties.iter().filter(|p| p.is_unmapped()).collect()
    }

    pub fn constructor(&self) -> Option<&EntityConstructor> {
        self.constructor.as_ref()
    }

    pub fn initializer(&self) -> Option<&EntityInitializer> {
        self.initializer.as_ref()
    }

    /// Appends a property.
    ///
    /// A name that was only inferred from a constructor is replaced by the
    /// explicit declaration; any other collision is a configuration error.
    pub fn add_property(&mut self, descriptor: PropertyDescriptor) -> Result<()> {
        match self
            .properties
            .iter()
            .position(|p| p.name() == descriptor.name())
        {
            Some(idx) if self.properties[idx].is_inferred() => {
                self.properties[idx] = descriptor;
                Ok(())
            }
            Some(_) => Err(TrackError::DuplicateProperty(
                descriptor.name().to_string(),
                self.name.clone(),
            )),
            None => {
                self.properties.push(descriptor);
                Ok(())
            }
        }
    }

    /// Installs constructor and initializer, re-inferring unmapped properties
    /// from the constructor's declared value fields.
    pub(crate) fn register_constructor(
        &mut self,
        constructor: Option<EntityConstructor>,
        initializer: Option<EntityInitializer>,
    ) {
        self.properties.retain(|p| !p.is_inferred());
        if let Some(ctor) = &constructor {
            for (name, literal) in ctor.declared_values() {
                if self.get_property(name).is_none() {
                    self.properties
                        .push(PropertyDescriptor::inferred_from_constructor(name, literal));
                }
            }
        }
        self.constructor = constructor;
        self.initializer = initializer;
    }

    pub(crate) fn apply_default_validators(&mut self) {
        for property in &mut self.properties {
            property.ensure_required_validator();
        }
    }

    /// Builds the entity key from a value lookup; missing key values are `Null`.
    pub fn key_from<'a>(&self, lookup: impl Fn(&str) -> Option<&'a Value>) -> EntityKey {
        let values = self
            .properties
            .iter()
            .filter(|p| p.is_part_of_key())
            .map(|p| lookup(p.name()).cloned().unwrap_or(Value::Null))
            .collect();
        EntityKey::new(self.name.clone(), values)
    }

    pub fn declaration(&self) -> EntityTypeDeclaration {
        EntityTypeDeclaration {
            name: self.name.clone(),
            resource_name: self.resource_name.clone(),
            auto_generated_key_type: self.auto_generated_key_type,
            properties: self
                .properties
                .iter()
                .map(PropertyDescriptor::declaration)
                .collect(),
        }
    }

    pub fn from_declaration(declaration: &EntityTypeDeclaration) -> Self {
        Self {
            name: declaration.name.clone(),
            resource_name: declaration.resource_name.clone(),
            properties: declaration
                .properties
                .iter()
                .map(PropertyDescriptor::from_declaration)
                .collect(),
            auto_generated_key_type: declaration.auto_generated_key_type,
            constructor: None,
            initializer: None,
        }
    }
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("name", &self.name)
            .field("resource_name", &self.resource_name)
            .field("properties", &self.properties)
            .field("auto_generated_key_type", &self.auto_generated_key_type)
            .field("constructor", &self.constructor)
            .field("has_initializer", &self.initializer.is_some())
            .finish()
    }
}

/// Serializable entity type declaration; constructors and initializers never travel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTypeDeclaration {
    pub name: String,
    pub resource_name: String,
    pub auto_generated_key_type: AutoGeneratedKeyType,
    pub properties: Vec<PropertyDeclaration>,
}
