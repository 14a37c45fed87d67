use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::constructor::{EntityConstructor, EntityInitializer};
use super::entity_type::{EntityType, EntityTypeDeclaration};
use super::property::PropertyDescriptor;
use crate::core::{PropertyValues, Result, TrackError};
use crate::entity::validation::Validator;
use crate::entity::Entity;

#[derive(Clone, Default)]
struct Registration {
    constructor: Option<EntityConstructor>,
    initializer: Option<EntityInitializer>,
}

/// Registry of entity types and their construction hooks.
///
/// Cloning is cheap: both maps sit behind `Arc` and are copied on write,
/// so a clone handed to a manager never observes later edits made through
/// the original. Entities keep the `Arc<EntityType>` they were
/// materialized from; type edits apply to entities created afterwards.
#[derive(Clone, Default)]
pub struct MetadataStore {
    entity_types: Arc<BTreeMap<String, Arc<EntityType>>>,
    /// Kept so registrations survive re-loading a type (e.g. from an import).
    registrations: Arc<BTreeMap<String, Registration>>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Independent copy carrying the same declarations and registrations.
    pub fn derive(&self) -> Self {
        self.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_types.is_empty()
    }

    /// Loads a base entity type; a registration made earlier for the same name is applied now.
    pub fn add_entity_type(&mut self, mut entity_type: EntityType) -> Result<()> {
        let name = entity_type.name().to_string();
        if self.entity_types.contains_key(&name) {
            return Err(TrackError::DuplicateEntityType(name));
        }
        entity_type.apply_default_validators();
        if let Some(reg) = self.registrations.get(&name) {
            entity_type.register_constructor(reg.constructor.clone(), reg.initializer.clone());
        }
        Arc::make_mut(&mut self.entity_types).insert(name, Arc::new(entity_type));
        Ok(())
    }

    pub fn has_entity_type(&self, name: &str) -> bool {
        self.entity_types.contains_key(name)
    }

    pub fn entity_type(&self, name: &str) -> Result<Arc<EntityType>> {
        self.entity_types
            .get(name)
            .cloned()
            .ok_or_else(|| TrackError::UnknownEntityType(name.to_string()))
    }

    /// Resolves a query resource name (e.g. "Customers") or a plain type name.
    pub fn entity_type_for_resource(&self, resource: &str) -> Result<Arc<EntityType>> {
        if let Some(ty) = self.entity_types.get(resource) {
            return Ok(ty.clone());
        }
        self.entity_types
            .values()
            .find(|ty| ty.default_resource_name() == resource)
            .cloned()
            .ok_or_else(|| TrackError::UnknownEntityType(resource.to_string()))
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &Arc<EntityType>> {
        self.entity_types.values()
    }

    fn entity_type_mut(&mut self, name: &str) -> Result<&mut EntityType> {
        Arc::make_mut(&mut self.entity_types)
            .get_mut(name)
            .map(Arc::make_mut)
            .ok_or_else(|| TrackError::UnknownEntityType(name.to_string()))
    }

    /// Associates a custom constructor and/or post-construction initializer with a type.
    ///
    /// May be called before the type is loaded. Value fields declared by the
    /// constructor that are not mapped become unmapped properties.
    pub fn register_constructor(
        &mut self,
        type_name: &str,
        constructor: Option<EntityConstructor>,
        initializer: Option<EntityInitializer>,
    ) {
        let registration = Registration {
            constructor,
            initializer,
        };
        if let Ok(ty) = self.entity_type_mut(type_name) {
            ty.register_constructor(
                registration.constructor.clone(),
                registration.initializer.clone(),
            );
        }
        Arc::make_mut(&mut self.registrations).insert(type_name.to_string(), registration);
    }

    /// Replaces only the initializer, keeping any registered constructor.
    pub fn register_initializer(
        &mut self,
        type_name: &str,
        initializer: impl Fn(&mut Entity) + Send + Sync + 'static,
    ) {
        let constructor = self
            .registrations
            .get(type_name)
            .and_then(|r| r.constructor.clone());
        self.register_constructor(type_name, constructor, Some(Arc::new(initializer)));
    }

    pub fn add_property(&mut self, type_name: &str, mut descriptor: PropertyDescriptor) -> Result<()> {
        descriptor.ensure_required_validator();
        self.entity_type_mut(type_name)?.add_property(descriptor)
    }

    /// Descriptor lookup; `Ok(None)` means an undeclared (ad hoc) name.
    pub fn get_property(&self, type_name: &str, name: &str) -> Result<Option<&PropertyDescriptor>> {
        self.entity_types
            .get(type_name)
            .map(|ty| ty.get_property(name))
            .ok_or_else(|| TrackError::UnknownEntityType(type_name.to_string()))
    }

    pub fn add_validator(
        &mut self,
        type_name: &str,
        property_name: &str,
        validator: impl Validator + 'static,
    ) -> Result<()> {
        let ty = self.entity_type_mut(type_name)?;
        let ty_name = ty.name().to_string();
        let property = ty.get_property_mut(property_name).ok_or_else(|| {
            TrackError::UndeclaredProperty(property_name.to_string(), ty_name)
        })?;
        property.push_validator(Arc::new(validator));
        Ok(())
    }

    /// Materializes a detached entity of the given type.
    pub fn create_entity(&self, type_name: &str) -> Result<Entity> {
        Ok(Entity::materialize(self.entity_type(type_name)?, None))
    }

    pub fn create_entity_with(&self, type_name: &str, values: &PropertyValues) -> Result<Entity> {
        Ok(Entity::materialize(self.entity_type(type_name)?, Some(values)))
    }

    pub fn declaration(&self) -> MetadataDeclaration {
        MetadataDeclaration {
            entity_types: self.entity_types.values().map(|ty| ty.declaration()).collect(),
        }
    }

    /// Loads declared types that are not present yet; returns how many were added.
    pub fn import_declaration(&mut self, declaration: &MetadataDeclaration) -> Result<usize> {
        let mut added = 0;
        for ty in &declaration.entity_types {
            if self.has_entity_type(&ty.name) {
                continue;
            }
            self.add_entity_type(EntityType::from_declaration(ty))?;
            added += 1;
        }
        Ok(added)
    }

    pub fn export_metadata(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.declaration())?)
    }

    pub fn import_metadata(&mut self, json: &str) -> Result<usize> {
        let declaration: MetadataDeclaration = serde_json::from_str(json)?;
        self.import_declaration(&declaration)
    }
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("entity_types", &self.entity_types.keys().collect::<Vec<_>>())
            .field("registrations", &self.registrations.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataDeclaration {
    pub entity_types: Vec<EntityTypeDeclaration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, Value};

    fn store() -> MetadataStore {
        let mut store = MetadataStore::new();
        store
            .add_entity_type(
                EntityType::new("Customer")
                    .property(PropertyDescriptor::new("CustomerID", DataType::Guid).key())
                    .property(PropertyDescriptor::new("CompanyName", DataType::Text)),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_registration_before_type_is_loaded() {
        let mut store = MetadataStore::new();
        store.register_constructor("Customer", Some(EntityConstructor::new().field("foo", 42)), None);
        assert!(store.get_property("Customer", "foo").is_err());

        store
            .add_entity_type(
                EntityType::new("Customer")
                    .property(PropertyDescriptor::new("CustomerID", DataType::Guid).key()),
            )
            .unwrap();
        let foo = store.get_property("Customer", "foo").unwrap().unwrap();
        assert!(foo.is_unmapped());
    }

    #[test]
    fn test_derived_store_is_independent() {
        let base = store();
        let mut derived = base.derive();
        derived.register_constructor("Customer", Some(EntityConstructor::new().field("foo", 42)), None);

        assert!(derived.get_property("Customer", "foo").unwrap().is_some());
        assert!(base.get_property("Customer", "foo").unwrap().is_none());
    }

    #[test]
    fn test_resource_name_lookup() {
        let store = store();
        assert_eq!(store.entity_type_for_resource("Customers").unwrap().name(), "Customer");
        assert_eq!(store.entity_type_for_resource("Customer").unwrap().name(), "Customer");
        assert!(store.entity_type_for_resource("Orders").is_err());
    }

    #[test]
    fn test_metadata_export_import() {
        let mut source = store();
        source
            .add_property(
                "Customer",
                PropertyDescriptor::new("foo", DataType::Integer)
                    .unmapped()
                    .default_value(42),
            )
            .unwrap();
        let json = source.export_metadata().unwrap();

        let mut target = MetadataStore::new();
        assert_eq!(target.import_metadata(&json).unwrap(), 1);
        let foo = target.get_property("Customer", "foo").unwrap().unwrap();
        assert!(foo.is_unmapped());
        assert_eq!(foo.default_value_or_type_default(), Value::Integer(42));

        // second import is a no-op
        assert_eq!(target.import_metadata(&json).unwrap(), 0);
    }

    #[test]
    fn test_add_validator_requires_declared_property() {
        let mut store = store();
        let err = store
            .add_validator("Customer", "nope", crate::entity::validation::RequiredValidator)
            .unwrap_err();
        assert!(matches!(err, TrackError::UndeclaredProperty(..)));
    }
}
