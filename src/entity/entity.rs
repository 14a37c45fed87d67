use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use log::warn;

use super::aspect::{EntityAspect, NotifyPolicy, PropertyChangedArgs};
use super::events::SubscriptionId;
use super::observable::Observable;
use super::state::EntityState;
use super::validation::run_validators;
use crate::core::{EntityKey, PropertyValues, Result, TrackError, Value};
use crate::metadata::{EntityMethod, EntityType, FieldAssignments, FieldInit, PropertyDescriptor};

/// Ad hoc data attached outside the declared property set.
///
/// Extensions are never tracked, validated or exported.
#[derive(Clone)]
pub enum Extension {
    Value(Value),
    Method(EntityMethod),
}

impl fmt::Debug for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Method(_) => f.write_str("Method(..)"),
        }
    }
}

/// A live entity: one observable per tracked property, an extension bag
/// for everything else, and its change-tracking aspect.
pub struct Entity {
    entity_type: Arc<EntityType>,
    properties: HashMap<String, Observable>,
    extensions: BTreeMap<String, Extension>,
    aspect: EntityAspect,
}

impl Entity {
    /// Runs the construction pipeline: constructor, initial values for
    /// mapped then unmapped properties, initializer. The result is
    /// detached; nothing done here is tracked.
    pub(crate) fn materialize(entity_type: Arc<EntityType>, raw_values: Option<&PropertyValues>) -> Self {
        let assignments = entity_type
            .constructor()
            .map(|ctor| ctor.construct())
            .unwrap_or_default();

        let mut entity = Self {
            entity_type: entity_type.clone(),
            properties: HashMap::with_capacity(entity_type.properties().len()),
            extensions: BTreeMap::new(),
            aspect: EntityAspect::default(),
        };

        let (mapped, unmapped): (Vec<&PropertyDescriptor>, Vec<&PropertyDescriptor>) =
            entity_type.properties().iter().partition(|p| p.is_mapped());
        for descriptor in mapped.into_iter().chain(unmapped) {
            let value = initial_value(descriptor, raw_values, &assignments);
            entity
                .properties
                .insert(descriptor.name().to_string(), Observable::new(value));
        }

        for (name, init) in assignments.iter() {
            if entity_type.get_property(name).is_some() {
                if matches!(init, FieldInit::Method(_)) {
                    warn!(
                        "Constructor method '{}' shadows a tracked property of '{}'; ignored",
                        name,
                        entity_type.name()
                    );
                }
                continue;
            }
            let extension = match init {
                FieldInit::Value(v) => Extension::Value(v.clone()),
                FieldInit::Method(m) => Extension::Method(m.clone()),
            };
            entity.extensions.insert(name.to_string(), extension);
        }

        if let Some(initializer) = entity_type.initializer() {
            initializer(&mut entity);
        }
        entity
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    pub(crate) fn entity_type_arc(&self) -> Arc<EntityType> {
        self.entity_type.clone()
    }

    pub fn type_name(&self) -> &str {
        self.entity_type.name()
    }

    pub fn entity_aspect(&self) -> &EntityAspect {
        &self.aspect
    }

    pub fn entity_aspect_mut(&mut self) -> &mut EntityAspect {
        &mut self.aspect
    }

    pub fn entity_state(&self) -> EntityState {
        self.aspect.entity_state()
    }

    pub fn key(&self) -> EntityKey {
        self.entity_type.key_from(|name| self.get(name))
    }

    // ------------------------------------------------------------------
    // Tracked properties
    // ------------------------------------------------------------------

    /// Current value of a tracked property; `None` for undeclared names.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name).map(Observable::get)
    }

    pub fn value(&self, name: &str) -> Result<&Value> {
        self.get(name).ok_or_else(|| self.undeclared(name))
    }

    /// Writes a tracked property through its observable.
    ///
    /// On an attached entity the write is recorded by the aspect and the
    /// property is re-validated. Undeclared names are rejected; ad hoc data
    /// goes through [`Entity::set_extension`].
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let entity_type = self.entity_type.clone();
        let descriptor = entity_type
            .get_property(name)
            .ok_or_else(|| self.undeclared(name))?;
        if descriptor.is_mapped() && !descriptor.data_type().is_compatible(&value) {
            return Err(TrackError::TypeMismatch(format!(
                "Property '{}' expects {}, got {}",
                name,
                descriptor.data_type(),
                value.type_name()
            )));
        }

        let holder = self
            .properties
            .get_mut(name)
            .ok_or_else(|| TrackError::UndeclaredProperty(name.to_string(), entity_type.name().to_string()))?;
        let changed = holder.get() != &value;
        if !changed && self.aspect.options().notify_policy == NotifyPolicy::OnChange {
            return Ok(());
        }

        let old = if changed {
            holder.replace(value.clone())
        } else {
            value.clone()
        };
        holder.notify();

        if changed && self.aspect.is_tracking() {
            self.aspect
                .record_change(name, &old, descriptor.is_unmapped());
        }
        self.aspect.publish_property_changed(&PropertyChangedArgs {
            property_name: name.to_string(),
            old_value: old,
            new_value: value,
        });

        if changed
            && self.aspect.is_tracking()
            && self.aspect.options().validate_on_property_change
        {
            self.validate_descriptor(descriptor);
        }
        Ok(())
    }

    /// Forces the property's observable to notify without a value change.
    pub fn notify(&mut self, name: &str) -> Result<()> {
        let err = self.undeclared(name);
        self.properties.get_mut(name).ok_or(err)?.notify();
        Ok(())
    }

    pub fn subscribe(
        &mut self,
        name: &str,
        handler: impl FnMut(&Value) + Send + 'static,
    ) -> Result<SubscriptionId> {
        let err = self.undeclared(name);
        Ok(self.properties.get_mut(name).ok_or(err)?.subscribe(handler))
    }

    pub fn unsubscribe(&mut self, name: &str, id: SubscriptionId) -> bool {
        self.properties
            .get_mut(name)
            .is_some_and(|holder| holder.unsubscribe(id))
    }

    /// Every tracked (mapped and declared-unmapped) value.
    pub fn tracked_values(&self) -> PropertyValues {
        self.collect_values(|_| true)
    }

    pub fn mapped_values(&self) -> PropertyValues {
        self.collect_values(PropertyDescriptor::is_mapped)
    }

    fn collect_values(&self, filter: impl Fn(&PropertyDescriptor) -> bool) -> PropertyValues {
        self.entity_type
            .properties()
            .iter()
            .filter(|p| filter(*p))
            .filter_map(|p| self.get(p.name()).map(|v| (p.name(), v.clone())))
            .collect()
    }

    // ------------------------------------------------------------------
    // Ad hoc extensions
    // ------------------------------------------------------------------

    pub fn extension(&self, name: &str) -> Option<&Extension> {
        self.extensions.get(name)
    }

    pub fn extension_value(&self, name: &str) -> Option<&Value> {
        match self.extensions.get(name) {
            Some(Extension::Value(v)) => Some(v),
            _ => None,
        }
    }

    pub fn set_extension(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.insert_extension(name, Extension::Value(value.into()))
    }

    pub fn set_extension_method(
        &mut self,
        name: &str,
        method: impl Fn(&Entity) -> Value + Send + Sync + 'static,
    ) -> Result<()> {
        self.insert_extension(name, Extension::Method(Arc::new(method)))
    }

    fn insert_extension(&mut self, name: &str, extension: Extension) -> Result<()> {
        if self.properties.contains_key(name) {
            return Err(TrackError::DuplicateProperty(
                name.to_string(),
                self.type_name().to_string(),
            ));
        }
        self.extensions.insert(name.to_string(), extension);
        Ok(())
    }

    pub fn remove_extension(&mut self, name: &str) -> Option<Extension> {
        self.extensions.remove(name)
    }

    pub fn extension_names(&self) -> impl Iterator<Item = &str> {
        self.extensions.keys().map(String::as_str)
    }

    /// Invokes an extension method.
    pub fn call(&self, name: &str) -> Result<Value> {
        match self.extensions.get(name) {
            Some(Extension::Method(method)) => Ok(method(self)),
            Some(Extension::Value(_)) => Err(TrackError::TypeMismatch(format!(
                "Extension '{}' is a value, not a method",
                name
            ))),
            None => Err(self.undeclared(name)),
        }
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Re-runs every property's rules; returns `true` when no rule fails.
    pub fn validate_entity(&mut self) -> bool {
        let entity_type = self.entity_type.clone();
        let mut ok = true;
        for descriptor in entity_type.properties() {
            ok &= self.validate_descriptor(descriptor);
        }
        ok
    }

    pub fn validate_property(&mut self, name: &str) -> Result<bool> {
        let entity_type = self.entity_type.clone();
        let descriptor = entity_type
            .get_property(name)
            .ok_or_else(|| self.undeclared(name))?;
        Ok(self.validate_descriptor(descriptor))
    }

    fn validate_descriptor(&mut self, descriptor: &PropertyDescriptor) -> bool {
        let value = self.get(descriptor.name()).cloned().unwrap_or(Value::Null);
        let errors = run_validators(descriptor.name(), &value, descriptor.validators());
        let ok = errors.is_empty();
        let rule_names: Vec<&str> = descriptor.validators().iter().map(|v| v.name()).collect();
        self.aspect
            .replace_property_errors(descriptor.name(), &rule_names, errors);
        ok
    }

    // ------------------------------------------------------------------
    // State transitions
    // ------------------------------------------------------------------

    /// Restores every captured original value. Entities never saved
    /// (Added, or Added then deleted) become Detached; the owning manager
    /// drops them from its cache.
    pub fn reject_changes(&mut self) {
        let originals = self.aspect.take_original_values();
        for (name, original) in originals {
            self.assign_untracked(&name, original);
        }
        match self.aspect.entity_state() {
            EntityState::Detached => {}
            EntityState::Added => self.aspect.detach(),
            _ if self.aspect.is_new() => self.aspect.detach(),
            _ => self.aspect.set_state(EntityState::Unchanged),
        }
        if self.aspect.is_tracking() {
            self.validate_entity();
        }
    }

    /// Commits local changes. Deleted entities become Detached.
    pub fn accept_changes(&mut self) {
        self.aspect.take_original_values();
        match self.aspect.entity_state() {
            EntityState::Detached => {}
            EntityState::Deleted => self.aspect.detach(),
            _ => {
                self.aspect.set_state(EntityState::Unchanged);
                self.aspect.mark_saved();
            }
        }
    }

    pub fn set_deleted(&mut self) -> Result<()> {
        self.aspect.set_deleted()
    }

    /// Writes through the observable (notifying on change) without tracking.
    pub(crate) fn assign_untracked(&mut self, name: &str, value: Value) {
        let Some(holder) = self.properties.get_mut(name) else {
            return;
        };
        if let Some(old) = holder.set(value.clone()) {
            self.aspect.publish_property_changed(&PropertyChangedArgs {
                property_name: name.to_string(),
                old_value: old,
                new_value: value,
            });
        }
    }

    /// Applies server values for declared names; returns the names that were ignored.
    pub(crate) fn merge_values(&mut self, values: &PropertyValues) -> Vec<String> {
        let mut ignored = Vec::new();
        for (name, value) in values.iter() {
            if self.properties.contains_key(name) {
                self.assign_untracked(name, value.clone());
            } else {
                ignored.push(name.to_string());
            }
        }
        ignored
    }

    fn undeclared(&self, name: &str) -> TrackError {
        TrackError::UndeclaredProperty(name.to_string(), self.type_name().to_string())
    }
}

fn initial_value(
    descriptor: &PropertyDescriptor,
    raw_values: Option<&PropertyValues>,
    assignments: &FieldAssignments,
) -> Value {
    if let Some(raw) = raw_values.and_then(|r| r.get(descriptor.name())) {
        return raw.clone();
    }
    match assignments.get(descriptor.name()) {
        Some(FieldInit::Value(v)) => v.clone(),
        _ => descriptor.default_value_or_type_default(),
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("type", &self.type_name())
            .field("state", &self.entity_state())
            .field("values", &self.tracked_values())
            .field("extensions", &self.extensions)
            .finish()
    }
}
