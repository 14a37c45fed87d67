use serde::{Deserialize, Serialize};

use super::events::{SubscriptionId, Subscribers};
use super::state::EntityState;
use super::validation::ValidationError;
use crate::core::{PropertyValues, Result, TrackError, Value};

/// Whether writes of an equal value still raise notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NotifyPolicy {
    /// Equal-value writes are ignored entirely.
    #[default]
    OnChange,
    /// Equal-value writes raise both notifications but change no state.
    Always,
}

/// Manager settings copied into each aspect when its entity is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingOptions {
    pub notify_policy: NotifyPolicy,
    pub validate_on_property_change: bool,
    pub unmapped_changes_modify_state: bool,
}

impl Default for TrackingOptions {
    fn default() -> Self {
        Self {
            notify_policy: NotifyPolicy::OnChange,
            validate_on_property_change: true,
            unmapped_changes_modify_state: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChangedArgs {
    pub property_name: String,
    pub old_value: Value,
    pub new_value: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationErrorsChangedArgs {
    pub added: Vec<ValidationError>,
    pub removed: Vec<ValidationError>,
}

/// Change-tracking state attached 1:1 to an entity.
#[derive(Debug, Default)]
pub struct EntityAspect {
    state: EntityState,
    /// Pre-write values of tracked properties, captured once per clean state.
    original_values: PropertyValues,
    validation_errors: Vec<ValidationError>,
    /// Attached as Added and not saved since.
    is_new: bool,
    options: TrackingOptions,
    property_changed: Subscribers<PropertyChangedArgs>,
    validation_errors_changed: Subscribers<ValidationErrorsChangedArgs>,
}

impl EntityAspect {
    pub fn entity_state(&self) -> EntityState {
        self.state
    }

    pub fn original_values(&self) -> &PropertyValues {
        &self.original_values
    }

    pub fn has_changes(&self) -> bool {
        self.state.is_added_modified_or_deleted()
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn options(&self) -> TrackingOptions {
        self.options
    }

    /// Errors for one property, or every error when `property_name` is `None`.
    pub fn validation_errors(&self, property_name: Option<&str>) -> Vec<&ValidationError> {
        self.validation_errors
            .iter()
            .filter(|e| property_name.is_none() || e.property_name.as_deref() == property_name)
            .collect()
    }

    pub fn has_validation_errors(&self) -> bool {
        !self.validation_errors.is_empty()
    }

    pub fn subscribe_property_changed(
        &mut self,
        handler: impl FnMut(&PropertyChangedArgs) + Send + 'static,
    ) -> SubscriptionId {
        self.property_changed.subscribe(handler)
    }

    pub fn unsubscribe_property_changed(&mut self, id: SubscriptionId) -> bool {
        self.property_changed.unsubscribe(id)
    }

    pub fn subscribe_validation_errors_changed(
        &mut self,
        handler: impl FnMut(&ValidationErrorsChangedArgs) + Send + 'static,
    ) -> SubscriptionId {
        self.validation_errors_changed.subscribe(handler)
    }

    pub fn unsubscribe_validation_errors_changed(&mut self, id: SubscriptionId) -> bool {
        self.validation_errors_changed.unsubscribe(id)
    }

    /// Marks the entity for deletion on the next save.
    pub fn set_deleted(&mut self) -> Result<()> {
        if self.state.is_detached() {
            return Err(TrackError::InvalidState(
                "Cannot delete a detached entity".to_string(),
            ));
        }
        self.state = EntityState::Deleted;
        Ok(())
    }

    /// Adds (or replaces) an error for the same property and rule.
    pub fn add_validation_error(&mut self, error: ValidationError) {
        let mut args = ValidationErrorsChangedArgs::default();
        if let Some(pos) = self.validation_errors.iter().position(|e| e.same_rule(&error)) {
            if self.validation_errors[pos] == error {
                return;
            }
            args.removed.push(self.validation_errors.remove(pos));
        }
        args.added.push(error.clone());
        self.validation_errors.push(error);
        self.validation_errors_changed.publish(&args);
    }

    pub fn remove_validation_error(&mut self, property_name: Option<&str>, validator_name: &str) -> bool {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.validation_errors)
            .into_iter()
            .partition(|e| {
                e.property_name.as_deref() == property_name && e.validator_name == validator_name
            });
        self.validation_errors = kept;
        if removed.is_empty() {
            return false;
        }
        self.validation_errors_changed.publish(&ValidationErrorsChangedArgs {
            added: Vec::new(),
            removed,
        });
        true
    }

    pub fn clear_validation_errors(&mut self) {
        if self.validation_errors.is_empty() {
            return;
        }
        let removed = std::mem::take(&mut self.validation_errors);
        self.validation_errors_changed.publish(&ValidationErrorsChangedArgs {
            added: Vec::new(),
            removed,
        });
    }

    // ------------------------------------------------------------------
    // Crate-internal transitions, driven by Entity and EntityManager
    // ------------------------------------------------------------------

    pub(crate) fn attach(&mut self, state: EntityState, options: TrackingOptions) {
        self.state = state;
        self.options = options;
        self.is_new = state.is_added();
        self.original_values = PropertyValues::new();
    }

    pub(crate) fn detach(&mut self) {
        self.state = EntityState::Detached;
        self.is_new = false;
        self.original_values = PropertyValues::new();
    }

    pub(crate) fn is_tracking(&self) -> bool {
        !self.state.is_detached()
    }

    /// Records a write of a tracked property whose previous value was `old`.
    pub(crate) fn record_change(&mut self, property_name: &str, old: &Value, is_unmapped: bool) {
        match self.state {
            EntityState::Detached | EntityState::Added => {}
            EntityState::Unchanged | EntityState::Modified | EntityState::Deleted => {
                if !self.original_values.contains(property_name) {
                    self.original_values.insert(property_name, old.clone());
                }
                if self.state.is_unchanged()
                    && (!is_unmapped || self.options.unmapped_changes_modify_state)
                {
                    self.state = EntityState::Modified;
                }
            }
        }
    }

    pub(crate) fn set_state(&mut self, state: EntityState) {
        self.state = state;
    }

    pub(crate) fn mark_saved(&mut self) {
        self.is_new = false;
    }

    pub(crate) fn take_original_values(&mut self) -> PropertyValues {
        std::mem::take(&mut self.original_values)
    }

    pub(crate) fn set_original_value(&mut self, property_name: &str, value: Value) {
        self.original_values.insert(property_name, value);
    }

    pub(crate) fn remove_original_value(&mut self, property_name: &str) -> Option<Value> {
        self.original_values.remove(property_name)
    }

    pub(crate) fn publish_property_changed(&mut self, args: &PropertyChangedArgs) {
        self.property_changed.publish(args);
    }

    /// Replaces the errors produced by `rule_names` on one property with `errors`.
    pub(crate) fn replace_property_errors(
        &mut self,
        property_name: &str,
        rule_names: &[&str],
        errors: Vec<ValidationError>,
    ) {
        let (previous, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.validation_errors)
            .into_iter()
            .partition(|e| {
                e.property_name.as_deref() == Some(property_name)
                    && rule_names.contains(&e.validator_name.as_str())
            });
        self.validation_errors = kept;

        let removed: Vec<_> = previous
            .iter()
            .filter(|e| !errors.contains(e))
            .cloned()
            .collect();
        let added: Vec<_> = errors
            .iter()
            .filter(|e| !previous.contains(e))
            .cloned()
            .collect();
        self.validation_errors.extend(errors);

        if !added.is_empty() || !removed.is_empty() {
            self.validation_errors_changed
                .publish(&ValidationErrorsChangedArgs { added, removed });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn attached(state: EntityState) -> EntityAspect {
        let mut aspect = EntityAspect::default();
        aspect.attach(state, TrackingOptions::default());
        aspect
    }

    #[test]
    fn test_first_write_captures_original_once() {
        let mut aspect = attached(EntityState::Unchanged);
        aspect.record_change("CompanyName", &Value::from("Acme"), false);
        aspect.record_change("CompanyName", &Value::from("Beta"), false);

        assert_eq!(aspect.entity_state(), EntityState::Modified);
        assert_eq!(
            aspect.original_values().get("CompanyName"),
            Some(&Value::from("Acme"))
        );
    }

    #[test]
    fn test_added_entities_capture_nothing() {
        let mut aspect = attached(EntityState::Added);
        aspect.record_change("CompanyName", &Value::Null, false);
        assert!(aspect.original_values().is_empty());
        assert_eq!(aspect.entity_state(), EntityState::Added);
        assert!(aspect.is_new());
    }

    #[test]
    fn test_unmapped_policy_keeps_unchanged() {
        let mut aspect = EntityAspect::default();
        aspect.attach(
            EntityState::Unchanged,
            TrackingOptions {
                unmapped_changes_modify_state: false,
                ..TrackingOptions::default()
            },
        );
        aspect.record_change("foo", &Value::Integer(42), true);
        assert_eq!(aspect.entity_state(), EntityState::Unchanged);
        assert!(aspect.original_values().contains("foo"));
    }

    #[test]
    fn test_set_deleted_rejects_detached() {
        let mut aspect = EntityAspect::default();
        assert!(aspect.set_deleted().is_err());

        let mut aspect = attached(EntityState::Modified);
        aspect.set_deleted().unwrap();
        assert!(aspect.entity_state().is_deleted());
    }

    #[test]
    fn test_replace_property_errors_publishes_diff() {
        let mut aspect = attached(EntityState::Added);
        let events = Arc::new(AtomicUsize::new(0));
        let counter = events.clone();
        aspect.subscribe_validation_errors_changed(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let err = ValidationError::new(Some("foo"), "maxLength", "too long");
        aspect.replace_property_errors("foo", &["maxLength"], vec![err.clone()]);
        aspect.replace_property_errors("foo", &["maxLength"], vec![err]);
        aspect.replace_property_errors("foo", &["maxLength"], Vec::new());

        assert_eq!(events.load(Ordering::SeqCst), 2);
        assert!(!aspect.has_validation_errors());
    }

    #[test]
    fn test_manual_errors_survive_rule_revalidation() {
        let mut aspect = attached(EntityState::Unchanged);
        aspect.add_validation_error(ValidationError::new(Some("foo"), "server", "rejected"));
        aspect.replace_property_errors("foo", &["maxLength"], Vec::new());
        assert_eq!(aspect.validation_errors(Some("foo")).len(), 1);

        assert!(aspect.remove_validation_error(Some("foo"), "server"));
        assert!(aspect.validation_errors(None).is_empty());
    }
}
