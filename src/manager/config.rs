use serde::{Deserialize, Serialize};

use crate::core::Result;
use crate::entity::{NotifyPolicy, TrackingOptions};

/// How server values are merged into an entity already in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MergeStrategy {
    /// Server values replace local ones; pending changes are discarded.
    #[default]
    OverwriteChanges,
    /// Entities with pending changes are left untouched.
    PreserveChanges,
}

/// Entity manager configuration
///
/// Built with chained setters, or loaded from JSON:
///
/// ```
/// use entitrack::ManagerConfig;
///
/// let config = ManagerConfig::from_json(r#"{ "service_name": "northwind" }"#).unwrap();
/// assert!(config.validate_on_attach);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Name of the remote service, used in log output
    pub service_name: String,

    /// Run every validator when an entity is attached
    pub validate_on_attach: bool,

    /// Re-validate a property when it changes on an attached entity
    pub validate_on_property_change: bool,

    /// Whether equal-value writes still notify
    pub notify_policy: NotifyPolicy,

    /// Merge behaviour for query results and imports
    pub merge_strategy: MergeStrategy,

    /// Whether writes to unmapped properties move Unchanged to Modified
    pub unmapped_changes_modify_state: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            service_name: "default".to_string(),
            validate_on_attach: true,
            validate_on_property_change: true,
            notify_policy: NotifyPolicy::OnChange,
            merge_strategy: MergeStrategy::OverwriteChanges,
            unmapped_changes_modify_state: true,
        }
    }
}

impl ManagerConfig {
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            ..Self::default()
        }
    }

    pub fn validate_on_attach(mut self, enabled: bool) -> Self {
        self.validate_on_attach = enabled;
        self
    }

    pub fn validate_on_property_change(mut self, enabled: bool) -> Self {
        self.validate_on_property_change = enabled;
        self
    }

    pub fn notify_policy(mut self, policy: NotifyPolicy) -> Self {
        self.notify_policy = policy;
        self
    }

    pub fn merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = strategy;
        self
    }

    pub fn unmapped_changes_modify_state(mut self, enabled: bool) -> Self {
        self.unmapped_changes_modify_state = enabled;
        self
    }

    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Options copied into each aspect on attach.
    pub fn tracking_options(&self) -> TrackingOptions {
        TrackingOptions {
            notify_policy: self.notify_policy,
            validate_on_property_change: self.validate_on_property_change,
            unmapped_changes_modify_state: self.unmapped_changes_modify_state,
        }
    }
}
