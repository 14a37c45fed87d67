// ============================================================================
// Data Service
// ============================================================================
//
// The remote query/save collaborator. The manager only builds requests and
// merges results; transport and storage live behind `DataService`.
//
// ============================================================================

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{EntityFailure, EntityKey, PropertyValues, Result, Value};
use crate::manager::{EntityId, EntityQuery};
use crate::metadata::{AutoGeneratedKeyType, EntityType};

pub use memory::{CalculatedColumn, InMemoryDataService};

/// One row returned by a remote query, column name to value.
pub type EntityRow = PropertyValues;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveOperation {
    Insert,
    Update,
    Delete,
}

/// Key property whose value the store assigns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoGeneratedKey {
    pub property_name: String,
    pub key_type: AutoGeneratedKeyType,
}

/// A pending change as sent to the store. Carries mapped properties only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveEntry {
    pub entity_id: EntityId,
    pub type_name: String,
    pub operation: SaveOperation,
    pub key: EntityKey,
    pub key_properties: Vec<String>,
    pub auto_generated_key: Option<AutoGeneratedKey>,
    pub values: PropertyValues,
    pub original_values: PropertyValues,
}

impl SaveEntry {
    /// Key values by key property name.
    pub fn key_values(&self) -> PropertyValues {
        self.key_properties
            .iter()
            .filter_map(|name| self.values.get(name).map(|v| (name.as_str(), v.clone())))
            .collect()
    }
}

/// Everything a single save sends, plus the new-then-deleted entities that
/// never reach the store and are simply dropped when the save completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveBundle {
    pub entries: Vec<SaveEntry>,
    pub discarded: Vec<EntityId>,
}

impl SaveBundle {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.discarded.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, entity_id: EntityId) -> Option<&SaveEntry> {
        self.entries.iter().find(|e| e.entity_id == entity_id)
    }
}

/// Values the store holds for an inserted or updated entity after the save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedEntity {
    pub entity_id: EntityId,
    pub values: PropertyValues,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyMapping {
    pub type_name: String,
    pub temp_value: Value,
    pub real_value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved {
        entities: Vec<SavedEntity>,
        key_mappings: Vec<KeyMapping>,
    },
    /// Nothing was stored.
    Failed { reasons: Vec<EntityFailure> },
}

/// What a successful save did to the cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveResult {
    pub saved: Vec<EntityId>,
    pub deleted: Vec<EntityId>,
    pub key_mappings: Vec<KeyMapping>,
}

#[async_trait]
pub trait DataService: Send + Sync {
    /// Runs `query` against the store's rows for `entity_type`.
    async fn execute_query(
        &self,
        entity_type: &EntityType,
        query: &EntityQuery,
    ) -> Result<Vec<EntityRow>>;

    /// Applies every entry of the bundle, or none of them.
    async fn save_changes(&self, bundle: &SaveBundle) -> Result<SaveOutcome>;
}
