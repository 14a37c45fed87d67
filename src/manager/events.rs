use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable handle of an entity inside one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityAction {
    Attach,
    AttachOnQuery,
    AttachOnImport,
    MergeOnQuery,
    MergeOnImport,
    MergeOnSave,
    Detach,
    RejectChanges,
    AcceptChanges,
    Clear,
}

/// Raised by the manager for every cache-level change.
///
/// `entity_id` and `type_name` are `None` only for [`EntityAction::Clear`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityChanged {
    pub action: EntityAction,
    pub entity_id: Option<EntityId>,
    pub type_name: Option<String>,
}
