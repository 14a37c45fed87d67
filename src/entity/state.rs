// ============================================================================
// Entity State
// ============================================================================
//
// Lifecycle tag of a tracked entity (State Pattern).
//
// ============================================================================

use serde::{Deserialize, Serialize};

/// Entity lifecycle state.
///
/// State transitions:
/// ```text
/// Detached ──add──> Added ──save──> Unchanged
///    │                                 │  ▲
///    └──attach/query/import──> Unchanged  │  │ reject / accept / save
///                                      ▼  │
///                                    Modified
///
/// any attached state ──set_deleted──> Deleted ──save──> (removed)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EntityState {
    #[default]
    Detached,
    Added,
    Modified,
    Deleted,
    Unchanged,
}

impl EntityState {
    pub fn is_detached(&self) -> bool {
        matches!(self, EntityState::Detached)
    }

    pub fn is_added(&self) -> bool {
        matches!(self, EntityState::Added)
    }

    pub fn is_modified(&self) -> bool {
        matches!(self, EntityState::Modified)
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, EntityState::Deleted)
    }

    pub fn is_unchanged(&self) -> bool {
        matches!(self, EntityState::Unchanged)
    }

    /// Pending changes that a save would send.
    pub fn is_added_modified_or_deleted(&self) -> bool {
        matches!(
            self,
            EntityState::Added | EntityState::Modified | EntityState::Deleted
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            EntityState::Detached => "Detached",
            EntityState::Added => "Added",
            EntityState::Modified => "Modified",
            EntityState::Deleted => "Deleted",
            EntityState::Unchanged => "Unchanged",
        }
    }
}

impl std::fmt::Display for EntityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_change_states() {
        assert!(EntityState::Added.is_added_modified_or_deleted());
        assert!(EntityState::Deleted.is_added_modified_or_deleted());
        assert!(!EntityState::Unchanged.is_added_modified_or_deleted());
        assert!(!EntityState::Detached.is_added_modified_or_deleted());
    }

    #[test]
    fn test_display() {
        assert_eq!(EntityState::Unchanged.to_string(), "Unchanged");
        assert_eq!(EntityState::default(), EntityState::Detached);
    }
}
