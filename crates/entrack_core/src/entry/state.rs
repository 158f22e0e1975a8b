//! Entity lifecycle states.

use std::fmt;

/// Lifecycle state of an entity instance within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityState {
    /// Not tracked.
    Detached,
    /// Tracked and pending insert.
    Added,
    /// Tracked and identical to the store.
    Unchanged,
    /// Tracked with property changes pending update.
    Modified,
    /// Tracked and pending delete.
    Deleted,
}

impl EntityState {
    /// Returns true for the states that produce a store command on save.
    #[must_use]
    pub fn has_pending_changes(self) -> bool {
        matches!(self, EntityState::Added | EntityState::Modified | EntityState::Deleted)
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityState::Detached => "Detached",
            EntityState::Added => "Added",
            EntityState::Unchanged => "Unchanged",
            EntityState::Modified => "Modified",
            EntityState::Deleted => "Deleted",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_states() {
        assert!(EntityState::Added.has_pending_changes());
        assert!(EntityState::Deleted.has_pending_changes());
        assert!(!EntityState::Unchanged.has_pending_changes());
        assert!(!EntityState::Detached.has_pending_changes());
        assert_eq!(EntityState::Modified.to_string(), "Modified");
    }
}
