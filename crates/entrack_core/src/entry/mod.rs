//! Entity entries and their state machine.
//!
//! A tracked instance owns a [`TrackedEntry`] holding its state, the
//! original values captured when it last became `Unchanged`, and the
//! snapshot of values and navigations the tracker last observed. The
//! snapshot is what change detection compares the live object against; the
//! identity map and the dependent index are keyed by snapshot values.

mod state;
mod view;

pub use state::EntityState;
pub use view::EntityEntry;

use crate::object::NavigationValue;
use crate::types::{EntityTypeId, RelationshipId};
use entrack_value::{KeyValues, Value};
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub(crate) struct TrackedEntry {
    pub(crate) state: EntityState,
    pub(crate) entity_type: EntityTypeId,
    pub(crate) original: Vec<Value>,
    pub(crate) snapshot: Vec<Value>,
    pub(crate) navigations: Vec<NavigationValue>,
    pub(crate) modified: Vec<bool>,
    pub(crate) temporary: Vec<bool>,
    /// Required relationships severed while their foreign key could not be
    /// nulled.
    pub(crate) conceptual_nulls: BTreeSet<RelationshipId>,
}

impl TrackedEntry {
    pub(crate) fn new(
        state: EntityState,
        entity_type: EntityTypeId,
        values: Vec<Value>,
        navigations: Vec<NavigationValue>,
        temporary: Vec<bool>,
    ) -> Self {
        let count = values.len();
        Self {
            state,
            entity_type,
            original: values.clone(),
            snapshot: values,
            navigations,
            modified: vec![false; count],
            temporary,
            conceptual_nulls: BTreeSet::new(),
        }
    }

    pub(crate) fn key(&self, slots: &[usize]) -> KeyValues {
        KeyValues::new(slots.iter().map(|&s| self.snapshot[s].clone()).collect())
    }

    pub(crate) fn original_key(&self, slots: &[usize]) -> KeyValues {
        KeyValues::new(slots.iter().map(|&s| self.original[s].clone()).collect())
    }

    pub(crate) fn has_temporary(&self, slots: &[usize]) -> bool {
        slots.iter().any(|&s| self.temporary[s])
    }

    pub(crate) fn accept(&mut self) {
        self.original.clone_from(&self.snapshot);
        self.modified.iter_mut().for_each(|m| *m = false);
        self.temporary.iter_mut().for_each(|t| *t = false);
        self.conceptual_nulls.clear();
        self.state = EntityState::Unchanged;
    }
}
