//! Read-only view of an entity's tracking information.

use super::EntityState;
use crate::error::{CoreError, CoreResult};
use crate::model::EntityType;
use crate::tracker::ChangeTracker;
use crate::types::ObjectId;
use entrack_value::{KeyValues, Value};

/// Tracking information for one instance, borrowed from its tracker.
///
/// An entry can be obtained for any instance of the session; untracked
/// instances report [`EntityState::Detached`] and their current values as
/// originals.
#[derive(Clone, Copy)]
pub struct EntityEntry<'a> {
    tracker: &'a ChangeTracker,
    object: ObjectId,
}

impl<'a> EntityEntry<'a> {
    pub(crate) fn new(tracker: &'a ChangeTracker, object: ObjectId) -> Self {
        Self { tracker, object }
    }

    /// Returns the instance this entry describes.
    #[must_use]
    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// Returns the tracking state.
    #[must_use]
    pub fn state(&self) -> EntityState {
        self.tracker.state(self.object)
    }

    /// Returns the concrete entity type name.
    #[must_use]
    pub fn entity_type(&self) -> &'a str {
        self.metadata().name()
    }

    /// Returns the live value of `property`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownProperty`] if the type has no such property.
    pub fn current_value(&self, property: &str) -> CoreResult<&'a Value> {
        let slot = self.slot(property)?;
        Ok(self.tracker.objects().value(self.object, slot))
    }

    /// Returns the value `property` had when the entry was last accepted.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownProperty`] if the type has no such property.
    pub fn original_value(&self, property: &str) -> CoreResult<&'a Value> {
        let slot = self.slot(property)?;
        Ok(match self.tracker.tracked(self.object) {
            Some(entry) => &entry.original[slot],
            None => self.tracker.objects().value(self.object, slot),
        })
    }

    /// Returns true if `property` is pending an update.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownProperty`] if the type has no such property.
    pub fn is_modified(&self, property: &str) -> CoreResult<bool> {
        let slot = self.slot(property)?;
        Ok(self
            .tracker
            .tracked(self.object)
            .is_some_and(|entry| entry.modified[slot]))
    }

    /// Returns true if `property` holds a temporary value awaiting the store.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownProperty`] if the type has no such property.
    pub fn is_temporary(&self, property: &str) -> CoreResult<bool> {
        let slot = self.slot(property)?;
        Ok(self
            .tracker
            .tracked(self.object)
            .is_some_and(|entry| entry.temporary[slot]))
    }

    /// Returns the names of the properties pending an update.
    #[must_use]
    pub fn modified_properties(&self) -> Vec<&'a str> {
        let metadata = self.metadata();
        match self.tracker.tracked(self.object) {
            Some(entry) => entry
                .modified
                .iter()
                .enumerate()
                .filter(|(_, modified)| **modified)
                .map(|(slot, _)| metadata.property(slot).name())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Returns the primary key tuple from the live values.
    #[must_use]
    pub fn key(&self) -> KeyValues {
        let values = self.tracker.objects().values(self.object);
        KeyValues::new(
            self.metadata()
                .primary_key()
                .properties()
                .iter()
                .map(|&slot| values[slot].clone())
                .collect(),
        )
    }

    /// Returns true if a required relationship was severed without its
    /// foreign key becoming null.
    #[must_use]
    pub fn has_conceptual_null(&self) -> bool {
        self.tracker
            .tracked(self.object)
            .is_some_and(|entry| !entry.conceptual_nulls.is_empty())
    }

    fn metadata(&self) -> &'a EntityType {
        let model = self.tracker.model();
        model.entity_type_by_id(self.tracker.objects().entity_type(self.object))
    }

    fn slot(&self, property: &str) -> CoreResult<usize> {
        let metadata = self.metadata();
        metadata
            .property_index(property)
            .ok_or_else(|| CoreError::unknown_property(metadata.name(), property))
    }
}

impl std::fmt::Debug for EntityEntry<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityEntry")
            .field("object", &self.object)
            .field("entity_type", &self.entity_type())
            .field("state", &self.state())
            .field("key", &self.key())
            .finish()
    }
}
