//! Relationship metadata.

use crate::types::{EntityTypeId, RelationshipId};

/// What happens to dependents when their principal is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeleteBehavior {
    /// Dependents are deleted, tracked or not.
    Cascade,
    /// Dependents keep existing with a null foreign key, tracked or not.
    SetNull,
    /// Deletion fails while any dependent references the principal.
    Restrict,
    /// Tracked dependents get a null foreign key; untracked ones block the
    /// delete.
    ClientSetNull,
    /// Tracked dependents are deleted; untracked ones block the delete.
    ClientCascade,
}

impl DeleteBehavior {
    /// Returns true for the behaviors that delete tracked dependents.
    #[must_use]
    pub fn cascades(self) -> bool {
        matches!(self, DeleteBehavior::Cascade | DeleteBehavior::ClientCascade)
    }

    /// Returns true for the behaviors that null tracked dependents.
    #[must_use]
    pub fn nulls_dependents(self) -> bool {
        matches!(self, DeleteBehavior::SetNull | DeleteBehavior::ClientSetNull)
    }
}

/// A principal/dependent relationship.
#[derive(Debug, Clone)]
pub struct Relationship {
    pub(crate) id: RelationshipId,
    pub(crate) name: String,
    pub(crate) principal: EntityTypeId,
    pub(crate) dependent: EntityTypeId,
    pub(crate) principal_key: usize,
    pub(crate) principal_properties: Vec<usize>,
    pub(crate) foreign_key: Vec<usize>,
    pub(crate) required: bool,
    pub(crate) unique: bool,
    pub(crate) delete_behavior: DeleteBehavior,
    pub(crate) principal_navigation: Option<usize>,
    pub(crate) dependent_navigation: Option<usize>,
}

impl Relationship {
    /// Returns the relationship id.
    #[must_use]
    pub fn id(&self) -> RelationshipId {
        self.id
    }

    /// Returns a display name such as `Root.RequiredChildren`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the principal entity type.
    #[must_use]
    pub fn principal(&self) -> EntityTypeId {
        self.principal
    }

    /// Returns the dependent entity type.
    #[must_use]
    pub fn dependent(&self) -> EntityTypeId {
        self.dependent
    }

    /// Returns the index of the referenced key in the principal's key list.
    #[must_use]
    pub fn principal_key(&self) -> usize {
        self.principal_key
    }

    /// Returns the referenced principal property slots.
    #[must_use]
    pub fn principal_properties(&self) -> &[usize] {
        &self.principal_properties
    }

    /// Returns the foreign-key property slots on the dependent.
    #[must_use]
    pub fn foreign_key(&self) -> &[usize] {
        &self.foreign_key
    }

    /// Returns true if the dependent cannot exist without a principal.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Returns true for one-to-one relationships.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Returns the delete behavior.
    #[must_use]
    pub fn delete_behavior(&self) -> DeleteBehavior {
        self.delete_behavior
    }

    /// Returns the navigation slot on the principal, if any.
    #[must_use]
    pub fn principal_navigation(&self) -> Option<usize> {
        self.principal_navigation
    }

    /// Returns the navigation slot on the dependent, if any.
    #[must_use]
    pub fn dependent_navigation(&self) -> Option<usize> {
        self.dependent_navigation
    }
}
