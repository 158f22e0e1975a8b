//! Error types for the change tracker.

use crate::entry::EntityState;
use crate::model::DeleteBehavior;
use crate::types::ObjectId;
use entrack_value::{KeyValues, ValueKind};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in change-tracking operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage collaborator error.
    #[error("storage error: {0}")]
    Storage(#[from] entrack_storage::StorageError),

    /// The model definition is inconsistent.
    #[error("invalid model: {message}")]
    InvalidModel {
        /// Description of the problem.
        message: String,
    },

    /// No entity type with this name exists.
    #[error("unknown entity type: {name}")]
    UnknownEntityType {
        /// Requested name.
        name: String,
    },

    /// The entity type has no property with this name.
    #[error("entity type '{entity_type}' has no property '{property}'")]
    UnknownProperty {
        /// Entity type searched.
        entity_type: String,
        /// Requested property.
        property: String,
    },

    /// The entity type has no navigation with this name.
    #[error("entity type '{entity_type}' has no navigation '{navigation}'")]
    UnknownNavigation {
        /// Entity type searched.
        entity_type: String,
        /// Requested navigation.
        navigation: String,
    },

    /// The object id does not belong to this session.
    #[error("unknown object {object}")]
    UnknownObject {
        /// The unknown id.
        object: ObjectId,
    },

    /// Another instance with the same key is already tracked.
    #[error("an instance of '{entity_type}' with key {key} is already being tracked")]
    IdentityConflict {
        /// Entity type of the instance being tracked.
        entity_type: String,
        /// Conflicting key.
        key: KeyValues,
    },

    /// The entity's generated key has no value, so it cannot be treated as
    /// persisted.
    #[error("'{entity_type}' has no key value; only Added is possible")]
    KeyNotSet {
        /// Entity type of the instance.
        entity_type: String,
    },

    /// A key property of a persisted entity was changed.
    #[error("property '{property}' of '{entity_type}' is part of a key and cannot be modified")]
    KeyModified {
        /// Entity type owning the key.
        entity_type: String,
        /// Key property that changed.
        property: String,
    },

    /// A required relationship has no principal at save time.
    #[error(
        "the association between '{principal}' and '{dependent}' with key {key} has been severed \
         but the relationship is required"
    )]
    RequiredRelationship {
        /// Principal entity type of the relationship.
        principal: String,
        /// Dependent entity type.
        dependent: String,
        /// Key of the orphaned dependent.
        key: KeyValues,
    },

    /// A deleted principal is still referenced by a dependent.
    #[error(
        "cannot delete '{principal}' with key {key}: '{dependent}' still references it ({behavior:?})"
    )]
    ReferentialIntegrity {
        /// Principal entity type being deleted.
        principal: String,
        /// Dependent entity type still referencing it.
        dependent: String,
        /// Key of the principal.
        key: KeyValues,
        /// Delete behavior of the relationship.
        behavior: DeleteBehavior,
    },

    /// A value of the wrong kind was assigned to a property.
    #[error("cannot assign {actual} to '{entity_type}.{property}' of kind {expected}")]
    TypeMismatch {
        /// Entity type owning the property.
        entity_type: String,
        /// Property name.
        property: String,
        /// Declared kind.
        expected: ValueKind,
        /// Description of the rejected value.
        actual: String,
    },

    /// A navigation was pointed at an instance of an incompatible type.
    #[error("navigation '{entity_type}.{navigation}' cannot reference an instance of '{target}'")]
    NavigationTypeMismatch {
        /// Entity type owning the navigation.
        entity_type: String,
        /// Navigation name.
        navigation: String,
        /// Type of the rejected target.
        target: String,
    },

    /// The requested state change is not allowed.
    #[error("cannot change '{entity_type}' from {from} to {to}: {reason}")]
    InvalidStateTransition {
        /// Entity type of the entry.
        entity_type: String,
        /// Current state.
        from: EntityState,
        /// Requested state.
        to: EntityState,
        /// Why the change is refused.
        reason: String,
    },

    /// A temporary value is not produced by any insert of the batch.
    #[error("temporary value of '{entity_type}.{property}' is not produced by any insert in the batch")]
    UnresolvedTemporaryValue {
        /// Entity type holding the value.
        entity_type: String,
        /// Property holding the value.
        property: String,
    },

    /// The save batch cannot be ordered.
    #[error("save batch contains a dependency cycle between {count} commands")]
    CircularDependency {
        /// Number of commands left unordered.
        count: usize,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid model error.
    pub fn invalid_model(message: impl Into<String>) -> Self {
        Self::InvalidModel {
            message: message.into(),
        }
    }

    /// Creates an unknown entity type error.
    pub fn unknown_entity_type(name: impl Into<String>) -> Self {
        Self::UnknownEntityType { name: name.into() }
    }

    /// Creates an unknown property error.
    pub fn unknown_property(entity_type: impl Into<String>, property: impl Into<String>) -> Self {
        Self::UnknownProperty {
            entity_type: entity_type.into(),
            property: property.into(),
        }
    }

    /// Creates an unknown navigation error.
    pub fn unknown_navigation(entity_type: impl Into<String>, navigation: impl Into<String>) -> Self {
        Self::UnknownNavigation {
            entity_type: entity_type.into(),
            navigation: navigation.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_convert() {
        let err: CoreError = entrack_storage::StorageError::Unavailable("down".into()).into();
        assert!(matches!(err, CoreError::Storage(_)));
        assert_eq!(err.to_string(), "storage error: store unavailable: down");
    }

    #[test]
    fn identity_conflict_message() {
        let err = CoreError::IdentityConflict {
            entity_type: "Root".into(),
            key: KeyValues::single(5),
        };
        assert_eq!(
            err.to_string(),
            "an instance of 'Root' with key (5) is already being tracked"
        );
    }
}
