//! Entity type metadata.

use crate::types::{EntityTypeId, RelationshipId};
use entrack_value::ValueKind;

/// How a property receives its value when an entity is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueGeneration {
    /// Never generated; the application supplies the value.
    Never,
    /// Generated by the store on insert. Until then the tracker holds a
    /// temporary value.
    OnAddStore,
    /// Generated by the tracker when the entity is added (GUIDs only).
    OnAddClient,
}

/// A scalar, key or foreign-key property.
#[derive(Debug, Clone)]
pub struct Property {
    pub(crate) name: String,
    pub(crate) kind: ValueKind,
    pub(crate) nullable: bool,
    pub(crate) generation: ValueGeneration,
    pub(crate) declaring_type: EntityTypeId,
}

impl Property {
    /// Returns the property name (also the store column name).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value kind.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Returns true if the property may hold `Null`.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Returns how the value is generated.
    #[must_use]
    pub fn generation(&self) -> ValueGeneration {
        self.generation
    }

    /// Returns the type that declared the property.
    #[must_use]
    pub fn declaring_type(&self) -> EntityTypeId {
        self.declaring_type
    }
}

/// A primary or alternate key: property slots in key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    pub(crate) properties: Vec<usize>,
}

impl Key {
    /// Returns the property slots of the key.
    #[must_use]
    pub fn properties(&self) -> &[usize] {
        &self.properties
    }
}

/// Whether a navigation holds one instance or many.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationKind {
    /// Single instance (or none).
    Reference,
    /// Set of instances.
    Collection,
}

/// Which end of its relationship a navigation lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationSide {
    /// Declared on the dependent, points at the principal.
    Dependent,
    /// Declared on the principal, points at dependents.
    Principal,
}

/// A navigation property.
#[derive(Debug, Clone)]
pub struct Navigation {
    pub(crate) name: String,
    pub(crate) kind: NavigationKind,
    pub(crate) relationship: RelationshipId,
    pub(crate) side: NavigationSide,
    pub(crate) target: EntityTypeId,
    pub(crate) declaring_type: EntityTypeId,
}

impl Navigation {
    /// Returns the navigation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the navigation kind.
    #[must_use]
    pub fn kind(&self) -> NavigationKind {
        self.kind
    }

    /// Returns the relationship this navigation belongs to.
    #[must_use]
    pub fn relationship(&self) -> RelationshipId {
        self.relationship
    }

    /// Returns the side of the relationship the navigation is declared on.
    #[must_use]
    pub fn side(&self) -> NavigationSide {
        self.side
    }

    /// Returns the entity type the navigation points at.
    #[must_use]
    pub fn target(&self) -> EntityTypeId {
        self.target
    }

    /// Returns the type that declared the navigation.
    #[must_use]
    pub fn declaring_type(&self) -> EntityTypeId {
        self.declaring_type
    }
}

/// An entity type.
///
/// Property and navigation lists are flattened root-first: a slot declared
/// on a base type has the same index in every derived type, so slot indices
/// can be resolved once and used for any instance in the hierarchy.
#[derive(Debug, Clone)]
pub struct EntityType {
    pub(crate) id: EntityTypeId,
    pub(crate) name: String,
    pub(crate) base: Option<EntityTypeId>,
    pub(crate) root: EntityTypeId,
    pub(crate) properties: Vec<Property>,
    pub(crate) navigations: Vec<Navigation>,
    pub(crate) keys: Vec<Key>,
    pub(crate) as_dependent: Vec<RelationshipId>,
    pub(crate) as_principal: Vec<RelationshipId>,
    pub(crate) derived: Vec<EntityTypeId>,
}

impl EntityType {
    /// Returns the type id.
    #[must_use]
    pub fn id(&self) -> EntityTypeId {
        self.id
    }

    /// Returns the type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the direct base type.
    #[must_use]
    pub fn base(&self) -> Option<EntityTypeId> {
        self.base
    }

    /// Returns the root of the hierarchy (the type itself for roots).
    #[must_use]
    pub fn root(&self) -> EntityTypeId {
        self.root
    }

    /// Returns all properties, inherited first.
    #[must_use]
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Returns the property at `slot`.
    #[must_use]
    pub fn property(&self, slot: usize) -> &Property {
        &self.properties[slot]
    }

    /// Returns the slot of the property named `name`.
    #[must_use]
    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    /// Returns all navigations, inherited first.
    #[must_use]
    pub fn navigations(&self) -> &[Navigation] {
        &self.navigations
    }

    /// Returns the navigation at `slot`.
    #[must_use]
    pub fn navigation(&self, slot: usize) -> &Navigation {
        &self.navigations[slot]
    }

    /// Returns the slot of the navigation named `name`.
    #[must_use]
    pub fn navigation_index(&self, name: &str) -> Option<usize> {
        self.navigations.iter().position(|n| n.name == name)
    }

    /// Returns the keys; the first is the primary key.
    #[must_use]
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Returns the primary key.
    #[must_use]
    pub fn primary_key(&self) -> &Key {
        &self.keys[0]
    }

    /// Returns true if `slot` belongs to any key.
    #[must_use]
    pub fn is_key_property(&self, slot: usize) -> bool {
        self.keys.iter().any(|k| k.properties.contains(&slot))
    }

    /// Returns true if `slot` belongs to the primary key.
    #[must_use]
    pub fn is_primary_key_property(&self, slot: usize) -> bool {
        self.primary_key().properties.contains(&slot)
    }

    /// Returns relationships in which this type (or a base) is the dependent.
    #[must_use]
    pub fn relationships_as_dependent(&self) -> &[RelationshipId] {
        &self.as_dependent
    }

    /// Returns relationships in which this type (or a base) is the principal.
    #[must_use]
    pub fn relationships_as_principal(&self) -> &[RelationshipId] {
        &self.as_principal
    }

    /// Returns the directly derived types.
    #[must_use]
    pub fn derived_types(&self) -> &[EntityTypeId] {
        &self.derived
    }
}
