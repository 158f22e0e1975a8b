//! Entity and relationship metadata.
//!
//! A [`Model`] is built once with [`ModelBuilder`] and shared by every
//! session through an `Arc`. All lookups are pure: property, navigation and
//! relationship positions are resolved to slot indices when the model is
//! built, so the tracker never searches by name on its hot paths.
//!
//! # Type Hierarchies
//!
//! Derived types carry their base type's properties, navigations, keys and
//! relationships. [`Model::is_assignable`] answers whether an instance of one
//! type may stand where another is expected; every type of a hierarchy
//! shares the table of its root.

mod builder;
mod entity_type;
mod relationship;

pub use builder::{EntityTypeBuilder, ModelBuilder, PropertyBuilder, RelationshipBuilder};
pub use entity_type::{
    EntityType, Key, Navigation, NavigationKind, NavigationSide, Property, ValueGeneration,
};
pub use relationship::{DeleteBehavior, Relationship};

use crate::error::{CoreError, CoreResult};
use crate::types::{EntityTypeId, RelationshipId};
use entrack_storage::ForeignKeyConstraint;
use std::collections::HashMap;

/// Validated entity and relationship metadata.
#[derive(Debug, Clone)]
pub struct Model {
    entity_types: Vec<EntityType>,
    relationships: Vec<Relationship>,
    by_name: HashMap<String, EntityTypeId>,
}

impl Model {
    pub(crate) fn new(
        entity_types: Vec<EntityType>,
        relationships: Vec<Relationship>,
        by_name: HashMap<String, EntityTypeId>,
    ) -> Self {
        Self {
            entity_types,
            relationships,
            by_name,
        }
    }

    /// Returns the entity type named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownEntityType`] if no such type exists.
    pub fn entity_type(&self, name: &str) -> CoreResult<&EntityType> {
        self.find_entity_type(name)
            .ok_or_else(|| CoreError::unknown_entity_type(name))
    }

    /// Returns the entity type named `name`, if any.
    #[must_use]
    pub fn find_entity_type(&self, name: &str) -> Option<&EntityType> {
        self.by_name.get(name).map(|id| &self.entity_types[id.index()])
    }

    /// Returns the entity type with the given id.
    #[must_use]
    pub fn entity_type_by_id(&self, id: EntityTypeId) -> &EntityType {
        &self.entity_types[id.index()]
    }

    /// Returns all entity types in declaration order.
    #[must_use]
    pub fn entity_types(&self) -> &[EntityType] {
        &self.entity_types
    }

    /// Returns the relationship with the given id.
    #[must_use]
    pub fn relationship(&self, id: RelationshipId) -> &Relationship {
        &self.relationships[id.index()]
    }

    /// Returns all relationships in declaration order.
    #[must_use]
    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Returns relationships in which `entity_type` (or a base) is the dependent.
    pub fn relationships_as_dependent(
        &self,
        entity_type: EntityTypeId,
    ) -> impl Iterator<Item = &Relationship> + '_ {
        self.entity_type_by_id(entity_type)
            .relationships_as_dependent()
            .iter()
            .map(|id| self.relationship(*id))
    }

    /// Returns relationships in which `entity_type` (or a base) is the principal.
    pub fn relationships_as_principal(
        &self,
        entity_type: EntityTypeId,
    ) -> impl Iterator<Item = &Relationship> + '_ {
        self.entity_type_by_id(entity_type)
            .relationships_as_principal()
            .iter()
            .map(|id| self.relationship(*id))
    }

    /// Returns true if an instance of `from` can be used where `to` is expected.
    #[must_use]
    pub fn is_assignable(&self, from: EntityTypeId, to: EntityTypeId) -> bool {
        let mut current = Some(from);
        while let Some(id) = current {
            if id == to {
                return true;
            }
            current = self.entity_type_by_id(id).base();
        }
        false
    }

    /// Returns the root of the hierarchy containing `entity_type`.
    #[must_use]
    pub fn root_of(&self, entity_type: EntityTypeId) -> EntityTypeId {
        self.entity_type_by_id(entity_type).root()
    }

    /// Returns `entity_type` followed by every type derived from it.
    #[must_use]
    pub fn hierarchy(&self, entity_type: EntityTypeId) -> Vec<EntityTypeId> {
        let mut out = vec![entity_type];
        let mut next = 0;
        while next < out.len() {
            out.extend_from_slice(self.entity_type_by_id(out[next]).derived_types());
            next += 1;
        }
        out
    }

    /// Returns the table rows of `entity_type` are stored in.
    #[must_use]
    pub fn table_name(&self, entity_type: EntityTypeId) -> &str {
        self.entity_type_by_id(self.root_of(entity_type)).name()
    }

    /// Returns one store constraint per relationship.
    #[must_use]
    pub fn foreign_key_constraints(&self) -> Vec<ForeignKeyConstraint> {
        self.relationships
            .iter()
            .map(|rel| {
                let dependent = self.entity_type_by_id(rel.dependent());
                let principal = self.entity_type_by_id(rel.principal());
                ForeignKeyConstraint {
                    name: format!("FK_{}_{}", dependent.name(), rel.name()),
                    dependent_table: self.table_name(rel.dependent()).to_string(),
                    dependent_columns: rel
                        .foreign_key()
                        .iter()
                        .map(|&slot| dependent.property(slot).name().to_string())
                        .collect(),
                    principal_table: self.table_name(rel.principal()).to_string(),
                    principal_columns: rel
                        .principal_properties()
                        .iter()
                        .map(|&slot| principal.property(slot).name().to_string())
                        .collect(),
                }
            })
            .collect()
    }
}
