//! Relationship fixup.
//!
//! Two primitives keep foreign keys and navigations describing the same
//! relationship instance:
//!
//! - [`ChangeTracker::connect`] makes a dependent reference a principal:
//!   the foreign key takes the principal key, the dependent navigation
//!   points at the principal and the principal-side navigation holds the
//!   dependent. A unique relationship first severs any previous occupant.
//! - [`ChangeTracker::sever`] removes a dependent from its principal: the
//!   navigations are cleared and the foreign key becomes null, or is flagged
//!   as a conceptual null when its properties cannot hold null.
//!
//! Change detection, graph tracking and the cascade resolver express every
//! relationship change through these two calls.

use crate::config::CascadeTiming;
use crate::entry::EntityState;
use crate::error::{CoreError, CoreResult};
use crate::model::Relationship;
use crate::tracker::ChangeTracker;
use crate::types::{ObjectId, RelationshipId};
use entrack_value::Value;
use std::sync::Arc;
use tracing::{debug, trace};

impl ChangeTracker {
    /// Makes `dependent` reference `principal` through `rel`.
    ///
    /// Both instances must be tracked; otherwise nothing happens.
    pub(crate) fn connect(&mut self, rel: RelationshipId, principal: ObjectId, dependent: ObjectId) -> CoreResult<()> {
        let model = Arc::clone(&self.model);
        let relationship = model.relationship(rel);
        if !self.is_tracked(principal) || !self.is_tracked(dependent) {
            return Ok(());
        }
        let key = self.principal_key(principal, relationship);
        let temporary = self.temporary_flags(principal, relationship.principal_properties());

        if self.state(dependent) != EntityState::Added {
            let dependent_type = model.entity_type_by_id(self.objects.entity_type(dependent));
            let current = self.foreign_key(dependent, relationship);
            for (i, &slot) in relationship.foreign_key().iter().enumerate() {
                if dependent_type.is_key_property(slot) && current.values()[i] != key.values()[i] {
                    return Err(CoreError::KeyModified {
                        entity_type: dependent_type.name().to_string(),
                        property: dependent_type.property(slot).name().to_string(),
                    });
                }
            }
        }

        for other in self.current_principals(relationship, dependent) {
            if other != principal {
                self.remove_from_inverse(relationship, other, dependent);
            }
        }

        if relationship.is_unique() {
            let mut occupants = self.dependents_of(relationship, &key);
            if let Some(slot) = relationship.principal_navigation() {
                occupants.extend(self.known_navigation(principal, slot).as_reference());
            }
            occupants.sort_unstable();
            occupants.dedup();
            for occupant in occupants {
                if occupant != dependent && self.is_tracked(occupant) {
                    trace!(%principal, %occupant, relationship = relationship.name(), "replacing unique dependent");
                    self.sever(rel, occupant, Some(principal))?;
                }
            }
        }

        for (i, &slot) in relationship.foreign_key().iter().enumerate() {
            self.write_property(dependent, slot, key.values()[i].clone(), temporary[i])?;
        }
        if let Some(slot) = relationship.dependent_navigation() {
            self.write_reference(dependent, slot, Some(principal));
        }
        self.add_to_inverse(relationship, principal, dependent);
        if let Some(entry) = self.entries.get_mut(&dependent) {
            entry.conceptual_nulls.remove(&rel);
        }
        trace!(%principal, %dependent, relationship = relationship.name(), %key, "connected");
        Ok(())
    }

    /// Removes `dependent` from its principal through `rel`.
    ///
    /// `former` names a principal the dependent may still be listed under
    /// even though neither its navigation nor its foreign key point there
    /// any more.
    pub(crate) fn sever(&mut self, rel: RelationshipId, dependent: ObjectId, former: Option<ObjectId>) -> CoreResult<()> {
        let model = Arc::clone(&self.model);
        let relationship = model.relationship(rel);
        if !self.is_tracked(dependent) {
            return Ok(());
        }
        let mut principals = self.current_principals(relationship, dependent);
        if let Some(former) = former {
            if !principals.contains(&former) {
                principals.push(former);
            }
        }
        if let Some(slot) = relationship.dependent_navigation() {
            self.write_reference(dependent, slot, None);
        }
        for principal in principals {
            self.remove_from_inverse(relationship, principal, dependent);
        }
        if self.state(dependent) == EntityState::Deleted {
            return Ok(());
        }

        let dependent_type = model.entity_type_by_id(self.objects.entity_type(dependent));
        let mut conceptual = false;
        for &slot in relationship.foreign_key() {
            if dependent_type.property(slot).is_nullable() && !dependent_type.is_key_property(slot) {
                self.write_property(dependent, slot, Value::Null, false)?;
            } else {
                conceptual = true;
            }
        }
        if conceptual {
            if let Some(entry) = self.entries.get_mut(&dependent) {
                entry.conceptual_nulls.insert(rel);
            }
            if self.state(dependent) == EntityState::Unchanged {
                self.transition(dependent, EntityState::Modified);
            }
        }
        trace!(%dependent, relationship = relationship.name(), conceptual, "severed");

        if relationship.is_required()
            && relationship.delete_behavior().cascades()
            && self.config.delete_orphans_timing == CascadeTiming::Immediate
        {
            debug!(%dependent, relationship = relationship.name(), "deleting orphan");
            self.delete_entry(dependent)?;
        }
        Ok(())
    }

    /// Principals `dependent` currently references: the target of its
    /// navigation and the tracked instance its foreign key matches.
    pub(crate) fn current_principals(&self, rel: &Relationship, dependent: ObjectId) -> Vec<ObjectId> {
        let mut found = Vec::new();
        if let Some(slot) = rel.dependent_navigation() {
            found.extend(self.known_navigation(dependent, slot).as_reference());
        }
        let conceptual = self
            .tracked(dependent)
            .is_some_and(|e| e.conceptual_nulls.contains(&rel.id()));
        if !conceptual {
            if let Some(principal) = self.find_principal(rel, &self.foreign_key(dependent, rel)) {
                if !found.contains(&principal) {
                    found.push(principal);
                }
            }
        }
        found
    }

    /// Connects a newly tracked instance to everything it is related to:
    /// its principals through navigations or foreign keys, and dependents
    /// that already referenced its key.
    pub(crate) fn initial_fixup(&mut self, object: ObjectId) -> CoreResult<()> {
        let model = Arc::clone(&self.model);
        let entity_type = model.entity_type_by_id(self.objects.entity_type(object));

        for rel in model.relationships_as_dependent(entity_type.id()) {
            let navigated = rel
                .dependent_navigation()
                .and_then(|slot| self.objects.navigation(object, slot).as_reference());
            let principal = match navigated {
                Some(principal) => Some(principal),
                None => self.find_principal(rel, &self.foreign_key(object, rel)),
            };
            if let Some(principal) = principal {
                if self.is_tracked(principal) && self.state(principal) != EntityState::Deleted {
                    self.connect(rel.id(), principal, object)?;
                }
            }
        }

        for rel in model.relationships_as_principal(entity_type.id()) {
            let mut dependents = Vec::new();
            if let Some(slot) = rel.principal_navigation() {
                for dependent in self.objects.navigation(object, slot).targets() {
                    if self.is_tracked(dependent)
                        && self.state(dependent) != EntityState::Deleted
                        && model.is_assignable(self.objects.entity_type(dependent), rel.dependent())
                    {
                        dependents.push(dependent);
                    }
                }
            }
            for dependent in self.dependents_of(rel, &self.principal_key(object, rel)) {
                let adopts = match rel.dependent_navigation() {
                    Some(slot) => self
                        .known_navigation(dependent, slot)
                        .as_reference()
                        .is_none_or(|p| p == object),
                    None => true,
                };
                if adopts && !dependents.contains(&dependent) {
                    dependents.push(dependent);
                }
            }
            for dependent in dependents {
                self.connect(rel.id(), object, dependent)?;
            }
        }
        Ok(())
    }

    /// Removes `object` from the principal-side navigation of every live
    /// principal it references.
    pub(crate) fn unlink_from_principals(&mut self, object: ObjectId) {
        let model = Arc::clone(&self.model);
        let entity_type = model.entity_type_by_id(self.objects.entity_type(object));
        for rel in model.relationships_as_dependent(entity_type.id()) {
            for principal in self.current_principals(rel, object) {
                if self.is_tracked(principal) && self.state(principal) != EntityState::Deleted {
                    self.remove_from_inverse(rel, principal, object);
                }
            }
        }
    }

    fn temporary_flags(&self, object: ObjectId, slots: &[usize]) -> Vec<bool> {
        match self.tracked(object) {
            Some(entry) => slots.iter().map(|&s| entry.temporary[s]).collect(),
            None => vec![false; slots.len()],
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::entry::EntityState;
    use crate::model::{
        DeleteBehavior, EntityTypeBuilder, Model, ModelBuilder, PropertyBuilder, RelationshipBuilder,
    };
    use crate::object::NavigationValue;
    use crate::tracker::ChangeTracker;
    use entrack_value::{Value, ValueKind};
    use std::sync::Arc;

    fn model() -> Arc<Model> {
        let model = ModelBuilder::new()
            .entity_type(
                EntityTypeBuilder::new("Category")
                    .property(PropertyBuilder::new("Id", ValueKind::Integer))
                    .key(&["Id"]),
            )
            .entity_type(
                EntityTypeBuilder::new("Product")
                    .property(PropertyBuilder::new("Id", ValueKind::Integer))
                    .property(PropertyBuilder::new("CategoryId", ValueKind::Integer).nullable())
                    .key(&["Id"]),
            )
            .relationship(
                RelationshipBuilder::new("Category", "Product")
                    .foreign_key(&["CategoryId"])
                    .principal_collection("Products")
                    .dependent_reference("Category")
                    .on_delete(DeleteBehavior::SetNull),
            )
            .build()
            .unwrap();
        Arc::new(model)
    }

    fn attach(tracker: &mut ChangeTracker, type_name: &str, id: i64) -> crate::types::ObjectId {
        let model = Arc::clone(&tracker.model);
        let object = tracker.objects.create(model.entity_type(type_name).unwrap());
        tracker.objects.set_value(object, 0, Value::Integer(id));
        tracker
            .start_tracking(&[(object, EntityState::Unchanged)])
            .unwrap();
        object
    }

    #[test]
    fn connect_copies_key_and_links_both_sides() {
        let mut tracker = ChangeTracker::new(model(), Config::default());
        let category = attach(&mut tracker, "Category", 7);
        let product = attach(&mut tracker, "Product", 1);

        tracker.connect(crate::types::RelationshipId::new(0), category, product).unwrap();

        assert_eq!(tracker.objects.value(product, 1), &Value::Integer(7));
        assert_eq!(tracker.objects.navigation(product, 0).as_reference(), Some(category));
        assert_eq!(
            tracker.objects.navigation(category, 0),
            &NavigationValue::Collection(vec![product])
        );
        assert_eq!(tracker.state(product), EntityState::Modified);
    }

    #[test]
    fn sever_nulls_optional_foreign_key() {
        let mut tracker = ChangeTracker::new(model(), Config::default());
        let category = attach(&mut tracker, "Category", 7);
        let product = attach(&mut tracker, "Product", 1);
        let rel = crate::types::RelationshipId::new(0);
        tracker.connect(rel, category, product).unwrap();

        tracker.sever(rel, product, None).unwrap();

        assert_eq!(tracker.objects.value(product, 1), &Value::Null);
        assert_eq!(tracker.objects.navigation(product, 0).as_reference(), None);
        assert!(tracker.objects.navigation(category, 0).targets().is_empty());
    }

    #[test]
    fn tracking_a_principal_adopts_waiting_dependents() {
        let mut tracker = ChangeTracker::new(model(), Config::default());
        let model = Arc::clone(&tracker.model);
        let product = tracker.objects.create(model.entity_type("Product").unwrap());
        tracker.objects.set_value(product, 0, Value::Integer(1));
        tracker.objects.set_value(product, 1, Value::Integer(7));
        tracker.start_tracking(&[(product, EntityState::Unchanged)]).unwrap();

        let category = attach(&mut tracker, "Category", 7);

        assert_eq!(tracker.objects.navigation(product, 0).as_reference(), Some(category));
        assert!(tracker.objects.navigation(category, 0).contains(product));
        assert_eq!(tracker.state(product), EntityState::Unchanged);
    }
}
