//! Cascade delete and orphan resolution over tracked entries.
//!
//! Deleting a principal walks its relationships; for each live dependent
//! still referencing it, the delete behavior decides:
//!
//! | Behavior                   | Tracked dependent                  |
//! |----------------------------|------------------------------------|
//! | `Cascade`, `ClientCascade` | deleted (or detached if `Added`)   |
//! | `SetNull`, `ClientSetNull` | foreign key nulled                 |
//! | `Restrict`                 | left alone; save validation fails  |
//!
//! Dependents that exist only in the store are handled by the save
//! planner.

use crate::config::CascadeTiming;
use crate::entry::EntityState;
use crate::error::CoreResult;
use crate::tracker::ChangeTracker;
use crate::types::ObjectId;
use std::sync::Arc;
use tracing::debug;

impl ChangeTracker {
    /// Deletes a tracked entry.
    ///
    /// `Added` entries stop being tracked at once and take their cascading
    /// dependents with them; other entries become `Deleted`, cascading
    /// immediately only under [`CascadeTiming::Immediate`].
    pub(crate) fn delete_entry(&mut self, object: ObjectId) -> CoreResult<()> {
        match self.state(object) {
            EntityState::Detached | EntityState::Deleted => Ok(()),
            EntityState::Added => {
                debug!(%object, entity_type = self.type_name(object), "removing added entry");
                self.unlink_from_principals(object);
                self.stop_tracking(object);
                self.cascade_delete(object, true, false)
            }
            EntityState::Unchanged | EntityState::Modified => {
                debug!(%object, entity_type = self.type_name(object), "deleting entry");
                self.transition(object, EntityState::Deleted);
                if self.config.cascade_delete_timing == CascadeTiming::Immediate {
                    self.cascade_delete(object, false, false)?;
                }
                Ok(())
            }
        }
    }

    /// Applies delete behaviors to the tracked dependents of `principal`.
    ///
    /// `principal_detached` is set when the principal was an `Added` entry
    /// that stopped being tracked: its dependents can never be saved against
    /// it, so cascading dependents are detached rather than deleted and no
    /// foreign key is nulled. `force` cascades even under
    /// [`CascadeTiming::Never`].
    pub(crate) fn cascade_delete(&mut self, principal: ObjectId, principal_detached: bool, force: bool) -> CoreResult<()> {
        let model = Arc::clone(&self.model);
        let principal_type = self.objects.entity_type(principal);
        let do_cascade = force || self.config.cascade_delete_timing != CascadeTiming::Never;

        for rel in model.relationships_as_principal(principal_type) {
            let key = self.principal_key(principal, rel);
            let mut candidates = Vec::new();
            if let Some(slot) = rel.principal_navigation() {
                candidates.extend(self.known_navigation(principal, slot).targets());
            }
            for dependent in self.dependents_of(rel, &key) {
                if !candidates.contains(&dependent) {
                    candidates.push(dependent);
                }
            }

            for dependent in candidates {
                let Some(entry) = self.tracked(dependent) else {
                    continue;
                };
                if entry.state == EntityState::Deleted || entry.conceptual_nulls.contains(&rel.id()) {
                    continue;
                }
                let state = entry.state;
                if state != EntityState::Added && self.foreign_key(dependent, rel) != key {
                    continue;
                }

                let behavior = rel.delete_behavior();
                if behavior.cascades() && do_cascade {
                    if principal_detached || state == EntityState::Added {
                        debug!(%principal, %dependent, relationship = rel.name(), "cascade detach");
                        self.unlink_from_principals(dependent);
                        self.stop_tracking(dependent);
                        self.cascade_delete(dependent, true, force)?;
                    } else {
                        debug!(%principal, %dependent, relationship = rel.name(), "cascade delete");
                        self.transition(dependent, EntityState::Deleted);
                        self.cascade_delete(dependent, false, force)?;
                    }
                } else if !principal_detached && behavior.nulls_dependents() {
                    debug!(%principal, %dependent, relationship = rel.name(), "nulling foreign key");
                    self.sever(rel.id(), dependent, Some(principal))?;
                }
            }
        }
        Ok(())
    }

    /// Deletes orphans of required cascading relationships, then cascades
    /// every deleted entry.
    ///
    /// With `force` unset, orphans are left alone under
    /// [`CascadeTiming::Never`] and cascades follow the configured timing.
    pub(crate) fn cascade_changes(&mut self, force: bool) -> CoreResult<()> {
        let model = Arc::clone(&self.model);
        let delete_orphans = force || self.config.delete_orphans_timing != CascadeTiming::Never;

        if delete_orphans {
            let orphans: Vec<ObjectId> = self
                .entries
                .iter()
                .filter(|(_, entry)| entry.state != EntityState::Deleted)
                .filter(|(_, entry)| {
                    model.relationships_as_dependent(entry.entity_type).any(|rel| {
                        rel.is_required()
                            && rel.delete_behavior().cascades()
                            && (entry.conceptual_nulls.contains(&rel.id()) || entry.key(rel.foreign_key()).has_null())
                    })
                })
                .map(|(object, _)| *object)
                .collect();
            for orphan in orphans {
                debug!(object = %orphan, entity_type = self.type_name(orphan), "deleting orphan");
                self.delete_entry(orphan)?;
            }
        }

        let deleted: Vec<ObjectId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.state == EntityState::Deleted)
            .map(|(object, _)| *object)
            .collect();
        for principal in deleted {
            self.cascade_delete(principal, false, force)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{CascadeTiming, Config};
    use crate::entry::EntityState;
    use crate::model::{
        DeleteBehavior, EntityTypeBuilder, Model, ModelBuilder, PropertyBuilder, RelationshipBuilder,
    };
    use crate::tracker::ChangeTracker;
    use crate::types::ObjectId;
    use entrack_value::{Value, ValueKind};
    use std::sync::Arc;

    fn model(behavior: DeleteBehavior, required: bool) -> Arc<Model> {
        let mut child_fk = PropertyBuilder::new("ParentId", ValueKind::Integer);
        let mut rel = RelationshipBuilder::new("Parent", "Child")
            .foreign_key(&["ParentId"])
            .principal_collection("Children")
            .dependent_reference("Parent")
            .on_delete(behavior);
        if required {
            rel = rel.required();
        } else {
            child_fk = child_fk.nullable();
        }
        Arc::new(
            ModelBuilder::new()
                .entity_type(
                    EntityTypeBuilder::new("Parent")
                        .property(PropertyBuilder::new("Id", ValueKind::Integer))
                        .key(&["Id"]),
                )
                .entity_type(
                    EntityTypeBuilder::new("Child")
                        .property(PropertyBuilder::new("Id", ValueKind::Integer))
                        .property(child_fk)
                        .key(&["Id"]),
                )
                .relationship(rel)
                .build()
                .unwrap(),
        )
    }

    fn family(tracker: &mut ChangeTracker, state: EntityState) -> (ObjectId, ObjectId, ObjectId) {
        let model = Arc::clone(&tracker.model);
        let parent = tracker.objects.create(model.entity_type("Parent").unwrap());
        tracker.objects.set_value(parent, 0, Value::Integer(1));
        let mut children = Vec::new();
        for id in [10, 11] {
            let child = tracker.objects.create(model.entity_type("Child").unwrap());
            tracker.objects.set_value(child, 0, Value::Integer(id));
            tracker.objects.set_value(child, 1, Value::Integer(1));
            children.push(child);
        }
        let nodes: Vec<_> = [parent, children[0], children[1]]
            .into_iter()
            .map(|o| (o, state))
            .collect();
        tracker.start_tracking(&nodes).unwrap();
        (parent, children[0], children[1])
    }

    #[test]
    fn immediate_cascade_deletes_children() {
        let config = Config::default().cascade_delete_timing(CascadeTiming::Immediate);
        let mut tracker = ChangeTracker::new(model(DeleteBehavior::Cascade, true), config);
        let (parent, a, b) = family(&mut tracker, EntityState::Unchanged);

        tracker.delete_entry(parent).unwrap();

        assert_eq!(tracker.state(parent), EntityState::Deleted);
        assert_eq!(tracker.state(a), EntityState::Deleted);
        assert_eq!(tracker.state(b), EntityState::Deleted);
    }

    #[test]
    fn deferred_cascade_waits_for_cascade_changes() {
        let mut tracker = ChangeTracker::new(model(DeleteBehavior::Cascade, true), Config::default());
        let (parent, a, _) = family(&mut tracker, EntityState::Unchanged);

        tracker.delete_entry(parent).unwrap();
        assert_eq!(tracker.state(a), EntityState::Unchanged);

        tracker.cascade_changes(false).unwrap();
        assert_eq!(tracker.state(a), EntityState::Deleted);
    }

    #[test]
    fn removing_added_parent_detaches_added_children() {
        let mut tracker = ChangeTracker::new(model(DeleteBehavior::Cascade, true), Config::default());
        let (parent, a, b) = family(&mut tracker, EntityState::Added);

        tracker.delete_entry(parent).unwrap();

        assert_eq!(tracker.state(parent), EntityState::Detached);
        assert_eq!(tracker.state(a), EntityState::Detached);
        assert_eq!(tracker.state(b), EntityState::Detached);
    }

    #[test]
    fn set_null_nulls_children() {
        let config = Config::default().cascade_delete_timing(CascadeTiming::Immediate);
        let mut tracker = ChangeTracker::new(model(DeleteBehavior::SetNull, false), config);
        let (parent, a, _) = family(&mut tracker, EntityState::Unchanged);

        tracker.delete_entry(parent).unwrap();

        assert_eq!(tracker.state(a), EntityState::Modified);
        assert_eq!(tracker.objects.value(a, 1), &Value::Null);
        assert_eq!(tracker.objects.navigation(a, 0).as_reference(), None);
    }

    #[test]
    fn never_timing_leaves_children_until_forced() {
        let config = Config::default().cascade_delete_timing(CascadeTiming::Never);
        let mut tracker = ChangeTracker::new(model(DeleteBehavior::Cascade, true), config);
        let (parent, a, _) = family(&mut tracker, EntityState::Unchanged);

        tracker.delete_entry(parent).unwrap();
        tracker.cascade_changes(false).unwrap();
        assert_eq!(tracker.state(a), EntityState::Unchanged);

        tracker.cascade_changes(true).unwrap();
        assert_eq!(tracker.state(a), EntityState::Deleted);
    }

    #[test]
    fn conceptual_null_orphans_are_deleted() {
        let mut tracker = ChangeTracker::new(model(DeleteBehavior::Cascade, true), Config::default());
        let (_, a, b) = family(&mut tracker, EntityState::Unchanged);

        tracker.sever(crate::types::RelationshipId::new(0), a, None).unwrap();
        assert_eq!(tracker.state(a), EntityState::Modified);
        assert!(tracker.entry(a).has_conceptual_null());

        tracker.cascade_changes(false).unwrap();
        assert_eq!(tracker.state(a), EntityState::Deleted);
        assert_eq!(tracker.state(b), EntityState::Unchanged);
    }
}
