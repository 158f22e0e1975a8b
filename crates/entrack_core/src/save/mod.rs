//! The save pipeline.
//!
//! `save_changes` runs, in order: change detection (when enabled), orphan
//! and cascade resolution, validation, batch planning, the store call,
//! reconciliation of store-generated values and acceptance of every saved
//! entry. Any failure restores the tracker to its state before the call,
//! so the save can be retried.

mod batch;

use crate::entry::EntityState;
use crate::error::{CoreError, CoreResult};
use crate::events::TrackerEventKind;
use crate::tracker::ChangeTracker;
use crate::types::ObjectId;
use entrack_storage::StoreBackend;
use std::sync::Arc;
use tracing::{debug, warn};

impl ChangeTracker {
    /// Persists every pending change through `store`. Returns the number of
    /// rows the store wrote.
    pub(crate) fn save_changes(&mut self, store: &dyn StoreBackend) -> CoreResult<usize> {
        if self.config.auto_detect_changes {
            self.detect_changes()?;
        }
        let checkpoint = self.checkpoint();
        match self.save_prepared(store) {
            Ok(rows) => Ok(rows),
            Err(err) => {
                warn!(error = %err, "save failed; tracker state restored");
                self.restore(checkpoint);
                Err(err)
            }
        }
    }

    fn save_prepared(&mut self, store: &dyn StoreBackend) -> CoreResult<usize> {
        self.cascade_changes(false)?;
        self.validate()?;
        let plan = self.plan(store)?;
        if plan.batch.is_empty() {
            self.accept();
            return Ok(0);
        }

        let outcome = store.save(&plan.batch)?;
        for generated in &outcome.generated {
            if let Some(Some(object)) = plan.objects.get(generated.command) {
                self.reconcile_generated(*object, &generated.values)?;
            }
        }
        self.accept();
        debug!(
            commands = plan.batch.len(),
            rows = outcome.rows_affected,
            "save completed"
        );
        Ok(outcome.rows_affected)
    }

    /// Rejects required relationships without a principal and deleted
    /// principals that live dependents still reference.
    fn validate(&self) -> CoreResult<()> {
        let model = Arc::clone(&self.model);
        for (&object, entry) in &self.entries {
            let entity_type = model.entity_type_by_id(entry.entity_type);
            match entry.state {
                EntityState::Added | EntityState::Modified => {
                    for rel in model.relationships_as_dependent(entity_type.id()) {
                        if rel.is_required()
                            && (entry.conceptual_nulls.contains(&rel.id()) || entry.key(rel.foreign_key()).has_null())
                        {
                            return Err(CoreError::RequiredRelationship {
                                principal: model.entity_type_by_id(rel.principal()).name().to_string(),
                                dependent: entity_type.name().to_string(),
                                key: self.primary_key(object),
                            });
                        }
                    }
                }
                EntityState::Deleted => {
                    for rel in model.relationships_as_principal(entity_type.id()) {
                        let key = entry.key(rel.principal_properties());
                        if let Some(&dependent) = self.dependents_of(rel, &key).first() {
                            return Err(CoreError::ReferentialIntegrity {
                                principal: entity_type.name().to_string(),
                                dependent: self.type_name(dependent).to_string(),
                                key,
                                behavior: rel.delete_behavior(),
                            });
                        }
                    }
                }
                EntityState::Unchanged | EntityState::Detached => {}
            }
        }
        Ok(())
    }

    /// Marks every pending entry as saved: deleted entries stop being
    /// tracked, the others become `Unchanged` with refreshed originals.
    pub(crate) fn accept(&mut self) {
        let deleted = self.in_state(EntityState::Deleted);
        for &object in &deleted {
            self.unlink_from_principals(object);
        }
        for object in deleted {
            self.stop_tracking(object);
        }

        let mut pending = self.in_state(EntityState::Added);
        pending.extend(self.in_state(EntityState::Modified));
        pending.sort_unstable();
        for object in pending {
            self.accept_entry(object);
        }
    }

    /// Makes one entry `Unchanged`, taking its current values as originals.
    pub(crate) fn accept_entry(&mut self, object: ObjectId) {
        let Some(entry) = self.entries.get_mut(&object) else {
            return;
        };
        let from = entry.state;
        entry.accept();
        if from != EntityState::Unchanged {
            self.emit(
                object,
                TrackerEventKind::StateChanged {
                    from,
                    to: EntityState::Unchanged,
                },
            );
        }
    }

    /// Accepts all changes without saving.
    ///
    /// Refused while an added entry still holds a temporary key value.
    pub(crate) fn accept_all_changes(&mut self) -> CoreResult<()> {
        let model = Arc::clone(&self.model);
        for entry in self.entries.values() {
            let entity_type = model.entity_type_by_id(entry.entity_type);
            let temporary_key = entity_type.keys().iter().any(|k| entry.has_temporary(k.properties()));
            if entry.state == EntityState::Added && temporary_key {
                return Err(CoreError::InvalidStateTransition {
                    entity_type: entity_type.name().to_string(),
                    from: EntityState::Added,
                    to: EntityState::Unchanged,
                    reason: "a key property holds a temporary value".to_string(),
                });
            }
        }
        self.accept();
        Ok(())
    }

    fn in_state(&self, state: EntityState) -> Vec<ObjectId> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.state == state)
            .map(|(object, _)| *object)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::entry::EntityState;
    use crate::error::CoreError;
    use crate::model::{
        DeleteBehavior, EntityTypeBuilder, Model, ModelBuilder, PropertyBuilder, RelationshipBuilder,
    };
    use crate::tracker::ChangeTracker;
    use entrack_storage::{InMemoryStore, Operation};
    use entrack_value::{Value, ValueKind};
    use std::sync::Arc;

    fn model() -> Arc<Model> {
        Arc::new(
            ModelBuilder::new()
                .entity_type(
                    EntityTypeBuilder::new("Blog")
                        .property(PropertyBuilder::new("Id", ValueKind::Integer).store_generated())
                        .key(&["Id"]),
                )
                .entity_type(
                    EntityTypeBuilder::new("Post")
                        .property(PropertyBuilder::new("Id", ValueKind::Integer).store_generated())
                        .property(PropertyBuilder::new("BlogId", ValueKind::Integer))
                        .key(&["Id"]),
                )
                .relationship(
                    RelationshipBuilder::new("Blog", "Post")
                        .foreign_key(&["BlogId"])
                        .principal_collection("Posts")
                        .dependent_reference("Blog")
                        .required()
                        .on_delete(DeleteBehavior::Restrict),
                )
                .build()
                .unwrap(),
        )
    }

    fn store(model: &Model) -> InMemoryStore {
        InMemoryStore::with_foreign_keys(model.foreign_key_constraints())
    }

    fn blog_with_post(tracker: &mut ChangeTracker) -> (crate::types::ObjectId, crate::types::ObjectId) {
        let model = Arc::clone(&tracker.model);
        let blog = tracker.objects.create(model.entity_type("Blog").unwrap());
        let post = tracker.objects.create(model.entity_type("Post").unwrap());
        tracker.objects.collection_insert(blog, 0, post);
        tracker.track_graph(blog, |_| Some(EntityState::Added)).unwrap();
        (blog, post)
    }

    #[test]
    fn plan_orders_principal_insert_first() {
        let model = model();
        let mut tracker = ChangeTracker::new(Arc::clone(&model), Config::default());
        blog_with_post(&mut tracker);

        let plan = tracker.plan(&store(&model)).unwrap();

        let commands = &plan.batch.commands;
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].table, "Blog");
        assert_eq!(commands[1].table, "Post");
        let fk = commands[1].values.iter().find(|c| c.name == "BlogId").unwrap();
        assert_eq!(fk.origin.as_ref().unwrap().command, 0);
    }

    #[test]
    fn save_replaces_temporary_keys() {
        let model = model();
        let store = store(&model);
        let mut tracker = ChangeTracker::new(Arc::clone(&model), Config::default());
        let (blog, post) = blog_with_post(&mut tracker);

        let rows = tracker.save_changes(&store).unwrap();

        assert_eq!(rows, 2);
        assert_eq!(tracker.objects.value(blog, 0), &Value::Integer(1));
        assert_eq!(tracker.objects.value(post, 1), &Value::Integer(1));
        assert_eq!(tracker.state(post), EntityState::Unchanged);
        assert!(!tracker.entry(post).is_temporary("BlogId").unwrap());
    }

    #[test]
    fn restrict_blocks_delete_and_restores_state() {
        let model = model();
        let store = store(&model);
        let mut tracker = ChangeTracker::new(Arc::clone(&model), Config::default());
        let (blog, post) = blog_with_post(&mut tracker);
        tracker.save_changes(&store).unwrap();

        tracker.delete_entry(blog).unwrap();
        let err = tracker.save_changes(&store).unwrap_err();

        assert!(matches!(err, CoreError::ReferentialIntegrity { behavior: DeleteBehavior::Restrict, .. }));
        assert_eq!(tracker.state(blog), EntityState::Deleted);
        assert_eq!(tracker.state(post), EntityState::Unchanged);
        assert_eq!(store.row_count("Blog"), 1);
    }

    #[test]
    fn deletes_run_dependents_first() {
        let model = model();
        let store = store(&model);
        let mut tracker = ChangeTracker::new(Arc::clone(&model), Config::default());
        let (blog, post) = blog_with_post(&mut tracker);
        tracker.save_changes(&store).unwrap();

        tracker.delete_entry(blog).unwrap();
        tracker.delete_entry(post).unwrap();
        let plan = tracker.plan(&store).unwrap();

        let order: Vec<_> = plan.batch.commands.iter().map(|c| (c.operation, c.table.as_str())).collect();
        assert_eq!(order, vec![(Operation::Delete, "Post"), (Operation::Delete, "Blog")]);
    }

    #[test]
    fn accept_all_refuses_temporary_keys() {
        let mut tracker = ChangeTracker::new(model(), Config::default());
        blog_with_post(&mut tracker);

        let err = tracker.accept_all_changes().unwrap_err();
        assert!(matches!(err, CoreError::InvalidStateTransition { .. }));
    }
}
