//! Session facade.

use crate::config::{ChangeTrackingStrategy, Config};
use crate::entry::{EntityEntry, EntityState};
use crate::error::{CoreError, CoreResult};
use crate::events::TrackerEvent;
use crate::model::{EntityType, Model, Navigation, NavigationKind};
use crate::object::NavigationValue;
use crate::tracker::{ChangeTracker, TrackNode};
use crate::types::ObjectId;
use entrack_storage::{Row, StoreBackend};
use entrack_value::{KeyValues, Value};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::debug;

/// A unit of work over one store.
///
/// `Session` owns the entity objects, the change tracker watching them and
/// a handle to the store changes are saved to. It provides:
/// - Object creation and slot access by property or navigation name
/// - Tracking operations (`add`, `attach`, `update`, `remove`, `detach`)
/// - Change detection and relationship fixup
/// - Saving pending changes as one ordered batch
/// - Loading rows with identity resolution
///
/// # Example
///
/// ```rust,ignore
/// use entrack_core::Session;
/// use entrack_storage::InMemoryStore;
/// use std::sync::Arc;
///
/// let mut session = Session::new(model, Arc::new(InMemoryStore::new()));
/// let blog = session.create("Blog")?;
/// let post = session.create("Post")?;
/// session.add_to_collection(blog, "Posts", post)?;
/// session.add(blog)?;
///
/// // Post.BlogId now holds Blog's temporary key.
/// session.save_changes()?;
/// // Both hold store-generated keys.
/// ```
pub struct Session {
    tracker: ChangeTracker,
    store: Arc<dyn StoreBackend>,
}

impl Session {
    /// Creates a session with the default configuration.
    #[must_use]
    pub fn new(model: Arc<Model>, store: Arc<dyn StoreBackend>) -> Self {
        Self::with_config(model, store, Config::default())
    }

    /// Creates a session with a custom configuration.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use entrack_core::{CascadeTiming, Config, Session};
    ///
    /// let config = Config::default()
    ///     .cascade_delete_timing(CascadeTiming::Immediate)
    ///     .delete_orphans_timing(CascadeTiming::Immediate);
    /// let session = Session::with_config(model, store, config);
    /// ```
    #[must_use]
    pub fn with_config(model: Arc<Model>, store: Arc<dyn StoreBackend>, config: Config) -> Self {
        Self {
            tracker: ChangeTracker::new(model, config),
            store,
        }
    }

    /// Returns the model.
    #[must_use]
    pub fn model(&self) -> &Model {
        self.tracker.model()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        self.tracker.config()
    }

    /// Returns the change tracker.
    #[must_use]
    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    // ---- objects ----

    /// Creates an untracked instance of `entity_type` with default values.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownEntityType`] if the model has no such type.
    pub fn create(&mut self, entity_type: &str) -> CoreResult<ObjectId> {
        let model = Arc::clone(&self.tracker.model);
        let entity_type = model.entity_type(entity_type)?;
        Ok(self.tracker.objects.create(entity_type))
    }

    /// Writes `property` of `object`.
    ///
    /// The write is seen by the tracker at the next change detection, or at
    /// once under [`ChangeTrackingStrategy::ChangedNotifications`].
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the object or property is unknown
    /// - the value's kind differs from the property's (`TypeMismatch`)
    /// - `Null` is written to a non-nullable property (`TypeMismatch`)
    /// - under change notifications, detection rejects the write
    pub fn set_value(&mut self, object: ObjectId, property: &str, value: impl Into<Value>) -> CoreResult<()> {
        let value = value.into();
        let entity_type = self.metadata(object)?;
        let slot = property_slot(entity_type, property)?;
        let metadata = entity_type.property(slot);
        let accepted = metadata.kind().accepts(&value) && (metadata.is_nullable() || !value.is_null());
        if !accepted {
            return Err(CoreError::TypeMismatch {
                entity_type: entity_type.name().to_string(),
                property: property.to_string(),
                expected: metadata.kind(),
                actual: value.to_string(),
            });
        }
        self.tracker.objects.set_value(object, slot, value);
        self.notify(object)
    }

    /// Returns the live value of `property`.
    ///
    /// # Errors
    ///
    /// Returns an error if the object or property is unknown.
    pub fn value(&self, object: ObjectId, property: &str) -> CoreResult<Value> {
        let slot = property_slot(self.metadata(object)?, property)?;
        Ok(self.tracker.objects.value(object, slot).clone())
    }

    /// Points reference navigation `navigation` of `object` at `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if an object or the navigation is unknown, the
    /// navigation is a collection, or `target` has an incompatible type.
    pub fn set_reference(&mut self, object: ObjectId, navigation: &str, target: Option<ObjectId>) -> CoreResult<()> {
        let (slot, metadata) = self.navigation(object, navigation, NavigationKind::Reference)?;
        if let Some(target) = target {
            self.check_target(object, &metadata, target)?;
        }
        self.tracker.objects.set_reference(object, slot, target);
        self.notify(object)
    }

    /// Returns the target of reference navigation `navigation`.
    ///
    /// # Errors
    ///
    /// Returns an error if the object or navigation is unknown, or the
    /// navigation is a collection.
    pub fn reference(&self, object: ObjectId, navigation: &str) -> CoreResult<Option<ObjectId>> {
        let (slot, _) = self.navigation(object, navigation, NavigationKind::Reference)?;
        Ok(self.tracker.objects.navigation(object, slot).as_reference())
    }

    /// Adds `target` to collection navigation `navigation` of `object`.
    ///
    /// # Errors
    ///
    /// Returns an error if an object or the navigation is unknown, the
    /// navigation is a reference, or `target` has an incompatible type.
    pub fn add_to_collection(&mut self, object: ObjectId, navigation: &str, target: ObjectId) -> CoreResult<()> {
        let (slot, metadata) = self.navigation(object, navigation, NavigationKind::Collection)?;
        self.check_target(object, &metadata, target)?;
        self.tracker.objects.collection_insert(object, slot, target);
        self.notify(object)
    }

    /// Removes `target` from collection navigation `navigation` of `object`.
    ///
    /// # Errors
    ///
    /// Returns an error if an object or the navigation is unknown, or the
    /// navigation is a reference.
    pub fn remove_from_collection(&mut self, object: ObjectId, navigation: &str, target: ObjectId) -> CoreResult<()> {
        let (slot, _) = self.navigation(object, navigation, NavigationKind::Collection)?;
        self.check_object(target)?;
        self.tracker.objects.collection_remove(object, slot, target);
        self.notify(object)
    }

    /// Returns the items of collection navigation `navigation`.
    ///
    /// # Errors
    ///
    /// Returns an error if the object or navigation is unknown, or the
    /// navigation is a reference.
    pub fn collection(&self, object: ObjectId, navigation: &str) -> CoreResult<Vec<ObjectId>> {
        let (slot, _) = self.navigation(object, navigation, NavigationKind::Collection)?;
        Ok(match self.tracker.objects.navigation(object, slot) {
            NavigationValue::Collection(items) => items.clone(),
            NavigationValue::Reference(_) => Vec::new(),
        })
    }

    /// Returns the concrete entity type name of `object`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownObject`] for ids of another session.
    pub fn entity_type_name(&self, object: ObjectId) -> CoreResult<&str> {
        Ok(self.metadata(object)?.name())
    }

    // ---- tracking ----

    /// Tracks `object` and its untracked graph as `Added`.
    ///
    /// Unset generated keys receive temporary values; unset client-generated
    /// GUIDs receive permanent ones. A tracked `object` is moved to `Added`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IdentityConflict`] if a key is already tracked;
    /// nothing is tracked then.
    pub fn add(&mut self, object: ObjectId) -> CoreResult<()> {
        self.check_object(object)?;
        if self.tracker.is_tracked(object) {
            return self.set_state(object, EntityState::Added);
        }
        self.tracker.track_graph(object, |_| Some(EntityState::Added))?;
        Ok(())
    }

    /// Tracks `object` and its untracked graph: instances with a set key
    /// become `Unchanged`, the others `Added`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IdentityConflict`] if a key is already tracked.
    pub fn attach(&mut self, object: ObjectId) -> CoreResult<()> {
        self.check_object(object)?;
        self.tracker.track_graph(object, |node| Some(node.attach_state()))?;
        Ok(())
    }

    /// Tracks `object` in `state` and the rest of its untracked graph as
    /// [`Session::attach`] does.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::KeyNotSet`] if `state` is `Unchanged`,
    /// `Modified` or `Deleted` but the object's generated key is unset, and
    /// [`CoreError::IdentityConflict`] if a key is already tracked.
    pub fn attach_with_state(&mut self, object: ObjectId, state: EntityState) -> CoreResult<()> {
        self.check_object(object)?;
        if self.tracker.is_tracked(object) {
            return self.set_state(object, state);
        }
        self.require_key(object, state)?;
        self.tracker.track_graph(object, |node| {
            if node.source.is_none() {
                Some(state)
            } else {
                Some(node.attach_state())
            }
        })?;
        Ok(())
    }

    /// Tracks `object` and its untracked graph as `Modified`, except
    /// instances whose key is unset, which become `Added`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IdentityConflict`] if a key is already tracked.
    pub fn update(&mut self, object: ObjectId) -> CoreResult<()> {
        self.check_object(object)?;
        if self.tracker.is_tracked(object) {
            return self.set_state(object, EntityState::Modified);
        }
        self.tracker.track_graph(object, |node| {
            Some(if node.key_set {
                EntityState::Modified
            } else {
                EntityState::Added
            })
        })?;
        Ok(())
    }

    /// Tracks the untracked graph reachable from `root`, choosing each
    /// instance's state with `selector`. Returns the number of instances
    /// that started being tracked.
    ///
    /// A selector returning `None` (or `Detached`) leaves the instance
    /// untracked and does not traverse its navigations.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IdentityConflict`] if a key is already tracked;
    /// nothing is tracked then.
    pub fn track_graph<F>(&mut self, root: ObjectId, selector: F) -> CoreResult<usize>
    where
        F: FnMut(&TrackNode<'_>) -> Option<EntityState>,
    {
        self.check_object(root)?;
        self.tracker.track_graph(root, selector)
    }

    /// Marks `object` for deletion.
    ///
    /// An untracked object is attached first. Deleting an `Added` entry
    /// stops tracking it.
    ///
    /// # Errors
    ///
    /// Returns an error if attaching fails or an immediate cascade fails.
    pub fn remove(&mut self, object: ObjectId) -> CoreResult<()> {
        self.check_object(object)?;
        if !self.tracker.is_tracked(object) {
            self.tracker.track_graph(object, |node| Some(node.attach_state()))?;
        }
        self.tracker.delete_entry(object)
    }

    /// Stops tracking `object`.
    ///
    /// The instance leaves the identity map and the principal-side
    /// navigations of tracked principals; foreign keys and navigations
    /// elsewhere keep the values they hold.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownObject`] for ids of another session.
    pub fn detach(&mut self, object: ObjectId) -> CoreResult<()> {
        self.check_object(object)?;
        if self.tracker.is_tracked(object) {
            debug!(%object, "detaching");
            self.tracker.unlink_from_principals(object);
            self.tracker.stop_tracking(object);
        }
        Ok(())
    }

    /// Forces the state of `object`.
    ///
    /// - `Detached` stops tracking, as [`Session::detach`]
    /// - `Unchanged` takes the current values as originals
    /// - `Modified` marks every non-key property modified
    /// - `Deleted` deletes as [`Session::remove`]
    /// - `Added` schedules an insert
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidStateTransition`] when an `Added` entry
    /// holding a temporary key is moved to `Unchanged` or `Modified`, and
    /// [`CoreError::KeyNotSet`] when an untracked object without a key is
    /// given a persisted state.
    pub fn set_state(&mut self, object: ObjectId, state: EntityState) -> CoreResult<()> {
        self.check_object(object)?;
        let current = self.tracker.state(object);
        if current == state {
            return Ok(());
        }
        if current == EntityState::Detached {
            self.require_key(object, state)?;
            return self.tracker.start_tracking(&[(object, state)]);
        }

        match state {
            EntityState::Detached => self.detach(object),
            EntityState::Deleted => self.tracker.delete_entry(object),
            EntityState::Added => {
                self.tracker.transition(object, EntityState::Added);
                Ok(())
            }
            EntityState::Unchanged => {
                self.refuse_temporary_key(object, state)?;
                self.tracker.accept_entry(object);
                Ok(())
            }
            EntityState::Modified => {
                self.refuse_temporary_key(object, state)?;
                let model = Arc::clone(&self.tracker.model);
                let entity_type = model.entity_type_by_id(self.tracker.objects.entity_type(object));
                if let Some(entry) = self.tracker.entries.get_mut(&object) {
                    for (slot, modified) in entry.modified.iter_mut().enumerate() {
                        *modified = !entity_type.is_primary_key_property(slot);
                    }
                }
                self.tracker.transition(object, EntityState::Modified);
                Ok(())
            }
        }
    }

    /// Returns the state of `object` (`Detached` if untracked).
    #[must_use]
    pub fn state(&self, object: ObjectId) -> EntityState {
        self.tracker.state(object)
    }

    /// Returns the entry of `object`, detecting changes first when
    /// automatic detection is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the object is unknown or detection fails.
    pub fn entry(&mut self, object: ObjectId) -> CoreResult<EntityEntry<'_>> {
        self.check_object(object)?;
        self.auto_detect()?;
        Ok(self.tracker.entry(object))
    }

    /// Returns every tracked entry, detecting changes first when automatic
    /// detection is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if detection fails.
    pub fn entries(&mut self) -> CoreResult<Vec<EntityEntry<'_>>> {
        self.auto_detect()?;
        Ok(self.tracker.entries())
    }

    /// Returns the number of entries in `state`, without detecting changes.
    #[must_use]
    pub fn count_for_state(&self, state: EntityState) -> usize {
        self.tracker.count_for_state(state)
    }

    /// Scans every tracked object for direct writes and restores
    /// foreign-key/navigation consistency.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::KeyModified`] if a key of a persisted entity
    /// changed, or the fixup error (such as [`CoreError::IdentityConflict`])
    /// that stopped a relationship change from being applied. On any error
    /// no entry changes state and no value or navigation written by fixup is
    /// kept; the direct writes remain and are detected again by the next
    /// call.
    pub fn detect_changes(&mut self) -> CoreResult<()> {
        self.tracker.detect_changes()
    }

    /// Deletes orphans and cascades deletes now, whatever the configured
    /// timings.
    ///
    /// # Errors
    ///
    /// Returns an error if fixup of a cascaded entry fails.
    pub fn cascade_changes(&mut self) -> CoreResult<()> {
        self.tracker.cascade_changes(true)
    }

    /// Accepts every pending change without saving.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidStateTransition`] if an `Added` entry
    /// still holds a temporary key.
    pub fn accept_all_changes(&mut self) -> CoreResult<()> {
        self.tracker.accept_all_changes()
    }

    /// Returns true if any entry is pending a store command.
    ///
    /// # Errors
    ///
    /// Returns an error if automatic detection fails.
    pub fn has_changes(&mut self) -> CoreResult<bool> {
        self.auto_detect()?;
        Ok(self.tracker.has_changes())
    }

    /// Saves every pending change as one batch. Returns the number of rows
    /// the store wrote.
    ///
    /// On failure no entry changes state and no temporary value is
    /// replaced, so the call can be retried.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - automatic change detection fails (see [`Session::detect_changes`])
    /// - a required relationship has no principal (`RequiredRelationship`)
    /// - a deleted principal is still referenced (`ReferentialIntegrity`)
    /// - the batch cannot be planned (`UnresolvedTemporaryValue`,
    ///   `CircularDependency`)
    /// - the store rejects the batch (`Storage`)
    pub fn save_changes(&mut self) -> CoreResult<usize> {
        let store = Arc::clone(&self.store);
        self.tracker.save_changes(store.as_ref())
    }

    // ---- materialization ----

    /// Loads the instance of `entity_type` with primary key `key`.
    ///
    /// An instance already tracked under that key is returned as it is.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is unknown, the key has the wrong
    /// arity, or the store query fails.
    pub fn load(&mut self, entity_type: &str, key: &KeyValues) -> CoreResult<Option<ObjectId>> {
        let model = Arc::clone(&self.tracker.model);
        let entity_type = model.entity_type(entity_type)?;
        let slots = entity_type.primary_key().properties();
        if key.len() != slots.len() {
            return Err(CoreError::invalid_operation(format!(
                "key {key} does not match the primary key of '{}'",
                entity_type.name()
            )));
        }
        if let Some(object) = self.tracker.find(entity_type.id(), 0, key) {
            return Ok(Some(object));
        }
        let filter: Vec<(String, Value)> = slots
            .iter()
            .zip(key.values())
            .map(|(&slot, value)| (entity_type.property(slot).name().to_string(), value.clone()))
            .collect();
        let rows = self.store.query(model.table_name(entity_type.id()), &filter)?;
        for row in rows {
            if let Some(object) = self.materialize(entity_type, &row)? {
                return Ok(Some(object));
            }
        }
        Ok(None)
    }

    /// Loads every stored instance of `entity_type`, derived types
    /// included.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is unknown or the store query fails.
    pub fn load_all(&mut self, entity_type: &str) -> CoreResult<Vec<ObjectId>> {
        let model = Arc::clone(&self.tracker.model);
        let entity_type = model.entity_type(entity_type)?;
        let rows = self.store.query(model.table_name(entity_type.id()), &[])?;
        let mut objects = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(object) = self.materialize(entity_type, &row)? {
                objects.push(object);
            }
        }
        debug!(entity_type = entity_type.name(), count = objects.len(), "loaded");
        Ok(objects)
    }

    /// Stops tracking everything; object values are left as they are.
    pub fn clear(&mut self) {
        self.tracker.clear();
    }

    /// Subscribes to tracker events.
    pub fn subscribe(&self) -> Receiver<TrackerEvent> {
        self.tracker.subscribe()
    }

    fn materialize(&mut self, requested: &EntityType, row: &Row) -> CoreResult<Option<ObjectId>> {
        let model = Arc::clone(&self.tracker.model);
        let Some(row_type) = model.find_entity_type(&row.entity_type) else {
            return Ok(None);
        };
        if !model.is_assignable(row_type.id(), requested.id()) {
            return Ok(None);
        }
        let key = KeyValues::new(
            row_type
                .primary_key()
                .properties()
                .iter()
                .map(|&slot| row.get(row_type.property(slot).name()).clone())
                .collect(),
        );
        if let Some(object) = self.tracker.find(row_type.id(), 0, &key) {
            return Ok(Some(object));
        }
        let object = self.tracker.objects.create(row_type);
        for (slot, property) in row_type.properties().iter().enumerate() {
            let value = row.get(property.name());
            if !value.is_null() || property.is_nullable() {
                self.tracker.objects.set_value(object, slot, value.clone());
            }
        }
        self.tracker.start_tracking(&[(object, EntityState::Unchanged)])?;
        Ok(Some(object))
    }

    fn auto_detect(&mut self) -> CoreResult<()> {
        if self.tracker.config.auto_detect_changes {
            self.tracker.detect_changes()?;
        }
        Ok(())
    }

    fn notify(&mut self, object: ObjectId) -> CoreResult<()> {
        if self.tracker.config.change_tracking == ChangeTrackingStrategy::ChangedNotifications
            && self.tracker.is_tracked(object)
        {
            self.tracker.detect_changes_for(&[object])?;
        }
        Ok(())
    }

    fn check_object(&self, object: ObjectId) -> CoreResult<()> {
        if self.tracker.objects.contains(object) {
            Ok(())
        } else {
            Err(CoreError::UnknownObject { object })
        }
    }

    fn metadata(&self, object: ObjectId) -> CoreResult<&EntityType> {
        self.check_object(object)?;
        Ok(self
            .tracker
            .model
            .entity_type_by_id(self.tracker.objects.entity_type(object)))
    }

    fn navigation(&self, object: ObjectId, name: &str, kind: NavigationKind) -> CoreResult<(usize, Navigation)> {
        let entity_type = self.metadata(object)?;
        let slot = entity_type
            .navigation_index(name)
            .filter(|&slot| entity_type.navigation(slot).kind() == kind)
            .ok_or_else(|| CoreError::unknown_navigation(entity_type.name(), name))?;
        Ok((slot, entity_type.navigation(slot).clone()))
    }

    fn check_target(&self, object: ObjectId, navigation: &Navigation, target: ObjectId) -> CoreResult<()> {
        let target_type = self.metadata(target)?;
        if self.tracker.model.is_assignable(target_type.id(), navigation.target()) {
            return Ok(());
        }
        Err(CoreError::NavigationTypeMismatch {
            entity_type: self.metadata(object)?.name().to_string(),
            navigation: navigation.name().to_string(),
            target: target_type.name().to_string(),
        })
    }

    fn require_key(&self, object: ObjectId, state: EntityState) -> CoreResult<()> {
        let persisted = matches!(
            state,
            EntityState::Unchanged | EntityState::Modified | EntityState::Deleted
        );
        if persisted && !self.tracker.is_key_set(object) {
            return Err(CoreError::KeyNotSet {
                entity_type: self.metadata(object)?.name().to_string(),
            });
        }
        Ok(())
    }

    fn refuse_temporary_key(&self, object: ObjectId, to: EntityState) -> CoreResult<()> {
        let Some(entry) = self.tracker.tracked(object) else {
            return Ok(());
        };
        let entity_type = self.metadata(object)?;
        let temporary = entity_type.keys().iter().any(|k| entry.has_temporary(k.properties()));
        if entry.state == EntityState::Added && temporary {
            return Err(CoreError::InvalidStateTransition {
                entity_type: entity_type.name().to_string(),
                from: entry.state,
                to,
                reason: "a key property holds a temporary value".to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("tracked", &self.tracker.entries.len())
            .field("objects", &self.tracker.objects.len())
            .finish_non_exhaustive()
    }
}

fn property_slot(entity_type: &EntityType, property: &str) -> CoreResult<usize> {
    entity_type
        .property_index(property)
        .ok_or_else(|| CoreError::unknown_property(entity_type.name(), property))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeleteBehavior, EntityTypeBuilder, ModelBuilder, PropertyBuilder, RelationshipBuilder};
    use entrack_storage::InMemoryStore;
    use entrack_value::ValueKind;

    fn session_with(config: Config) -> Session {
        let model = ModelBuilder::new()
            .entity_type(
                EntityTypeBuilder::new("Blog")
                    .property(PropertyBuilder::new("Id", ValueKind::Integer).store_generated())
                    .property(PropertyBuilder::new("Title", ValueKind::Text).nullable())
                    .key(&["Id"]),
            )
            .entity_type(
                EntityTypeBuilder::new("Post")
                    .property(PropertyBuilder::new("Id", ValueKind::Integer).store_generated())
                    .property(PropertyBuilder::new("BlogId", ValueKind::Integer).nullable())
                    .key(&["Id"]),
            )
            .relationship(
                RelationshipBuilder::new("Blog", "Post")
                    .foreign_key(&["BlogId"])
                    .principal_collection("Posts")
                    .dependent_reference("Blog")
                    .on_delete(DeleteBehavior::SetNull),
            )
            .build()
            .unwrap();
        let model = Arc::new(model);
        let store = Arc::new(InMemoryStore::with_foreign_keys(model.foreign_key_constraints()));
        Session::with_config(model, store, config)
    }

    fn session() -> Session {
        session_with(Config::default())
    }

    #[test]
    fn set_value_checks_kind() {
        let mut session = session();
        let blog = session.create("Blog").unwrap();

        let err = session.set_value(blog, "Title", 5).unwrap_err();
        assert!(matches!(err, CoreError::TypeMismatch { .. }));
        let err = session.set_value(blog, "Id", Value::Null).unwrap_err();
        assert!(matches!(err, CoreError::TypeMismatch { .. }));
        session.set_value(blog, "Title", "rust").unwrap();
        assert_eq!(session.value(blog, "Title").unwrap(), Value::from("rust"));
    }

    #[test]
    fn navigation_kind_is_checked() {
        let mut session = session();
        let blog = session.create("Blog").unwrap();
        let post = session.create("Post").unwrap();

        assert!(matches!(
            session.set_reference(blog, "Posts", Some(post)),
            Err(CoreError::UnknownNavigation { .. })
        ));
        assert!(matches!(
            session.set_reference(post, "Blog", Some(post)),
            Err(CoreError::NavigationTypeMismatch { .. })
        ));
    }

    #[test]
    fn unknown_objects_are_rejected() {
        let mut session = session();
        let err = session.add(ObjectId::new(42)).unwrap_err();
        assert!(matches!(err, CoreError::UnknownObject { .. }));
    }

    #[test]
    fn add_then_save_round_trip() {
        let mut session = session();
        let blog = session.create("Blog").unwrap();
        let post = session.create("Post").unwrap();
        session.add_to_collection(blog, "Posts", post).unwrap();
        session.add(blog).unwrap();

        assert_eq!(session.state(post), EntityState::Added);
        assert_eq!(session.save_changes().unwrap(), 2);
        assert_eq!(session.value(post, "BlogId").unwrap(), session.value(blog, "Id").unwrap());

        let mut other = Session::new(Arc::clone(&session.tracker.model), Arc::clone(&session.store));
        let loaded = other.load("Blog", &KeyValues::single(1)).unwrap().unwrap();
        let posts = other.load_all("Post").unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(other.collection(loaded, "Posts").unwrap(), posts);
    }

    #[test]
    fn load_resolves_identity() {
        let mut session = session();
        let blog = session.create("Blog").unwrap();
        session.add(blog).unwrap();
        session.save_changes().unwrap();

        let loaded = session.load("Blog", &KeyValues::single(1)).unwrap();
        assert_eq!(loaded, Some(blog));
    }

    #[test]
    fn attach_without_key_is_refused_for_persisted_states() {
        let mut session = session();
        let blog = session.create("Blog").unwrap();

        let err = session.attach_with_state(blog, EntityState::Unchanged).unwrap_err();
        assert!(matches!(err, CoreError::KeyNotSet { .. }));
        session.attach(blog).unwrap();
        assert_eq!(session.state(blog), EntityState::Added);
    }

    #[test]
    fn set_state_transitions() {
        let mut session = session();
        let blog = session.create("Blog").unwrap();
        session.set_value(blog, "Id", 3).unwrap();
        session.attach(blog).unwrap();

        session.set_state(blog, EntityState::Modified).unwrap();
        assert_eq!(session.entry(blog).unwrap().modified_properties(), vec!["Title"]);

        session.set_state(blog, EntityState::Unchanged).unwrap();
        assert!(session.entry(blog).unwrap().modified_properties().is_empty());

        session.set_state(blog, EntityState::Deleted).unwrap();
        session.set_state(blog, EntityState::Unchanged).unwrap();
        assert_eq!(session.state(blog), EntityState::Unchanged);

        session.set_state(blog, EntityState::Detached).unwrap();
        assert_eq!(session.state(blog), EntityState::Detached);
    }

    #[test]
    fn notifications_detect_at_write_time() {
        let config = Config::default()
            .auto_detect_changes(false)
            .change_tracking(ChangeTrackingStrategy::ChangedNotifications);
        let mut session = session_with(config);
        let blog = session.create("Blog").unwrap();
        session.set_value(blog, "Id", 3).unwrap();
        session.attach(blog).unwrap();

        session.set_value(blog, "Title", "changed").unwrap();
        assert_eq!(session.state(blog), EntityState::Modified);
    }

    #[test]
    fn detach_unlinks_from_principal() {
        let mut session = session();
        let blog = session.create("Blog").unwrap();
        let post = session.create("Post").unwrap();
        session.set_value(blog, "Id", 1).unwrap();
        session.set_value(post, "Id", 2).unwrap();
        session.set_reference(post, "Blog", Some(blog)).unwrap();
        session.attach(post).unwrap();
        assert_eq!(session.collection(blog, "Posts").unwrap(), vec![post]);

        session.detach(post).unwrap();

        assert_eq!(session.state(post), EntityState::Detached);
        assert!(session.collection(blog, "Posts").unwrap().is_empty());
        assert_eq!(session.value(post, "BlogId").unwrap(), Value::Integer(1));
    }
}
