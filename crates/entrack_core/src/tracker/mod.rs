//! The change tracker: registry of tracked entries.
//!
//! The tracker owns the object arena and, for every tracked instance, a
//! [`TrackedEntry`]. Two indexes are kept in step with entry snapshots:
//!
//! - the identity map, `(hierarchy root, key, key tuple) -> instance`, over
//!   the primary key and every alternate key
//! - the dependent index, `(relationship, foreign-key tuple) -> instances`,
//!   which finds the dependents of a principal key even before that
//!   principal is tracked
//!
//! All tracker-initiated writes go through [`ChangeTracker::write_property`]
//! and the navigation helpers below, which update the object and the
//! snapshot together. Writes made directly to objects are only discovered
//! by change detection.

mod detect;
mod graph;

pub use graph::TrackNode;

use crate::config::Config;
use crate::entry::{EntityEntry, EntityState, TrackedEntry};
use crate::error::{CoreError, CoreResult};
use crate::events::{EventFeed, TrackerEvent, TrackerEventKind};
use crate::keys::TemporaryValueGenerator;
use crate::model::{Model, NavigationKind, Relationship};
use crate::object::{NavigationValue, ObjectGraph};
use crate::types::{EntityTypeId, ObjectId, RelationshipId};
use entrack_value::{KeyValues, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct IdentityKey {
    root: EntityTypeId,
    key: usize,
    values: KeyValues,
}

impl IdentityKey {
    pub(crate) fn new(root: EntityTypeId, key: usize, values: KeyValues) -> Self {
        Self { root, key, values }
    }
}

/// Copy of the tracker state restored when a save fails.
#[derive(Debug, Clone)]
pub(crate) struct Checkpoint {
    objects: ObjectGraph,
    entries: BTreeMap<ObjectId, TrackedEntry>,
    identity: HashMap<IdentityKey, ObjectId>,
    dependents: HashMap<(RelationshipId, KeyValues), BTreeSet<ObjectId>>,
}

/// Registry of tracked entries and the object arena they describe.
#[derive(Debug)]
pub struct ChangeTracker {
    pub(crate) model: Arc<Model>,
    pub(crate) config: Config,
    pub(crate) objects: ObjectGraph,
    pub(crate) entries: BTreeMap<ObjectId, TrackedEntry>,
    identity: HashMap<IdentityKey, ObjectId>,
    dependents: HashMap<(RelationshipId, KeyValues), BTreeSet<ObjectId>>,
    pub(crate) temporary_values: TemporaryValueGenerator,
    events: Arc<EventFeed>,
}

impl ChangeTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new(model: Arc<Model>, config: Config) -> Self {
        Self {
            temporary_values: TemporaryValueGenerator::new(config.temporary_key_seed),
            events: Arc::new(EventFeed::with_capacity(config.event_history)),
            model,
            config,
            objects: ObjectGraph::new(),
            entries: BTreeMap::new(),
            identity: HashMap::new(),
            dependents: HashMap::new(),
        }
    }

    /// Returns the model.
    #[must_use]
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the object arena.
    #[must_use]
    pub fn objects(&self) -> &ObjectGraph {
        &self.objects
    }

    /// Returns the state of `object` (`Detached` if untracked).
    #[must_use]
    pub fn state(&self, object: ObjectId) -> EntityState {
        self.entries
            .get(&object)
            .map_or(EntityState::Detached, |e| e.state)
    }

    /// Returns true if `object` is tracked.
    #[must_use]
    pub fn is_tracked(&self, object: ObjectId) -> bool {
        self.entries.contains_key(&object)
    }

    /// Returns an entry view for `object` without detecting changes.
    #[must_use]
    pub fn entry(&self, object: ObjectId) -> EntityEntry<'_> {
        EntityEntry::new(self, object)
    }

    /// Returns views of every tracked entry, in object order.
    #[must_use]
    pub fn entries(&self) -> Vec<EntityEntry<'_>> {
        self.entries.keys().map(|&o| EntityEntry::new(self, o)).collect()
    }

    /// Returns the number of entries in `state`.
    #[must_use]
    pub fn count_for_state(&self, state: EntityState) -> usize {
        self.entries.values().filter(|e| e.state == state).count()
    }

    /// Returns true if any entry is pending a store command.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.entries.values().any(|e| e.state.has_pending_changes())
    }

    /// Returns the instance tracked under `key` (key 0 is the primary key)
    /// in the hierarchy of `entity_type`.
    #[must_use]
    pub fn find(&self, entity_type: EntityTypeId, key: usize, values: &KeyValues) -> Option<ObjectId> {
        let ik = IdentityKey::new(self.model.root_of(entity_type), key, values.clone());
        self.identity
            .get(&ik)
            .copied()
            .filter(|o| self.model.is_assignable(self.objects.entity_type(*o), entity_type))
    }

    /// Subscribes to tracker events.
    pub fn subscribe(&self) -> Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    /// Returns the event feed.
    #[must_use]
    pub fn events(&self) -> &EventFeed {
        &self.events
    }

    pub(crate) fn tracked(&self, object: ObjectId) -> Option<&TrackedEntry> {
        self.entries.get(&object)
    }

    pub(crate) fn type_name(&self, object: ObjectId) -> &str {
        self.model
            .entity_type_by_id(self.objects.entity_type(object))
            .name()
    }

    /// Values the tracker knows for `slots`: the snapshot if tracked, the
    /// live values otherwise.
    pub(crate) fn known_key(&self, object: ObjectId, slots: &[usize]) -> KeyValues {
        match self.entries.get(&object) {
            Some(entry) => entry.key(slots),
            None => KeyValues::new(
                slots
                    .iter()
                    .map(|&s| self.objects.value(object, s).clone())
                    .collect(),
            ),
        }
    }

    pub(crate) fn known_navigation(&self, object: ObjectId, slot: usize) -> &NavigationValue {
        match self.entries.get(&object) {
            Some(entry) => &entry.navigations[slot],
            None => self.objects.navigation(object, slot),
        }
    }

    pub(crate) fn primary_key(&self, object: ObjectId) -> KeyValues {
        let entity_type = self.model.entity_type_by_id(self.objects.entity_type(object));
        self.known_key(object, entity_type.primary_key().properties())
    }

    pub(crate) fn principal_key(&self, principal: ObjectId, rel: &Relationship) -> KeyValues {
        self.known_key(principal, rel.principal_properties())
    }

    pub(crate) fn foreign_key(&self, dependent: ObjectId, rel: &Relationship) -> KeyValues {
        self.known_key(dependent, rel.foreign_key())
    }

    /// Returns the tracked principal whose key `key` references.
    pub(crate) fn find_principal(&self, rel: &Relationship, key: &KeyValues) -> Option<ObjectId> {
        if key.has_null() {
            return None;
        }
        self.find(rel.principal(), rel.principal_key(), key)
    }

    /// Returns live dependents referencing `key` through `rel`: tracked, not
    /// deleted, and not severed by a conceptual null.
    pub(crate) fn dependents_of(&self, rel: &Relationship, key: &KeyValues) -> Vec<ObjectId> {
        if key.has_null() {
            return Vec::new();
        }
        self.dependents
            .get(&(rel.id(), key.clone()))
            .map(|set| {
                set.iter()
                    .copied()
                    .filter(|d| {
                        self.entries.get(d).is_some_and(|e| {
                            e.state != EntityState::Deleted && !e.conceptual_nulls.contains(&rel.id())
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns true if `dependent` currently references `principal` through
    /// its navigation or its foreign key.
    pub(crate) fn references(&self, rel: &Relationship, dependent: ObjectId, principal: ObjectId) -> bool {
        if let Some(slot) = rel.dependent_navigation() {
            if self.known_navigation(dependent, slot).as_reference() == Some(principal) {
                return true;
            }
        }
        let conceptual = self
            .entries
            .get(&dependent)
            .is_some_and(|e| e.conceptual_nulls.contains(&rel.id()));
        let fk = self.foreign_key(dependent, rel);
        !conceptual && !fk.has_null() && fk == self.principal_key(principal, rel)
    }

    pub(crate) fn emit(&self, object: ObjectId, kind: TrackerEventKind) {
        self.events.emit(object, self.type_name(object), kind);
    }

    pub(crate) fn transition(&mut self, object: ObjectId, to: EntityState) {
        let Some(entry) = self.entries.get_mut(&object) else {
            return;
        };
        let from = entry.state;
        if from == to {
            return;
        }
        entry.state = to;
        if to == EntityState::Deleted {
            entry.conceptual_nulls.clear();
        }
        trace!(%object, %from, %to, "state changed");
        self.emit(object, TrackerEventKind::StateChanged { from, to });
    }

    /// Adds a fully built entry to the registry and both indexes.
    pub(crate) fn register(&mut self, object: ObjectId, entry: TrackedEntry) {
        let state = entry.state;
        self.entries.insert(object, entry);
        self.index(object);
        self.emit(object, TrackerEventKind::Tracked { state });
    }

    /// Removes `object` from the registry without touching any navigation.
    pub(crate) fn stop_tracking(&mut self, object: ObjectId) {
        if !self.entries.contains_key(&object) {
            return;
        }
        self.unindex(object);
        let from = self.state(object);
        self.entries.remove(&object);
        trace!(%object, %from, "stopped tracking");
        self.emit(
            object,
            TrackerEventKind::StateChanged {
                from,
                to: EntityState::Detached,
            },
        );
    }

    fn index(&mut self, object: ObjectId) {
        let model = Arc::clone(&self.model);
        let Some(entry) = self.entries.get(&object) else {
            return;
        };
        let entity_type = model.entity_type_by_id(entry.entity_type);
        for (k, key) in entity_type.keys().iter().enumerate() {
            let values = entry.key(key.properties());
            if !values.has_null() {
                self.identity
                    .insert(IdentityKey::new(entity_type.root(), k, values), object);
            }
        }
        for rel in model.relationships_as_dependent(entity_type.id()) {
            let values = entry.key(rel.foreign_key());
            if !values.has_null() {
                self.dependents.entry((rel.id(), values)).or_default().insert(object);
            }
        }
    }

    fn unindex(&mut self, object: ObjectId) {
        let model = Arc::clone(&self.model);
        let Some(entry) = self.entries.get(&object) else {
            return;
        };
        let entity_type = model.entity_type_by_id(entry.entity_type);
        for (k, key) in entity_type.keys().iter().enumerate() {
            let ik = IdentityKey::new(entity_type.root(), k, entry.key(key.properties()));
            if self.identity.get(&ik) == Some(&object) {
                self.identity.remove(&ik);
            }
        }
        let buckets: Vec<_> = model
            .relationships_as_dependent(entity_type.id())
            .map(|rel| (rel.id(), entry.key(rel.foreign_key())))
            .collect();
        for bucket in buckets {
            self.remove_dependent(&bucket, object);
        }
    }

    fn remove_dependent(&mut self, bucket: &(RelationshipId, KeyValues), object: ObjectId) {
        if let Some(set) = self.dependents.get_mut(bucket) {
            set.remove(&object);
            if set.is_empty() {
                self.dependents.remove(bucket);
            }
        }
    }

    /// Writes property `slot` of a tracked instance and keeps every index,
    /// flag and dependent foreign key consistent with the new value.
    ///
    /// Untracked instances are written directly.
    pub(crate) fn write_property(
        &mut self,
        object: ObjectId,
        slot: usize,
        value: Value,
        temporary: bool,
    ) -> CoreResult<()> {
        let model = Arc::clone(&self.model);
        let Some(entry) = self.entries.get(&object) else {
            self.objects.set_value(object, slot, value);
            return Ok(());
        };
        let entity_type = model.entity_type_by_id(entry.entity_type);
        let old = entry.snapshot[slot].clone();
        if old == value {
            if self.objects.value(object, slot) != &value {
                self.objects.set_value(object, slot, value);
            }
            if let Some(entry) = self.entries.get_mut(&object) {
                entry.temporary[slot] = temporary;
            }
            return Ok(());
        }

        if entry.state != EntityState::Added && entity_type.is_key_property(slot) {
            return Err(CoreError::KeyModified {
                entity_type: entity_type.name().to_string(),
                property: entity_type.property(slot).name().to_string(),
            });
        }
        for (k, key) in entity_type.keys().iter().enumerate() {
            if !key.properties().contains(&slot) {
                continue;
            }
            let values = replaced(entry, key.properties(), slot, &value);
            if values.has_null() {
                continue;
            }
            let ik = IdentityKey::new(entity_type.root(), k, values.clone());
            if self.identity.get(&ik).is_some_and(|other| *other != object) {
                return Err(CoreError::IdentityConflict {
                    entity_type: entity_type.name().to_string(),
                    key: values,
                });
            }
        }

        self.objects.set_value(object, slot, value.clone());
        let mut became_modified = false;
        if let Some(entry) = self.entries.get_mut(&object) {
            entry.snapshot[slot] = value;
            entry.temporary[slot] = temporary;
            if matches!(entry.state, EntityState::Unchanged | EntityState::Modified) {
                entry.modified[slot] = entry.original[slot] != entry.snapshot[slot];
                became_modified = entry.modified[slot] && entry.state == EntityState::Unchanged;
            }
        }
        if became_modified {
            self.transition(object, EntityState::Modified);
        }
        self.value_changed(object, slot, old)
    }

    /// Re-indexes `object` after property `slot` changed from `old`, and
    /// moves dependents of any principal key the slot belongs to.
    fn value_changed(&mut self, object: ObjectId, slot: usize, old: Value) -> CoreResult<()> {
        let model = Arc::clone(&self.model);
        let Some(entry) = self.entries.get(&object) else {
            return Ok(());
        };
        let entity_type = model.entity_type_by_id(entry.entity_type);

        let mut moves = Vec::new();
        for rel in model.relationships_as_dependent(entity_type.id()) {
            if rel.foreign_key().contains(&slot) {
                let previous = replaced(entry, rel.foreign_key(), slot, &old);
                moves.push((rel.id(), previous, entry.key(rel.foreign_key())));
            }
        }

        let mut rekeys = Vec::new();
        for (k, key) in entity_type.keys().iter().enumerate() {
            if key.properties().contains(&slot) {
                let previous = replaced(entry, key.properties(), slot, &old);
                let temporary: Vec<bool> = key.properties().iter().map(|&s| entry.temporary[s]).collect();
                rekeys.push((k, previous, entry.key(key.properties()), temporary));
            }
        }

        for (rel, previous, current) in moves {
            if !previous.has_null() {
                self.remove_dependent(&(rel, previous), object);
            }
            if !current.has_null() {
                self.dependents.entry((rel, current)).or_default().insert(object);
            }
        }

        for (k, previous, current, temporary) in rekeys {
            if !previous.has_null() {
                let ik = IdentityKey::new(entity_type.root(), k, previous.clone());
                if self.identity.get(&ik) == Some(&object) {
                    self.identity.remove(&ik);
                }
            }
            if !current.has_null() {
                self.identity
                    .insert(IdentityKey::new(entity_type.root(), k, current.clone()), object);
            }
            if previous.has_null() {
                continue;
            }
            for rel in model.relationships_as_principal(entity_type.id()) {
                if rel.principal_key() != k {
                    continue;
                }
                let followers: Vec<ObjectId> = self
                    .dependents
                    .get(&(rel.id(), previous.clone()))
                    .map(|set| set.iter().copied().filter(|d| *d != object).collect())
                    .unwrap_or_default();
                for dependent in followers {
                    if self
                        .entries
                        .get(&dependent)
                        .is_some_and(|e| e.conceptual_nulls.contains(&rel.id()))
                    {
                        continue;
                    }
                    trace!(%object, %dependent, relationship = rel.name(), key = %current, "propagating key");
                    for (i, &fk) in rel.foreign_key().iter().enumerate() {
                        self.write_property(dependent, fk, current.values()[i].clone(), temporary[i])?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Points reference navigation `slot` of `object` at `target`.
    pub(crate) fn write_reference(&mut self, object: ObjectId, slot: usize, target: Option<ObjectId>) {
        if self.objects.navigation(object, slot).as_reference() != target {
            self.objects.set_reference(object, slot, target);
        }
        if let Some(entry) = self.entries.get_mut(&object) {
            entry.navigations[slot] = NavigationValue::Reference(target);
        }
    }

    pub(crate) fn collection_insert(&mut self, object: ObjectId, slot: usize, item: ObjectId) {
        self.objects.collection_insert(object, slot, item);
        if let Some(entry) = self.entries.get_mut(&object) {
            if let NavigationValue::Collection(items) = &mut entry.navigations[slot] {
                if !items.contains(&item) {
                    items.push(item);
                }
            }
        }
    }

    pub(crate) fn collection_remove(&mut self, object: ObjectId, slot: usize, item: ObjectId) {
        self.objects.collection_remove(object, slot, item);
        if let Some(entry) = self.entries.get_mut(&object) {
            if let NavigationValue::Collection(items) = &mut entry.navigations[slot] {
                items.retain(|i| *i != item);
            }
        }
    }

    /// Makes the snapshot of navigation `slot` match the live object.
    pub(crate) fn acknowledge_navigation(&mut self, object: ObjectId, slot: usize) {
        let current = self.objects.navigation(object, slot).clone();
        if let Some(entry) = self.entries.get_mut(&object) {
            entry.navigations[slot] = current;
        }
    }

    /// Adds `dependent` to the principal-side navigation of `principal`.
    pub(crate) fn add_to_inverse(&mut self, rel: &Relationship, principal: ObjectId, dependent: ObjectId) {
        let Some(slot) = rel.principal_navigation() else {
            return;
        };
        let navigation = self
            .model
            .entity_type_by_id(self.objects.entity_type(principal))
            .navigation(slot)
            .kind();
        match navigation {
            NavigationKind::Collection => self.collection_insert(principal, slot, dependent),
            NavigationKind::Reference => self.write_reference(principal, slot, Some(dependent)),
        }
    }

    /// Removes `dependent` from the principal-side navigation of a tracked
    /// `principal`.
    pub(crate) fn remove_from_inverse(&mut self, rel: &Relationship, principal: ObjectId, dependent: ObjectId) {
        let Some(slot) = rel.principal_navigation() else {
            return;
        };
        if !self.is_tracked(principal) {
            return;
        }
        let (is_collection, holds) = match self.known_navigation(principal, slot) {
            NavigationValue::Collection(_) => (true, false),
            NavigationValue::Reference(current) => (false, *current == Some(dependent)),
        };
        if is_collection {
            self.collection_remove(principal, slot, dependent);
        } else if holds {
            self.write_reference(principal, slot, None);
        }
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            objects: self.objects.clone(),
            entries: self.entries.clone(),
            identity: self.identity.clone(),
            dependents: self.dependents.clone(),
        }
    }

    pub(crate) fn restore(&mut self, checkpoint: Checkpoint) {
        self.objects = checkpoint.objects;
        self.entries = checkpoint.entries;
        self.identity = checkpoint.identity;
        self.dependents = checkpoint.dependents;
    }

    /// Stops tracking every entry; object values are left as they are.
    pub(crate) fn clear(&mut self) {
        let tracked: Vec<ObjectId> = self.entries.keys().copied().collect();
        for object in tracked {
            self.stop_tracking(object);
        }
    }
}

/// Returns the snapshot tuple at `slots` with `slot` replaced by `value`.
fn replaced(entry: &TrackedEntry, slots: &[usize], slot: usize, value: &Value) -> KeyValues {
    KeyValues::new(
        slots
            .iter()
            .map(|&s| if s == slot { value.clone() } else { entry.snapshot[s].clone() })
            .collect(),
    )
}
