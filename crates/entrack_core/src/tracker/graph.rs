//! Graph traversal and start of tracking.

use super::{ChangeTracker, IdentityKey};
use crate::entry::{EntityState, TrackedEntry};
use crate::error::{CoreError, CoreResult};
use crate::keys::is_set;
use crate::model::{Relationship, ValueGeneration};
use crate::types::ObjectId;
use entrack_value::{KeyValues, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// An untracked instance reached while traversing a graph.
///
/// The state selector of a graph traversal receives one node per reachable
/// untracked instance and picks its initial state; returning `None` leaves
/// the instance untracked and stops the traversal there.
#[derive(Debug, Clone)]
pub struct TrackNode<'a> {
    /// The instance.
    pub object: ObjectId,
    /// Its concrete entity type name.
    pub entity_type: &'a str,
    /// The instance whose navigation led here (`None` for the root).
    pub source: Option<ObjectId>,
    /// The navigation followed from `source`.
    pub navigation: Option<&'a str>,
    /// Whether the primary key holds a value: non-generated keys always
    /// count as set, generated ones when they differ from the default.
    pub key_set: bool,
    /// Whether any primary key property is generated.
    pub key_generated: bool,
}

impl TrackNode<'_> {
    /// State used when attaching: `Unchanged` if the key is set, otherwise
    /// `Added`.
    #[must_use]
    pub fn attach_state(&self) -> EntityState {
        if self.key_set {
            EntityState::Unchanged
        } else {
            EntityState::Added
        }
    }

    /// State used for instances discovered through a navigation during
    /// change detection: `Modified` if a generated key is already set,
    /// otherwise `Added`.
    #[must_use]
    pub fn discovered_state(&self) -> EntityState {
        if self.key_generated && self.key_set {
            EntityState::Modified
        } else {
            EntityState::Added
        }
    }
}

type Pending = HashMap<(ObjectId, usize), (Value, bool)>;

impl ChangeTracker {
    /// Tracks every untracked instance reachable from `root`, breadth-first,
    /// in the state chosen by `selector`. Returns the number of instances
    /// that started being tracked.
    pub(crate) fn track_graph<F>(&mut self, root: ObjectId, mut selector: F) -> CoreResult<usize>
    where
        F: FnMut(&TrackNode<'_>) -> Option<EntityState>,
    {
        if self.is_tracked(root) {
            return Ok(0);
        }
        let model = Arc::clone(&self.model);
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut nodes = Vec::new();
        visited.insert(root);
        queue.push_back((root, None, None));

        while let Some((object, source, navigation)) = queue.pop_front() {
            let entity_type = model.entity_type_by_id(self.objects.entity_type(object));
            let node = TrackNode {
                object,
                entity_type: entity_type.name(),
                source,
                navigation,
                key_set: self.is_key_set(object),
                key_generated: entity_type
                    .primary_key()
                    .properties()
                    .iter()
                    .any(|&s| entity_type.property(s).generation() != ValueGeneration::Never),
            };
            let Some(state) = selector(&node).filter(|s| *s != EntityState::Detached) else {
                continue;
            };
            nodes.push((object, state));
            for (slot, nav) in entity_type.navigations().iter().enumerate() {
                for target in self.objects.navigation(object, slot).targets() {
                    if !self.is_tracked(target) && visited.insert(target) {
                        queue.push_back((target, Some(object), Some(nav.name())));
                    }
                }
            }
        }

        let count = nodes.len();
        self.start_tracking(&nodes)?;
        Ok(count)
    }

    /// Returns true if the primary key of `object` holds a value.
    pub(crate) fn is_key_set(&self, object: ObjectId) -> bool {
        let entity_type = self.model.entity_type_by_id(self.objects.entity_type(object));
        entity_type.primary_key().properties().iter().all(|&slot| {
            entity_type.property(slot).generation() == ValueGeneration::Never
                || is_set(self.objects.value(object, slot))
        })
    }

    /// Starts tracking `nodes` in the given states.
    ///
    /// Values are generated and key-sharing foreign keys resolved first;
    /// every identity is then checked before anything is registered, so a
    /// conflict leaves the tracker untouched. Initial fixup runs once all
    /// nodes are registered.
    pub(crate) fn start_tracking(&mut self, nodes: &[(ObjectId, EntityState)]) -> CoreResult<()> {
        let model = Arc::clone(&self.model);
        let mut pending = Pending::new();

        for &(object, state) in nodes {
            if state != EntityState::Added {
                continue;
            }
            let entity_type = model.entity_type_by_id(self.objects.entity_type(object));
            for (slot, property) in entity_type.properties().iter().enumerate() {
                if property.generation() == ValueGeneration::Never || is_set(self.objects.value(object, slot)) {
                    continue;
                }
                if let Some(generated) = self.temporary_values.generate(property)? {
                    pending.insert((object, slot), generated);
                }
            }
        }
        self.propagate_shared_keys(nodes, &mut pending);

        let mut seen: HashMap<IdentityKey, ObjectId> = HashMap::new();
        for &(object, _) in nodes {
            let entity_type = model.entity_type_by_id(self.objects.entity_type(object));
            for (k, key) in entity_type.keys().iter().enumerate() {
                let values = KeyValues::new(
                    key.properties()
                        .iter()
                        .map(|&slot| self.pending_value(object, slot, &pending).0)
                        .collect(),
                );
                if values.has_null() {
                    continue;
                }
                let ik = IdentityKey::new(entity_type.root(), k, values.clone());
                let taken = self.identity.get(&ik).is_some_and(|o| *o != object)
                    || seen.get(&ik).is_some_and(|o| *o != object);
                if taken {
                    return Err(CoreError::IdentityConflict {
                        entity_type: entity_type.name().to_string(),
                        key: values,
                    });
                }
                seen.insert(ik, object);
            }
        }

        for &(object, state) in nodes {
            let entity_type = model.entity_type_by_id(self.objects.entity_type(object));
            let count = entity_type.properties().len();
            let mut temporary = vec![false; count];
            for (slot, flag) in temporary.iter_mut().enumerate() {
                if let Some((value, is_temporary)) = pending.get(&(object, slot)) {
                    self.objects.set_value(object, slot, value.clone());
                    *flag = *is_temporary;
                }
            }
            let mut entry = TrackedEntry::new(
                state,
                entity_type.id(),
                self.objects.values(object).to_vec(),
                self.objects.navigations(object).to_vec(),
                temporary,
            );
            if state == EntityState::Modified {
                for (slot, modified) in entry.modified.iter_mut().enumerate() {
                    *modified = !entity_type.is_primary_key_property(slot);
                }
            }
            debug!(%object, entity_type = entity_type.name(), %state, "tracking");
            self.register(object, entry);
        }

        for &(object, _) in nodes {
            if self.is_tracked(object) {
                self.initial_fixup(object)?;
            }
        }
        Ok(())
    }

    fn pending_value(&self, object: ObjectId, slot: usize, pending: &Pending) -> (Value, bool) {
        if let Some((value, temporary)) = pending.get(&(object, slot)) {
            return (value.clone(), *temporary);
        }
        match self.entries.get(&object) {
            Some(entry) => (entry.snapshot[slot].clone(), entry.temporary[slot]),
            None => (self.objects.value(object, slot).clone(), false),
        }
    }

    /// Copies principal key values into foreign keys that are also primary
    /// key properties, following navigations, so the identity of every new
    /// node is known before it is checked.
    fn propagate_shared_keys(&self, nodes: &[(ObjectId, EntityState)], pending: &mut Pending) {
        let model = Arc::clone(&self.model);
        for _ in 0..=nodes.len() {
            let mut changed = false;
            for &(object, _) in nodes {
                let entity_type = model.entity_type_by_id(self.objects.entity_type(object));
                for rel in model.relationships_as_dependent(entity_type.id()) {
                    if !rel
                        .foreign_key()
                        .iter()
                        .any(|&slot| entity_type.is_primary_key_property(slot))
                    {
                        continue;
                    }
                    let Some(principal) = self.navigated_principal(rel, object, nodes) else {
                        continue;
                    };
                    for (&fk, &pk) in rel.foreign_key().iter().zip(rel.principal_properties()) {
                        let source = self.pending_value(principal, pk, pending);
                        if source.0.is_null() {
                            continue;
                        }
                        if self.pending_value(object, fk, pending).0 != source.0 {
                            pending.insert((object, fk), source);
                            changed = true;
                        }
                    }
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn navigated_principal(
        &self,
        rel: &Relationship,
        dependent: ObjectId,
        nodes: &[(ObjectId, EntityState)],
    ) -> Option<ObjectId> {
        if let Some(slot) = rel.dependent_navigation() {
            if let Some(principal) = self.objects.navigation(dependent, slot).as_reference() {
                return Some(principal);
            }
        }
        let slot = rel.principal_navigation()?;
        nodes.iter().map(|(o, _)| *o).find(|&candidate| {
            self.model
                .is_assignable(self.objects.entity_type(candidate), rel.principal())
                && self.objects.navigation(candidate, slot).contains(dependent)
        })
    }
}
