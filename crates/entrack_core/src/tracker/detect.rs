//! Change detection.
//!
//! Detection compares each live object against its entry snapshot in three
//! phases:
//!
//! 1. collect scalar changes and relationship deltas (foreign key,
//!    reference and collection), rejecting key changes of persisted
//!    entries before anything is applied
//! 2. write changed scalars into the snapshot, updating modified flags and
//!    the indexes
//! 3. apply relationship deltas through fixup, ordered by write stamp so
//!    the most recent write to either end of a relationship wins
//!
//! Phases 2 and 3 run against a checkpoint: if any delta fails, the tracker
//! and the object graph return to their state before detection, so the
//! same changes are found again by the next scan.

use super::ChangeTracker;
use crate::config::CascadeTiming;
use crate::entry::EntityState;
use crate::error::{CoreError, CoreResult};
use crate::model::{Navigation, NavigationSide};
use crate::object::NavigationValue;
use crate::types::{ObjectId, RelationshipId};
use entrack_value::KeyValues;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[derive(Debug)]
enum Delta {
    ForeignKey {
        object: ObjectId,
        rel: RelationshipId,
        values: KeyValues,
        previous: KeyValues,
    },
    Reference {
        object: ObjectId,
        slot: usize,
        previous: Option<ObjectId>,
        current: Option<ObjectId>,
    },
    Collection {
        object: ObjectId,
        slot: usize,
        added: Vec<ObjectId>,
        removed: Vec<ObjectId>,
    },
}

#[derive(Debug)]
struct Stamped {
    stamp: u64,
    order: usize,
    delta: Delta,
}

#[derive(Debug, Default)]
struct Scan {
    scalars: Vec<(ObjectId, usize)>,
    deltas: Vec<Stamped>,
    reordered: Vec<(ObjectId, usize)>,
}

impl Scan {
    fn push(&mut self, stamp: u64, delta: Delta) {
        let order = self.deltas.len();
        self.deltas.push(Stamped { stamp, order, delta });
    }
}

impl ChangeTracker {
    /// Detects changes made directly to every tracked object.
    pub(crate) fn detect_changes(&mut self) -> CoreResult<()> {
        let objects: Vec<ObjectId> = self.entries.keys().copied().collect();
        self.detect_changes_for(&objects)
    }

    /// Detects changes made directly to `objects`.
    pub(crate) fn detect_changes_for(&mut self, objects: &[ObjectId]) -> CoreResult<()> {
        let mut scan = Scan::default();
        for &object in objects {
            self.scan(object, &mut scan)?;
        }
        if scan.scalars.is_empty() && scan.deltas.is_empty() && scan.reordered.is_empty() {
            return Ok(());
        }
        debug!(
            scalars = scan.scalars.len(),
            deltas = scan.deltas.len(),
            "detected changes"
        );

        let checkpoint = self.checkpoint();
        match self.apply_scan(scan) {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(error = %err, "change detection failed; tracker state restored");
                self.restore(checkpoint);
                Err(err)
            }
        }
    }

    /// Writes detected scalars into snapshots and applies relationship
    /// deltas. Leaves the tracker half-updated on error.
    fn apply_scan(&mut self, scan: Scan) -> CoreResult<()> {
        for (object, slot) in scan.reordered {
            self.acknowledge_navigation(object, slot);
        }
        for (object, slot) in scan.scalars {
            if !self.is_tracked(object) {
                continue;
            }
            let value = self.objects.value(object, slot).clone();
            self.write_property(object, slot, value, false)?;
        }

        let mut deltas = scan.deltas;
        deltas.sort_by_key(|d| (d.stamp, d.order));
        let moving = moving_dependents(self, &deltas);
        for stamped in deltas {
            trace!(stamp = stamped.stamp, delta = ?stamped.delta, "applying delta");
            self.apply(stamped.delta, &moving)?;
        }
        Ok(())
    }

    fn scan(&self, object: ObjectId, scan: &mut Scan) -> CoreResult<()> {
        let Some(entry) = self.tracked(object) else {
            return Ok(());
        };
        if entry.state == EntityState::Deleted {
            return Ok(());
        }
        let model = &self.model;
        let entity_type = model.entity_type_by_id(entry.entity_type);
        let values = self.objects.values(object);

        let changed: Vec<usize> = (0..values.len())
            .filter(|&slot| values[slot] != entry.snapshot[slot])
            .collect();
        if entry.state != EntityState::Added {
            if let Some(&slot) = changed.iter().find(|&&s| entity_type.is_key_property(s)) {
                return Err(CoreError::KeyModified {
                    entity_type: entity_type.name().to_string(),
                    property: entity_type.property(slot).name().to_string(),
                });
            }
        }

        for rel in model.relationships_as_dependent(entity_type.id()) {
            let stamp = rel
                .foreign_key()
                .iter()
                .copied()
                .filter(|slot| changed.contains(slot))
                .map(|slot| self.objects.value_stamp(object, slot))
                .max();
            if let Some(stamp) = stamp {
                scan.push(
                    stamp,
                    Delta::ForeignKey {
                        object,
                        rel: rel.id(),
                        values: KeyValues::new(rel.foreign_key().iter().map(|&s| values[s].clone()).collect()),
                        previous: entry.key(rel.foreign_key()),
                    },
                );
            }
        }
        scan.scalars.extend(changed.into_iter().map(|slot| (object, slot)));

        for slot in 0..entity_type.navigations().len() {
            let stamp = self.objects.navigation_stamp(object, slot);
            match (self.objects.navigation(object, slot), &entry.navigations[slot]) {
                (NavigationValue::Reference(current), NavigationValue::Reference(previous)) => {
                    if current != previous {
                        scan.push(
                            stamp,
                            Delta::Reference {
                                object,
                                slot,
                                previous: *previous,
                                current: *current,
                            },
                        );
                    }
                }
                (NavigationValue::Collection(current), NavigationValue::Collection(previous)) => {
                    if current == previous {
                        continue;
                    }
                    let added: Vec<ObjectId> = current.iter().filter(|o| !previous.contains(o)).copied().collect();
                    let removed: Vec<ObjectId> = previous.iter().filter(|o| !current.contains(o)).copied().collect();
                    if added.is_empty() && removed.is_empty() {
                        scan.reordered.push((object, slot));
                    } else {
                        scan.push(stamp, Delta::Collection { object, slot, added, removed });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn apply(&mut self, delta: Delta, moving: &HashSet<(RelationshipId, ObjectId)>) -> CoreResult<()> {
        let model = Arc::clone(&self.model);
        match delta {
            Delta::ForeignKey {
                object,
                rel,
                values,
                previous,
            } => {
                if !self.is_tracked(object) {
                    return Ok(());
                }
                let relationship = model.relationship(rel);
                for (i, &slot) in relationship.foreign_key().iter().enumerate() {
                    self.write_property(object, slot, values.values()[i].clone(), false)?;
                }
                let principal = self.find_principal(relationship, &values);
                if let Some(former) = self.find_principal(relationship, &previous) {
                    if Some(former) != principal {
                        self.remove_from_inverse(relationship, former, object);
                    }
                }
                match principal {
                    Some(principal) => self.connect(rel, principal, object)?,
                    None => {
                        if let Some(slot) = relationship.dependent_navigation() {
                            let former = self.known_navigation(object, slot).as_reference();
                            self.write_reference(object, slot, None);
                            if let Some(former) = former {
                                self.remove_from_inverse(relationship, former, object);
                            }
                        }
                        if values.has_null()
                            && relationship.is_required()
                            && relationship.delete_behavior().cascades()
                            && self.config.delete_orphans_timing == CascadeTiming::Immediate
                        {
                            debug!(%object, relationship = relationship.name(), "deleting orphan");
                            self.delete_entry(object)?;
                        }
                    }
                }
            }
            Delta::Reference {
                object,
                slot,
                previous,
                current,
            } => {
                if !self.is_tracked(object) {
                    return Ok(());
                }
                let navigation = self.navigation_meta(object, slot);
                let rel = navigation.relationship();
                let relationship = model.relationship(rel);
                self.acknowledge_navigation(object, slot);
                match navigation.side() {
                    NavigationSide::Dependent => {
                        if let Some(former) = previous.filter(|p| Some(*p) != current) {
                            self.remove_from_inverse(relationship, former, object);
                        }
                        match current {
                            Some(principal) => {
                                self.check_target(object, &navigation, principal)?;
                                self.ensure_tracked(principal)?;
                                self.connect(rel, principal, object)?;
                            }
                            None => self.sever(rel, object, previous)?,
                        }
                    }
                    NavigationSide::Principal => {
                        if let Some(former) = previous.filter(|p| Some(*p) != current) {
                            if self.is_tracked(former)
                                && self.references(relationship, former, object)
                                && !moving.contains(&(rel, former))
                            {
                                self.sever(rel, former, Some(object))?;
                            }
                        }
                        if let Some(dependent) = current {
                            self.check_target(object, &navigation, dependent)?;
                            self.ensure_tracked(dependent)?;
                            self.connect(rel, object, dependent)?;
                        }
                    }
                }
            }
            Delta::Collection {
                object,
                slot,
                added,
                removed,
            } => {
                if !self.is_tracked(object) {
                    return Ok(());
                }
                let navigation = self.navigation_meta(object, slot);
                let rel = navigation.relationship();
                let relationship = model.relationship(rel);
                self.acknowledge_navigation(object, slot);
                for dependent in removed {
                    if self.is_tracked(dependent)
                        && self.references(relationship, dependent, object)
                        && !moving.contains(&(rel, dependent))
                    {
                        self.sever(rel, dependent, Some(object))?;
                    }
                }
                for dependent in added {
                    self.check_target(object, &navigation, dependent)?;
                    self.ensure_tracked(dependent)?;
                    self.connect(rel, object, dependent)?;
                }
            }
        }
        Ok(())
    }

    fn navigation_meta(&self, object: ObjectId, slot: usize) -> Navigation {
        self.model
            .entity_type_by_id(self.objects.entity_type(object))
            .navigation(slot)
            .clone()
    }

    fn check_target(&self, object: ObjectId, navigation: &Navigation, target: ObjectId) -> CoreResult<()> {
        if self.model.is_assignable(self.objects.entity_type(target), navigation.target()) {
            return Ok(());
        }
        Err(CoreError::NavigationTypeMismatch {
            entity_type: self.type_name(object).to_string(),
            navigation: navigation.name().to_string(),
            target: self.type_name(target).to_string(),
        })
    }

    /// Starts tracking an instance discovered through a navigation, along
    /// with its untracked graph.
    fn ensure_tracked(&mut self, object: ObjectId) -> CoreResult<()> {
        if self.is_tracked(object) {
            return Ok(());
        }
        let count = self.track_graph(object, |node| Some(node.discovered_state()))?;
        debug!(%object, count, "tracked graph discovered through navigation");
        Ok(())
    }
}

/// Dependents that a delta of this pass attaches to some principal, keyed
/// by relationship. Removing such a dependent from its former principal
/// must not sever it.
fn moving_dependents(tracker: &ChangeTracker, deltas: &[Stamped]) -> HashSet<(RelationshipId, ObjectId)> {
    let model = &tracker.model;
    let mut moving = HashSet::new();
    for stamped in deltas {
        match &stamped.delta {
            Delta::Reference {
                object,
                slot,
                current: Some(current),
                ..
            } => {
                let navigation = model
                    .entity_type_by_id(tracker.objects.entity_type(*object))
                    .navigation(*slot);
                let dependent = match navigation.side() {
                    NavigationSide::Dependent => *object,
                    NavigationSide::Principal => *current,
                };
                moving.insert((navigation.relationship(), dependent));
            }
            Delta::Collection { object, slot, added, .. } => {
                let navigation = model
                    .entity_type_by_id(tracker.objects.entity_type(*object))
                    .navigation(*slot);
                for dependent in added {
                    moving.insert((navigation.relationship(), *dependent));
                }
            }
            Delta::ForeignKey { object, rel, values, .. } if !values.has_null() => {
                moving.insert((*rel, *object));
            }
            _ => {}
        }
    }
    moving
}
