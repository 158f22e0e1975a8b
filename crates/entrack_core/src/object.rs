//! Property accessor layer.
//!
//! Entity instances live in an [`ObjectGraph`] arena and are addressed by
//! [`ObjectId`]. Properties and navigations are stored by slot, in the
//! flattened order of the instance's entity type, so reading or writing a
//! member never involves the concrete type beyond its slot index.
//!
//! Every write records a stamp from a per-graph clock. Change detection
//! orders the deltas it discovers by these stamps.

use crate::model::{EntityType, NavigationKind};
use crate::types::{EntityTypeId, ObjectId};
use entrack_value::Value;

/// Current content of a navigation slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationValue {
    /// A reference navigation.
    Reference(Option<ObjectId>),
    /// A collection navigation, in insertion order without duplicates.
    Collection(Vec<ObjectId>),
}

impl NavigationValue {
    /// Returns every instance the navigation points at.
    #[must_use]
    pub fn targets(&self) -> Vec<ObjectId> {
        match self {
            NavigationValue::Reference(target) => target.iter().copied().collect(),
            NavigationValue::Collection(items) => items.clone(),
        }
    }

    /// Returns the target of a reference navigation.
    #[must_use]
    pub fn as_reference(&self) -> Option<ObjectId> {
        match self {
            NavigationValue::Reference(target) => *target,
            NavigationValue::Collection(_) => None,
        }
    }

    /// Returns true if the navigation points at `object`.
    #[must_use]
    pub fn contains(&self, object: ObjectId) -> bool {
        match self {
            NavigationValue::Reference(target) => *target == Some(object),
            NavigationValue::Collection(items) => items.contains(&object),
        }
    }
}

#[derive(Debug, Clone)]
struct EntityObject {
    entity_type: EntityTypeId,
    values: Vec<Value>,
    navigations: Vec<NavigationValue>,
    value_stamps: Vec<u64>,
    navigation_stamps: Vec<u64>,
}

/// Arena of entity instances.
#[derive(Debug, Clone, Default)]
pub struct ObjectGraph {
    objects: Vec<EntityObject>,
    clock: u64,
}

impl ObjectGraph {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an instance of `entity_type` with every property at its
    /// default (`Null` for nullable properties) and empty navigations.
    pub fn create(&mut self, entity_type: &EntityType) -> ObjectId {
        let id = ObjectId::new(self.objects.len() as u32);
        let values: Vec<Value> = entity_type
            .properties()
            .iter()
            .map(|p| {
                if p.is_nullable() {
                    Value::Null
                } else {
                    p.kind().default_value()
                }
            })
            .collect();
        let navigations: Vec<NavigationValue> = entity_type
            .navigations()
            .iter()
            .map(|n| match n.kind() {
                NavigationKind::Reference => NavigationValue::Reference(None),
                NavigationKind::Collection => NavigationValue::Collection(Vec::new()),
            })
            .collect();
        self.objects.push(EntityObject {
            entity_type: entity_type.id(),
            value_stamps: vec![0; values.len()],
            navigation_stamps: vec![0; navigations.len()],
            values,
            navigations,
        });
        id
    }

    /// Returns the number of instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if no instance was created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Returns true if `object` belongs to this arena.
    #[must_use]
    pub fn contains(&self, object: ObjectId) -> bool {
        object.index() < self.objects.len()
    }

    /// Returns the concrete entity type of `object`.
    #[must_use]
    pub fn entity_type(&self, object: ObjectId) -> EntityTypeId {
        self.objects[object.index()].entity_type
    }

    /// Returns the value in property `slot`.
    #[must_use]
    pub fn value(&self, object: ObjectId, slot: usize) -> &Value {
        &self.objects[object.index()].values[slot]
    }

    /// Returns every property value.
    #[must_use]
    pub fn values(&self, object: ObjectId) -> &[Value] {
        &self.objects[object.index()].values
    }

    /// Writes property `slot`.
    pub fn set_value(&mut self, object: ObjectId, slot: usize, value: Value) {
        let stamp = self.tick();
        let entity = &mut self.objects[object.index()];
        entity.values[slot] = value;
        entity.value_stamps[slot] = stamp;
    }

    /// Returns navigation `slot`.
    #[must_use]
    pub fn navigation(&self, object: ObjectId, slot: usize) -> &NavigationValue {
        &self.objects[object.index()].navigations[slot]
    }

    /// Returns every navigation.
    #[must_use]
    pub fn navigations(&self, object: ObjectId) -> &[NavigationValue] {
        &self.objects[object.index()].navigations
    }

    /// Points reference navigation `slot` at `target`.
    pub fn set_reference(&mut self, object: ObjectId, slot: usize, target: Option<ObjectId>) {
        let stamp = self.tick();
        let entity = &mut self.objects[object.index()];
        if let NavigationValue::Reference(current) = &mut entity.navigations[slot] {
            *current = target;
            entity.navigation_stamps[slot] = stamp;
        }
    }

    /// Adds `item` to collection navigation `slot`; returns false if it was
    /// already present.
    pub fn collection_insert(&mut self, object: ObjectId, slot: usize, item: ObjectId) -> bool {
        let stamp = self.tick();
        let entity = &mut self.objects[object.index()];
        match &mut entity.navigations[slot] {
            NavigationValue::Collection(items) if !items.contains(&item) => {
                items.push(item);
                entity.navigation_stamps[slot] = stamp;
                true
            }
            _ => false,
        }
    }

    /// Removes `item` from collection navigation `slot`; returns false if it
    /// was not present.
    pub fn collection_remove(&mut self, object: ObjectId, slot: usize, item: ObjectId) -> bool {
        let stamp = self.tick();
        let entity = &mut self.objects[object.index()];
        match &mut entity.navigations[slot] {
            NavigationValue::Collection(items) => {
                let before = items.len();
                items.retain(|i| *i != item);
                if items.len() == before {
                    return false;
                }
                entity.navigation_stamps[slot] = stamp;
                true
            }
            NavigationValue::Reference(_) => false,
        }
    }

    /// Returns the stamp of the last write to property `slot`.
    #[must_use]
    pub fn value_stamp(&self, object: ObjectId, slot: usize) -> u64 {
        self.objects[object.index()].value_stamps[slot]
    }

    /// Returns the stamp of the last write to navigation `slot`.
    #[must_use]
    pub fn navigation_stamp(&self, object: ObjectId, slot: usize) -> u64 {
        self.objects[object.index()].navigation_stamps[slot]
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}
