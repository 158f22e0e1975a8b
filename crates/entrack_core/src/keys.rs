//! Temporary and client-generated values, and store-generated key
//! reconciliation.

use crate::error::{CoreError, CoreResult};
use crate::model::{Property, ValueGeneration};
use crate::tracker::ChangeTracker;
use crate::types::ObjectId;
use entrack_value::{Value, ValueKind};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Hands out temporary values for store-generated properties.
///
/// Integers count down from the configured seed, so they never collide
/// with the positive values a store usually generates.
#[derive(Debug, Clone)]
pub(crate) struct TemporaryValueGenerator {
    /// `None` once `i64::MIN` has been handed out.
    next: Option<i64>,
}

impl TemporaryValueGenerator {
    pub(crate) fn new(seed: i64) -> Self {
        Self { next: Some(seed) }
    }

    pub(crate) fn next_integer(&mut self) -> CoreResult<i64> {
        let value = self.next.ok_or_else(|| {
            CoreError::invalid_operation("temporary key values exhausted; raise the temporary key seed")
        })?;
        self.next = value.checked_sub(1);
        Ok(value)
    }

    /// Returns the value to assign `property` when its entity is added,
    /// with a flag telling whether the value is temporary.
    pub(crate) fn generate(&mut self, property: &Property) -> CoreResult<Option<(Value, bool)>> {
        Ok(match (property.generation(), property.kind()) {
            (ValueGeneration::OnAddStore, ValueKind::Integer) => {
                Some((Value::Integer(self.next_integer()?), true))
            }
            (ValueGeneration::OnAddStore, ValueKind::Guid) => Some((Value::Guid(Uuid::new_v4()), true)),
            (ValueGeneration::OnAddClient, _) => Some((Value::Guid(Uuid::new_v4()), false)),
            _ => None,
        })
    }
}

/// Returns true if `value` counts as set for key generation purposes.
pub(crate) fn is_set(value: &Value) -> bool {
    !value.is_default()
}

impl ChangeTracker {
    /// Writes values generated by the store into an inserted entity.
    ///
    /// Each value replaces a temporary one; the write propagates to every
    /// tracked dependent that referenced the temporary key.
    pub(crate) fn reconcile_generated(&mut self, object: ObjectId, values: &[(String, Value)]) -> CoreResult<()> {
        let model = Arc::clone(&self.model);
        let entity_type = model.entity_type_by_id(self.objects.entity_type(object));
        for (column, value) in values {
            let slot = entity_type
                .property_index(column)
                .ok_or_else(|| CoreError::unknown_property(entity_type.name(), column.as_str()))?;
            debug!(%object, entity_type = entity_type.name(), column = column.as_str(), %value, "store generated value");
            self.write_property(object, slot, value.clone(), false)?;
        }
        Ok(())
    }
}
