//! Ordered key tuples.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An ordered tuple of key component values.
///
/// Used for primary keys, alternate keys and foreign keys alike; components
/// are positionally matched between a foreign key and the principal key it
/// references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct KeyValues(Vec<Value>);

impl KeyValues {
    /// Creates a key tuple from its components.
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Creates a single-component key.
    #[must_use]
    pub fn single(value: impl Into<Value>) -> Self {
        Self(vec![value.into()])
    }

    /// Returns the components.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Returns the number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the tuple has no components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if any component is `Null`.
    ///
    /// A foreign key with a null component references nothing.
    #[must_use]
    pub fn has_null(&self) -> bool {
        self.0.iter().any(Value::is_null)
    }

    /// Consumes the tuple and returns its components.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for KeyValues {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl From<Value> for KeyValues {
    fn from(value: Value) -> Self {
        Self(vec![value])
    }
}

impl From<i64> for KeyValues {
    fn from(n: i64) -> Self {
        Self::single(n)
    }
}

impl From<i32> for KeyValues {
    fn from(n: i32) -> Self {
        Self::single(n)
    }
}

impl From<uuid::Uuid> for KeyValues {
    fn from(g: uuid::Uuid) -> Self {
        Self::single(g)
    }
}

impl fmt::Display for KeyValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str(")")
    }
}
