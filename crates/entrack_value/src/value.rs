//! Dynamic property value type.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The kind of a non-null property value.
///
/// Every property in a model declares one kind; a nullable property may
/// additionally hold [`Value::Null`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueKind {
    /// Boolean flag.
    Bool,
    /// Signed 64-bit integer.
    Integer,
    /// UTF-8 text.
    Text,
    /// Raw bytes.
    Bytes,
    /// 128-bit GUID.
    Guid,
}

impl ValueKind {
    /// Returns the default for this kind (`0`, `""`, `false`, ...).
    ///
    /// A non-nullable key holding its default is considered "not set".
    #[must_use]
    pub fn default_value(self) -> Value {
        match self {
            ValueKind::Bool => Value::Bool(false),
            ValueKind::Integer => Value::Integer(0),
            ValueKind::Text => Value::Text(String::new()),
            ValueKind::Bytes => Value::Bytes(Vec::new()),
            ValueKind::Guid => Value::Guid(Uuid::nil()),
        }
    }

    /// Returns true if `value` can be stored in a property of this kind.
    ///
    /// `Null` is accepted here; nullability is checked by the caller.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match value.kind() {
            Some(kind) => kind == self,
            None => true,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Bool => "bool",
            ValueKind::Integer => "integer",
            ValueKind::Text => "text",
            ValueKind::Bytes => "bytes",
            ValueKind::Guid => "guid",
        };
        f.write_str(name)
    }
}

/// A dynamic property value.
///
/// Values have a total order so they can be used in ordered maps and key
/// tuples; the order between different kinds is arbitrary but stable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (full i64 range).
    Integer(i64),
    /// Text string (UTF-8).
    Text(String),
    /// Byte string.
    Bytes(Vec<u8>),
    /// GUID value.
    Guid(Uuid),
}

impl Value {
    /// Returns true if this is `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the kind of this value, or `None` for `Null`.
    #[must_use]
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ValueKind::Bool),
            Value::Integer(_) => Some(ValueKind::Integer),
            Value::Text(_) => Some(ValueKind::Text),
            Value::Bytes(_) => Some(ValueKind::Bytes),
            Value::Guid(_) => Some(ValueKind::Guid),
        }
    }

    /// Returns true if this value is `Null` or the default of its kind.
    #[must_use]
    pub fn is_default(&self) -> bool {
        match self.kind() {
            Some(kind) => *self == kind.default_value(),
            None => true,
        }
    }

    /// Returns the boolean if this is a `Bool`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer if this is an `Integer`.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the text if this is a `Text`.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the bytes if this is a `Bytes`.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the GUID if this is a `Guid`.
    #[must_use]
    pub fn as_guid(&self) -> Option<Uuid> {
        match self {
            Value::Guid(g) => Some(*g),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "'{s}'"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Guid(g) => write!(f, "{g}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Uuid> for Value {
    fn from(g: Uuid) -> Self {
        Value::Guid(g)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_defaults() {
        assert_eq!(ValueKind::Integer.default_value(), Value::Integer(0));
        assert_eq!(ValueKind::Guid.default_value(), Value::Guid(Uuid::nil()));
        assert!(ValueKind::Text.default_value().is_default());
    }

    #[test]
    fn default_detection() {
        assert!(Value::Null.is_default());
        assert!(Value::Integer(0).is_default());
        assert!(!Value::Integer(-78).is_default());
        assert!(!Value::Guid(Uuid::new_v4()).is_default());
    }

    #[test]
    fn kind_accepts() {
        assert!(ValueKind::Integer.accepts(&Value::Integer(3)));
        assert!(ValueKind::Integer.accepts(&Value::Null));
        assert!(!ValueKind::Integer.accepts(&Value::from("3")));
    }

    #[test]
    fn from_impls() {
        assert_eq!(Value::from(5i32), Value::Integer(5));
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
    }

    #[test]
    fn accessors() {
        assert_eq!(Value::Integer(9).as_integer(), Some(9));
        assert_eq!(Value::from("t").as_text(), Some("t"));
        assert_eq!(Value::Null.as_integer(), None);
        let g = Uuid::new_v4();
        assert_eq!(Value::from(g).as_guid(), Some(g));
    }

    #[test]
    fn display() {
        assert_eq!(Value::Integer(-77).to_string(), "-77");
        assert_eq!(Value::from("a").to_string(), "'a'");
        assert_eq!(Value::Null.to_string(), "null");
    }
}
