//! # Entrack Value
//!
//! Dynamic property values shared by the change tracker and the storage
//! collaborator.
//!
//! Entity instances are not Rust structs known to the engine: every scalar,
//! key and foreign-key property is held as a [`Value`], and ordered groups of
//! key components travel as [`KeyValues`].
//!
//! ## Usage
//!
//! ```
//! use entrack_value::{KeyValues, Value, ValueKind};
//!
//! let key = KeyValues::from(vec![Value::Integer(7), Value::from("a")]);
//! assert_eq!(key.to_string(), "(7, 'a')");
//! assert!(!key.has_null());
//! assert_eq!(ValueKind::Integer.default_value(), Value::Integer(0));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod key;
mod value;

pub use key::KeyValues;
pub use value::{Value, ValueKind};
