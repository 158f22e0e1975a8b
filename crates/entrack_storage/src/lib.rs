//! # Entrack Storage
//!
//! The storage collaborator contract used by the change tracker.
//!
//! The tracker never talks to a physical store directly. At save time it
//! hands an ordered [`SaveBatch`] to a [`StoreBackend`] and receives back a
//! [`SaveOutcome`] carrying the values the store generated. Cascades that
//! reach rows the tracker has not loaded are discovered through
//! [`StoreBackend::query`].
//!
//! ## Design Principles
//!
//! - A batch is applied all-or-nothing
//! - Commands run in the order given; the tracker owns the ordering
//! - A column value may reference a column of an earlier command, so
//!   store-generated keys reach dependents inserted in the same batch
//! - Backends must be `Send + Sync` so several sessions can share one store
//!
//! ## Available Backends
//!
//! - [`InMemoryStore`] - Reference store for tests and benchmarks
//!
//! ## Example
//!
//! ```rust
//! use entrack_storage::{ColumnValue, InMemoryStore, SaveBatch, SaveCommand, StoreBackend};
//! use entrack_value::Value;
//!
//! let store = InMemoryStore::new();
//! let insert = SaveCommand::insert("Root", "Root")
//!     .with_key(ColumnValue::new("Id", Value::Integer(-1)))
//!     .with_generated_identity("Id");
//! let outcome = store.save(&SaveBatch::new(vec![insert])).unwrap();
//! assert_eq!(outcome.generated[0].values[0].1, Value::Integer(1));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod batch;
mod error;
mod memory;

pub use backend::StoreBackend;
pub use batch::{
    ColumnOrigin, ColumnValue, ForeignKeyConstraint, GeneratedColumn, GeneratedKind,
    GeneratedValues, Operation, Row, SaveBatch, SaveCommand, SaveOutcome,
};
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryStore;
