//! # Entrack Testkit
//!
//! Test utilities for entrack.
//!
//! This crate provides:
//! - The fixture model: a `Root` with required, optional, one-to-one,
//!   alternate-key and composite-key children, plus `Category`/`Product`
//! - Seeded sessions over an [`InMemoryStore`](entrack_storage::InMemoryStore)
//! - Property-based test generators using proptest
//! - Tracing initialisation for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entrack_testkit::prelude::*;
//!
//! #[test]
//! fn removing_a_child() {
//!     init_tracing();
//!     let (mut session, store, graph) = seeded_session(Config::default());
//!     session.remove(graph.required1[0]).unwrap();
//!     session.save_changes().unwrap();
//!     assert_eq!(store.row_count("Required1"), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

use tracing_subscriber::EnvFilter;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use entrack_core::{CascadeTiming, Config, CoreError, EntityState, Session};
    pub use entrack_storage::InMemoryStore;
    pub use entrack_value::{KeyValues, Value};
}

pub use fixtures::*;
pub use generators::*;

/// Installs a fmt subscriber filtered by `RUST_LOG` (default `warn`).
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
