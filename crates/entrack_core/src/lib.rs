//! # Entrack Core
//!
//! Relationship fixup and change tracking for in-memory entity graphs.
//!
//! This crate provides:
//! - Entity and relationship metadata ([`Model`])
//! - Entries with a state machine and original/current values
//! - Graph tracking, snapshot change detection and relationship fixup
//! - Cascade delete and orphan resolution
//! - Dependency-ordered saving with store-generated key reconciliation
//!
//! ## Invariants
//!
//! After every public [`Session`] operation that returns `Ok`:
//!
//! - a dependent's navigation to its principal, the principal's inverse
//!   navigation and the dependent's foreign key agree
//! - at most one tracked instance exists per key in a type hierarchy
//! - no tracked entry references a detached principal through a required
//!   relationship it still holds
//!
//! ## Example
//!
//! ```rust,ignore
//! use entrack_core::{DeleteBehavior, EntityTypeBuilder, ModelBuilder, PropertyBuilder,
//!     RelationshipBuilder, Session};
//! use entrack_storage::InMemoryStore;
//! use entrack_value::ValueKind;
//! use std::sync::Arc;
//!
//! let model = ModelBuilder::new()
//!     .entity_type(
//!         EntityTypeBuilder::new("Blog")
//!             .property(PropertyBuilder::new("Id", ValueKind::Integer).store_generated())
//!             .key(&["Id"]),
//!     )
//!     .entity_type(
//!         EntityTypeBuilder::new("Post")
//!             .property(PropertyBuilder::new("Id", ValueKind::Integer).store_generated())
//!             .property(PropertyBuilder::new("BlogId", ValueKind::Integer))
//!             .key(&["Id"]),
//!     )
//!     .relationship(
//!         RelationshipBuilder::new("Blog", "Post")
//!             .foreign_key(&["BlogId"])
//!             .principal_collection("Posts")
//!             .dependent_reference("Blog")
//!             .required()
//!             .on_delete(DeleteBehavior::Cascade),
//!     )
//!     .build()?;
//!
//! let mut session = Session::new(Arc::new(model), Arc::new(InMemoryStore::new()));
//! let blog = session.create("Blog")?;
//! let post = session.create("Post")?;
//! session.set_reference(post, "Blog", Some(blog))?;
//! session.add(post)?;
//!
//! assert_eq!(session.collection(blog, "Posts")?, vec![post]);
//! session.save_changes()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cascade;
mod config;
mod entry;
mod error;
mod events;
mod fixup;
mod keys;
mod model;
mod object;
mod save;
mod session;
mod tracker;
mod types;

pub use config::{CascadeTiming, ChangeTrackingStrategy, Config};
pub use entry::{EntityEntry, EntityState};
pub use error::{CoreError, CoreResult};
pub use events::{EventFeed, TrackerEvent, TrackerEventKind};
pub use model::{
    DeleteBehavior, EntityType, EntityTypeBuilder, Key, Model, ModelBuilder, Navigation,
    NavigationKind, NavigationSide, Property, PropertyBuilder, Relationship, RelationshipBuilder,
    ValueGeneration,
};
pub use object::{NavigationValue, ObjectGraph};
pub use session::Session;
pub use tracker::{ChangeTracker, TrackNode};
pub use types::{EntityTypeId, ObjectId, RelationshipId};
