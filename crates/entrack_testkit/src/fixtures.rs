//! Fixture models, seeded sessions and graph assertions.
//!
//! The graph model mirrors the shapes relationship fixup has to handle:
//!
//! ```text
//! Root ─┬─< Required1 (+ Required1Derived, Required1MoreDerived) ─< Required2
//!       ├─< Optional1 ─< Optional2                       (SetNull)
//!       ├── RequiredSingle1 ── RequiredSingle2           (key is the foreign key)
//!       ├── OptionalSingle1 (+ OptionalSingle1Derived) ── OptionalSingle2
//!       ├── RequiredNonPkSingle1
//!       ├─< RequiredAk1 ─┬─< RequiredAk2                 (alternate key)
//!       │                └─< RequiredComposite2          (composite key)
//!       ├─< OptionalAk1                                  (alternate key, SetNull)
//!       ├─< Restricted1                                  (Restrict)
//!       ├─< ClientChild1                                 (ClientSetNull)
//!       └─< ClientCascade1                               (ClientCascade)
//! ```
//!
//! Every key except the one-to-one `RequiredSingle*` keys is store
//! generated; `Root` and `RequiredAk1` carry a client-generated
//! `AlternateId`.

use entrack_core::{
    Config, DeleteBehavior, EntityState, EntityTypeBuilder, Model, ModelBuilder, ObjectId,
    PropertyBuilder, RelationshipBuilder, Session,
};
use entrack_storage::{InMemoryStore, StoreBackend};
use entrack_value::{KeyValues, Value, ValueKind};
use std::sync::Arc;

/// Hierarchy roots of every dependent type in [`graph_model`], in the
/// order [`load_required_graph`] loads them.
pub const DEPENDENT_TABLES: &[&str] = &[
    "Required1",
    "Required2",
    "Optional1",
    "Optional2",
    "RequiredSingle1",
    "RequiredSingle2",
    "OptionalSingle1",
    "OptionalSingle2",
    "RequiredNonPkSingle1",
    "RequiredAk1",
    "RequiredAk2",
    "RequiredComposite2",
    "OptionalAk1",
    "Restricted1",
    "ClientChild1",
    "ClientCascade1",
];

fn id() -> PropertyBuilder {
    PropertyBuilder::new("Id", ValueKind::Integer).store_generated()
}

fn keyed(name: &str) -> EntityTypeBuilder {
    EntityTypeBuilder::new(name).property(id()).key(&["Id"])
}

fn child(
    principal: &str,
    dependent: &str,
    foreign_key: &[&str],
    collection: &str,
    reference: &str,
) -> RelationshipBuilder {
    RelationshipBuilder::new(principal, dependent)
        .foreign_key(foreign_key)
        .principal_collection(collection)
        .dependent_reference(reference)
}

/// Builds the graph model.
///
/// # Panics
///
/// Panics if the fixture declarations are inconsistent.
pub fn graph_model() -> Arc<Model> {
    let integer = |name: &str| PropertyBuilder::new(name, ValueKind::Integer);
    let guid = |name: &str| PropertyBuilder::new(name, ValueKind::Guid);

    let model = ModelBuilder::new()
        .entity_type(
            keyed("Root")
                .property(guid("AlternateId").client_generated())
                .alternate_key(&["AlternateId"]),
        )
        .entity_type(keyed("Required1").property(integer("ParentId")))
        .entity_type(EntityTypeBuilder::new("Required1Derived").base("Required1"))
        .entity_type(EntityTypeBuilder::new("Required1MoreDerived").base("Required1Derived"))
        .entity_type(keyed("Required2").property(integer("ParentId")))
        .entity_type(keyed("Optional1").property(integer("ParentId").nullable()))
        .entity_type(keyed("Optional2").property(integer("ParentId").nullable()))
        .entity_type(
            EntityTypeBuilder::new("RequiredSingle1")
                .property(integer("Id"))
                .key(&["Id"]),
        )
        .entity_type(
            EntityTypeBuilder::new("RequiredSingle2")
                .property(integer("Id"))
                .key(&["Id"]),
        )
        .entity_type(keyed("OptionalSingle1").property(integer("RootId").nullable()))
        .entity_type(
            EntityTypeBuilder::new("OptionalSingle1Derived")
                .base("OptionalSingle1")
                .property(integer("DerivedRootId").nullable()),
        )
        .entity_type(keyed("OptionalSingle2").property(integer("BackId").nullable()))
        .entity_type(keyed("RequiredNonPkSingle1").property(integer("RootId")))
        .entity_type(
            keyed("RequiredAk1")
                .property(guid("AlternateId").client_generated())
                .property(guid("ParentId"))
                .alternate_key(&["AlternateId"]),
        )
        .entity_type(keyed("RequiredAk2").property(guid("ParentId")))
        .entity_type(
            keyed("RequiredComposite2")
                .property(integer("ParentId"))
                .property(guid("ParentAlternateId")),
        )
        .entity_type(keyed("OptionalAk1").property(guid("ParentId").nullable()))
        .entity_type(keyed("Restricted1").property(integer("RootId")))
        .entity_type(keyed("ClientChild1").property(integer("RootId").nullable()))
        .entity_type(keyed("ClientCascade1").property(integer("RootId")))
        .relationship(
            child("Root", "Required1", &["ParentId"], "RequiredChildren", "Parent")
                .required()
                .on_delete(DeleteBehavior::Cascade),
        )
        .relationship(
            child("Required1", "Required2", &["ParentId"], "Children", "Parent")
                .required()
                .on_delete(DeleteBehavior::Cascade),
        )
        .relationship(
            child("Root", "Optional1", &["ParentId"], "OptionalChildren", "Parent")
                .on_delete(DeleteBehavior::SetNull),
        )
        .relationship(
            child("Optional1", "Optional2", &["ParentId"], "Children", "Parent")
                .on_delete(DeleteBehavior::SetNull),
        )
        .relationship(
            RelationshipBuilder::new("Root", "RequiredSingle1")
                .foreign_key(&["Id"])
                .principal_reference("RequiredSingle")
                .dependent_reference("Root")
                .required()
                .on_delete(DeleteBehavior::Cascade),
        )
        .relationship(
            RelationshipBuilder::new("RequiredSingle1", "RequiredSingle2")
                .foreign_key(&["Id"])
                .principal_reference("Single")
                .dependent_reference("Back")
                .required()
                .on_delete(DeleteBehavior::Cascade),
        )
        .relationship(
            RelationshipBuilder::new("Root", "OptionalSingle1")
                .foreign_key(&["RootId"])
                .principal_reference("OptionalSingle")
                .dependent_reference("Root")
                .on_delete(DeleteBehavior::SetNull),
        )
        .relationship(
            RelationshipBuilder::new("Root", "OptionalSingle1Derived")
                .foreign_key(&["DerivedRootId"])
                .principal_reference("OptionalSingleDerived")
                .dependent_reference("DerivedRoot")
                .on_delete(DeleteBehavior::SetNull),
        )
        .relationship(
            RelationshipBuilder::new("OptionalSingle1", "OptionalSingle2")
                .foreign_key(&["BackId"])
                .principal_reference("Single")
                .dependent_reference("Back")
                .on_delete(DeleteBehavior::SetNull),
        )
        .relationship(
            RelationshipBuilder::new("Root", "RequiredNonPkSingle1")
                .foreign_key(&["RootId"])
                .principal_reference("RequiredNonPkSingle")
                .dependent_reference("Root")
                .required()
                .on_delete(DeleteBehavior::Cascade),
        )
        .relationship(
            child("Root", "RequiredAk1", &["ParentId"], "RequiredChildrenAk", "Parent")
                .principal_key(&["AlternateId"])
                .required()
                .on_delete(DeleteBehavior::Cascade),
        )
        .relationship(
            child("RequiredAk1", "RequiredAk2", &["ParentId"], "Children", "Parent")
                .principal_key(&["AlternateId"])
                .required()
                .on_delete(DeleteBehavior::Cascade),
        )
        .relationship(
            child(
                "RequiredAk1",
                "RequiredComposite2",
                &["ParentId", "ParentAlternateId"],
                "CompositeChildren",
                "Parent",
            )
            .principal_key(&["Id", "AlternateId"])
            .required()
            .on_delete(DeleteBehavior::Cascade),
        )
        .relationship(
            child("Root", "OptionalAk1", &["ParentId"], "OptionalChildrenAk", "Parent")
                .principal_key(&["AlternateId"])
                .on_delete(DeleteBehavior::SetNull),
        )
        .relationship(
            child("Root", "Restricted1", &["RootId"], "RestrictedChildren", "Root")
                .required()
                .on_delete(DeleteBehavior::Restrict),
        )
        .relationship(
            child("Root", "ClientChild1", &["RootId"], "ClientChildren", "Root")
                .on_delete(DeleteBehavior::ClientSetNull),
        )
        .relationship(
            child("Root", "ClientCascade1", &["RootId"], "ClientCascadeChildren", "Root")
                .required()
                .on_delete(DeleteBehavior::ClientCascade),
        )
        .build()
        .expect("graph model is valid");
    Arc::new(model)
}

/// Builds the `Category`/`Product` model: a required cascading
/// one-to-many relationship with store-generated keys.
///
/// # Panics
///
/// Panics if the fixture declarations are inconsistent.
pub fn category_model() -> Arc<Model> {
    let model = ModelBuilder::new()
        .entity_type(keyed("Category"))
        .entity_type(
            keyed("Product").property(PropertyBuilder::new("CategoryId", ValueKind::Integer)),
        )
        .relationship(
            child("Category", "Product", &["CategoryId"], "Products", "Category")
                .required()
                .on_delete(DeleteBehavior::Cascade),
        )
        .build()
        .expect("category model is valid");
    Arc::new(model)
}

/// Creates a store enforcing the foreign keys of `model`.
pub fn store_for(model: &Model) -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::with_foreign_keys(model.foreign_key_constraints()))
}

/// Opens a session over `store`.
pub fn session_for(model: &Arc<Model>, store: &Arc<InMemoryStore>, config: Config) -> Session {
    let store: Arc<dyn StoreBackend> = Arc::clone(store) as Arc<dyn StoreBackend>;
    Session::with_config(Arc::clone(model), store, config)
}

/// Instances of one seeded graph, by role.
///
/// Children are listed parent by parent: `required2[0..2]` belong to
/// `required1[0]`, `required2[2..4]` to `required1[1]`.
#[derive(Debug, Clone)]
pub struct SeededGraph {
    /// The root.
    pub root: ObjectId,
    /// A `Required1` and a `Required1Derived`.
    pub required1: Vec<ObjectId>,
    /// Two per `Required1`.
    pub required2: Vec<ObjectId>,
    /// Optional children of the root.
    pub optional1: Vec<ObjectId>,
    /// Two per `Optional1`.
    pub optional2: Vec<ObjectId>,
    /// One-to-one child sharing the root's key.
    pub required_single1: ObjectId,
    /// One-to-one child sharing `required_single1`'s key.
    pub required_single2: ObjectId,
    /// Optional one-to-one child.
    pub optional_single1: ObjectId,
    /// Optional one-to-one child of `optional_single1`.
    pub optional_single2: ObjectId,
    /// Required one-to-one child with its own key.
    pub required_non_pk_single: ObjectId,
    /// Children referencing the root's alternate key.
    pub required_ak1: Vec<ObjectId>,
    /// Two per `RequiredAk1`, referencing its alternate key.
    pub required_ak2: Vec<ObjectId>,
    /// One per `RequiredAk1`, referencing its composite key.
    pub required_composite2: Vec<ObjectId>,
    /// Optional children referencing the root's alternate key.
    pub optional_ak1: Vec<ObjectId>,
}

impl SeededGraph {
    /// Every instance of the graph, root first.
    pub fn all(&self) -> Vec<ObjectId> {
        let mut all = vec![self.root];
        all.extend(&self.required1);
        all.extend(&self.required2);
        all.extend(&self.optional1);
        all.extend(&self.optional2);
        all.extend([
            self.required_single1,
            self.required_single2,
            self.optional_single1,
            self.optional_single2,
            self.required_non_pk_single,
        ]);
        all.extend(&self.required_ak1);
        all.extend(&self.required_ak2);
        all.extend(&self.required_composite2);
        all.extend(&self.optional_ak1);
        all
    }
}

/// Creates an instance of `entity_type`.
///
/// # Panics
///
/// Panics if the type is unknown.
pub fn create(session: &mut Session, entity_type: &str) -> ObjectId {
    session.create(entity_type).expect("entity type exists")
}

/// Adds `target` to collection `navigation` of `object`.
///
/// # Panics
///
/// Panics if the navigation is unknown or the target has the wrong type.
pub fn link(session: &mut Session, object: ObjectId, navigation: &str, target: ObjectId) {
    session
        .add_to_collection(object, navigation, target)
        .expect("collection accepts target");
}

/// Points reference `navigation` of `object` at `target`.
///
/// # Panics
///
/// Panics if the navigation is unknown or the target has the wrong type.
pub fn point(session: &mut Session, object: ObjectId, navigation: &str, target: ObjectId) {
    session
        .set_reference(object, navigation, Some(target))
        .expect("reference accepts target");
}

/// Builds an untracked graph through the root's navigations and adds it.
/// Nothing is saved.
///
/// # Panics
///
/// Panics if the graph cannot be tracked.
pub fn build_required_graph(session: &mut Session) -> SeededGraph {
    let root = create(session, "Root");

    let mut required1 = Vec::new();
    let mut required2 = Vec::new();
    for entity_type in ["Required1", "Required1Derived"] {
        let parent = create(session, entity_type);
        link(session, root, "RequiredChildren", parent);
        for _ in 0..2 {
            let grandchild = create(session, "Required2");
            link(session, parent, "Children", grandchild);
            required2.push(grandchild);
        }
        required1.push(parent);
    }

    let mut optional1 = Vec::new();
    let mut optional2 = Vec::new();
    for _ in 0..2 {
        let parent = create(session, "Optional1");
        link(session, root, "OptionalChildren", parent);
        for _ in 0..2 {
            let grandchild = create(session, "Optional2");
            link(session, parent, "Children", grandchild);
            optional2.push(grandchild);
        }
        optional1.push(parent);
    }

    let required_single1 = create(session, "RequiredSingle1");
    let required_single2 = create(session, "RequiredSingle2");
    point(session, root, "RequiredSingle", required_single1);
    point(session, required_single1, "Single", required_single2);

    let optional_single1 = create(session, "OptionalSingle1");
    let optional_single2 = create(session, "OptionalSingle2");
    point(session, root, "OptionalSingle", optional_single1);
    point(session, optional_single1, "Single", optional_single2);

    let required_non_pk_single = create(session, "RequiredNonPkSingle1");
    point(session, root, "RequiredNonPkSingle", required_non_pk_single);

    let mut required_ak1 = Vec::new();
    let mut required_ak2 = Vec::new();
    let mut required_composite2 = Vec::new();
    for _ in 0..2 {
        let parent = create(session, "RequiredAk1");
        link(session, root, "RequiredChildrenAk", parent);
        for _ in 0..2 {
            let grandchild = create(session, "RequiredAk2");
            link(session, parent, "Children", grandchild);
            required_ak2.push(grandchild);
        }
        let composite = create(session, "RequiredComposite2");
        link(session, parent, "CompositeChildren", composite);
        required_composite2.push(composite);
        required_ak1.push(parent);
    }

    let mut optional_ak1 = Vec::new();
    for _ in 0..2 {
        let item = create(session, "OptionalAk1");
        link(session, root, "OptionalChildrenAk", item);
        optional_ak1.push(item);
    }

    session.add(root).expect("graph can be added");
    SeededGraph {
        root,
        required1,
        required2,
        optional1,
        optional2,
        required_single1,
        required_single2,
        optional_single1,
        optional_single2,
        required_non_pk_single,
        required_ak1,
        required_ak2,
        required_composite2,
        optional_ak1,
    }
}

/// Builds, adds and saves a graph; every instance ends `Unchanged`.
///
/// # Panics
///
/// Panics if the graph cannot be saved.
pub fn seed_required_graph(session: &mut Session) -> SeededGraph {
    let graph = build_required_graph(session);
    session.save_changes().expect("seed graph saves");
    graph
}

/// Opens a session over a fresh store and seeds one graph through it.
pub fn seeded_session(config: Config) -> (Session, Arc<InMemoryStore>, SeededGraph) {
    let model = graph_model();
    let store = store_for(&model);
    let mut session = session_for(&model, &store, config);
    let graph = seed_required_graph(&mut session);
    (session, store, graph)
}

/// Loads the root with primary key `root_id` and every dependent row.
///
/// # Panics
///
/// Panics if the root does not exist or a load fails.
pub fn load_required_graph(session: &mut Session, root_id: i64) -> ObjectId {
    let root = session
        .load("Root", &KeyValues::single(root_id))
        .expect("root query succeeds")
        .expect("root exists");
    for table in DEPENDENT_TABLES {
        session.load_all(table).expect("dependent query succeeds");
    }
    root
}

/// Returns integer property `property` of `object`.
///
/// # Panics
///
/// Panics if the property is unknown or not an integer.
pub fn integer(session: &Session, object: ObjectId, property: &str) -> i64 {
    session
        .value(object, property)
        .expect("property exists")
        .as_integer()
        .expect("property holds an integer")
}

/// Lists every place where tracked foreign keys and navigations disagree.
///
/// For each live tracked dependent: a navigation target must hold the
/// foreign key's values and list the dependent in its inverse navigation;
/// a foreign key matching a tracked principal must be mirrored by the
/// navigation. Principal-side navigations must point back.
pub fn fixup_violations(session: &Session) -> Vec<String> {
    let tracker = session.tracker();
    let model = tracker.model();
    let objects = tracker.objects();
    let live = |object: ObjectId| {
        !matches!(
            tracker.state(object),
            EntityState::Detached | EntityState::Deleted
        )
    };
    let key_at = |object: ObjectId, slots: &[usize]| {
        KeyValues::new(slots.iter().map(|&s| objects.value(object, s).clone()).collect())
    };

    let mut violations = Vec::new();
    for entry in tracker.entries() {
        let object = entry.object();
        if !live(object) || entry.has_conceptual_null() {
            continue;
        }
        let entity_type = objects.entity_type(object);

        for rel in model.relationships_as_dependent(entity_type) {
            let foreign_key = key_at(object, rel.foreign_key());
            let navigated = rel
                .dependent_navigation()
                .map(|slot| objects.navigation(object, slot).as_reference());
            match navigated {
                Some(Some(principal)) if live(principal) => {
                    if foreign_key != key_at(principal, rel.principal_properties()) {
                        violations.push(format!(
                            "{object} {}: foreign key {foreign_key} does not match {principal}",
                            rel.name()
                        ));
                    }
                    if let Some(slot) = rel.principal_navigation() {
                        if !objects.navigation(principal, slot).contains(object) {
                            violations.push(format!(
                                "{object} {}: missing from inverse navigation of {principal}",
                                rel.name()
                            ));
                        }
                    }
                }
                Some(None) if !foreign_key.has_null() => {
                    if let Some(principal) = tracker.find(rel.principal(), rel.principal_key(), &foreign_key) {
                        if live(principal) {
                            violations.push(format!(
                                "{object} {}: foreign key {foreign_key} references {principal} but navigation is empty",
                                rel.name()
                            ));
                        }
                    }
                }
                _ => {}
            }
        }

        for rel in model.relationships_as_principal(entity_type) {
            let Some(slot) = rel.principal_navigation() else {
                continue;
            };
            let key = key_at(object, rel.principal_properties());
            for dependent in objects.navigation(object, slot).targets() {
                if !live(dependent) || tracker.entry(dependent).has_conceptual_null() {
                    continue;
                }
                if key_at(dependent, rel.foreign_key()) != key {
                    violations.push(format!(
                        "{object} {}: lists {dependent} whose foreign key differs",
                        rel.name()
                    ));
                }
                if let Some(back) = rel.dependent_navigation() {
                    if objects.navigation(dependent, back).as_reference() != Some(object) {
                        violations.push(format!(
                            "{object} {}: lists {dependent} whose navigation points elsewhere",
                            rel.name()
                        ));
                    }
                }
            }
        }
    }
    violations
}

/// Collects every integer value held by tracked entries.
pub fn tracked_integers(session: &Session) -> Vec<i64> {
    let tracker = session.tracker();
    tracker
        .entries()
        .iter()
        .flat_map(|entry| tracker.objects().values(entry.object()).to_vec())
        .filter_map(|value| match value {
            Value::Integer(i) => Some(i),
            _ => None,
        })
        .collect()
}
