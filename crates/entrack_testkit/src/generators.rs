//! Property-based test generators using proptest.
//!
//! Provides strategies for edit scripts over a seeded graph and for the
//! order in which an untracked graph is wired up and tracked.

use crate::fixtures::{create, integer, SeededGraph};
use entrack_core::{CoreResult, EntityState, ObjectId, Session};
use proptest::prelude::*;

/// One mutation of a seeded graph.
///
/// Indices select from the matching [`EditPool`] list modulo its length.
#[derive(Debug, Clone)]
pub enum GraphEdit {
    /// Writes a parent's key into a `Required2` foreign key.
    MoveRequired2ByForeignKey {
        /// `Required2` index
        child: usize,
        /// `Required1` index
        parent: usize,
    },
    /// Points a `Required2` navigation at a parent.
    MoveRequired2ByReference {
        /// `Required2` index
        child: usize,
        /// `Required1` index
        parent: usize,
    },
    /// Adds a `Required2` to a parent's collection.
    MoveRequired2ByCollection {
        /// `Required2` index
        child: usize,
        /// `Required1` index
        parent: usize,
    },
    /// Writes a parent's key into an `Optional2` foreign key.
    MoveOptional2ByForeignKey {
        /// `Optional2` index
        child: usize,
        /// `Optional1` index
        parent: usize,
    },
    /// Clears an `Optional2` navigation.
    ClearOptional2Reference {
        /// `Optional2` index
        child: usize,
    },
    /// Writes null into an `Optional2` foreign key.
    ClearOptional2ForeignKey {
        /// `Optional2` index
        child: usize,
    },
    /// Removes an `Optional2` from its parent's collection.
    RemoveOptional2FromCollection {
        /// `Optional2` index
        child: usize,
    },
    /// Creates a `Required2` inside a parent's collection.
    AddRequired2 {
        /// `Required1` index
        parent: usize,
    },
    /// Removes a `Required1` with its children.
    RemoveRequired1 {
        /// `Required1` index
        index: usize,
    },
    /// Removes an `Optional1`; its children are nulled.
    RemoveOptional1 {
        /// `Optional1` index
        index: usize,
    },
    /// Removes a `Required2`.
    RemoveRequired2 {
        /// `Required2` index
        index: usize,
    },
    /// Runs change detection.
    DetectChanges,
    /// Saves pending changes.
    Save,
}

/// The instances an edit script works on.
#[derive(Debug, Clone)]
pub struct EditPool {
    /// `Required1` instances.
    pub required1: Vec<ObjectId>,
    /// `Required2` instances, including ones the script created.
    pub required2: Vec<ObjectId>,
    /// `Optional1` instances.
    pub optional1: Vec<ObjectId>,
    /// `Optional2` instances.
    pub optional2: Vec<ObjectId>,
}

impl From<&SeededGraph> for EditPool {
    fn from(graph: &SeededGraph) -> Self {
        Self {
            required1: graph.required1.clone(),
            required2: graph.required2.clone(),
            optional1: graph.optional1.clone(),
            optional2: graph.optional2.clone(),
        }
    }
}

fn pick(items: &[ObjectId], index: usize) -> ObjectId {
    items[index % items.len()]
}

fn is_live(session: &Session, object: ObjectId) -> bool {
    !matches!(
        session.state(object),
        EntityState::Detached | EntityState::Deleted
    )
}

impl GraphEdit {
    /// Applies the edit. Edits touching a deleted or detached instance
    /// are skipped; returns whether the edit ran.
    ///
    /// # Errors
    ///
    /// Returns the session error of the underlying operation.
    pub fn apply(&self, session: &mut Session, pool: &mut EditPool) -> CoreResult<bool> {
        match *self {
            Self::MoveRequired2ByForeignKey { child, parent } => {
                let (child, parent) = (pick(&pool.required2, child), pick(&pool.required1, parent));
                if !is_live(session, child) || !is_live(session, parent) {
                    return Ok(false);
                }
                let key = integer(session, parent, "Id");
                session.set_value(child, "ParentId", key)?;
            }
            Self::MoveRequired2ByReference { child, parent } => {
                let (child, parent) = (pick(&pool.required2, child), pick(&pool.required1, parent));
                if !is_live(session, child) || !is_live(session, parent) {
                    return Ok(false);
                }
                session.set_reference(child, "Parent", Some(parent))?;
            }
            Self::MoveRequired2ByCollection { child, parent } => {
                let (child, parent) = (pick(&pool.required2, child), pick(&pool.required1, parent));
                if !is_live(session, child) || !is_live(session, parent) {
                    return Ok(false);
                }
                session.add_to_collection(parent, "Children", child)?;
            }
            Self::MoveOptional2ByForeignKey { child, parent } => {
                let (child, parent) = (pick(&pool.optional2, child), pick(&pool.optional1, parent));
                if !is_live(session, child) || !is_live(session, parent) {
                    return Ok(false);
                }
                let key = integer(session, parent, "Id");
                session.set_value(child, "ParentId", key)?;
            }
            Self::ClearOptional2Reference { child } => {
                let child = pick(&pool.optional2, child);
                if !is_live(session, child) {
                    return Ok(false);
                }
                session.set_reference(child, "Parent", None)?;
            }
            Self::ClearOptional2ForeignKey { child } => {
                let child = pick(&pool.optional2, child);
                if !is_live(session, child) {
                    return Ok(false);
                }
                session.set_value(child, "ParentId", None::<i64>)?;
            }
            Self::RemoveOptional2FromCollection { child } => {
                let child = pick(&pool.optional2, child);
                if !is_live(session, child) {
                    return Ok(false);
                }
                let Some(parent) = session.reference(child, "Parent")? else {
                    return Ok(false);
                };
                if !is_live(session, parent) {
                    return Ok(false);
                }
                session.remove_from_collection(parent, "Children", child)?;
            }
            Self::AddRequired2 { parent } => {
                let parent = pick(&pool.required1, parent);
                if !is_live(session, parent) {
                    return Ok(false);
                }
                let child = create(session, "Required2");
                session.add_to_collection(parent, "Children", child)?;
                pool.required2.push(child);
            }
            Self::RemoveRequired1 { index } => {
                let object = pick(&pool.required1, index);
                if !is_live(session, object) {
                    return Ok(false);
                }
                session.remove(object)?;
            }
            Self::RemoveOptional1 { index } => {
                let object = pick(&pool.optional1, index);
                if !is_live(session, object) {
                    return Ok(false);
                }
                session.remove(object)?;
            }
            Self::RemoveRequired2 { index } => {
                let object = pick(&pool.required2, index);
                if !is_live(session, object) {
                    return Ok(false);
                }
                session.remove(object)?;
            }
            Self::DetectChanges => session.detect_changes()?,
            Self::Save => {
                session.save_changes()?;
            }
        }
        Ok(true)
    }
}

/// Strategy for a single graph edit.
pub fn graph_edit_strategy() -> impl Strategy<Value = GraphEdit> {
    let index = || 0usize..8;
    prop_oneof![
        3 => (index(), index()).prop_map(|(child, parent)| GraphEdit::MoveRequired2ByForeignKey { child, parent }),
        3 => (index(), index()).prop_map(|(child, parent)| GraphEdit::MoveRequired2ByReference { child, parent }),
        3 => (index(), index()).prop_map(|(child, parent)| GraphEdit::MoveRequired2ByCollection { child, parent }),
        2 => (index(), index()).prop_map(|(child, parent)| GraphEdit::MoveOptional2ByForeignKey { child, parent }),
        1 => index().prop_map(|child| GraphEdit::ClearOptional2Reference { child }),
        1 => index().prop_map(|child| GraphEdit::ClearOptional2ForeignKey { child }),
        1 => index().prop_map(|child| GraphEdit::RemoveOptional2FromCollection { child }),
        2 => index().prop_map(|parent| GraphEdit::AddRequired2 { parent }),
        1 => index().prop_map(|index| GraphEdit::RemoveRequired1 { index }),
        1 => index().prop_map(|index| GraphEdit::RemoveOptional1 { index }),
        1 => index().prop_map(|index| GraphEdit::RemoveRequired2 { index }),
        2 => Just(GraphEdit::DetectChanges),
        1 => Just(GraphEdit::Save),
    ]
}

/// Strategy for a sequence of graph edits.
pub fn edit_script_strategy(min_edits: usize, max_edits: usize) -> impl Strategy<Value = Vec<GraphEdit>> {
    prop::collection::vec(graph_edit_strategy(), min_edits..max_edits)
}

/// How a `Product` is connected to its `Category` before tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkVia {
    /// The product's `Category` reference.
    Reference,
    /// The category's `Products` collection.
    Collection,
    /// The product's `CategoryId`, written after the category has a key.
    ForeignKey,
}

/// One step of wiring up a `Category` with products.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WiringStep {
    /// Tracks the category as added.
    AddCategory,
    /// Connects product `index` to the category.
    Link(usize, LinkVia),
    /// Tracks product `index` as added.
    AddProduct(usize),
}

/// Strategy for a wiring of `products` products: every step appears
/// once, in any order, except that a foreign key link follows
/// [`WiringStep::AddCategory`] so the category's key is known.
pub fn wiring_strategy(products: usize) -> impl Strategy<Value = Vec<WiringStep>> {
    let vias = prop::collection::vec(
        prop_oneof![
            Just(LinkVia::Reference),
            Just(LinkVia::Collection),
            Just(LinkVia::ForeignKey),
        ],
        products,
    );
    vias.prop_flat_map(move |vias| {
        let mut steps = vec![WiringStep::AddCategory];
        for (index, via) in vias.into_iter().enumerate() {
            steps.push(WiringStep::Link(index, via));
            steps.push(WiringStep::AddProduct(index));
        }
        Just(steps).prop_shuffle()
    })
    .prop_map(|mut steps| {
        let add_category = steps
            .iter()
            .position(|s| *s == WiringStep::AddCategory)
            .unwrap_or(0);
        let first_fk = steps
            .iter()
            .position(|s| matches!(s, WiringStep::Link(_, LinkVia::ForeignKey)));
        if let Some(first_fk) = first_fk.filter(|&i| i < add_category) {
            steps.remove(add_category);
            steps.insert(first_fk, WiringStep::AddCategory);
        }
        steps
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
