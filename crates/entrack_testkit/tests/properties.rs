//! Graph-level properties: fixup symmetry, cascade closure, orphan
//! survival, key finality and idempotent detection.

use entrack_core::{ChangeTrackingStrategy, TrackerEventKind};
use entrack_testkit::prelude::*;
use proptest::prelude::*;

fn assert_consistent(session: &Session) {
    let violations = fixup_violations(session);
    assert!(violations.is_empty(), "fixup violations: {violations:#?}");
}

#[test]
fn seeded_graph_is_consistent_before_and_after_save() {
    init_tracing();
    let model = graph_model();
    let store = store_for(&model);
    let mut session = session_for(&model, &store, Config::default());

    let graph = build_required_graph(&mut session);
    assert_consistent(&session);
    for object in graph.all() {
        assert_eq!(session.state(object), EntityState::Added);
    }

    session.save_changes().unwrap();
    assert_consistent(&session);
    for object in graph.all() {
        assert_eq!(session.state(object), EntityState::Unchanged);
    }
}

#[test]
fn loaded_graph_is_consistent() {
    init_tracing();
    let (_, store, _) = seeded_session(Config::default());
    let mut session = session_for(&graph_model(), &store, Config::default());

    let root = load_required_graph(&mut session, 1);

    assert_consistent(&session);
    assert_eq!(session.collection(root, "RequiredChildren").unwrap().len(), 2);
    assert_eq!(session.collection(root, "OptionalChildren").unwrap().len(), 2);
    assert_eq!(session.collection(root, "RequiredChildrenAk").unwrap().len(), 2);
    assert!(session.reference(root, "RequiredSingle").unwrap().is_some());
    assert!(session.reference(root, "OptionalSingle").unwrap().is_some());
    assert!(session.reference(root, "RequiredNonPkSingle").unwrap().is_some());
}

#[test]
fn principal_and_dependent_side_writes_agree() {
    init_tracing();
    let (mut session, _store, graph) = seeded_session(Config::default());
    let (from, to) = (graph.required1[0], graph.required1[1]);
    let by_collection = graph.required2[0];
    let by_reference = graph.required2[1];

    link(&mut session, to, "Children", by_collection);
    point(&mut session, by_reference, "Parent", to);
    session.detect_changes().unwrap();

    let to_id = integer(&session, to, "Id");
    for child in [by_collection, by_reference] {
        assert_eq!(session.reference(child, "Parent").unwrap(), Some(to));
        assert_eq!(integer(&session, child, "ParentId"), to_id);
        assert_eq!(session.state(child), EntityState::Modified);
    }
    assert!(session.collection(from, "Children").unwrap().is_empty());
    assert_eq!(session.collection(to, "Children").unwrap().len(), 4);
    assert_consistent(&session);
}

#[test]
fn deleting_root_cascades_through_every_required_level() {
    init_tracing();
    let (mut session, store, graph) = seeded_session(Config::default());

    session.remove(graph.root).unwrap();
    session.save_changes().unwrap();

    let mut gone = vec![
        graph.root,
        graph.required_single1,
        graph.required_single2,
        graph.required_non_pk_single,
    ];
    gone.extend(&graph.required1);
    gone.extend(&graph.required2);
    gone.extend(&graph.required_ak1);
    gone.extend(&graph.required_ak2);
    gone.extend(&graph.required_composite2);
    for object in gone {
        assert_eq!(session.state(object), EntityState::Detached);
    }
    for table in [
        "Root",
        "Required1",
        "Required2",
        "RequiredSingle1",
        "RequiredSingle2",
        "RequiredNonPkSingle1",
        "RequiredAk1",
        "RequiredAk2",
        "RequiredComposite2",
    ] {
        assert_eq!(store.row_count(table), 0, "{table} rows left behind");
    }

    let mut reloaded = session_for(&graph_model(), &store, Config::default());
    assert_eq!(reloaded.load("Root", &KeyValues::single(1)).unwrap(), None);
    assert!(reloaded.load_all("Required2").unwrap().is_empty());
}

#[test]
fn deleting_root_keeps_optional_children() {
    init_tracing();
    let (mut session, store, graph) = seeded_session(Config::default());

    session.remove(graph.root).unwrap();
    session.save_changes().unwrap();

    let mut kept = graph.optional1.clone();
    kept.extend(&graph.optional_ak1);
    kept.push(graph.optional_single1);
    for object in kept {
        assert_eq!(session.state(object), EntityState::Unchanged);
        assert_eq!(session.reference(object, "Root").ok().flatten(), None);
        assert_eq!(session.reference(object, "Parent").ok().flatten(), None);
    }
    for &object in &graph.optional1 {
        assert_eq!(session.value(object, "ParentId").unwrap(), Value::Null);
    }
    assert_eq!(session.value(graph.optional_single1, "RootId").unwrap(), Value::Null);

    for &object in &graph.optional2 {
        assert_eq!(session.state(object), EntityState::Unchanged);
        assert!(session.reference(object, "Parent").unwrap().is_some());
    }
    assert_eq!(session.state(graph.optional_single2), EntityState::Unchanged);

    let mut reloaded = session_for(&graph_model(), &store, Config::default());
    assert_eq!(reloaded.load_all("Optional1").unwrap().len(), 2);
    assert_eq!(reloaded.load_all("Optional2").unwrap().len(), 4);
    assert_eq!(reloaded.load_all("OptionalAk1").unwrap().len(), 2);
    assert!(store.rows("Optional1").iter().all(|row| row.get("ParentId").is_null()));
}

#[test]
fn saved_entries_never_keep_temporary_keys() {
    init_tracing();
    let (mut session, _store, graph) = seeded_session(Config::default());

    for entry in session.entries().unwrap() {
        assert_eq!(entry.state(), EntityState::Unchanged);
        for property in ["Id", "ParentId", "RootId", "BackId"] {
            if let Ok(temporary) = entry.is_temporary(property) {
                assert!(!temporary, "{} {property} is temporary", entry.entity_type());
            }
        }
    }
    assert!(tracked_integers(&session).iter().all(|&v| v > 0));

    session.remove(graph.required1[0]).unwrap();
    session.cascade_changes().unwrap();
    for entry in session.entries().unwrap() {
        if entry.state() == EntityState::Deleted {
            assert!(!entry.is_temporary("Id").unwrap());
        }
    }
}

#[test]
fn second_detection_changes_nothing() {
    init_tracing();
    let (mut session, _store, graph) = seeded_session(Config::default());
    point(&mut session, graph.required2[0], "Parent", graph.required1[1]);
    session.set_reference(graph.optional2[0], "Parent", None).unwrap();
    session.detect_changes().unwrap();
    let states: Vec<_> = graph.all().iter().map(|&o| session.state(o)).collect();

    let events = session.subscribe();
    session.detect_changes().unwrap();

    assert!(events.try_recv().is_err());
    let again: Vec<_> = graph.all().iter().map(|&o| session.state(o)).collect();
    assert_eq!(states, again);
}

#[test]
fn notifications_keep_graph_consistent_without_explicit_detection() {
    init_tracing();
    let config = Config::default()
        .change_tracking(ChangeTrackingStrategy::ChangedNotifications)
        .auto_detect_changes(false);
    let (mut session, _store, graph) = seeded_session(config);
    let events = session.subscribe();

    let to = integer(&session, graph.required1[1], "Id");
    session.set_value(graph.required2[0], "ParentId", to).unwrap();

    assert_eq!(session.reference(graph.required2[0], "Parent").unwrap(), Some(graph.required1[1]));
    assert_consistent(&session);
    let event = events.try_recv().unwrap();
    assert_eq!(event.object, graph.required2[0]);
    assert_eq!(
        event.kind,
        TrackerEventKind::StateChanged {
            from: EntityState::Unchanged,
            to: EntityState::Modified,
        }
    );
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn edit_scripts_keep_fixup_symmetric(script in edit_script_strategy(1, 24)) {
        init_tracing();
        let (mut session, store, graph) = seeded_session(Config::default());
        let mut pool = EditPool::from(&graph);

        for edit in &script {
            edit.apply(&mut session, &mut pool).unwrap();
            session.detect_changes().unwrap();
            let violations = fixup_violations(&session);
            prop_assert!(violations.is_empty(), "after {:?}: {:#?}", edit, violations);
        }

        session.save_changes().unwrap();
        prop_assert!(fixup_violations(&session).is_empty());
        prop_assert!(!session.has_changes().unwrap());
        prop_assert!(tracked_integers(&session).iter().all(|&v| v > 0));

        let live_required2 = pool
            .required2
            .iter()
            .filter(|&&o| session.state(o) == EntityState::Unchanged)
            .count();
        prop_assert_eq!(store.row_count("Required2"), live_required2);
    }

    #[test]
    fn wiring_order_does_not_change_the_graph(steps in wiring_strategy(3)) {
        init_tracing();
        let model = category_model();
        let store = store_for(&model);
        let mut session = session_for(&model, &store, Config::default());
        let category = create(&mut session, "Category");
        let products: Vec<_> = (0..3).map(|_| create(&mut session, "Product")).collect();

        for step in &steps {
            match *step {
                WiringStep::AddCategory => session.add(category).unwrap(),
                WiringStep::AddProduct(i) => session.add(products[i]).unwrap(),
                WiringStep::Link(i, LinkVia::Reference) => point(&mut session, products[i], "Category", category),
                WiringStep::Link(i, LinkVia::Collection) => link(&mut session, category, "Products", products[i]),
                WiringStep::Link(i, LinkVia::ForeignKey) => {
                    let key = integer(&session, category, "Id");
                    session.set_value(products[i], "CategoryId", key).unwrap();
                }
            }
        }
        session.detect_changes().unwrap();

        let key = integer(&session, category, "Id");
        let mut listed = session.collection(category, "Products").unwrap();
        listed.sort();
        prop_assert_eq!(&listed, &products);
        for &product in &products {
            prop_assert_eq!(session.state(product), EntityState::Added);
            prop_assert_eq!(session.reference(product, "Category").unwrap(), Some(category));
            prop_assert_eq!(integer(&session, product, "CategoryId"), key);
        }

        session.save_changes().unwrap();
        prop_assert_eq!(store.row_count("Product"), 3);
        prop_assert!(store.rows("Product").iter().all(|row| row.get("CategoryId") == &Value::Integer(1)));
    }

    #[test]
    fn store_keys_reach_every_dependent(seed in 1i64..10_000, children in 1usize..5) {
        init_tracing();
        let model = category_model();
        let store = store_for(&model);
        store.set_identity_seed("Category", seed);
        let mut session = session_for(&model, &store, Config::default());
        let category = create(&mut session, "Category");
        let products: Vec<_> = (0..children).map(|_| create(&mut session, "Product")).collect();
        for &product in &products {
            link(&mut session, category, "Products", product);
        }
        session.add(category).unwrap();

        session.save_changes().unwrap();

        prop_assert_eq!(integer(&session, category, "Id"), seed);
        for &product in &products {
            prop_assert_eq!(integer(&session, product, "CategoryId"), seed);
            prop_assert!(!session.entry(product).unwrap().is_temporary("Id").unwrap());
        }
        prop_assert!(tracked_integers(&session).iter().all(|&v| v > 0));
    }
}
