//! End-to-end fixup and save scenarios.

use entrack_testkit::prelude::*;

#[test]
fn reference_write_fixes_up_foreign_key_and_collection() {
    init_tracing();
    let model = category_model();
    let store = store_for(&model);
    let mut session = session_for(&model, &store, Config::default());

    let category = create(&mut session, "Category");
    session.set_value(category, "Id", -77i64).unwrap();
    let product = create(&mut session, "Product");
    session.set_value(product, "Id", -78i64).unwrap();
    session.set_value(product, "CategoryId", 0i64).unwrap();
    session.add(category).unwrap();
    session.add(product).unwrap();

    point(&mut session, product, "Category", category);
    session.detect_changes().unwrap();

    assert_eq!(integer(&session, product, "CategoryId"), -77);
    assert_eq!(session.collection(category, "Products").unwrap(), vec![product]);
    assert!(fixup_violations(&session).is_empty());
}

#[test]
fn reference_write_before_tracking_fixes_up_on_add() {
    init_tracing();
    let model = category_model();
    let store = store_for(&model);
    let mut session = session_for(&model, &store, Config::default());

    let category = create(&mut session, "Category");
    session.set_value(category, "Id", -77i64).unwrap();
    let product = create(&mut session, "Product");
    session.set_value(product, "Id", -78i64).unwrap();
    point(&mut session, product, "Category", category);

    session.add(product).unwrap();

    assert_eq!(session.state(category), EntityState::Added);
    assert_eq!(integer(&session, product, "CategoryId"), -77);
    assert_eq!(session.collection(category, "Products").unwrap(), vec![product]);
}

#[test]
fn removing_a_required_child_cascades_to_grandchildren() {
    init_tracing();
    let (mut session, store, graph) = seeded_session(Config::default());
    let removed = graph.required1[0];

    session.remove(removed).unwrap();
    session.save_changes().unwrap();

    for object in [removed, graph.required2[0], graph.required2[1]] {
        assert_eq!(session.state(object), EntityState::Detached);
    }
    assert_eq!(session.state(graph.required1[1]), EntityState::Unchanged);
    assert_eq!(
        session.collection(graph.root, "RequiredChildren").unwrap(),
        vec![graph.required1[1]]
    );

    let mut reloaded = session_for(&graph_model(), &store, Config::default());
    let root = load_required_graph(&mut reloaded, integer(&session, graph.root, "Id"));
    let children = reloaded.collection(root, "RequiredChildren").unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(reloaded.collection(children[0], "Children").unwrap().len(), 2);
    assert_eq!(store.row_count("Required2"), 2);
}

#[test]
fn foreign_key_write_moves_optional_one_to_one() {
    init_tracing();
    let (mut session, _store, graph) = seeded_session(Config::default());
    let new_root = create(&mut session, "Root");
    session.add(new_root).unwrap();
    session.save_changes().unwrap();
    let old = graph.optional_single1;

    let new_root_id = integer(&session, new_root, "Id");
    session.set_value(old, "RootId", new_root_id).unwrap();
    session.detect_changes().unwrap();

    assert_eq!(session.reference(old, "Root").unwrap(), Some(new_root));
    assert_eq!(session.reference(graph.root, "OptionalSingle").unwrap(), None);
    assert_eq!(session.reference(new_root, "OptionalSingle").unwrap(), Some(old));
    assert_eq!(session.state(old), EntityState::Modified);
    assert!(fixup_violations(&session).is_empty());
}

#[test]
fn store_key_replaces_temporary_key_everywhere() {
    init_tracing();
    let model = category_model();
    let store = store_for(&model);
    store.set_identity_seed("Category", 78);
    let mut session = session_for(&model, &store, Config::default().temporary_key_seed(-78));

    let category = create(&mut session, "Category");
    session.add(category).unwrap();
    assert_eq!(integer(&session, category, "Id"), -78);
    assert!(session.entry(category).unwrap().is_temporary("Id").unwrap());

    let products: Vec<_> = (0..2).map(|_| create(&mut session, "Product")).collect();
    for &product in &products {
        link(&mut session, category, "Products", product);
    }
    session.detect_changes().unwrap();
    for &product in &products {
        assert_eq!(session.state(product), EntityState::Added);
        assert_eq!(integer(&session, product, "CategoryId"), -78);
    }

    session.save_changes().unwrap();

    assert_eq!(integer(&session, category, "Id"), 78);
    for &product in &products {
        assert_eq!(integer(&session, product, "CategoryId"), 78);
        assert!(!session.entry(product).unwrap().is_temporary("CategoryId").unwrap());
    }
    let values = tracked_integers(&session);
    assert!(!values.contains(&-78));
    assert!(values.iter().all(|&v| v > 0));
    assert!(store.rows("Product").iter().all(|row| row.get("CategoryId") == &Value::Integer(78)));
}
