//! Attaching, detaching, entry views and tracker events.

use entrack_core::{ObjectId, TrackerEvent, TrackerEventKind};
use entrack_testkit::prelude::*;

fn kinds_for(events: &[TrackerEvent], object: ObjectId) -> Vec<TrackerEventKind> {
    events
        .iter()
        .filter(|e| e.object == object)
        .map(|e| e.kind)
        .collect()
}

#[test]
fn attach_picks_state_from_key() {
    init_tracing();
    let (_, store, _) = seeded_session(Config::default());
    let mut session = session_for(&graph_model(), &store, Config::default());
    let root = create(&mut session, "Root");
    session.set_value(root, "Id", 1i64).unwrap();
    let child = create(&mut session, "Optional1");
    link(&mut session, root, "OptionalChildren", child);

    session.attach(root).unwrap();

    assert_eq!(session.state(root), EntityState::Unchanged);
    assert_eq!(session.state(child), EntityState::Added);
    assert_eq!(session.value(child, "ParentId").unwrap(), Value::Integer(1));
    assert!(integer(&session, child, "Id") < 0);

    session.save_changes().unwrap();
    assert_eq!(store.row_count("Optional1"), 3);
}

#[test]
fn update_marks_every_non_key_property() {
    init_tracing();
    let (_, store, _) = seeded_session(Config::default());
    let stored = store.rows("Root")[0].clone();
    let mut session = session_for(&graph_model(), &store, Config::default());
    let root = create(&mut session, "Root");
    session.set_value(root, "Id", 1i64).unwrap();
    session
        .set_value(root, "AlternateId", stored.get("AlternateId").clone())
        .unwrap();

    session.update(root).unwrap();

    let entry = session.entry(root).unwrap();
    assert_eq!(entry.state(), EntityState::Modified);
    assert!(entry.is_modified("AlternateId").unwrap());
    assert!(!entry.is_modified("Id").unwrap());
    assert_eq!(session.save_changes().unwrap(), 1);
    assert_eq!(session.state(root), EntityState::Unchanged);
}

#[test]
fn entry_reports_original_and_current_values() {
    init_tracing();
    let (mut session, _store, graph) = seeded_session(Config::default());
    let child = graph.required2[0];
    let from = integer(&session, graph.required1[0], "Id");
    let to = integer(&session, graph.required1[1], "Id");
    let child_id = integer(&session, child, "Id");

    point(&mut session, child, "Parent", graph.required1[1]);

    let entry = session.entry(child).unwrap();
    assert_eq!(entry.state(), EntityState::Modified);
    assert_eq!(entry.original_value("ParentId").unwrap(), &Value::Integer(from));
    assert_eq!(entry.current_value("ParentId").unwrap(), &Value::Integer(to));
    assert_eq!(entry.modified_properties(), vec!["ParentId"]);
    assert_eq!(entry.key(), KeyValues::single(child_id));
}

#[test]
fn accepting_changes_without_saving() {
    init_tracing();
    let (mut session, store, graph) = seeded_session(Config::default());
    point(&mut session, graph.required2[0], "Parent", graph.required1[1]);
    assert!(session.has_changes().unwrap());
    let batches = store.batch_count();

    session.accept_all_changes().unwrap();

    assert!(!session.has_changes().unwrap());
    assert_eq!(session.state(graph.required2[0]), EntityState::Unchanged);
    assert_eq!(session.save_changes().unwrap(), 0);
    assert_eq!(store.batch_count(), batches);
}

#[test]
fn accepting_changes_refuses_temporary_keys() {
    init_tracing();
    let model = graph_model();
    let store = store_for(&model);
    let mut session = session_for(&model, &store, Config::default());
    let graph = build_required_graph(&mut session);

    let err = session.accept_all_changes().unwrap_err();

    assert!(matches!(err, CoreError::InvalidStateTransition { .. }));
    assert_eq!(session.state(graph.root), EntityState::Added);
}

#[test]
fn detached_dependent_leaves_its_principal() {
    init_tracing();
    let (mut session, _store, graph) = seeded_session(Config::default());
    let child = graph.required2[0];
    let child_id = integer(&session, child, "Id");
    let parent = graph.required1[0];

    session.detach(child).unwrap();

    assert_eq!(session.state(child), EntityState::Detached);
    assert!(!session.collection(parent, "Children").unwrap().contains(&child));
    assert_eq!(session.reference(child, "Parent").unwrap(), Some(parent));
    assert!(fixup_violations(&session).is_empty());

    let reloaded = session
        .load("Required2", &KeyValues::single(child_id))
        .unwrap()
        .unwrap();
    assert_ne!(reloaded, child);
    assert_eq!(session.reference(reloaded, "Parent").unwrap(), Some(parent));
    assert!(session.collection(parent, "Children").unwrap().contains(&reloaded));
}

#[test]
fn clear_stops_tracking_everything() {
    init_tracing();
    let (mut session, _store, graph) = seeded_session(Config::default());

    session.clear();

    for object in graph.all() {
        assert_eq!(session.state(object), EntityState::Detached);
    }
    assert_eq!(session.count_for_state(EntityState::Unchanged), 0);
    assert!(!session.has_changes().unwrap());
}

#[test]
fn events_follow_a_cascading_delete() {
    init_tracing();
    let (mut session, _store, graph) = seeded_session(Config::default());
    let events = session.subscribe();
    let parent = graph.required1[0];

    session.remove(parent).unwrap();
    session.save_changes().unwrap();

    let received: Vec<TrackerEvent> = events.try_iter().collect();
    assert_eq!(
        kinds_for(&received, parent),
        vec![
            TrackerEventKind::StateChanged {
                from: EntityState::Unchanged,
                to: EntityState::Deleted,
            },
            TrackerEventKind::StateChanged {
                from: EntityState::Deleted,
                to: EntityState::Detached,
            },
        ]
    );
    for &child in &graph.required2[..2] {
        assert_eq!(kinds_for(&received, child).len(), 2);
    }
    assert!(received.windows(2).all(|w| w[0].sequence < w[1].sequence));
    assert!(received.iter().all(|e| e.entity_type.starts_with("Required")));
}

#[test]
fn events_follow_an_insert() {
    init_tracing();
    let (mut session, _store, graph) = seeded_session(Config::default());
    let cursor = session.tracker().events().latest_sequence();
    let child = create(&mut session, "Optional2");
    link(&mut session, graph.optional1[0], "Children", child);

    session.save_changes().unwrap();

    let history = session.tracker().events().poll(cursor, 16);
    assert_eq!(
        kinds_for(&history, child),
        vec![
            TrackerEventKind::Tracked {
                state: EntityState::Added,
            },
            TrackerEventKind::StateChanged {
                from: EntityState::Added,
                to: EntityState::Unchanged,
            },
        ]
    );
    assert!(history.iter().all(|e| e.sequence > cursor));
}
