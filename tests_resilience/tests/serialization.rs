//! Value codec tests across the wire

use ipc::{Node, Payload, Serialization, ValueGraph};
use remote_ipc::{no_teardown, ActionStream, ActionTable, CallError, CallOptions};
use serde_json::json;
use sim_bus::{DeliveryMode, RecordingObserver};
use tests_resilience::{demo_actions, test_bootstrap, TeardownCounter, CALL_TIMEOUT, CHANNEL};

/// `{"name": "root", "children": [{"parent": <root>}]}`
fn family() -> ValueGraph {
    let mut graph = ValueGraph::new(Node::object());
    let root = graph.root();
    let name = graph.add(Node::String("root".to_string()));
    let children = graph.add(Node::array());
    let child = graph.add(Node::object());
    graph.set_entry(root, "name", name).unwrap();
    graph.set_entry(root, "children", children).unwrap();
    graph.push_item(children, child).unwrap();
    graph.set_entry(child, "parent", root).unwrap();
    graph
}

fn reference_safe() -> Option<CallOptions> {
    Some(CallOptions::new(CALL_TIMEOUT).with_serialization(Serialization::ReferenceSafe))
}

#[test]
fn test_cyclic_value_round_trip() {
    let harness = test_bootstrap(DeliveryMode::Immediate);
    let _registration = harness.serve(demo_actions(&TeardownCounter::default())).unwrap();

    let observer = RecordingObserver::new();
    harness
        .caller()
        .action("mirror", reference_safe())
        .invoke_with(family())
        .subscribe_shared(observer.clone());

    let request = &harness.bus.sent_of_type(CHANNEL, "request")[0];
    assert_eq!(request["serialization"], json!("reference-safe"));
    assert!(request["data"].is_string());

    let values = observer.values();
    assert_eq!(values.len(), 1);
    let graph = values[0].as_graph().unwrap();
    assert!(graph.structurally_eq(&family()));
    assert!(observer.is_complete());
}

#[test]
fn test_dollar_keys_survive_reference_safe_mode() {
    let harness = test_bootstrap(DeliveryMode::Immediate);
    let _registration = harness.serve(demo_actions(&TeardownCounter::default())).unwrap();
    let tricky = json!({"$ref": ["not", "a", "marker"], "$$": 1, "plain": [1, 2]});

    let observer = RecordingObserver::new();
    harness
        .caller()
        .action("mirror", reference_safe())
        .invoke_with(tricky.clone())
        .subscribe_shared(observer.clone());

    let values = observer.values();
    assert_eq!(values[0].as_graph().unwrap().to_json().unwrap(), tricky);
}

#[test]
fn test_cyclic_input_fails_in_transparent_mode() {
    let harness = test_bootstrap(DeliveryMode::Immediate);
    let _registration = harness.serve(demo_actions(&TeardownCounter::default())).unwrap();

    let observer = RecordingObserver::new();
    let subscription = harness
        .caller()
        .action("mirror", None)
        .invoke_with(family())
        .subscribe_shared(observer.clone());

    assert!(matches!(observer.error(), Some(CallError::Codec(_))));
    assert!(subscription.uid().is_none());
    assert!(harness.bus.sent(CHANNEL).is_empty());
}

#[test]
fn test_cyclic_output_fails_in_transparent_mode() {
    let harness = test_bootstrap(DeliveryMode::Immediate);
    let registration = harness
        .serve(ActionTable::new().with("loop", |_, _| {
            ActionStream::new(|sink| {
                sink.next(family());
                sink.next(json!("never sent"));
                sink.complete();
                no_teardown()
            })
        }))
        .unwrap();

    let observer = RecordingObserver::new();
    harness
        .caller()
        .action("loop", None)
        .invoke()
        .subscribe_shared(observer.clone());

    let error = observer.error().unwrap();
    assert!(error.remote().unwrap().is("CodecError"));
    assert_eq!(observer.len(), 1);
    assert_eq!(registration.live_subscriptions(), 0);
    assert_eq!(harness.bus.sent_of_type(CHANNEL, "response").len(), 1);
}

#[test]
fn test_tree_values_are_unchanged_in_transparent_mode() {
    let harness = test_bootstrap(DeliveryMode::Immediate);
    let _registration = harness.serve(demo_actions(&TeardownCounter::default())).unwrap();
    let value = json!({"list": [1, {"deep": true}], "text": "x"});

    let observer = RecordingObserver::new();
    harness
        .caller()
        .action("mirror", None)
        .invoke_with(value.clone())
        .subscribe_shared(observer.clone());

    assert_eq!(observer.values(), vec![Payload::from(value.clone())]);
    assert_eq!(harness.bus.sent_of_type(CHANNEL, "request")[0]["data"], value);
}
