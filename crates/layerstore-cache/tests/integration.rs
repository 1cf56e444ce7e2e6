//! Integration tests for the layerstore-cache crate.
//!
//! These tests drive the layer stack through random operation sequences and
//! the optimistic commit/rollback scenarios.

use layerstore_cache::{Layer, LayerChange, LayerId, LayerPosition, LayerStack, Lookup};
use layerstore_kernel::{CacheEvent, ChangeBus};
use proptest::prelude::*;
use serde_json::json;

fn stack() -> LayerStack {
    LayerStack::new(ChangeBus::new(1024))
}

// ═══════════════════════════════════════════════════════════════════════
//  Random operation sequences
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum Op {
    Push { layer: u8, skip: bool },
    Remove { layer: u8 },
    Skip { layer: u8, skip: bool },
    Write { layer: Option<u8>, key: u8, value: i64 },
    Delete { layer: Option<u8>, key: u8 },
    Commit { layer: u8 },
}

fn layer_id(n: u8) -> LayerId {
    LayerId::new(format!("opt-{n}"))
}

fn target(layer: Option<u8>) -> LayerId {
    layer.map_or_else(LayerId::base, layer_id)
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let layer = 0u8..4;
    let key = 0u8..6;
    prop_oneof![
        (layer.clone(), any::<bool>()).prop_map(|(layer, skip)| Op::Push { layer, skip }),
        layer.clone().prop_map(|layer| Op::Remove { layer }),
        (layer.clone(), any::<bool>()).prop_map(|(layer, skip)| Op::Skip { layer, skip }),
        (prop::option::of(layer.clone()), key.clone(), any::<i64>())
            .prop_map(|(layer, key, value)| Op::Write { layer, key, value }),
        (prop::option::of(layer.clone()), key).prop_map(|(layer, key)| Op::Delete { layer, key }),
        layer.prop_map(|layer| Op::Commit { layer }),
    ]
}

fn run(stack: &LayerStack, op: &Op) {
    // Errors (unknown layer, duplicate push) are expected and harmless.
    match op {
        Op::Push { layer, skip } => {
            let _ = stack.push_layer(Layer::optimistic(layer_id(*layer)).with_skip(*skip), LayerPosition::Top);
        }
        Op::Remove { layer } => {
            stack.remove_layer(&layer_id(*layer));
        }
        Op::Skip { layer, skip } => {
            let _ = stack.set_skip(&layer_id(*layer), *skip);
        }
        Op::Write { layer, key, value } => {
            let _ = stack.write_item(&target(*layer), "T", &key.to_string(), json!(value));
        }
        Op::Delete { layer, key } => {
            let _ = stack.delete_item(&target(*layer), "T", &key.to_string());
        }
        Op::Commit { layer } => {
            let _ = stack.commit_layer(&layer_id(*layer), &[]);
        }
    }
}

proptest! {
    /// No key is ever both present and tombstoned in the same layer.
    #[test]
    fn never_both_after_every_operation(ops in prop::collection::vec(op_strategy(), 0..60)) {
        let stack = stack();
        for op in &ops {
            run(&stack, op);
            prop_assert!(stack.invariants_hold(), "invariant broken after {:?}", op);
        }
    }

    /// `list` agrees with `get` for every key.
    #[test]
    fn list_matches_point_reads(ops in prop::collection::vec(op_strategy(), 0..60)) {
        let stack = stack();
        for op in &ops {
            run(&stack, op);
        }
        let listed: Vec<_> = stack.list("T", None).collect();
        let pointwise: Vec<_> = (0u8..6)
            .filter_map(|k| stack.get("T", &k.to_string()))
            .collect();
        prop_assert_eq!(listed, pointwise);
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Optimistic scenarios
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn optimistic_rollback_restores_base_value() {
    let stack = stack();
    stack.write_item(&LayerId::base(), "Todo", "A", json!("v1")).unwrap();

    let id = LayerId::generate();
    stack
        .push_layer(Layer::optimistic(id.clone()).with_item("Todo", "A", json!("v2")), LayerPosition::Top)
        .unwrap();
    assert_eq!(stack.get("Todo", "A"), Some(json!("v2")));

    // The adapter call failed.
    stack.rollback_layer(&id);

    assert_eq!(stack.get("Todo", "A"), Some(json!("v1")));
    assert!(!stack.contains(&id));
    assert_eq!(stack.len(), 1);
}

#[test]
fn optimistic_commit_leaves_only_base() {
    let stack = stack();
    stack.write_item(&LayerId::base(), "Todo", "A", json!("v1")).unwrap();

    let id = LayerId::generate();
    stack
        .push_layer(Layer::optimistic(id.clone()).with_item("Todo", "A", json!("v2")), LayerPosition::Top)
        .unwrap();
    stack
        .commit_layer(&id, &[LayerChange::write("Todo", "A", json!("v2"))])
        .unwrap();

    assert_eq!(stack.get("Todo", "A"), Some(json!("v2")));
    assert_eq!(stack.layer_ids(), vec![LayerId::base()]);
}

#[test]
fn commit_is_invisible_to_concurrent_readers() {
    let stack = stack();
    stack.write_item(&LayerId::base(), "Todo", "A", json!("v1")).unwrap();
    let id = LayerId::generate();
    stack
        .push_layer(Layer::optimistic(id.clone()).with_item("Todo", "A", json!("v2")), LayerPosition::Top)
        .unwrap();

    let reader = {
        let stack = stack.clone();
        std::thread::spawn(move || {
            for _ in 0..10_000 {
                let value = stack.get("Todo", "A");
                assert_eq!(value, Some(json!("v2")), "reader saw a transient state");
            }
        })
    };
    stack.commit_layer(&id, &[]).unwrap();
    reader.join().unwrap();
}

#[test]
fn deletion_precedence_over_base() {
    let stack = stack();
    stack.write_item(&LayerId::base(), "Todo", "A", json!("v1")).unwrap();
    stack
        .push_layer(Layer::optimistic("overlay").with_deleted("Todo", "A"), LayerPosition::Top)
        .unwrap();

    assert_eq!(stack.lookup("Todo", "A"), Lookup::Deleted);
    assert_eq!(stack.get("Todo", "A"), None);

    stack.remove_layer(&"overlay".into());
    assert_eq!(stack.get("Todo", "A"), Some(json!("v1")));
}

#[test]
fn skip_toggle_is_immediate() {
    let stack = stack();
    stack.write_item(&LayerId::base(), "Todo", "A", json!("v1")).unwrap();
    stack
        .push_layer(
            Layer::optimistic("nine").with_item("Todo", "A", json!("v9")).with_skip(true),
            LayerPosition::Top,
        )
        .unwrap();
    assert_eq!(stack.get("Todo", "A"), Some(json!("v1")));

    stack.set_skip(&"nine".into(), false).unwrap();
    assert_eq!(stack.get("Todo", "A"), Some(json!("v9")));
}

#[tokio::test]
async fn layer_removal_emits_item_changes() {
    let bus = ChangeBus::new(64);
    let stack = LayerStack::new(bus.clone());
    stack.write_item(&LayerId::base(), "Todo", "A", json!("v1")).unwrap();
    stack
        .push_layer(Layer::optimistic("o").with_item("Todo", "A", json!("v2")), LayerPosition::Top)
        .unwrap();

    let mut rx = bus.subscribe();
    stack.remove_layer(&"o".into());

    let removed = rx.recv().await.unwrap();
    assert_eq!(*removed, CacheEvent::LayerRemoved { layer_id: "o".into() });
    let changed = rx.recv().await.unwrap();
    assert!(changed.affects("Todo", "A"));
}
