//! Integration tests for the layerstore kernel.
//!
//! These exercise the registry, the hook bus and the change bus together,
//! the way the store wires them up.

use std::sync::Arc;
use std::time::Duration;

use layerstore_kernel::{
    BoxError, CacheEvent, ChangeBus, Claim, ClaimHook, HookBus, HookPosition, Item, ItemKind,
    ItemType, ItemTypeHandle, ItemTypeRegistry, KernelError, KeyExtractor, RequiredFields,
    TransformHook,
};
use serde_json::json;

/// Fetch one item by type and key.
struct Fetch;

impl ClaimHook for Fetch {
    const NAME: &'static str = "fetch";
    type Request = (ItemTypeHandle, String);
    type Output = Item;
}

/// Rewrite a fetched item.
struct Normalize;

impl TransformHook for Normalize {
    const NAME: &'static str = "normalize";
    type Payload = Item;
}

fn registry() -> ItemTypeRegistry {
    let registry = ItemTypeRegistry::new();
    registry
        .register(
            ItemType::collection("Todo")
                .scope("rest")
                .default_value("done", json!(false))
                .item_schema(RequiredFields::new(["text"])),
        )
        .unwrap();
    registry
        .register(
            ItemType::collection("Membership")
                .scope("rest")
                .key(KeyExtractor::composite(["team", "user"])),
        )
        .unwrap();
    registry.register(ItemType::model("Session")).unwrap();
    registry
}

#[test]
fn registry_resolves_descriptors_by_name_and_scope() {
    let registry = registry();
    assert_eq!(registry.names(), ["Membership", "Session", "Todo"]);

    let rest: Vec<String> = registry
        .in_scope("rest")
        .iter()
        .map(|t| t.name().to_string())
        .collect();
    assert_eq!(rest, ["Membership", "Todo"]);

    let session = registry.resolve("Session").unwrap();
    assert_eq!(session.kind(), ItemKind::Model);
    assert!(session.scope_id().is_none());

    let membership = registry.resolve("Membership").unwrap();
    assert_eq!(
        membership.key_of(&json!({"team": "core", "user": 7})).unwrap(),
        "core:7"
    );
    assert!(matches!(
        membership.key_of(&json!({"team": "core"})),
        Err(KernelError::MissingKey { .. })
    ));

    let dup = registry.register(ItemType::collection("Todo"));
    assert!(matches!(dup, Err(KernelError::DuplicateName { .. })));
}

#[tokio::test]
async fn hook_chain_serves_registered_types() {
    let registry = registry();
    let hooks = HookBus::new();

    // A handler that only knows collections in the "rest" scope.
    hooks
        .on_claim::<Fetch, _, _>(
            |request| async move {
                let (item_type, key) = request.as_ref();
                if item_type.scope_id() != Some("rest") {
                    return Ok(Claim::Pass);
                }
                if key == "missing" {
                    return Ok(Claim::NotFound);
                }
                Ok(Claim::Handled(json!({"id": key, "text": "from rest"})))
            },
            HookPosition::Append,
        )
        .unwrap();
    // Fallback for everything else.
    hooks
        .on_claim::<Fetch, _, _>(
            |request| async move { Ok(Claim::Handled(json!({"id": request.1, "text": "fallback"}))) },
            HookPosition::Append,
        )
        .unwrap();
    hooks
        .on_transform::<Normalize, _, _>(
            |item| async move {
                let mut item = item;
                if let Some(text) = item.get_mut("text") {
                    *text = json!(text.as_str().unwrap_or_default().to_uppercase());
                }
                Ok(item)
            },
            HookPosition::Append,
        )
        .unwrap();

    let todo = registry.resolve("Todo").unwrap();
    let item = match hooks.call_claim::<Fetch>((Arc::clone(&todo), "1".into())).await.unwrap() {
        Claim::Handled(item) => item,
        other => panic!("unexpected claim: {other:?}"),
    };
    let item = hooks.call_transform::<Normalize>(todo.apply_defaults(item)).await.unwrap();
    assert_eq!(item, json!({"id": "1", "text": "FROM REST", "done": false}));
    todo.validate_item(&item).unwrap();

    // NotFound is remembered even though the fallback would have served it.
    let missing = hooks
        .call_claim::<Fetch>((Arc::clone(&todo), "missing".into()))
        .await
        .unwrap();
    assert_eq!(missing, Claim::NotFound);

    let session = registry.resolve("Session").unwrap();
    let other = hooks.call_claim::<Fetch>((session, "s".into())).await.unwrap();
    assert_eq!(other, Claim::Handled(json!({"id": "s", "text": "fallback"})));

    assert_eq!(hooks.handler_count("fetch"), 2);
    assert_eq!(hooks.handler_count("normalize"), 1);
}

#[tokio::test]
async fn handler_errors_keep_their_cause() {
    let hooks = HookBus::new();
    hooks
        .on_claim::<Fetch, _, _>(
            |_request| async { Err::<Claim<Item>, BoxError>("socket closed".into()) },
            HookPosition::Append,
        )
        .unwrap();

    let todo = Arc::new(ItemType::collection("Todo").build());
    let err = hooks.call_claim::<Fetch>((todo, "1".into())).await.unwrap_err();
    assert!(matches!(err, KernelError::HookExecution { ref hook, .. } if hook == "fetch"));
    assert_eq!(err.hook_cause().unwrap().to_string(), "socket closed");
}

#[tokio::test]
async fn item_watchers_only_wake_for_their_item() {
    let bus = ChangeBus::new(16);
    let mut watcher = bus.watch_item("Todo", "1");
    let mut all = bus.subscribe();

    bus.publish(CacheEvent::item_changed("Todo", "2"));
    bus.publish(CacheEvent::query_settled("Todo", "Todo/list/abc"));
    bus.publish(CacheEvent::item_changed("Todo", "1"));

    let woke = tokio::time::timeout(Duration::from_secs(1), watcher.changed())
        .await
        .unwrap();
    assert!(woke);

    let mut seen = Vec::new();
    while let Ok(event) = all.try_recv() {
        seen.push(event.type_name().map(str::to_string));
    }
    assert_eq!(seen.len(), 3);

    // A type-wide clear concerns every item of the type.
    bus.publish(CacheEvent::Cleared {
        type_name: Some("Todo".into()),
    });
    assert!(watcher.changed().await);

    drop(bus);
    assert!(!watcher.changed().await);
}
