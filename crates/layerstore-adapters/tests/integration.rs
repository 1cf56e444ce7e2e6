//! Integration tests for the layerstore-adapters crate.
//!
//! These tests install adapters on a real hook bus and exercise the claim
//! chain, transform hooks and push ingestion together.

use std::sync::Arc;

use async_trait::async_trait;
use layerstore_adapters::{
    Adapter, AdapterError, AdapterHost, BeforeMutationHook, CacheWriter, CreateItemHook,
    DeleteItemHook, FetchItemHook, FetchItemRequest, LoggingPlugin, MemoryAdapter, MutationDraft, Result,
    SetupApi, Verb,
};
use layerstore_cache::LayerStack;
use layerstore_kernel::{
    ChangeBus, Claim, HookBus, HookPosition, Item, ItemType, ItemTypeRegistry, KernelError,
};
use serde_json::json;

struct Env {
    registry: ItemTypeRegistry,
    hooks: HookBus,
    layers: LayerStack,
    host: AdapterHost,
}

fn env() -> Env {
    let registry = ItemTypeRegistry::new();
    registry.register(ItemType::collection("Todo")).unwrap();
    registry.register(ItemType::collection("Note")).unwrap();
    let hooks = HookBus::new();
    let layers = LayerStack::new(ChangeBus::new(64));
    let writer = CacheWriter::new(layers.clone(), registry.clone(), true);
    let host = AdapterHost::new(hooks.clone(), registry.clone(), writer).unwrap();
    Env {
        registry,
        hooks,
        layers,
        host,
    }
}

/// Reports `NotFound` for everything it claims.
struct Empty;

#[async_trait]
impl Adapter for Empty {
    fn id(&self) -> &str {
        "empty"
    }

    fn setup(&self, api: &mut SetupApi<'_>) -> Result<()> {
        api.claim(Verb::FetchItem, "Note")
    }

    async fn fetch_item(&self, _request: &FetchItemRequest) -> Result<Claim<Item>> {
        Ok(Claim::NotFound)
    }
}

/// Pushes items through its cache writer during setup.
struct Pusher;

#[async_trait]
impl Adapter for Pusher {
    fn id(&self) -> &str {
        "pusher"
    }

    fn setup(&self, api: &mut SetupApi<'_>) -> Result<()> {
        let writer = api.cache_writer();
        writer.write("Todo", json!({"id": "pushed", "text": "from socket"}))?;
        Ok(())
    }
}

/// Registers a create handler straight on the bus instead of claiming.
struct Sneaky;

#[async_trait]
impl Adapter for Sneaky {
    fn id(&self) -> &str {
        "sneaky"
    }

    fn setup(&self, api: &mut SetupApi<'_>) -> Result<()> {
        api.hooks().on_claim::<CreateItemHook, _, _>(
            |_request| async { Ok(Claim::Handled(json!({"id": "1", "from": "sneaky"}))) },
            HookPosition::Prepend,
        )?;
        Ok(())
    }
}

#[test]
fn verb_hooks_only_accept_claimed_routes() {
    let mut env = env();
    env.host
        .install(Arc::new(MemoryAdapter::new("rest").with_type("Todo")))
        .unwrap();
    let err = env.host.install(Arc::new(Sneaky)).unwrap_err();

    assert!(matches!(
        err,
        AdapterError::Kernel(KernelError::HookReserved { ref hook }) if hook == "createItem"
    ));
    assert_eq!(env.hooks.handler_count("createItem"), 1);
    assert_eq!(env.host.adapter_ids(), vec!["rest"]);
}

#[test]
fn adapter_conflict_is_reported_at_setup() {
    let mut env = env();
    env.host
        .install(Arc::new(MemoryAdapter::new("rest").with_type("Todo")))
        .unwrap();
    let err = env
        .host
        .install(Arc::new(MemoryAdapter::new("ws").with_type("Todo")))
        .unwrap_err();

    match err {
        AdapterError::Conflict {
            type_name, existing, adapter, ..
        } => {
            assert_eq!(type_name, "Todo");
            assert_eq!(existing, "rest");
            assert_eq!(adapter, "ws");
        }
        other => panic!("unexpected: {other:?}"),
    }
    // Nothing of the rejected adapter was routed.
    assert_eq!(env.hooks.handler_count("createItem"), 1);
}

#[tokio::test]
async fn not_found_from_one_adapter_still_reports_not_found() {
    let mut env = env();
    env.host.install(Arc::new(Empty)).unwrap();
    env.host
        .install(Arc::new(MemoryAdapter::new("mem").with_type("Todo")))
        .unwrap();

    let request = FetchItemRequest {
        item_type: env.registry.resolve("Note").unwrap(),
        key: "1".into(),
    };
    let out = env.hooks.call_claim::<FetchItemHook>(request).await.unwrap();
    assert_eq!(out, Claim::NotFound);
}

#[tokio::test]
async fn transport_errors_travel_through_the_bus() {
    let mut env = env();
    let adapter = Arc::new(MemoryAdapter::new("mem").with_type("Todo"));
    env.host.install(adapter.clone()).unwrap();
    adapter.fail_next("socket closed");

    let request = layerstore_adapters::DeleteItemRequest {
        item_type: env.registry.resolve("Todo").unwrap(),
        key: "1".into(),
    };
    let err = env
        .hooks
        .call_claim::<DeleteItemHook>(request)
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::HookExecution { ref hook, .. } if hook == "deleteItem"));
    let adapter_err = AdapterError::from_hook(&err).unwrap();
    assert!(adapter_err.is_transport());
}

#[tokio::test]
async fn logging_plugin_passes_payloads_through() {
    let mut env = env();
    let plugin = Arc::new(LoggingPlugin::new());
    env.host.install(plugin.clone()).unwrap();
    env.hooks
        .on_transform::<BeforeMutationHook, _, _>(
            |mut draft: MutationDraft| async move {
                draft.item["stamped"] = json!(true);
                Ok(draft)
            },
            HookPosition::Append,
        )
        .unwrap();

    let draft = MutationDraft {
        verb: Verb::Create,
        item_type: env.registry.resolve("Todo").unwrap(),
        key: Some("1".into()),
        item: json!({"id": "1"}),
    };
    let out = env.hooks.call_transform::<BeforeMutationHook>(draft).await.unwrap();
    assert_eq!(out.item, json!({"id": "1", "stamped": true}));
    assert_eq!(plugin.observed(), 1);
    assert!(env.host.claims().is_empty());
}

#[test]
fn push_ingestion_lands_in_base() {
    let mut env = env();
    env.host.install(Arc::new(Pusher)).unwrap();
    assert_eq!(
        env.layers.get("Todo", "pushed"),
        Some(json!({"id": "pushed", "text": "from socket"}))
    );
}
