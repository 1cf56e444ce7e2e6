//! Hook points of the adapter pipeline.
//!
//! Claim hooks elect the one adapter that performs a backend call; transform
//! hooks let plugins observe or rewrite payloads on the way in and out.

use layerstore_kernel::{ClaimHook, Item, TransformHook};

use crate::request::{
    CreateItemRequest, DeleteItemRequest, FetchItemRequest, FetchListRequest, FetchedItems,
    MutationDraft, MutationOutcome, UpdateItemRequest,
};

// -- Claim hooks --------------------------------------------------------------

pub struct FetchItemHook;

impl ClaimHook for FetchItemHook {
    const NAME: &'static str = "fetchItem";
    type Request = FetchItemRequest;
    type Output = Item;
}

pub struct FetchListHook;

impl ClaimHook for FetchListHook {
    const NAME: &'static str = "fetchList";
    type Request = FetchListRequest;
    type Output = Vec<Item>;
}

pub struct CreateItemHook;

impl ClaimHook for CreateItemHook {
    const NAME: &'static str = "createItem";
    type Request = CreateItemRequest;
    type Output = Item;
}

pub struct UpdateItemHook;

impl ClaimHook for UpdateItemHook {
    const NAME: &'static str = "updateItem";
    type Request = UpdateItemRequest;
    type Output = Item;
}

pub struct DeleteItemHook;

impl ClaimHook for DeleteItemHook {
    const NAME: &'static str = "deleteItem";
    type Request = DeleteItemRequest;
    type Output = ();
}

// -- Transform hooks ----------------------------------------------------------

/// Runs before a mutation is staged; may rewrite the outgoing payload.
pub struct BeforeMutationHook;

impl TransformHook for BeforeMutationHook {
    const NAME: &'static str = "beforeMutation";
    type Payload = MutationDraft;
}

/// Runs on adapter fetch results before they are cached.
pub struct AfterFetchHook;

impl TransformHook for AfterFetchHook {
    const NAME: &'static str = "afterFetch";
    type Payload = FetchedItems;
}

/// Runs on confirmed mutation results before they are committed.
pub struct AfterMutationHook;

impl TransformHook for AfterMutationHook {
    const NAME: &'static str = "afterMutation";
    type Payload = MutationOutcome;
}
