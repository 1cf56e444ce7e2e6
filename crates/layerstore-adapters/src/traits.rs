//! Core adapter trait.
//!
//! Every backend integration (REST, WebSocket push, SQL, in-memory)
//! implements the [`Adapter`] trait.  During [`Adapter::setup`] the adapter
//! declares which verbs it serves for which item types; afterwards the store
//! routes matching requests to the per-verb methods.

use async_trait::async_trait;
use layerstore_kernel::{Claim, Item};

use crate::error::Result;
use crate::request::{
    CreateItemRequest, DeleteItemRequest, FetchItemRequest, FetchListRequest, UpdateItemRequest,
};
use crate::setup::SetupApi;

/// The universal adapter interface.
///
/// Each verb method answers with a [`Claim`]:
///
/// - [`Claim::Handled`] with the fetched or confirmed data;
/// - [`Claim::NotFound`] when the backend has no such item;
/// - [`Claim::Pass`] when the request is not this adapter's to serve.
///
/// Verbs the adapter never claims can keep the default bodies.
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Return the unique identifier for this adapter instance.
    fn id(&self) -> &str;

    /// Declare claims and register plugin hooks.
    ///
    /// Runs once while the store is built.  A conflicting claim fails here,
    /// before any request is served.
    fn setup(&self, api: &mut SetupApi<'_>) -> Result<()>;

    async fn fetch_item(&self, _request: &FetchItemRequest) -> Result<Claim<Item>> {
        Ok(Claim::Pass)
    }

    async fn fetch_list(&self, _request: &FetchListRequest) -> Result<Claim<Vec<Item>>> {
        Ok(Claim::Pass)
    }

    async fn create_item(&self, _request: &CreateItemRequest) -> Result<Claim<Item>> {
        Ok(Claim::Pass)
    }

    async fn update_item(&self, _request: &UpdateItemRequest) -> Result<Claim<Item>> {
        Ok(Claim::Pass)
    }

    async fn delete_item(&self, _request: &DeleteItemRequest) -> Result<Claim<()>> {
        Ok(Claim::Pass)
    }
}
