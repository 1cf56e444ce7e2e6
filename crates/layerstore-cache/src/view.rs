//! Merged reads across the layer stack.
//!
//! For a given type and key, layers are scanned top to bottom; the first
//! non-skipped layer that either holds the key or tombstones it decides the
//! result.

use std::collections::BTreeSet;
use std::collections::btree_set;
use std::fmt;
use std::iter::FusedIterator;
use std::sync::Arc;

use layerstore_kernel::Item;

use crate::layer::{Layer, Resolution};

/// Optional filter applied to list results.
pub type Predicate = Box<dyn Fn(&Item) -> bool + Send + Sync>;

/// Outcome of a merged lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Some layer holds the item.
    Present(Item),
    /// The topmost deciding layer tombstones the key.
    Deleted,
    /// No layer knows the key.
    Unknown,
}

impl Lookup {
    pub fn into_item(self) -> Option<Item> {
        match self {
            Self::Present(item) => Some(item),
            Self::Deleted | Self::Unknown => None,
        }
    }

    /// The visible item; tombstones and misses both read as absent.
    pub fn item(&self) -> Option<&Item> {
        match self {
            Self::Present(item) => Some(item),
            Self::Deleted | Self::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Resolve a key against layers ordered from highest to lowest precedence.
pub(crate) fn resolve_in<'a, I>(layers: I, type_name: &str, key: &str) -> Option<Resolution<'a>>
where
    I: IntoIterator<Item = &'a Arc<Layer>>,
{
    layers
        .into_iter()
        .filter(|layer| !layer.is_skipped())
        .find_map(|layer| layer.resolve(type_name, key))
}

pub(crate) fn lookup_in<'a, I>(layers: I, type_name: &str, key: &str) -> Lookup
where
    I: IntoIterator<Item = &'a Arc<Layer>>,
{
    match resolve_in(layers, type_name, key) {
        Some(Resolution::Present(item)) => Lookup::Present(item.clone()),
        Some(Resolution::Deleted) => Lookup::Deleted,
        None => Lookup::Unknown,
    }
}

/// A point-in-time sequence of the merged items of one type.
///
/// The snapshot holds the layers as they were when it was created; later
/// stack mutations copy the layers they touch, so they never show up here.
/// Items are resolved lazily as the iterator advances, and the sequence
/// cannot be restarted.
pub struct ListSnapshot {
    type_name: String,
    /// Non-skipped layers, highest precedence first.
    layers: Vec<Arc<Layer>>,
    keys: btree_set::IntoIter<String>,
    predicate: Option<Predicate>,
}

impl ListSnapshot {
    pub(crate) fn new(type_name: &str, layers: Vec<Arc<Layer>>, predicate: Option<Predicate>) -> Self {
        let keys: BTreeSet<String> = layers
            .iter()
            .flat_map(|layer| layer.state_keys(type_name).cloned())
            .collect();
        Self {
            type_name: type_name.to_string(),
            layers,
            keys: keys.into_iter(),
            predicate,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

impl Iterator for ListSnapshot {
    type Item = Item;

    fn next(&mut self) -> Option<Item> {
        loop {
            let key = self.keys.next()?;
            let Some(Resolution::Present(item)) = resolve_in(&self.layers, &self.type_name, &key)
            else {
                continue;
            };
            if self.predicate.as_ref().is_none_or(|p| p(item)) {
                return Some(item.clone());
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.keys.size_hint().1)
    }
}

impl FusedIterator for ListSnapshot {}

impl fmt::Debug for ListSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListSnapshot")
            .field("type_name", &self.type_name)
            .field("layers", &self.layers.len())
            .field("remaining_keys", &self.keys.len())
            .finish_non_exhaustive()
    }
}
