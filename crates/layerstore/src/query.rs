//! Request fingerprints.
//!
//! A [`Fingerprint`] identifies a fetch for deduplication and for the query
//! log.  Single-item fetches use the readable form `Type/item/key`.  List
//! fetches hash the canonical JSON of the request with SHA-256 and encode
//! the digest as unpadded URL-safe base64, giving `Type/list/<digest>`.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use layerstore_adapters::{Query, Verb};
use ring::digest;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint {
    type_name: String,
    id: String,
}

impl Fingerprint {
    pub fn item(type_name: &str, key: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            id: format!("{type_name}/item/{key}"),
        }
    }

    /// Fingerprint of a list query.
    ///
    /// Filter fields are kept in a sorted map and `serde_json` objects sort
    /// their keys, so equal queries always serialize identically.
    pub fn list(type_name: &str, query: &Query) -> Self {
        let canonical = json!({
            "type": type_name,
            "verb": Verb::FetchList,
            "query": query,
        })
        .to_string();
        let hash = digest::digest(&digest::SHA256, canonical.as_bytes());
        Self {
            type_name: type_name.to_string(),
            id: format!("{type_name}/list/{}", URL_SAFE_NO_PAD.encode(hash.as_ref())),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
