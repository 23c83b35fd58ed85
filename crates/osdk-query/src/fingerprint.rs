use std::fmt;

use osdk_types::ObjectRecord;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{QueryError, QueryResult};
use crate::object_set::ObjectSet;
use crate::order::OrderBy;

/// Domain tag mixed into every request fingerprint.
const FINGERPRINT_DOMAIN: &str = "osdk-load-objects-v1";

/// Canonical cache key of a page request.
///
/// BLAKE3 over the canonical JSON of the request, domain-separated so that
/// fingerprints never collide with other hashes of the same bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Hash a serializable value as canonical JSON.
    ///
    /// Values are converted to `serde_json::Value` first; its maps are
    /// ordered, so object keys are emitted sorted.
    pub fn of<T: Serialize>(value: &T) -> QueryResult<Self> {
        let canonical =
            serde_json::to_value(value).map_err(|e| QueryError::Serialization(e.to_string()))?;
        let bytes =
            serde_json::to_vec(&canonical).map_err(|e| QueryError::Serialization(e.to_string()))?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(FINGERPRINT_DOMAIN.as_bytes());
        hasher.update(b":");
        hasher.update(&bytes);
        Ok(Self(*hasher.finalize().as_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 hex characters, for logs.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short_hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Wire request for one page of an object set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadObjectsRequest {
    pub object_set: ObjectSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    /// Opaque continuation token from a previous response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
    #[serde(default, skip_serializing_if = "OrderBy::is_empty")]
    pub order_by: OrderBy,
}

impl LoadObjectsRequest {
    pub fn new(object_set: ObjectSet) -> Self {
        Self {
            object_set,
            page_size: None,
            page_token: None,
            order_by: OrderBy::default(),
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_page_token(mut self, page_token: impl Into<String>) -> Self {
        self.page_token = Some(page_token.into());
        self
    }

    pub fn with_order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = order_by;
        self
    }

    /// Fingerprint of the request with its object set in canonical form.
    pub fn fingerprint(&self) -> QueryResult<Fingerprint> {
        let canonical = Self {
            object_set: self.object_set.canonicalize(),
            ..self.clone()
        };
        let fingerprint = Fingerprint::of(&canonical)?;
        trace!(fingerprint = %fingerprint.short_hex(), "fingerprinted load request");
        Ok(fingerprint)
    }
}

/// Fingerprint of an expression plus page parameters.
pub fn fingerprint(
    object_set: &ObjectSet,
    page_size: Option<u32>,
    page_token: Option<&str>,
    order_by: &OrderBy,
) -> QueryResult<Fingerprint> {
    LoadObjectsRequest {
        object_set: object_set.clone(),
        page_size,
        page_token: page_token.map(str::to_string),
        order_by: order_by.clone(),
    }
    .fingerprint()
}

/// Wire response: one page of objects.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadObjectsResponse {
    pub data: Vec<ObjectRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
}
