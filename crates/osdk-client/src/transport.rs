use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use osdk_query::{LoadObjectsRequest, LoadObjectsResponse};
use osdk_store::{EditRequest, ObjectEdits};
use osdk_stream::SubscribeRequest;

use crate::error::{TransportError, TransportResult};

/// Raw server-sent event bytes of one subscription.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Connection to an ontology service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch one page of an object set.
    async fn load_objects(&self, request: &LoadObjectsRequest) -> TransportResult<LoadObjectsResponse>;

    /// Submit an edit list, applied by the server all or none.
    async fn apply_edits(&self, request: &EditRequest) -> TransportResult<ObjectEdits>;

    /// Open a change stream. The returned bytes are an event stream of
    /// `StreamMessage`s.
    async fn subscribe(&self, request: &SubscribeRequest) -> TransportResult<ByteStream>;
}
