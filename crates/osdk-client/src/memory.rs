use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::StreamExt;
use osdk_faux::{FauxError, FauxOntology};
use osdk_query::{LoadObjectsRequest, LoadObjectsResponse};
use osdk_store::{EditRequest, ObjectEdits};
use osdk_stream::SubscribeRequest;
use tracing::trace;

use crate::error::{TransportError, TransportResult};
use crate::transport::{ByteStream, Transport};

/// Transport talking to a [`FauxOntology`] in the same process.
///
/// Subscriptions are encoded to event-stream bytes so the client parses
/// them exactly as it would a network stream.
pub struct InMemoryTransport {
    ontology: Arc<FauxOntology>,
    latency: Option<Duration>,
    failure: Mutex<Option<TransportError>>,
    load_calls: AtomicUsize,
    edit_calls: AtomicUsize,
    subscribe_calls: AtomicUsize,
}

impl InMemoryTransport {
    pub fn new(ontology: Arc<FauxOntology>) -> Self {
        Self {
            ontology,
            latency: None,
            failure: Mutex::new(None),
            load_calls: AtomicUsize::new(0),
            edit_calls: AtomicUsize::new(0),
            subscribe_calls: AtomicUsize::new(0),
        }
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn ontology(&self) -> &Arc<FauxOntology> {
        &self.ontology
    }

    /// Fail the next call, whatever it is, with `error`.
    pub fn fail_next(&self, error: TransportError) {
        *self.failure.lock().expect("lock poisoned") = Some(error);
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn edit_calls(&self) -> usize {
        self.edit_calls.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    async fn begin_call(&self, counter: &AtomicUsize) -> TransportResult<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match self.failure.lock().expect("lock poisoned").take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn server_error(err: FauxError) -> TransportError {
    TransportError::Server(err.to_api_error())
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn load_objects(&self, request: &LoadObjectsRequest) -> TransportResult<LoadObjectsResponse> {
        self.begin_call(&self.load_calls).await?;
        trace!("in-memory load");
        self.ontology.load_objects(request).map_err(server_error)
    }

    async fn apply_edits(&self, request: &EditRequest) -> TransportResult<ObjectEdits> {
        self.begin_call(&self.edit_calls).await?;
        self.ontology.apply_edits(request.clone()).map_err(server_error)
    }

    async fn subscribe(&self, request: &SubscribeRequest) -> TransportResult<ByteStream> {
        self.begin_call(&self.subscribe_calls).await?;
        let messages = self.ontology.subscribe(request.clone()).map_err(server_error)?;
        Ok(messages
            .map(|message| {
                message
                    .encode()
                    .map(|event| event.to_bytes())
                    .map_err(|e| TransportError::Network(e.to_string()))
            })
            .boxed())
    }
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("ontology", &self.ontology)
            .field("load_calls", &self.load_calls())
            .finish()
    }
}
