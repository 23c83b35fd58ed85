use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Json;
use futures::stream::{Stream, StreamExt};
use osdk_query::{LoadObjectsRequest, LoadObjectsResponse};
use osdk_store::{EditRequest, ObjectEdits};
use osdk_stream::{StreamError, SubscribeRequest};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{FauxError, FauxResult};
use crate::ontology::FauxOntology;

/// Shared state of every request handler.
#[derive(Clone, Debug)]
pub struct AppState {
    pub ontology: Arc<FauxOntology>,
    /// Ontology API name accepted in request paths.
    pub name: String,
}

impl AppState {
    fn resolve(&self, requested: &str) -> FauxResult<&FauxOntology> {
        if requested != self.name {
            return Err(FauxError::OntologyNotFound(requested.to_string()));
        }
        Ok(&self.ontology)
    }
}

/// Health check handler.
pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn load_objects_handler(
    State(state): State<AppState>,
    Path(ontology): Path<String>,
    Json(request): Json<LoadObjectsRequest>,
) -> FauxResult<Json<LoadObjectsResponse>> {
    let response = state.resolve(&ontology)?.load_objects(&request)?;
    Ok(Json(response))
}

pub async fn apply_edits_handler(
    State(state): State<AppState>,
    Path(ontology): Path<String>,
    Json(request): Json<EditRequest>,
) -> FauxResult<Json<ObjectEdits>> {
    let applied = state.resolve(&ontology)?.apply_edits(request)?;
    Ok(Json(applied))
}

/// Server-sent event stream of `StreamMessage`s for one object set.
pub async fn subscribe_handler(
    State(state): State<AppState>,
    Path(ontology): Path<String>,
    Json(request): Json<SubscribeRequest>,
) -> FauxResult<Sse<impl Stream<Item = Result<Event, StreamError>>>> {
    debug!(id = %request.id, "subscribe request");
    let messages = state.resolve(&ontology)?.subscribe(request)?;
    let events = messages.map(|message| -> Result<Event, StreamError> {
        let event = message.encode()?;
        Ok(Event::default().data(event.data))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
