use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handler::{self, AppState};
use crate::ontology::FauxOntology;

/// Build the axum router serving `ontology` under the API name `name`.
pub fn build_router(ontology: Arc<FauxOntology>, name: impl Into<String>) -> Router {
    let state = AppState {
        ontology,
        name: name.into(),
    };
    Router::new()
        .route("/v1/health", get(handler::health_handler))
        .route(
            "/api/v2/ontologies/:ontology/objectSets/loadObjects",
            post(handler::load_objects_handler),
        )
        .route(
            "/api/v2/ontologies/:ontology/objectSets/subscribe",
            post(handler::subscribe_handler),
        )
        .route(
            "/api/v2/ontologies/:ontology/edits",
            post(handler::apply_edits_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
