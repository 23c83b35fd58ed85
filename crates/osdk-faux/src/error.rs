use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use osdk_query::QueryError;
use osdk_store::StoreError;
use osdk_stream::StreamError;
use osdk_types::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FauxError {
    #[error("ontology not found: {0}")]
    OntologyNotFound(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("query error: {0}")]
    Query(#[from] QueryError),

    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("fixture error: {0}")]
    Fixture(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FauxError {
    /// Wire error payload for this failure.
    pub fn to_api_error(&self) -> ApiError {
        match self {
            Self::OntologyNotFound(name) => {
                let mut parameters = serde_json::Map::new();
                parameters.insert("ontology".into(), serde_json::Value::String(name.clone()));
                ApiError::new(ApiError::NOT_FOUND, "OntologyNotFound", parameters)
            }
            Self::Store(err) => err.to_api_error(),
            Self::Query(err) => ApiError::invalid_argument("InvalidObjectSet", err.to_string()),
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl IntoResponse for FauxError {
    fn into_response(self) -> Response {
        let body = self.to_api_error();
        let status =
            StatusCode::from_u16(body.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        tracing::debug!(%status, error = %self, "request failed");
        (status, Json(body)).into_response()
    }
}

pub type FauxResult<T> = Result<T, FauxError>;
