use osdk_cache::CacheError;
use osdk_query::QueryError;
use osdk_store::StoreError;
use osdk_stream::StreamError;
use osdk_types::ApiError;
use thiserror::Error;

/// Failure of a single transport call.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    /// The request never produced a server answer.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with an error payload.
    #[error("server error: {0}")]
    Server(ApiError),
}

impl TransportError {
    pub fn to_cache_error(&self) -> CacheError {
        match self {
            Self::Network(msg) => CacheError::Network(msg.clone()),
            Self::Server(api) => CacheError::Server(api.clone()),
        }
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    #[error("edit error: {0}")]
    Store(#[from] StoreError),

    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("network error: {0}")]
    Network(String),

    /// Server error payload, every field preserved.
    #[error("server error: {0}")]
    Server(ApiError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network(msg) => Self::Network(msg),
            TransportError::Server(api) => Self::Server(api),
        }
    }
}

impl ClientError {
    /// The form in which this failure is delivered to subscribers.
    pub fn to_cache_error(&self) -> CacheError {
        match self {
            Self::Query(err) => CacheError::Query(err.clone()),
            Self::Cache(err) => err.clone(),
            Self::Server(api) => CacheError::Server(api.clone()),
            Self::Store(err) => CacheError::Server(err.to_api_error()),
            Self::Stream(err) => CacheError::Stream(err.to_string()),
            Self::Network(msg) | Self::Config(msg) => CacheError::Network(msg.clone()),
            Self::Io(err) => CacheError::Network(err.to_string()),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
