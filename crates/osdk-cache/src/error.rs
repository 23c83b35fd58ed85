use osdk_query::QueryError;
use osdk_types::ApiError;
use thiserror::Error;

use crate::subscription::SubscriptionId;

/// Errors raised by the cache and delivered to subscribers.
///
/// Cloneable so one failure can fan out to every affected subscription.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CacheError {
    /// The subscribed expression is invalid for the schema.
    #[error("invalid subscription expression: {0}")]
    Query(#[from] QueryError),

    #[error("unknown subscription: {0}")]
    UnknownSubscription(SubscriptionId),

    /// A fetch failed before reaching the server.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with an error payload.
    #[error("server error: {0}")]
    Server(ApiError),

    /// The live update stream failed or was closed by the server.
    #[error("stream error: {0}")]
    Stream(String),
}

pub type CacheResult<T> = Result<T, CacheError>;
