use osdk_query::QueryError;
use osdk_types::{ApiError, ObjectIdentity, TypeError};

/// Errors from object store and edit operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// An object with this identity already exists.
    #[error("object already exists: {0}")]
    Conflict(ObjectIdentity),

    /// The referenced object does not exist.
    #[error("object not found: {0}")]
    NotFound(ObjectIdentity),

    /// The link type is not defined on the object type.
    #[error("link type {link} not found on {object_type}")]
    LinkTypeNotFound { object_type: String, link: String },

    /// The edit is malformed (wrong primary key, unknown property, ...).
    #[error("invalid edit: {0}")]
    InvalidEdit(String),

    /// Malformed or expired continuation token.
    #[error("invalid page token: {0}")]
    InvalidPageToken(String),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Schema(#[from] TypeError),
}

impl StoreError {
    /// Wire error payload for this failure.
    pub fn to_api_error(&self) -> ApiError {
        match self {
            Self::Conflict(identity) => ApiError::object_already_exists(identity),
            Self::NotFound(identity) => ApiError::object_not_found(identity),
            Self::LinkTypeNotFound { object_type, link } => {
                ApiError::link_type_not_found(object_type, link)
            }
            Self::InvalidEdit(msg) => ApiError::invalid_argument("InvalidEdit", msg.clone()),
            Self::InvalidPageToken(msg) => {
                ApiError::invalid_argument("InvalidPageToken", msg.clone())
            }
            Self::Query(err) => ApiError::invalid_argument("InvalidObjectSet", err.to_string()),
            Self::Schema(err) => ApiError::invalid_argument("InvalidObjectSet", err.to_string()),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
