use thiserror::Error;

/// Errors produced by type and schema operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid primary key: {0}")]
    InvalidPrimaryKey(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("unknown object type: {0}")]
    UnknownObjectType(String),

    #[error("unknown property {property} on {object_type}")]
    UnknownProperty {
        object_type: String,
        property: String,
    },

    #[error("unknown link {link} on {object_type}")]
    UnknownLink { object_type: String, link: String },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result alias for type operations.
pub type TypeResult<T> = Result<T, TypeError>;
