use osdk_types::TypeError;
use thiserror::Error;

/// Errors from building, validating, or evaluating query expressions.
///
/// Everything except [`QueryError::Evaluation`] and
/// [`QueryError::Serialization`] is a construction error: the expression
/// itself is invalid and retrying cannot help.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueryError {
    #[error("schema error: {0}")]
    Schema(#[from] TypeError),

    #[error("operand type mismatch on {property}: expected {expected}, found {found}")]
    OperandTypeMismatch {
        property: String,
        expected: String,
        found: String,
    },

    #[error("filter {filter} is not supported on {property} ({kind})")]
    UnsupportedFilter {
        property: String,
        filter: &'static str,
        kind: String,
    },

    #[error("unknown distance unit: {0}")]
    UnknownDistanceUnit(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("invalid datetime operand: {0}")]
    InvalidDatetime(String),

    #[error("set operation mixes object types {expected} and {found}")]
    MismatchedSetTypes { expected: String, found: String },

    #[error("{0} requires at least one object set")]
    EmptySetOperation(&'static str),

    #[error("method input used outside a derived property definition")]
    UnboundMethodInput,

    #[error("expression exceeds maximum depth of {max}")]
    DepthExceeded { max: usize },

    #[error("derived property {0} shadows an existing property")]
    DerivedPropertyConflict(String),

    #[error("invalid derived property: {0}")]
    InvalidDerivedProperty(String),

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl QueryError {
    /// Returns `true` for errors raised while building or validating.
    pub fn is_construction(&self) -> bool {
        !matches!(self, Self::Evaluation(_) | Self::Serialization(_))
    }
}

/// Result alias for query operations.
pub type QueryResult<T> = Result<T, QueryError>;
