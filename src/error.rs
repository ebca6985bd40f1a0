use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    DatabaseError(String),
    StateTransitionError(String),
    ClaimError(String),
    CodecError(String),
    ValidationError(String),
    AggregationError(String),
    ConfigurationError(String),
    StorageError(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::DatabaseError(msg) => write!(f, "Database error: {msg}"),
            CoreError::StateTransitionError(msg) => write!(f, "State transition error: {msg}"),
            CoreError::ClaimError(msg) => write!(f, "Claim error: {msg}"),
            CoreError::CodecError(msg) => write!(f, "Codec error: {msg}"),
            CoreError::ValidationError(msg) => write!(f, "Validation error: {msg}"),
            CoreError::AggregationError(msg) => write!(f, "Aggregation error: {msg}"),
            CoreError::ConfigurationError(msg) => write!(f, "Configuration error: {msg}"),
            CoreError::StorageError(msg) => write!(f, "Storage error: {msg}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
