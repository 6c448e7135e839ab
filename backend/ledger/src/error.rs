use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// A field map that could not be turned into a typed event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid value {value:?} for field `{field}`")]
    InvalidField { field: &'static str, value: String },
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Malformed event: {0}")]
    Event(#[from] EventError),

    #[error("Invalid log position: {0:?}")]
    InvalidPosition(String),

    #[error("Consumer group {group} does not exist on {stream}")]
    UnknownGroup { stream: String, group: String },

    #[error("Operation against a key holding the wrong kind of value: {0}")]
    WrongType(String),

    #[error("No such key: {0}")]
    MissingKey(String),

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl LedgerError {
    /// Errors worth retrying: the backend was unreachable or slow, not wrong.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Redis(e) => {
                e.is_io_error()
                    || e.is_timeout()
                    || e.is_connection_dropped()
                    || e.is_connection_refusal()
            }
            _ => false,
        }
    }
}
