use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no session available: {0}")]
    NoSession(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("resource exhausted building request (no memory)")]
    NoMemory,

    #[error("remote reported busy")]
    Busy,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("operation timed out")]
    Timeout,

    #[error("internal transport error: {0}")]
    Internal(String),
}
