use thiserror::Error;

use devshadow_store::StoreError;
use devshadow_transport::TransportError;

/// The five error kinds of the retry/backoff policy (spec §7). Every
/// `ShadowError` classifies into exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retryable: busy, network blip, send failure.
    Transient,
    /// Deadline exceeded.
    Timeout,
    /// Schema mismatch, decode failure, wrong-state callback.
    Protocol,
    /// Status returned by the node itself.
    Remote,
    /// Invalid argument from the client, or the device has been invalidated.
    Fatal,
}

#[derive(Debug, Error)]
pub enum ShadowError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("domain error: {0}")]
    Domain(#[from] devshadow_domain::DomainError),

    #[error("remote status: {0:?}")]
    Remote(devshadow_domain::RemoteStatus),

    #[error("operation timed out")]
    Timeout,

    #[error("device has been invalidated")]
    Invalidated,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ShadowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShadowError::Store(_) => ErrorKind::Transient,
            ShadowError::Transport(TransportError::NoMemory) => ErrorKind::Transient,
            ShadowError::Transport(TransportError::Busy) => ErrorKind::Transient,
            ShadowError::Transport(TransportError::SendFailed(_)) => ErrorKind::Transient,
            ShadowError::Transport(TransportError::NoSession(_)) => ErrorKind::Transient,
            ShadowError::Transport(TransportError::Timeout) => ErrorKind::Timeout,
            ShadowError::Transport(TransportError::Protocol(_)) => ErrorKind::Protocol,
            ShadowError::Transport(TransportError::Internal(_)) => ErrorKind::Protocol,
            ShadowError::Domain(_) => ErrorKind::Fatal,
            ShadowError::Remote(status) => {
                if matches!(status, devshadow_domain::RemoteStatus::Busy) {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Remote
                }
            }
            ShadowError::Timeout => ErrorKind::Timeout,
            ShadowError::Invalidated => ErrorKind::Fatal,
            ShadowError::InvalidArgument(_) => ErrorKind::Fatal,
            ShadowError::Internal(_) => ErrorKind::Protocol,
        }
    }
}

pub type Result<T> = std::result::Result<T, ShadowError>;
