use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid expected-interval ms: {0} (must be >= 1)")]
    InvalidExpectedInterval(u32),

    #[error("invalid timed-invoke timeout ms: {0} (must be in [1, 65535])")]
    InvalidTimedTimeout(u32),

    #[error("data value cannot be decoded: {0}")]
    Malformed(String),
}
