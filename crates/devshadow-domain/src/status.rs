use serde::{Deserialize, Serialize};

/// The subscription engine's internal state machine, §3/§4.4. Monotonic
/// forward except `Subscribing -> Unsubscribed` on teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    InitialEstablished,
}

/// The public reachability signal driven by C4, §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReachabilityState {
    Unknown,
    Reachable,
    Unreachable,
}

/// Status a remote node may return for a read/write/invoke, and the error
/// kinds of §7 that classify them for the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Success,
    Busy,
    Timeout,
    UnsupportedAttribute,
    UnsupportedCommand,
    InvalidDataType,
    Failure,
}

impl RemoteStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RemoteStatus::Success)
    }
}
