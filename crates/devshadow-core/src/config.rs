use std::time::Duration;

/// Tunable timing constants for one device shadow. Every field has the
/// default the spec pins; tests override individual fields rather than the
/// whole struct.
#[derive(Debug, Clone, Copy)]
pub struct ShadowConfig {
    /// Subscription min interval, spec default 0.
    pub min_interval: Duration,
    /// Lower bound of the subscription max-interval range.
    pub max_interval_floor: Duration,
    /// Upper bound of the subscription max-interval range.
    pub max_interval_ceiling: Duration,
    /// "Mark unreachable if not established" timer armed on `Subscribing`.
    pub unreachable_timeout: Duration,
    /// Backoff ceiling (§4.4).
    pub backoff_cap: Duration,
    /// Minimum delay before the next expected-value sweep (§4.2).
    pub expected_value_min_sweep: Duration,
    /// Delay after `InitialEstablished` before the first time-sync attempt.
    pub time_sync_initial_delay: Duration,
    /// Guard window before a read-through fallback resubscribe is allowed.
    pub read_through_guard: Duration,
    /// Default timed-invoke timeout when the command requires one and the
    /// caller didn't supply it.
    pub default_timed_invoke_timeout: Duration,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(0),
            max_interval_floor: Duration::from_secs(60),
            max_interval_ceiling: Duration::from_secs(3600),
            unreachable_timeout: Duration::from_secs(10),
            backoff_cap: Duration::from_secs(3600),
            expected_value_min_sweep: Duration::from_millis(100),
            time_sync_initial_delay: Duration::from_secs(120),
            read_through_guard: Duration::from_secs(600),
            default_timed_invoke_timeout: Duration::from_millis(10_000),
        }
    }
}
