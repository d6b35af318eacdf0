use std::time::Duration;

/// Test-only escape hatches (§9 "TestOverrides"). Every field defaults to
/// the production behavior; tests opt into exactly the shortcut they need.
#[derive(Debug, Clone, Default)]
pub struct TestOverrides {
    /// Re-report an attribute even when the incoming value canonically
    /// equals the cached one.
    pub force_report_on_match: bool,
    /// Skip C2 entirely: writes and invokes never install expected values.
    pub skip_expected_values: bool,
    /// Replace the negotiated subscription max-interval with a fixed value.
    pub subscription_interval_override: Option<Duration>,
    /// Never transition out of `Unsubscribed`; useful for tests that only
    /// exercise the read/write queue against a bare transport.
    pub skip_subscription: bool,
}
