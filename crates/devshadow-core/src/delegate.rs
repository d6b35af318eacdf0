use async_trait::async_trait;

use devshadow_domain::{ClusterPath, ReachabilityState};
use devshadow_transport::EventTimeType;

use crate::cluster_store::AttributeReportItem;

/// One event delivered to a delegate (§6). `is_historical` is set when the
/// event arrived in a priming report while the device was not `Reachable`
/// (§4.4, §9) — it brackets events the subscriber should treat as replay
/// rather than fresh activity.
#[derive(Debug, Clone)]
pub struct EventReportItem {
    pub cluster: ClusterPath,
    pub event_number: u64,
    pub value: devshadow_domain::DataValue,
    pub time_type: EventTimeType,
    pub is_historical: bool,
}

/// The six callbacks C5 emits to whatever owns a device (§6). Implementors
/// must not block; the core never holds `state_lock` or `time_lock` while
/// calling these (§5).
#[async_trait]
pub trait Delegate: Send + Sync {
    async fn state_changed(&self, reachability: ReachabilityState);
    async fn received_attribute_report(&self, items: Vec<AttributeReportItem>);
    async fn received_event_report(&self, items: Vec<EventReportItem>);
    /// Fired exactly once per device lifetime, the first time C1's
    /// cache-primed predicate is satisfied.
    async fn device_cache_primed(&self);
    /// Fired whenever a configuration-gated attribute changes value
    /// (§4.1's allow-list).
    async fn device_configuration_changed(&self);
    /// Fired when an unsolicited message demonstrates the node is alive
    /// outside the normal report/callback flow.
    async fn device_became_active(&self);
}
