use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use devshadow_domain::{
    AttributePath, ClusterPath, CommandId, DataValue, DataVersion, EndpointId, NodeId, RemoteStatus,
};

use crate::error::TransportError;

/// Opaque session handle — whatever the protocol stack needs to address a
/// node once a session exists. Never inspected by the core.
#[derive(Debug, Clone)]
pub struct SessionHandle(pub serde_json::Value);

/// Opaque read-client handle. The core holds only this, never the read
/// client itself, breaking the device/read-client reference cycle (spec §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadClientHandle(pub u64);

/// `(error, retry_delay?)` — a failed session acquisition, with an optional
/// server- or stack-suggested delay before the next attempt.
#[derive(Debug)]
pub struct SessionError {
    pub error: TransportError,
    pub retry_delay: Option<Duration>,
}

#[async_trait]
pub trait SessionProvider: Send + Sync + 'static {
    async fn acquire_session(&self, node: NodeId) -> Result<SessionHandle, SessionError>;
}

/// One entry of a subscribe request's data-version filter list (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataVersionFilter {
    pub cluster: ClusterPath,
    pub data_version: DataVersion,
}

/// One attribute in a read/report batch, with its outcome per §4.1.
#[derive(Debug, Clone)]
pub struct AttributeDataItem {
    pub path: AttributePath,
    pub data_version: Option<DataVersion>,
    pub result: Result<DataValue, RemoteStatus>,
}

/// Whether an event's timestamp is stack-relative or wall-clock, carried
/// through unchanged to `receivedEventReport` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTimeType {
    System,
    Epoch,
}

/// One event in a report batch.
#[derive(Debug, Clone)]
pub struct EventDataItem {
    pub endpoint: EndpointId,
    pub cluster: ClusterPath,
    pub event_number: u64,
    pub value: DataValue,
    pub time_type: EventTimeType,
}

/// Result of a single invoke, before the core maps it onto the queue item.
#[derive(Debug, Clone)]
pub struct InvokeResult {
    pub status: RemoteStatus,
    pub response: Option<DataValue>,
}

/// The nine callbacks a read-client drives (§6). All async: callbacks are
/// dispatched without holding any device lock (§5).
#[async_trait]
pub trait ReadClientCallbacks: Send + Sync {
    async fn on_report_begin(&self);
    async fn on_attribute_data(&self, items: Vec<AttributeDataItem>);
    async fn on_event_data(&self, items: Vec<EventDataItem>);
    async fn on_report_end(&self);
    async fn on_error(&self, err: TransportError);
    async fn on_resubscribe_needed(&self, err: TransportError, retry_delay: Option<Duration>);
    async fn on_subscription_established(&self, subscription_id: u64);
    async fn on_unsolicited_message(&self);
    /// Fired exactly once; the core may tear down its `ReadClientHandle`
    /// bookkeeping only after this call (§6, §9).
    async fn on_done(&self);
}

/// The protocol-stack surface C4 drives: subscriptions, one-shot reads,
/// writes and invokes (§6).
#[async_trait]
pub trait SubscriptionTransport: Send + Sync + 'static {
    async fn start_subscription(
        &self,
        session: &SessionHandle,
        filters: Vec<DataVersionFilter>,
        min_interval: Duration,
        max_interval: Duration,
        callbacks: Arc<dyn ReadClientCallbacks>,
    ) -> Result<ReadClientHandle, TransportError>;

    /// Tear down a still-live read client. The core never calls this before
    /// `on_done` unless `invalidate` forces teardown (§5 "Cancellation").
    async fn stop_subscription(&self, handle: ReadClientHandle);

    async fn send_read(
        &self,
        session: &SessionHandle,
        paths: Vec<AttributePath>,
    ) -> Result<Vec<AttributeDataItem>, TransportError>;

    async fn send_write(
        &self,
        session: &SessionHandle,
        path: AttributePath,
        value: DataValue,
        data_version: Option<DataVersion>,
    ) -> Result<RemoteStatus, TransportError>;

    async fn send_invoke(
        &self,
        session: &SessionHandle,
        endpoint: EndpointId,
        cluster: ClusterPath,
        command: CommandId,
        fields: DataValue,
        timeout: Option<Duration>,
    ) -> Result<InvokeResult, TransportError>;
}

/// `start(handler)` / `stop()` per §6. `handler` is a hint, not a guarantee.
pub trait ConnectivityMonitor: Send + Sync + 'static {
    fn start(&self, handler: Arc<dyn Fn() + Send + Sync>);
    fn stop(&self);
}

/// Time-sync policy interface (§9): set the node's UTC clock and, per
/// endpoint advertising the Time-Sync cluster, its DST offset. The
/// algorithm deciding *when* and *what* to set lives in devshadow-core;
/// this trait is only the wire call.
#[async_trait]
pub trait TimeSyncClient: Send + Sync + 'static {
    async fn set_utc(&self, session: &SessionHandle, utc_us: u64) -> Result<(), TransportError>;

    async fn set_dst_offset(
        &self,
        session: &SessionHandle,
        endpoint: EndpointId,
        offset_s: i32,
    ) -> Result<(), TransportError>;
}
