use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use devshadow_domain::{
    AttributePath, ClusterPath, CommandId, DataValue, DataVersion, EndpointId, NodeId, RemoteStatus,
};
use serde_json::json;
use tracing::debug;

use crate::contract::{
    AttributeDataItem, ConnectivityMonitor, DataVersionFilter, InvokeResult, ReadClientCallbacks,
    ReadClientHandle, SessionError, SessionHandle, SessionProvider, SubscriptionTransport,
    TimeSyncClient,
};
use crate::error::TransportError;

#[derive(Debug, Clone, Default)]
struct SimNode {
    online: bool,
    clusters: BTreeMap<ClusterPath, BTreeMap<u32, DataValue>>,
    versions: BTreeMap<ClusterPath, DataVersion>,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: BTreeMap<NodeId, SimNode>,
}

/// In-memory protocol stack used by tests and by the `devshadow-core`
/// integration suite in place of a real interaction-model engine.
///
/// Produces synthetic sessions and read-client handles and performs no I/O,
/// matching the shape of a local stub driver: every call is answered
/// directly from state held in this struct.
#[derive(Clone)]
pub struct SimTransport {
    inner: Arc<Mutex<Inner>>,
    next_subscription_id: Arc<AtomicU64>,
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            next_subscription_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Mark a node online/offline for `acquire_session`.
    pub fn set_online(&self, node: NodeId, online: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.nodes.entry(node).or_default().online = online;
    }

    /// Seed a cluster's attribute state, as if the node reported it.
    pub fn seed_cluster(
        &self,
        node: NodeId,
        cluster: ClusterPath,
        version: DataVersion,
        attrs: BTreeMap<u32, DataValue>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.nodes.entry(node).or_default();
        entry.versions.insert(cluster, version);
        entry.clusters.insert(cluster, attrs);
    }
}

#[async_trait]
impl SessionProvider for SimTransport {
    async fn acquire_session(&self, node: NodeId) -> Result<SessionHandle, SessionError> {
        let online = {
            let inner = self.inner.lock().unwrap();
            inner.nodes.get(&node).map(|n| n.online).unwrap_or(false)
        };
        if !online {
            return Err(SessionError {
                error: TransportError::NoSession(format!("node {node} is offline")),
                retry_delay: None,
            });
        }
        Ok(SessionHandle(json!({ "node": node.0 })))
    }
}

fn node_of(session: &SessionHandle) -> NodeId {
    NodeId(session.0["node"].as_u64().unwrap_or_default())
}

#[async_trait]
impl SubscriptionTransport for SimTransport {
    async fn start_subscription(
        &self,
        session: &SessionHandle,
        filters: Vec<DataVersionFilter>,
        _min_interval: Duration,
        _max_interval: Duration,
        callbacks: Arc<dyn ReadClientCallbacks>,
    ) -> Result<ReadClientHandle, TransportError> {
        let node = node_of(session);
        debug!(%node, filters = filters.len(), "SimTransport: start_subscription");

        let items = {
            let inner = self.inner.lock().unwrap();
            let sim = inner
                .nodes
                .get(&node)
                .ok_or_else(|| TransportError::NoSession(format!("node {node} unknown")))?;
            if !sim.online {
                return Err(TransportError::SendFailed(format!("node {node} offline")));
            }
            let known: std::collections::BTreeSet<_> =
                filters.iter().map(|f| f.cluster).collect();
            let mut items = Vec::new();
            for (cluster, attrs) in &sim.clusters {
                if known.contains(cluster) {
                    continue;
                }
                let version = sim.versions.get(cluster).copied();
                for (attr, value) in attrs {
                    items.push(AttributeDataItem {
                        path: AttributePath::new(
                            cluster.endpoint,
                            cluster.cluster,
                            devshadow_domain::AttributeId(*attr),
                        ),
                        data_version: version,
                        result: Ok(value.clone()),
                    });
                }
            }
            items
        };

        let id = self.next_subscription_id.fetch_add(1, Ordering::SeqCst);

        callbacks.on_report_begin().await;
        if !items.is_empty() {
            callbacks.on_attribute_data(items).await;
        }
        callbacks.on_report_end().await;
        callbacks.on_subscription_established(id).await;

        Ok(ReadClientHandle(id))
    }

    async fn stop_subscription(&self, _handle: ReadClientHandle) {}

    async fn send_read(
        &self,
        session: &SessionHandle,
        paths: Vec<AttributePath>,
    ) -> Result<Vec<AttributeDataItem>, TransportError> {
        let node = node_of(session);
        let inner = self.inner.lock().unwrap();
        let sim = inner
            .nodes
            .get(&node)
            .ok_or_else(|| TransportError::NoSession(format!("node {node} unknown")))?;

        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            let cluster = path.cluster_path();
            let version = sim.versions.get(&cluster).copied();
            let result = sim
                .clusters
                .get(&cluster)
                .and_then(|attrs| attrs.get(&path.attribute.0))
                .cloned()
                .map(Ok)
                .unwrap_or(Err(RemoteStatus::UnsupportedAttribute));
            out.push(AttributeDataItem {
                path,
                data_version: version,
                result,
            });
        }
        Ok(out)
    }

    async fn send_write(
        &self,
        session: &SessionHandle,
        path: AttributePath,
        value: DataValue,
        _data_version: Option<DataVersion>,
    ) -> Result<RemoteStatus, TransportError> {
        let node = node_of(session);
        let mut inner = self.inner.lock().unwrap();
        let sim = inner
            .nodes
            .get_mut(&node)
            .ok_or_else(|| TransportError::NoSession(format!("node {node} unknown")))?;
        let cluster = path.cluster_path();
        sim.clusters
            .entry(cluster)
            .or_default()
            .insert(path.attribute.0, value);
        let version = sim.versions.entry(cluster).or_insert(DataVersion(0));
        version.0 += 1;
        Ok(RemoteStatus::Success)
    }

    async fn send_invoke(
        &self,
        session: &SessionHandle,
        _endpoint: EndpointId,
        _cluster: ClusterPath,
        _command: CommandId,
        _fields: DataValue,
        _timeout: Option<Duration>,
    ) -> Result<InvokeResult, TransportError> {
        let node = node_of(session);
        let inner = self.inner.lock().unwrap();
        if !inner.nodes.get(&node).map(|n| n.online).unwrap_or(false) {
            return Err(TransportError::SendFailed(format!("node {node} offline")));
        }
        Ok(InvokeResult {
            status: RemoteStatus::Success,
            response: None,
        })
    }
}

#[async_trait]
impl TimeSyncClient for SimTransport {
    async fn set_utc(&self, _session: &SessionHandle, _utc_us: u64) -> Result<(), TransportError> {
        Ok(())
    }

    async fn set_dst_offset(
        &self,
        _session: &SessionHandle,
        _endpoint: EndpointId,
        _offset_s: i32,
    ) -> Result<(), TransportError> {
        Ok(())
    }
}

/// A manually-triggered [`ConnectivityMonitor`] for tests: `fire()` invokes
/// whatever handler is currently registered.
#[derive(Clone, Default)]
pub struct ManualConnectivityMonitor {
    handler: Arc<Mutex<Option<Arc<dyn Fn() + Send + Sync>>>>,
}

impl ManualConnectivityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        if let Some(handler) = self.handler.lock().unwrap().clone() {
            handler();
        }
    }
}

impl ConnectivityMonitor for ManualConnectivityMonitor {
    fn start(&self, handler: Arc<dyn Fn() + Send + Sync>) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    fn stop(&self) {
        *self.handler.lock().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devshadow_domain::{AttributeId, ClusterId};

    #[tokio::test]
    async fn offline_node_fails_session_acquisition() {
        let transport = SimTransport::new();
        let err = transport.acquire_session(NodeId(1)).await.unwrap_err();
        assert!(matches!(err.error, TransportError::NoSession(_)));
    }

    #[tokio::test]
    async fn online_node_round_trips_write_then_read() {
        let transport = SimTransport::new();
        let node = NodeId(1);
        transport.set_online(node, true);
        let session = transport.acquire_session(node).await.unwrap();

        let path = AttributePath::new(EndpointId(1), ClusterId(6), AttributeId(0));
        transport
            .send_write(&session, path, DataValue::Boolean(true), None)
            .await
            .unwrap();

        let items = transport.send_read(&session, vec![path]).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].result.as_ref().unwrap(), &DataValue::Boolean(true));
    }

    #[tokio::test]
    async fn manual_connectivity_monitor_fires_registered_handler() {
        let monitor = ManualConnectivityMonitor::new();
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = fired.clone();
        monitor.start(Arc::new(move || {
            flag.store(true, Ordering::SeqCst);
        }));
        monitor.fire();
        assert!(fired.load(Ordering::SeqCst));
    }
}
