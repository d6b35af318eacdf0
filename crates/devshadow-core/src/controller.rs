use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use devshadow_domain::NodeId;
use devshadow_store::StorageContract;
use devshadow_transport::{ConnectivityMonitor, SessionProvider, SubscriptionTransport, TimeSyncClient};

use crate::config::ShadowConfig;
use crate::device::Device;
use crate::test_overrides::TestOverrides;

/// Per-node factory and registry. A [`Device`] is created on demand, keyed
/// by [`NodeId`], and shared by every caller that asks for the same node
/// again (§3 "Lifecycles").
pub struct Controller {
    storage: Arc<dyn StorageContract>,
    transport: Arc<dyn SubscriptionTransport>,
    sessions: Arc<dyn SessionProvider>,
    connectivity_factory: Box<dyn Fn() -> Arc<dyn ConnectivityMonitor> + Send + Sync>,
    time_sync: Arc<dyn TimeSyncClient>,
    config: ShadowConfig,
    overrides: TestOverrides,
    devices: Mutex<HashMap<NodeId, Device>>,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<dyn StorageContract>,
        transport: Arc<dyn SubscriptionTransport>,
        sessions: Arc<dyn SessionProvider>,
        connectivity_factory: Box<dyn Fn() -> Arc<dyn ConnectivityMonitor> + Send + Sync>,
        time_sync: Arc<dyn TimeSyncClient>,
        config: ShadowConfig,
    ) -> Self {
        Self {
            storage,
            transport,
            sessions,
            connectivity_factory,
            time_sync,
            config,
            overrides: TestOverrides::default(),
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides used for every device subsequently created through this
    /// controller. Test-only in practice; production callers leave the
    /// default in place.
    pub fn with_test_overrides(mut self, overrides: TestOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Returns the existing device for `node`, creating one on first use.
    pub fn device(&self, node: NodeId) -> Device {
        let mut devices = self.devices.lock().unwrap();
        devices
            .entry(node)
            .or_insert_with(|| {
                Device::new(
                    node,
                    self.config,
                    self.overrides.clone(),
                    self.storage.clone(),
                    self.transport.clone(),
                    self.sessions.clone(),
                    (self.connectivity_factory)(),
                    self.time_sync.clone(),
                )
            })
            .clone()
    }

    /// Tears a device down and drops the controller's reference to it.
    /// Remaining clones held elsewhere stay invalidated but alive.
    pub async fn forget(&self, node: NodeId) {
        let device = self.devices.lock().unwrap().remove(&node);
        if let Some(device) = device {
            device.invalidate().await;
        }
    }

    pub fn known_nodes(&self) -> Vec<NodeId> {
        self.devices.lock().unwrap().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devshadow_store::InMemoryStore;
    use devshadow_transport::{ManualConnectivityMonitor, SimTransport};

    fn controller() -> Controller {
        let transport = Arc::new(SimTransport::new());
        Controller::new(
            Arc::new(InMemoryStore::new()),
            transport.clone(),
            transport.clone(),
            Box::new(|| Arc::new(ManualConnectivityMonitor::new())),
            transport,
            ShadowConfig::default(),
        )
    }

    #[test]
    fn device_is_created_once_per_node() {
        let controller = controller();
        let a = controller.device(NodeId(1));
        let b = controller.device(NodeId(1));
        assert_eq!(a.node(), b.node());
        assert_eq!(controller.known_nodes(), vec![NodeId(1)]);
    }

    #[tokio::test]
    async fn forget_removes_node_from_registry() {
        let controller = controller();
        controller.device(NodeId(1));
        controller.forget(NodeId(1)).await;
        assert!(controller.known_nodes().is_empty());
    }
}
