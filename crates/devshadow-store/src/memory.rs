use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use devshadow_domain::{ClusterData, ClusterPath, NodeId};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::StorageContract;

#[derive(Debug, Default)]
struct Inner {
    nodes: BTreeMap<NodeId, BTreeMap<ClusterPath, ClusterData>>,
}

/// In-memory implementation of [`StorageContract`].
///
/// All data is lost on process exit. Suitable for tests and for nodes that
/// opt out of persistence.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageContract for InMemoryStore {
    async fn load(
        &self,
        node: NodeId,
        cluster: ClusterPath,
    ) -> Result<Option<ClusterData>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .nodes
            .get(&node)
            .and_then(|clusters| clusters.get(&cluster))
            .cloned())
    }

    async fn load_all(
        &self,
        node: NodeId,
    ) -> Result<BTreeMap<ClusterPath, ClusterData>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.nodes.get(&node).cloned().unwrap_or_default())
    }

    async fn store(
        &self,
        node: NodeId,
        clusters: BTreeMap<ClusterPath, ClusterData>,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.nodes.entry(node).or_default().extend(clusters);
        Ok(())
    }

    async fn delete_node(&self, node: NodeId) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.nodes.remove(&node);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devshadow_domain::{AttributeId, ClusterId, DataValue, EndpointId};

    fn path() -> ClusterPath {
        ClusterPath::new(EndpointId(1), ClusterId(6))
    }

    fn data() -> ClusterData {
        let mut d = ClusterData::new();
        d.set(AttributeId(0), DataValue::Boolean(true));
        d
    }

    #[tokio::test]
    async fn store_and_load_round_trips() {
        let store = InMemoryStore::new();
        let node = NodeId(1);
        store.store(node, BTreeMap::from([(path(), data())])).await.unwrap();

        let got = store.load(node, path()).await.unwrap();
        assert_eq!(got, Some(data()));
    }

    #[tokio::test]
    async fn load_missing_cluster_is_none() {
        let store = InMemoryStore::new();
        assert_eq!(store.load(NodeId(1), path()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn load_all_returns_every_cluster_for_node() {
        let store = InMemoryStore::new();
        let node = NodeId(1);
        let other = ClusterPath::new(EndpointId(1), ClusterId(0x0101));
        store
            .store(node, BTreeMap::from([(path(), data()), (other, data())]))
            .await
            .unwrap();

        let all = store.load_all(node).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn delete_node_clears_all_clusters() {
        let store = InMemoryStore::new();
        let node = NodeId(1);
        store.store(node, BTreeMap::from([(path(), data())])).await.unwrap();
        store.delete_node(node).await.unwrap();
        assert_eq!(store.load(node, path()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn different_nodes_are_isolated() {
        let store = InMemoryStore::new();
        store
            .store(NodeId(1), BTreeMap::from([(path(), data())]))
            .await
            .unwrap();
        assert_eq!(store.load(NodeId(2), path()).await.unwrap(), None);
    }
}
