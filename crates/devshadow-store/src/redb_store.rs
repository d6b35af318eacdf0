use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use devshadow_domain::{ClusterData, ClusterPath, NodeId};
use redb::{Database, ReadableTable, TableDefinition};

use crate::error::StoreError;
use crate::store::StorageContract;

const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

fn node_key(node: NodeId) -> String {
    format!("{:016x}", node.0)
}

fn internal<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Internal(e.to_string())
}

/// Persistent [`StorageContract`] backed by a redb database file.
///
/// Each node's clusters are stored as a single JSON-encoded row: a `store`
/// call reads the node's current map, merges in the whole incoming batch,
/// and writes the row back inside one write transaction, so a flush is
/// atomic with respect to concurrent `load`s (§6).
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open (or create) a redb database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(internal)?;
        }
        let db = Database::create(path).map_err(internal)?;

        {
            let wtxn = db.begin_write().map_err(internal)?;
            wtxn.open_table(NODES).map_err(internal)?;
            wtxn.commit().map_err(internal)?;
        }

        Ok(Self { db: Arc::new(db) })
    }

    fn read_node(
        &self,
        node: NodeId,
    ) -> Result<BTreeMap<ClusterPath, ClusterData>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(NODES).map_err(internal)?;
        match table.get(node_key(node).as_str()).map_err(internal)? {
            Some(guard) => Ok(serde_json::from_slice(guard.value())?),
            None => Ok(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl StorageContract for RedbStore {
    async fn load(
        &self,
        node: NodeId,
        cluster: ClusterPath,
    ) -> Result<Option<ClusterData>, StoreError> {
        Ok(self.read_node(node)?.remove(&cluster))
    }

    async fn load_all(
        &self,
        node: NodeId,
    ) -> Result<BTreeMap<ClusterPath, ClusterData>, StoreError> {
        self.read_node(node)
    }

    async fn store(
        &self,
        node: NodeId,
        clusters: BTreeMap<ClusterPath, ClusterData>,
    ) -> Result<(), StoreError> {
        let mut merged = self.read_node(node)?;
        merged.extend(clusters);
        let bytes = serde_json::to_vec(&merged)?;

        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = wtxn.open_table(NODES).map_err(internal)?;
            table
                .insert(node_key(node).as_str(), bytes.as_slice())
                .map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }

    async fn delete_node(&self, node: NodeId) -> Result<(), StoreError> {
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = wtxn.open_table(NODES).map_err(internal)?;
            table.remove(node_key(node).as_str()).map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devshadow_domain::{AttributeId, ClusterId, DataValue, EndpointId};
    use tempfile::TempDir;

    fn path() -> ClusterPath {
        ClusterPath::new(EndpointId(1), ClusterId(6))
    }

    fn data() -> ClusterData {
        let mut d = ClusterData::new();
        d.set(AttributeId(0), DataValue::Boolean(true));
        d
    }

    fn open_store(dir: &TempDir) -> RedbStore {
        RedbStore::open(&dir.path().join("shadow.redb")).unwrap()
    }

    #[tokio::test]
    async fn store_and_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let node = NodeId(1);
        store.store(node, BTreeMap::from([(path(), data())])).await.unwrap();
        assert_eq!(store.load(node, path()).await.unwrap(), Some(data()));
    }

    #[tokio::test]
    async fn persistence_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("shadow.redb");
        let node = NodeId(42);

        {
            let store = RedbStore::open(&db_path).unwrap();
            store.store(node, BTreeMap::from([(path(), data())])).await.unwrap();
        }
        {
            let store = RedbStore::open(&db_path).unwrap();
            let got = store.load(node, path()).await.unwrap();
            assert_eq!(got, Some(data()), "data should survive store reopen");
        }
    }

    #[tokio::test]
    async fn second_cluster_does_not_clobber_first() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
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
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let node = NodeId(1);
        store.store(node, BTreeMap::from([(path(), data())])).await.unwrap();
        store.delete_node(node).await.unwrap();
        assert_eq!(store.load(node, path()).await.unwrap(), None);
    }
}
