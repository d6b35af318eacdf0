use std::collections::BTreeMap;

use async_trait::async_trait;
use devshadow_domain::{ClusterData, ClusterPath, NodeId};

use crate::error::StoreError;

/// The storage contract C1 persists through (spec §6).
///
/// `store` takes every dirty cluster for a node in one call so a flush is
/// atomic with respect to concurrent `load`s: a reader never observes some
/// clusters from one flush and some from the next.
#[async_trait]
pub trait StorageContract: Send + Sync + 'static {
    /// Load the last-persisted data for one cluster on one node, if any.
    async fn load(
        &self,
        node: NodeId,
        cluster: ClusterPath,
    ) -> Result<Option<ClusterData>, StoreError>;

    /// Load every persisted cluster for a node, keyed by cluster path.
    async fn load_all(
        &self,
        node: NodeId,
    ) -> Result<BTreeMap<ClusterPath, ClusterData>, StoreError>;

    /// Persist (or overwrite) a batch of clusters for a node in one call.
    async fn store(
        &self,
        node: NodeId,
        clusters: BTreeMap<ClusterPath, ClusterData>,
    ) -> Result<(), StoreError>;

    /// Drop all persisted state for a node, e.g. on unpairing.
    async fn delete_node(&self, node: NodeId) -> Result<(), StoreError>;
}
