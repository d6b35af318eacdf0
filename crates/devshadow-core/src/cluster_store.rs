use std::collections::{BTreeMap, BTreeSet};

use devshadow_domain::{
    wellknown, AttributePath, ClusterData, ClusterPath, DataValue, DataVersion, RemoteStatus,
    ROOT_ENDPOINT,
};
use devshadow_store::{StorageContract, StoreError};
use devshadow_transport::AttributeDataItem;

/// One changed (or errored) attribute, ready to hand to a delegate (§6).
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeReportItem {
    pub path: AttributePath,
    pub value: Option<DataValue>,
    pub previous: Option<DataValue>,
    pub error: Option<RemoteStatus>,
}

/// C1: the canonical cluster cache plus the data-version map that feeds
/// subscription filter construction (§4.1).
#[derive(Debug, Default)]
pub struct ClusterStore {
    persisted: BTreeMap<ClusterPath, ClusterData>,
    dirty: BTreeMap<ClusterPath, ClusterData>,
    known_persisted_keys: BTreeSet<ClusterPath>,
}

impl ClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the persisted map directly, e.g. from a cold-start load. Does
    /// not mark anything dirty.
    pub fn inject_persisted(&mut self, data: BTreeMap<ClusterPath, ClusterData>) {
        for cluster in data.keys() {
            self.known_persisted_keys.insert(*cluster);
        }
        self.persisted.extend(data);
    }

    /// Dirty value if present, else persisted value. Never pages from
    /// storage; callers that need paging use [`ClusterStore::get_paged`].
    pub fn get(&self, path: AttributePath) -> Option<DataValue> {
        let cluster = path.cluster_path();
        self.dirty
            .get(&cluster)
            .and_then(|cd| cd.get(path.attribute))
            .or_else(|| self.persisted.get(&cluster).and_then(|cd| cd.get(path.attribute)))
            .cloned()
    }

    /// Full lookup per §4.1: dirty, then persisted, then a load from
    /// storage if the cluster is a known (possibly evicted) persisted key.
    pub async fn get_paged(
        &mut self,
        node: devshadow_domain::NodeId,
        path: AttributePath,
        storage: &dyn StorageContract,
    ) -> Result<Option<DataValue>, StoreError> {
        if let Some(v) = self.get(path) {
            return Ok(Some(v));
        }
        let cluster = path.cluster_path();
        if self.known_persisted_keys.contains(&cluster) && !self.persisted.contains_key(&cluster) {
            if let Some(data) = storage.load(node, cluster).await? {
                let value = data.get(path.attribute).cloned();
                self.persisted.insert(cluster, data);
                return Ok(value);
            }
        }
        Ok(None)
    }

    pub fn set(&mut self, path: AttributePath, value: DataValue) {
        self.dirty
            .entry(path.cluster_path())
            .or_default()
            .set(path.attribute, value);
    }

    /// Updates a cluster's data version in the dirty map. Returns whether
    /// the version actually changed (any change marks the cluster dirty).
    pub fn note_data_version(&mut self, cluster: ClusterPath, version: DataVersion) -> bool {
        let baseline = self.persisted.get(&cluster).cloned().unwrap_or_default();
        let entry = self.dirty.entry(cluster).or_insert(baseline);
        let changed = entry.data_version != Some(version);
        entry.data_version = Some(version);
        changed
    }

    pub fn snapshot_dirty(&self) -> BTreeMap<ClusterPath, ClusterData> {
        self.dirty.clone()
    }

    /// Flush dirty clusters to storage. On success, merges them into
    /// `persisted`, records their keys as known-persisted, and clears
    /// dirty. On failure, dirty is left untouched (§7).
    pub async fn flush_to(
        &mut self,
        node: devshadow_domain::NodeId,
        storage: &dyn StorageContract,
    ) -> Result<(), StoreError> {
        if self.dirty.is_empty() {
            return Ok(());
        }
        let snapshot = self.snapshot_dirty();
        storage.store(node, snapshot.clone()).await?;
        for (cluster, data) in snapshot {
            self.known_persisted_keys.insert(cluster);
            self.persisted.insert(cluster, data);
        }
        self.dirty.clear();
        Ok(())
    }

    /// Union of dirty and persisted versions, dirty taking precedence.
    pub fn data_version_map(&self) -> BTreeMap<ClusterPath, DataVersion> {
        let mut map = BTreeMap::new();
        for (cluster, data) in &self.persisted {
            if let Some(v) = data.data_version {
                map.insert(*cluster, v);
            }
        }
        for (cluster, data) in &self.dirty {
            if let Some(v) = data.data_version {
                map.insert(*cluster, v);
            }
        }
        map
    }

    /// Whether `attribute` belongs to the fixed allow-list that gates
    /// `deviceConfigurationChanged` (§4.1).
    pub fn touches_configuration(path: AttributePath) -> bool {
        if path.cluster == wellknown::DESCRIPTOR_CLUSTER {
            return matches!(
                path.attribute,
                wellknown::DESCRIPTOR_DEVICE_TYPE_LIST
                    | wellknown::DESCRIPTOR_SERVER_LIST
                    | wellknown::DESCRIPTOR_PARTS_LIST
            );
        }
        matches!(
            path.attribute,
            wellknown::GLOBAL_ACCEPTED_COMMAND_LIST
                | wellknown::GLOBAL_ATTRIBUTE_LIST
                | wellknown::GLOBAL_FEATURE_MAP
                | wellknown::GLOBAL_CLUSTER_REVISION
        )
    }

    /// Ingest a batch of attribute reports (read results or subscription
    /// data), per the delta-report algorithm in §4.1. Returns the changed
    /// items plus whether any configuration-affecting attribute changed.
    pub fn apply_report(
        &mut self,
        items: Vec<AttributeDataItem>,
    ) -> (Vec<AttributeReportItem>, bool) {
        self.apply_report_inner(items, false)
    }

    /// As [`Self::apply_report`], but reports every item unconditionally
    /// even when its value canonically matches the cache (`TestOverrides`'
    /// `force_report_on_match`).
    pub fn apply_report_forced(
        &mut self,
        items: Vec<AttributeDataItem>,
    ) -> (Vec<AttributeReportItem>, bool) {
        self.apply_report_inner(items, true)
    }

    fn apply_report_inner(
        &mut self,
        items: Vec<AttributeDataItem>,
        force_report: bool,
    ) -> (Vec<AttributeReportItem>, bool) {
        let mut out = Vec::with_capacity(items.len());
        let mut config_changed = false;

        for item in items {
            let cluster = item.path.cluster_path();
            match item.result {
                Err(status) => {
                    let previous = self.get(item.path);
                    if let Some(cd) = self.dirty.get_mut(&cluster) {
                        cd.attributes.remove(&item.path.attribute);
                    }
                    if let Some(cd) = self.persisted.get_mut(&cluster) {
                        cd.attributes.remove(&item.path.attribute);
                    }
                    out.push(AttributeReportItem {
                        path: item.path,
                        value: None,
                        previous,
                        error: Some(status),
                    });
                }
                Ok(value) => {
                    let previous = self.get(item.path);
                    let changed =
                        force_report || previous.as_ref().map_or(true, |p| !p.canonical_eq(&value));

                    if let Some(version) = item.data_version {
                        self.note_data_version(cluster, version);
                    }
                    self.set(item.path, value.clone());

                    if changed {
                        if Self::touches_configuration(item.path) {
                            config_changed = true;
                        }
                        out.push(AttributeReportItem {
                            path: item.path,
                            value: Some(value),
                            previous,
                            error: None,
                        });
                    }
                }
            }
        }

        (out, config_changed)
    }

    /// The cache-primed predicate (§4.4): the root endpoint's Descriptor
    /// parts-list is present, and every endpoint it lists has its own
    /// Descriptor device-type-list present.
    pub fn is_primed(&self) -> bool {
        let root = ClusterPath::new(ROOT_ENDPOINT, wellknown::DESCRIPTOR_CLUSTER);
        let parts_list = match self.get(AttributePath::new(
            root.endpoint,
            root.cluster,
            wellknown::DESCRIPTOR_PARTS_LIST,
        )) {
            Some(v) => v,
            None => return false,
        };

        let endpoints = match &parts_list {
            DataValue::Array(items) => items
                .iter()
                .filter_map(|v| match v {
                    DataValue::UnsignedInt(n) => Some(devshadow_domain::EndpointId(*n as u16)),
                    _ => None,
                })
                .collect::<Vec<_>>(),
            _ => return false,
        };

        endpoints.into_iter().all(|endpoint| {
            self.get(AttributePath::new(
                endpoint,
                wellknown::DESCRIPTOR_CLUSTER,
                wellknown::DESCRIPTOR_DEVICE_TYPE_LIST,
            ))
            .is_some()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devshadow_domain::{AttributeId, ClusterId, EndpointId, NodeId};
    use devshadow_store::InMemoryStore;

    fn path() -> AttributePath {
        AttributePath::new(EndpointId(1), ClusterId(6), AttributeId(0))
    }

    #[test]
    fn get_prefers_dirty_over_persisted() {
        let mut store = ClusterStore::new();
        store.set(path(), DataValue::Boolean(false));
        store.flush_dirty_for_test();
        store.set(path(), DataValue::Boolean(true));
        assert_eq!(store.get(path()), Some(DataValue::Boolean(true)));
    }

    impl ClusterStore {
        fn flush_dirty_for_test(&mut self) {
            for (cluster, data) in self.dirty.clone() {
                self.persisted.insert(cluster, data);
            }
            self.dirty.clear();
        }
    }

    #[tokio::test]
    async fn flush_moves_dirty_into_persisted_and_clears() {
        let mut store = ClusterStore::new();
        store.set(path(), DataValue::Boolean(true));
        let storage = InMemoryStore::new();
        store.flush_to(NodeId(1), &storage).await.unwrap();
        assert!(store.snapshot_dirty().is_empty());
        assert_eq!(store.get(path()), Some(DataValue::Boolean(true)));

        let persisted = storage.load(NodeId(1), path().cluster_path()).await.unwrap();
        assert!(persisted.is_some());
    }

    #[tokio::test]
    async fn paging_loads_evicted_cluster_from_storage() {
        let storage = InMemoryStore::new();
        let mut data = ClusterData::new();
        data.set(AttributeId(0), DataValue::Boolean(true));
        storage
            .store(NodeId(1), BTreeMap::from([(path().cluster_path(), data)]))
            .await
            .unwrap();

        let mut store = ClusterStore::new();
        store.known_persisted_keys.insert(path().cluster_path());

        let value = store.get_paged(NodeId(1), path(), &storage).await.unwrap();
        assert_eq!(value, Some(DataValue::Boolean(true)));
    }

    #[test]
    fn apply_report_filters_unchanged_values() {
        let mut store = ClusterStore::new();
        store.set(path(), DataValue::Boolean(true));

        let (changed, _) = store.apply_report(vec![AttributeDataItem {
            path: path(),
            data_version: None,
            result: Ok(DataValue::Boolean(true)),
        }]);
        assert!(changed.is_empty());

        let (changed, _) = store.apply_report(vec![AttributeDataItem {
            path: path(),
            data_version: None,
            result: Ok(DataValue::Boolean(false)),
        }]);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].previous, Some(DataValue::Boolean(true)));
        assert_eq!(changed[0].value, Some(DataValue::Boolean(false)));
    }

    #[test]
    fn apply_report_error_clears_cache_and_reports_previous() {
        let mut store = ClusterStore::new();
        store.set(path(), DataValue::Boolean(true));

        let (changed, _) = store.apply_report(vec![AttributeDataItem {
            path: path(),
            data_version: None,
            result: Err(RemoteStatus::UnsupportedAttribute),
        }]);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].previous, Some(DataValue::Boolean(true)));
        assert_eq!(changed[0].value, None);
        assert_eq!(store.get(path()), None);
    }

    #[test]
    fn configuration_attribute_change_is_flagged() {
        let mut store = ClusterStore::new();
        let config_path = AttributePath::new(
            ROOT_ENDPOINT,
            wellknown::DESCRIPTOR_CLUSTER,
            wellknown::DESCRIPTOR_PARTS_LIST,
        );
        let (_, config_changed) = store.apply_report(vec![AttributeDataItem {
            path: config_path,
            data_version: None,
            result: Ok(DataValue::Array(vec![])),
        }]);
        assert!(config_changed);
    }

    #[test]
    fn cache_primed_requires_parts_list_and_every_device_type_list() {
        let mut store = ClusterStore::new();
        assert!(!store.is_primed());

        store.set(
            AttributePath::new(
                ROOT_ENDPOINT,
                wellknown::DESCRIPTOR_CLUSTER,
                wellknown::DESCRIPTOR_PARTS_LIST,
            ),
            DataValue::Array(vec![DataValue::UnsignedInt(1)]),
        );
        assert!(!store.is_primed(), "endpoint 1's device-type-list is missing");

        store.set(
            AttributePath::new(
                EndpointId(1),
                wellknown::DESCRIPTOR_CLUSTER,
                wellknown::DESCRIPTOR_DEVICE_TYPE_LIST,
            ),
            DataValue::Array(vec![]),
        );
        assert!(store.is_primed());
    }
}
