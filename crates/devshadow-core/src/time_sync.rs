use devshadow_domain::{ClusterId, DataValue, EndpointId};
use devshadow_transport::{SessionHandle, TimeSyncClient, TransportError};

use crate::cluster_store::ClusterStore;

/// Time Synchronization cluster id, carried by endpoints that accept a
/// UTC/DST push (§4.4, §9). Scoped to this module: the policy of *when* and
/// *what* to push is a core concern, not a shared domain identifier.
const TIME_SYNC_CLUSTER: ClusterId = ClusterId(0x0038);

/// Endpoints whose Descriptor server-list advertises the Time-Sync cluster.
/// Callers filter under `state_lock` before the network calls in
/// [`run_time_sync`], which never touches the cluster store itself — the
/// lock must not be held across those awaits (§5).
pub fn time_sync_endpoints(store: &ClusterStore, root_parts: &[EndpointId]) -> Vec<EndpointId> {
    let mut endpoints = Vec::new();
    for &endpoint in root_parts {
        let server_list = store.get(devshadow_domain::AttributePath::new(
            endpoint,
            devshadow_domain::wellknown::DESCRIPTOR_CLUSTER,
            devshadow_domain::wellknown::DESCRIPTOR_SERVER_LIST,
        ));
        let has_time_sync = matches!(
            server_list,
            Some(DataValue::Array(items)) if items.iter().any(|v| matches!(v, DataValue::UnsignedInt(c) if *c == TIME_SYNC_CLUSTER.0 as u64))
        );
        if has_time_sync {
            endpoints.push(endpoint);
        }
    }
    endpoints
}

/// Runs one time-sync pass: push the controller's current UTC, then push
/// the local DST offset to every endpoint that advertises Time-Sync. Best
/// effort — a failure on one endpoint does not abort the rest (§9: gated by
/// `time_lock` and reachability, never retried on its own schedule).
///
/// `endpoints` must already be filtered by the caller (see
/// [`time_sync_endpoints`]) so this function never needs the cluster store
/// and can be awaited without holding `state_lock`.
pub async fn run_time_sync(
    client: &dyn TimeSyncClient,
    session: &SessionHandle,
    endpoints: &[EndpointId],
    utc_us: u64,
    dst_offset_s: i32,
) -> Result<(), TransportError> {
    client.set_utc(session, utc_us).await?;
    for &endpoint in endpoints {
        client.set_dst_offset(session, endpoint, dst_offset_s).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use devshadow_domain::AttributePath;

    #[test]
    fn endpoints_are_filtered_by_server_list_membership() {
        let mut store = ClusterStore::new();
        store.set(
            AttributePath::new(
                EndpointId(1),
                devshadow_domain::wellknown::DESCRIPTOR_CLUSTER,
                devshadow_domain::wellknown::DESCRIPTOR_SERVER_LIST,
            ),
            DataValue::Array(vec![DataValue::UnsignedInt(TIME_SYNC_CLUSTER.0 as u64)]),
        );
        store.set(
            AttributePath::new(
                EndpointId(2),
                devshadow_domain::wellknown::DESCRIPTOR_CLUSTER,
                devshadow_domain::wellknown::DESCRIPTOR_SERVER_LIST,
            ),
            DataValue::Array(vec![]),
        );
        let endpoints = time_sync_endpoints(&store, &[EndpointId(1), EndpointId(2)]);
        assert_eq!(endpoints, vec![EndpointId(1)]);
    }
}
