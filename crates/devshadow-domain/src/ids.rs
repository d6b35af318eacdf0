use serde::{Deserialize, Serialize};

/// An addressable sub-device on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub u16);

/// A grouping of related attributes, commands and events on an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterId(pub u32);

/// A named, typed field on a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttributeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommandId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub u32);

/// Identifies one remote node in the fabric. Devices are keyed by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// Monotonic counter bumped by the node on any attribute change in a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DataVersion(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

impl std::fmt::Display for AttributeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// `(endpoint, cluster, attribute)` — the full address of one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttributePath {
    pub endpoint: EndpointId,
    pub cluster: ClusterId,
    pub attribute: AttributeId,
}

impl AttributePath {
    pub fn new(endpoint: EndpointId, cluster: ClusterId, attribute: AttributeId) -> Self {
        Self { endpoint, cluster, attribute }
    }

    pub fn cluster_path(&self) -> ClusterPath {
        ClusterPath { endpoint: self.endpoint, cluster: self.cluster }
    }
}

impl std::fmt::Display for AttributePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.endpoint, self.cluster, self.attribute)
    }
}

/// `(endpoint, cluster)` — the address of one cluster instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterPath {
    pub endpoint: EndpointId,
    pub cluster: ClusterId,
}

impl ClusterPath {
    pub fn new(endpoint: EndpointId, cluster: ClusterId) -> Self {
        Self { endpoint, cluster }
    }
}

impl std::fmt::Display for ClusterPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.endpoint, self.cluster)
    }
}

/// Fixed well-known cluster/attribute ids referenced by name in the spec
/// (Descriptor parts-list, device-type-list; global attributes that gate
/// `deviceConfigurationChanged`).
pub mod wellknown {
    use super::{AttributeId, ClusterId};

    pub const DESCRIPTOR_CLUSTER: ClusterId = ClusterId(0x001D);
    pub const DESCRIPTOR_DEVICE_TYPE_LIST: AttributeId = AttributeId(0x0000);
    pub const DESCRIPTOR_SERVER_LIST: AttributeId = AttributeId(0x0001);
    pub const DESCRIPTOR_PARTS_LIST: AttributeId = AttributeId(0x0003);

    pub const GLOBAL_ACCEPTED_COMMAND_LIST: AttributeId = AttributeId(0xFFF9);
    pub const GLOBAL_ATTRIBUTE_LIST: AttributeId = AttributeId(0xFFFB);
    pub const GLOBAL_FEATURE_MAP: AttributeId = AttributeId(0xFFFC);
    pub const GLOBAL_CLUSTER_REVISION: AttributeId = AttributeId(0xFFFD);

    pub const GENERAL_DIAGNOSTICS_CLUSTER: ClusterId = ClusterId(0x0033);
    pub const GENERAL_DIAGNOSTICS_UP_TIME: AttributeId = AttributeId(0x0000);

    pub const SOFTWARE_DIAGNOSTICS_CLUSTER: ClusterId = ClusterId(0x0034);
    pub const SOFTWARE_DIAGNOSTICS_CURRENT_HEAP_FREE: AttributeId = AttributeId(0x0000);
    pub const SOFTWARE_DIAGNOSTICS_CURRENT_HEAP_USED: AttributeId = AttributeId(0x0001);

    pub const OPERATIONAL_CREDENTIALS_CLUSTER: ClusterId = ClusterId(0x003E);
    pub const OPERATIONAL_CREDENTIALS_NOC_LIST: AttributeId = AttributeId(0x0000);

    pub const POWER_SOURCE_CLUSTER: ClusterId = ClusterId(0x002F);
    pub const POWER_SOURCE_ACTIVE_VOLTAGE: AttributeId = AttributeId(0x000B);
    pub const POWER_SOURCE_ACTIVE_CURRENT: AttributeId = AttributeId(0x000C);

    pub const TIME_SYNCHRONIZATION_CLUSTER: ClusterId = ClusterId(0x0038);
    pub const TIME_SYNCHRONIZATION_UTC_TIME: AttributeId = AttributeId(0x0000);
    pub const TIME_SYNCHRONIZATION_LOCAL_TIME: AttributeId = AttributeId(0x0002);

    /// Attributes the spec calls out as "changes omitted" (§4.5): ordinary
    /// subscription deltas can't be relied on to report these, so a cached
    /// hit must still trigger a background refresh read.
    pub const CHANGES_OMITTED: &[(ClusterId, AttributeId)] = &[
        (GENERAL_DIAGNOSTICS_CLUSTER, GENERAL_DIAGNOSTICS_UP_TIME),
        (SOFTWARE_DIAGNOSTICS_CLUSTER, SOFTWARE_DIAGNOSTICS_CURRENT_HEAP_FREE),
        (SOFTWARE_DIAGNOSTICS_CLUSTER, SOFTWARE_DIAGNOSTICS_CURRENT_HEAP_USED),
        (OPERATIONAL_CREDENTIALS_CLUSTER, OPERATIONAL_CREDENTIALS_NOC_LIST),
        (POWER_SOURCE_CLUSTER, POWER_SOURCE_ACTIVE_VOLTAGE),
        (POWER_SOURCE_CLUSTER, POWER_SOURCE_ACTIVE_CURRENT),
        (TIME_SYNCHRONIZATION_CLUSTER, TIME_SYNCHRONIZATION_UTC_TIME),
        (TIME_SYNCHRONIZATION_CLUSTER, TIME_SYNCHRONIZATION_LOCAL_TIME),
    ];

    pub fn is_changes_omitted(cluster: ClusterId, attribute: AttributeId) -> bool {
        CHANGES_OMITTED.contains(&(cluster, attribute))
    }
}
