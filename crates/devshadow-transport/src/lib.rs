pub mod contract;
pub mod error;
pub mod sim;

pub use contract::{
    AttributeDataItem, ConnectivityMonitor, DataVersionFilter, EventDataItem, EventTimeType,
    InvokeResult, ReadClientCallbacks, ReadClientHandle, SessionError, SessionHandle,
    SessionProvider, SubscriptionTransport, TimeSyncClient,
};
pub use error::TransportError;
pub use sim::{ManualConnectivityMonitor, SimTransport};
