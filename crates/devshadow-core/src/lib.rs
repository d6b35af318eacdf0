pub mod cluster_store;
pub mod config;
pub mod controller;
pub mod delegate;
pub mod device;
pub mod error;
pub mod expected_cache;
pub mod queue;
pub mod subscription;
pub mod test_overrides;
pub mod time_sync;

pub use cluster_store::{AttributeReportItem, ClusterStore};
pub use config::ShadowConfig;
pub use controller::Controller;
pub use delegate::{Delegate, EventReportItem};
pub use device::Device;
pub use error::{ErrorKind, Result, ShadowError};
pub use expected_cache::ExpectedValueCache;
pub use queue::{EnqueueRead, ReadParams, Ready, WorkQueue};
pub use subscription::{Backoff, Effect, SubscriptionEngine};
pub use test_overrides::TestOverrides;
