//! Kit Cloud - typed clients for the cloud objects kit provisions
//!
//! One trait per resource family, a provider-neutral object model keyed by
//! ownership tags, and an in-memory `MockCloud` that implements every family.

pub mod error;
pub mod mock;
pub mod model;
pub mod traits;

pub use error::{ignore_not_found, CloudError, Result};
pub use mock::MockCloud;
pub use model::{owned_tags, TagFilter, Tags};
pub use traits::{ComputeApi, IdentityApi, LoadBalancingApi, NetworkApi, ObjectStorageApi};

use std::sync::Arc;

/// Explicitly constructed client handles, one per resource family
#[derive(Clone)]
pub struct CloudClients {
    pub network: Arc<dyn NetworkApi>,
    pub identity: Arc<dyn IdentityApi>,
    pub compute: Arc<dyn ComputeApi>,
    pub load_balancing: Arc<dyn LoadBalancingApi>,
    pub object_storage: Arc<dyn ObjectStorageApi>,
}

impl CloudClients {
    /// Every family served by the same mock
    pub fn mock(cloud: Arc<MockCloud>) -> Self {
        Self {
            network: cloud.clone(),
            identity: cloud.clone(),
            compute: cloud.clone(),
            load_balancing: cloud.clone(),
            object_storage: cloud,
        }
    }
}
