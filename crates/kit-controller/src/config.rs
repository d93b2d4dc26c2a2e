use kit_bootstrap::BootstrapConfig;
use kit_core::naming::CLUSTER_TAG;
use kit_core::resources::control_plane::DEFAULT_VPC_CIDR;
use std::time::Duration;

/// Requeue backoff and steady-state rate limit
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// First retry delay of a failing key
    pub base_delay: Duration,
    /// Ceiling of the per-key exponential backoff
    pub max_delay: Duration,
    /// Token bucket refill rate across all keys
    pub qps: f64,
    /// Token bucket size
    pub burst: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            qps: 10.0,
            burst: 100,
        }
    }
}

/// Cloud defaults for values the ControlPlane spec leaves open
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningDefaults {
    pub region: String,
    pub vpc_cidr: String,
    pub instance_type: String,
    pub volume_size_gib: u32,
    pub volume_type: String,
    /// Public parameter holding the recommended node AMI
    pub ami_parameter: String,
    pub min_size: u32,
    pub max_size: u32,
}

impl Default for ProvisioningDefaults {
    fn default() -> Self {
        Self {
            region: "us-west-2".to_string(),
            vpc_cidr: DEFAULT_VPC_CIDR.to_string(),
            instance_type: "t2.large".to_string(),
            volume_size_gib: 40,
            volume_type: "gp3".to_string(),
            ami_parameter: "/aws/service/eks/optimized-ami/1.19/amazon-linux-2/recommended/image_id"
                .to_string(),
            min_size: 1,
            max_size: 4,
        }
    }
}

/// Configuration for the controller manager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Workers per record kind
    pub workers: usize,
    /// Capacity of each kind's event channel
    pub event_capacity: usize,
    /// Tag key that marks cloud objects as owned by a cluster
    pub cluster_tag: String,
    pub rate_limiter: RateLimiterConfig,
    pub provisioning: ProvisioningDefaults,
    pub bootstrap: BootstrapConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            event_capacity: 1024,
            cluster_tag: CLUSTER_TAG.to_string(),
            rate_limiter: RateLimiterConfig::default(),
            provisioning: ProvisioningDefaults::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}
