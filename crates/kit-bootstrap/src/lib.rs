//! Kit Bootstrap - turns provisioned instances into a running control plane
//!
//! Once the etcd and master instances are running, the sequencer mints the
//! certificate authorities and per-node PKI, renders static pod manifests,
//! kubeconfigs and kubelet configuration, and stages everything in the
//! cluster's bucket under `{cluster}/{instance-id}/`. The last phase creates
//! the first bootstrap token and the RBAC that lets further nodes join.

pub mod cluster_init;
pub mod config;
pub mod distribution;
pub mod error;
pub mod etcd;
pub mod files;
pub mod kubeconfig;
pub mod kubelet;
pub mod manifest;
pub mod master;
pub mod nodes;
pub mod pki;
pub mod sequencer;

// Re-export primary types
pub use cluster_init::{ClusterApi, ClusterTarget, HttpClusterApi, MockClusterApi};
pub use config::BootstrapConfig;
pub use distribution::Distributor;
pub use error::{BootstrapError, Result};
pub use files::NodeFiles;
pub use nodes::Node;
pub use sequencer::{BootstrapOutcome, BootstrapSequencer};
