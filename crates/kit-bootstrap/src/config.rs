use kit_core::{Component, ControlPlaneSpec};
use std::time::Duration;

pub const DEFAULT_KUBERNETES_VERSION: &str = "v1.19.8-eks-1-19-4";
pub const DEFAULT_IMAGE_REPOSITORY: &str = "public.ecr.aws/eks-distro/kubernetes";
pub const DEFAULT_ETCD_IMAGE: &str = "public.ecr.aws/eks-distro/etcd-io/etcd:v3.4.14-eks-1-18-1";

/// Service network the API server allocates cluster IPs from
pub const SERVICE_CIDR: &str = "10.96.0.0/12";
/// First address of the service network, served by the `kubernetes` service
pub const API_SERVICE_IP: &str = "10.96.0.1";
pub const CLUSTER_DNS_IP: &str = "10.96.0.10";
pub const CLUSTER_DOMAIN: &str = "cluster.local";

pub const API_SERVER_PORT: u16 = 443;
pub const ETCD_CLIENT_PORT: u16 = 2379;
pub const ETCD_PEER_PORT: u16 = 2380;

/// Bootstrap sequencer configuration
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Kubernetes version used when the ControlPlane does not name one
    pub kubernetes_version: String,
    /// Registry path the control-plane images are pulled from
    pub image_repository: String,
    /// Full etcd image reference used when the ControlPlane does not name one
    pub etcd_image: String,
    /// Etcd members expected when the ControlPlane does not set a count
    pub etcd_count: u32,
    /// Masters expected when the ControlPlane does not set a count
    pub master_count: u32,
    /// How long to wait before looking for nodes again
    pub node_poll_interval: Duration,
    /// Lifetime of the initial bootstrap token
    pub token_ttl: Duration,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            kubernetes_version: DEFAULT_KUBERNETES_VERSION.to_string(),
            image_repository: DEFAULT_IMAGE_REPOSITORY.to_string(),
            etcd_image: DEFAULT_ETCD_IMAGE.to_string(),
            etcd_count: 3,
            master_count: 3,
            node_poll_interval: Duration::from_secs(30),
            token_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl BootstrapConfig {
    /// Version for a cluster, preferring the ControlPlane's own
    pub fn version_for<'a>(&'a self, spec: &'a ControlPlaneSpec) -> &'a str {
        spec.kubernetes_version
            .as_deref()
            .unwrap_or(&self.kubernetes_version)
    }

    /// Image for a control-plane binary, e.g. `kube-apiserver`
    pub fn component_image(&self, spec: &ControlPlaneSpec, binary: &str) -> String {
        format!("{}/{}:{}", self.image_repository, binary, self.version_for(spec))
    }

    pub fn etcd_image_for<'a>(&'a self, spec: &'a ControlPlaneSpec) -> &'a str {
        spec.etcd.image.as_deref().unwrap_or(&self.etcd_image)
    }

    /// Number of nodes of a role that must be running
    pub fn expected_nodes(&self, spec: &ControlPlaneSpec, component: Component) -> usize {
        let default = match component {
            Component::Master => self.master_count,
            Component::Etcd => self.etcd_count,
        };
        spec.instances(component).instance_count.unwrap_or(default) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BootstrapConfig::default();
        let spec = ControlPlaneSpec::default();
        assert_eq!(config.version_for(&spec), "v1.19.8-eks-1-19-4");
        assert_eq!(
            config.component_image(&spec, "kube-apiserver"),
            "public.ecr.aws/eks-distro/kubernetes/kube-apiserver:v1.19.8-eks-1-19-4"
        );
        assert_eq!(config.expected_nodes(&spec, Component::Etcd), 3);
    }

    #[test]
    fn test_spec_overrides() {
        let config = BootstrapConfig::default();
        let mut spec = ControlPlaneSpec::default();
        spec.kubernetes_version = Some("v1.20.4-eks-1-20-1".to_string());
        spec.master.instances.instance_count = Some(1);
        spec.etcd.image = Some("registry.local/etcd:3.4.13".to_string());

        assert!(config
            .component_image(&spec, "kube-scheduler")
            .ends_with(":v1.20.4-eks-1-20-1"));
        assert_eq!(config.expected_nodes(&spec, Component::Master), 1);
        assert_eq!(config.etcd_image_for(&spec), "registry.local/etcd:3.4.13");
    }
}
