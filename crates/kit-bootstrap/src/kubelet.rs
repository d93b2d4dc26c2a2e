//! Kubelet configuration staged onto every control-plane node

use crate::config::{CLUSTER_DNS_IP, CLUSTER_DOMAIN};
use crate::error::{BootstrapError, Result};
use crate::files::{path_in, NodeFiles, KUBELET_DIR, KUBELET_SYSTEMD_DIR, MANIFESTS_DIR, PKI_DIR};
use serde::{Deserialize, Serialize};

pub const PAUSE_IMAGE: &str = "public.ecr.aws/eks-distro/kubernetes/pause:3.2";
pub const CONFIG_FILE: &str = "config.yaml";
pub const FLAGS_FILE: &str = "kubeadm-flags.env";
pub const ETCD_DROP_IN: &str = "10-kubelet-etcd.conf";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeletConfiguration {
    pub api_version: String,
    pub kind: String,
    pub authentication: KubeletAuthentication,
    pub authorization: KubeletAuthorization,
    pub cgroup_driver: String,
    #[serde(rename = "clusterDNS")]
    pub cluster_dns: Vec<String>,
    pub cluster_domain: String,
    pub static_pod_path: String,
    pub rotate_certificates: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeletAuthentication {
    pub anonymous: Toggle,
    pub webhook: Toggle,
    pub x509: X509Authentication,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toggle {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct X509Authentication {
    #[serde(rename = "clientCAFile", default, skip_serializing_if = "Option::is_none")]
    pub client_ca_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KubeletAuthorization {
    pub mode: String,
}

impl KubeletConfiguration {
    /// Masters authenticate API server calls against the cluster CA
    pub fn master() -> Self {
        Self {
            api_version: "kubelet.config.k8s.io/v1beta1".to_string(),
            kind: "KubeletConfiguration".to_string(),
            authentication: KubeletAuthentication {
                anonymous: Toggle { enabled: false },
                webhook: Toggle { enabled: true },
                x509: X509Authentication {
                    client_ca_file: Some(path_in(PKI_DIR, "ca.crt")),
                },
            },
            authorization: KubeletAuthorization {
                mode: "Webhook".to_string(),
            },
            cgroup_driver: "systemd".to_string(),
            cluster_dns: vec![CLUSTER_DNS_IP.to_string()],
            cluster_domain: CLUSTER_DOMAIN.to_string(),
            static_pod_path: MANIFESTS_DIR.to_string(),
            rotate_certificates: true,
        }
    }

    /// Etcd nodes run a standalone kubelet with no API server to ask
    pub fn etcd() -> Self {
        Self {
            authentication: KubeletAuthentication {
                anonymous: Toggle { enabled: false },
                webhook: Toggle { enabled: false },
                x509: X509Authentication {
                    client_ca_file: None,
                },
            },
            authorization: KubeletAuthorization {
                mode: "AlwaysAllow".to_string(),
            },
            rotate_certificates: false,
            ..Self::master()
        }
    }

    pub fn render(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| BootstrapError::render_error(CONFIG_FILE, e.to_string()))
    }
}

/// Flags the kubelet unit reads from its environment file
pub fn kubeadm_flags() -> String {
    format!(
        "KUBELET_KUBEADM_ARGS=\"--cgroup-driver=systemd --network-plugin=cni --pod-infra-container-image={}\"\n",
        PAUSE_IMAGE
    )
}

/// Systemd drop-in that runs the kubelet standalone on etcd nodes
pub fn etcd_drop_in() -> String {
    format!(
        "[Service]\nExecStart=\nExecStart=/usr/bin/kubelet --address=127.0.0.1 --pod-manifest-path={} --cgroup-driver=systemd\nRestart=always\n",
        MANIFESTS_DIR
    )
}

pub fn stage_master(files: &mut NodeFiles) -> Result<()> {
    files.insert(path_in(KUBELET_DIR, CONFIG_FILE), KubeletConfiguration::master().render()?);
    files.insert(path_in(KUBELET_DIR, FLAGS_FILE), kubeadm_flags());
    Ok(())
}

pub fn stage_etcd(files: &mut NodeFiles) -> Result<()> {
    files.insert(path_in(KUBELET_DIR, CONFIG_FILE), KubeletConfiguration::etcd().render()?);
    files.insert(path_in(KUBELET_DIR, FLAGS_FILE), kubeadm_flags());
    files.insert(path_in(KUBELET_SYSTEMD_DIR, ETCD_DROP_IN), etcd_drop_in());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_config() {
        let yaml = KubeletConfiguration::master().render().unwrap();
        assert!(yaml.contains("cgroupDriver: systemd"));
        assert!(yaml.contains("clusterDNS:"));
        assert!(yaml.contains("clientCAFile: /etc/kubernetes/pki/ca.crt"));
        assert!(yaml.contains("staticPodPath: /etc/kubernetes/manifests"));
    }

    #[test]
    fn test_etcd_staging_adds_drop_in() {
        let mut files = NodeFiles::new();
        stage_etcd(&mut files).unwrap();

        let drop_in = files
            .text("/etc/systemd/system/kubelet.service.d/10-kubelet-etcd.conf")
            .unwrap();
        assert!(drop_in.starts_with("[Service]\nExecStart=\n"));
        assert!(files
            .text("/var/lib/kubelet/config.yaml")
            .unwrap()
            .contains("mode: AlwaysAllow"));
        assert!(files
            .text("/var/lib/kubelet/kubeadm-flags.env")
            .unwrap()
            .contains("pause:3.2"));
    }

    #[test]
    fn test_master_staging_has_no_drop_in() {
        let mut files = NodeFiles::new();
        stage_master(&mut files).unwrap();
        assert_eq!(files.len(), 2);
    }
}
