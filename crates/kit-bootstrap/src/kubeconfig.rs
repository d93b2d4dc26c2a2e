//! Kubeconfig files for control-plane clients

use crate::error::{BootstrapError, Result};
use crate::pki::{CertPair, CertRequest, CertificateAuthority, Usage};
use k8s_openapi::ByteString;
use serde::{Deserialize, Serialize};

pub const CLUSTER_NAME: &str = "kubernetes";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kubeconfig {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub clusters: Vec<NamedCluster>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contexts: Vec<NamedContext>,
    #[serde(rename = "current-context", default, skip_serializing_if = "String::is_empty")]
    pub current_context: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<NamedUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: ClusterEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterEntry {
    #[serde(rename = "certificate-authority-data")]
    pub certificate_authority_data: ByteString,
    pub server: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub cluster: String,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    pub user: UserEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEntry {
    #[serde(rename = "client-certificate-data")]
    pub client_certificate_data: ByteString,
    #[serde(rename = "client-key-data")]
    pub client_key_data: ByteString,
}

impl Kubeconfig {
    /// A config with only the cluster entry, as published in `cluster-info`
    pub fn cluster_only(server: &str, ca_pem: &str) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "Config".to_string(),
            clusters: vec![NamedCluster {
                name: String::new(),
                cluster: ClusterEntry {
                    certificate_authority_data: ByteString(ca_pem.as_bytes().to_vec()),
                    server: server.to_string(),
                },
            }],
            contexts: Vec::new(),
            current_context: String::new(),
            users: Vec::new(),
        }
    }

    /// A config that authenticates `user` with a client certificate
    pub fn for_user(server: &str, ca_pem: &str, user: &str, client: &CertPair) -> Self {
        let context = format!("{}@{}", user, CLUSTER_NAME);
        Self {
            api_version: "v1".to_string(),
            kind: "Config".to_string(),
            clusters: vec![NamedCluster {
                name: CLUSTER_NAME.to_string(),
                cluster: ClusterEntry {
                    certificate_authority_data: ByteString(ca_pem.as_bytes().to_vec()),
                    server: server.to_string(),
                },
            }],
            contexts: vec![NamedContext {
                name: context.clone(),
                context: ContextEntry {
                    cluster: CLUSTER_NAME.to_string(),
                    user: user.to_string(),
                },
            }],
            current_context: context,
            users: vec![NamedUser {
                name: user.to_string(),
                user: UserEntry {
                    client_certificate_data: ByteString(client.cert_pem.as_bytes().to_vec()),
                    client_key_data: ByteString(client.key_pem.as_bytes().to_vec()),
                },
            }],
        }
    }

    pub fn render(&self, file: &str) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| BootstrapError::render_error(file, e.to_string()))
    }
}

/// Client identity a kubeconfig is minted for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KubeconfigKind {
    Admin,
    Kubelet,
    ControllerManager,
    Scheduler,
}

impl KubeconfigKind {
    pub const ALL: [KubeconfigKind; 4] = [
        KubeconfigKind::Admin,
        KubeconfigKind::Kubelet,
        KubeconfigKind::ControllerManager,
        KubeconfigKind::Scheduler,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            KubeconfigKind::Admin => "admin.conf",
            KubeconfigKind::Kubelet => "kubelet.conf",
            KubeconfigKind::ControllerManager => "controller-manager.conf",
            KubeconfigKind::Scheduler => "scheduler.conf",
        }
    }

    /// Certificate subject for the client on `node_id`
    pub fn request(&self, node_id: &str) -> CertRequest {
        match self {
            KubeconfigKind::Admin => {
                CertRequest::new("kubernetes-admin", Usage::Client).organization("system:masters")
            }
            KubeconfigKind::Kubelet => {
                CertRequest::new(format!("system:node:{}", node_id), Usage::Client)
                    .organization("system:nodes")
            }
            KubeconfigKind::ControllerManager => {
                CertRequest::new("system:kube-controller-manager", Usage::Client)
            }
            KubeconfigKind::Scheduler => CertRequest::new("system:kube-scheduler", Usage::Client),
        }
    }
}

/// Issue a client certificate and wrap it in a kubeconfig
pub fn issue(
    ca: &CertificateAuthority,
    kind: KubeconfigKind,
    node_id: &str,
    server: &str,
) -> Result<(Kubeconfig, CertPair)> {
    let request = kind.request(node_id);
    let client = ca.issue(&request)?;
    let config = Kubeconfig::for_user(server, ca.cert_pem(), &request.common_name, &client);
    Ok((config, client))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_kubeconfig() {
        let ca = CertificateAuthority::generate("kubernetes").unwrap();
        let (config, client) =
            issue(&ca, KubeconfigKind::Admin, "i-1", "https://demo-master.elb:443").unwrap();

        assert_eq!(config.current_context, "kubernetes-admin@kubernetes");
        assert_eq!(config.clusters[0].cluster.server, "https://demo-master.elb:443");
        assert_eq!(
            config.users[0].user.client_certificate_data.0,
            client.cert_pem.as_bytes()
        );

        let yaml = config.render("admin.conf").unwrap();
        assert!(yaml.contains("certificate-authority-data:"));
        assert!(yaml.contains("current-context: kubernetes-admin@kubernetes"));
        let parsed: Kubeconfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_kubelet_subject_names_the_node() {
        let request = KubeconfigKind::Kubelet.request("i-0abc");
        assert_eq!(request.common_name, "system:node:i-0abc");
        assert_eq!(request.organization.as_deref(), Some("system:nodes"));
    }

    #[test]
    fn test_cluster_only_has_no_users() {
        let yaml = Kubeconfig::cluster_only("https://lb:443", "ca")
            .render("kubeconfig")
            .unwrap();
        assert!(!yaml.contains("users"));
        assert!(!yaml.contains("current-context"));
    }
}
