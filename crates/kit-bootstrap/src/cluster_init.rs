//! Cluster-init phase: the first bootstrap token, join RBAC and cluster-info

use crate::error::{BootstrapError, Result};
use crate::kubeconfig::Kubeconfig;
use crate::pki::CertPair;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use reqwest::{Certificate, Client, Identity, StatusCode};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const NODE_BOOTSTRAP_GROUP: &str = "system:bootstrappers:kubeadm:default-node-token";
pub const CLUSTER_INFO: &str = "cluster-info";
const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

/// API server address and admin credentials for the bootstrap target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTarget {
    pub server: String,
    pub ca_pem: String,
    pub client: CertPair,
}

/// A node join token of the form `[a-z0-9]{6}.[a-z0-9]{16}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapToken {
    pub id: String,
    pub secret: String,
}

impl BootstrapToken {
    pub fn generate() -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: hex[..6].to_string(),
            secret: hex[6..22].to_string(),
        }
    }

    /// A token whose id is fixed per cluster, so applying it again replaces
    /// the same `bootstrap-token-{id}` secret. Only the secret part is random.
    pub fn for_cluster(cluster: &str) -> Self {
        let id = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, cluster.as_bytes())
            .simple()
            .to_string();
        Self {
            id: id[..6].to_string(),
            ..Self::generate()
        }
    }

    pub fn secret_name(&self) -> String {
        format!("bootstrap-token-{}", self.id)
    }
}

impl fmt::Display for BootstrapToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.id, self.secret)
    }
}

/// An object applied to the new cluster
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterObject {
    Secret(Secret),
    ConfigMap(ConfigMap),
    ClusterRole(ClusterRole),
    ClusterRoleBinding(ClusterRoleBinding),
    Role(Role),
    RoleBinding(RoleBinding),
}

fn collection<K: k8s_openapi::Resource>(namespace: Option<&str>) -> String {
    let base = if K::GROUP.is_empty() {
        format!("/api/{}", K::VERSION)
    } else {
        format!("/apis/{}/{}", K::GROUP, K::VERSION)
    };
    match namespace {
        Some(ns) => format!("{}/namespaces/{}/{}", base, ns, K::URL_PATH_SEGMENT),
        None => format!("{}/{}", base, K::URL_PATH_SEGMENT),
    }
}

impl ClusterObject {
    fn metadata(&self) -> &ObjectMeta {
        match self {
            ClusterObject::Secret(o) => &o.metadata,
            ClusterObject::ConfigMap(o) => &o.metadata,
            ClusterObject::ClusterRole(o) => &o.metadata,
            ClusterObject::ClusterRoleBinding(o) => &o.metadata,
            ClusterObject::Role(o) => &o.metadata,
            ClusterObject::RoleBinding(o) => &o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Collection URL path the object is created in
    pub fn collection_path(&self) -> String {
        let ns = self.metadata().namespace.as_deref();
        match self {
            ClusterObject::Secret(_) => collection::<Secret>(ns),
            ClusterObject::ConfigMap(_) => collection::<ConfigMap>(ns),
            ClusterObject::ClusterRole(_) => collection::<ClusterRole>(None),
            ClusterObject::ClusterRoleBinding(_) => collection::<ClusterRoleBinding>(None),
            ClusterObject::Role(_) => collection::<Role>(ns),
            ClusterObject::RoleBinding(_) => collection::<RoleBinding>(ns),
        }
    }

    /// URL path of the object itself
    pub fn path(&self) -> String {
        format!("{}/{}", self.collection_path(), self.name())
    }

    pub fn to_json(&self) -> Result<Value> {
        let value = match self {
            ClusterObject::Secret(o) => serde_json::to_value(o),
            ClusterObject::ConfigMap(o) => serde_json::to_value(o),
            ClusterObject::ClusterRole(o) => serde_json::to_value(o),
            ClusterObject::ClusterRoleBinding(o) => serde_json::to_value(o),
            ClusterObject::Role(o) => serde_json::to_value(o),
            ClusterObject::RoleBinding(o) => serde_json::to_value(o),
        };
        value.map_err(|e| BootstrapError::render_error(self.path(), e.to_string()))
    }
}

fn meta(name: &str, namespace: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        ..Default::default()
    }
}

fn group(name: &str) -> Subject {
    Subject {
        api_group: Some(RBAC_GROUP.to_string()),
        kind: "Group".to_string(),
        name: name.to_string(),
        namespace: None,
    }
}

fn cluster_role_binding(name: &str, role: &str, subject: Subject) -> ClusterObject {
    ClusterObject::ClusterRoleBinding(ClusterRoleBinding {
        metadata: meta(name, None),
        role_ref: RoleRef {
            api_group: RBAC_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: role.to_string(),
        },
        subjects: Some(vec![subject]),
    })
}

fn bootstrap_token_secret(token: &BootstrapToken, expiration: DateTime<Utc>) -> ClusterObject {
    let data = BTreeMap::from([
        ("token-id".to_string(), token.id.clone()),
        ("token-secret".to_string(), token.secret.clone()),
        (
            "expiration".to_string(),
            expiration.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
        ("usage-bootstrap-authentication".to_string(), "true".to_string()),
        ("usage-bootstrap-signing".to_string(), "true".to_string()),
        ("auth-extra-groups".to_string(), NODE_BOOTSTRAP_GROUP.to_string()),
        (
            "description".to_string(),
            "Bootstrap token generated during control plane initialization".to_string(),
        ),
    ]);

    ClusterObject::Secret(Secret {
        metadata: meta(&token.secret_name(), Some("kube-system")),
        type_: Some("bootstrap.kubernetes.io/token".to_string()),
        string_data: Some(data),
        ..Default::default()
    })
}

/// Every object the cluster-init phase applies, in order
pub fn cluster_objects(
    token: &BootstrapToken,
    expiration: DateTime<Utc>,
    server: &str,
    ca_pem: &str,
) -> Result<Vec<ClusterObject>> {
    let cluster_info = Kubeconfig::cluster_only(server, ca_pem).render("cluster-info kubeconfig")?;

    Ok(vec![
        bootstrap_token_secret(token, expiration),
        ClusterObject::ClusterRole(ClusterRole {
            metadata: meta("kubeadm:get-nodes", None),
            rules: Some(vec![PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec!["nodes".to_string()]),
                verbs: vec!["get".to_string()],
                ..Default::default()
            }]),
            ..Default::default()
        }),
        cluster_role_binding("kubeadm:get-nodes", "kubeadm:get-nodes", group(NODE_BOOTSTRAP_GROUP)),
        cluster_role_binding(
            "kubeadm:kubelet-bootstrap",
            "system:node-bootstrapper",
            group(NODE_BOOTSTRAP_GROUP),
        ),
        cluster_role_binding(
            "kubeadm:node-autoapprove-bootstrap",
            "system:certificates.k8s.io:certificatesigningrequests:nodeclient",
            group(NODE_BOOTSTRAP_GROUP),
        ),
        cluster_role_binding(
            "kubeadm:node-autoapprove-certificate-rotation",
            "system:certificates.k8s.io:certificatesigningrequests:selfnodeclient",
            group("system:nodes"),
        ),
        ClusterObject::ConfigMap(ConfigMap {
            metadata: meta(CLUSTER_INFO, Some("kube-public")),
            data: Some(BTreeMap::from([("kubeconfig".to_string(), cluster_info)])),
            ..Default::default()
        }),
        ClusterObject::Role(Role {
            metadata: meta("kubeadm:bootstrap-signer-clusterinfo", Some("kube-public")),
            rules: Some(vec![PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec!["configmaps".to_string()]),
                resource_names: Some(vec![CLUSTER_INFO.to_string()]),
                verbs: vec!["get".to_string()],
                ..Default::default()
            }]),
        }),
        ClusterObject::RoleBinding(RoleBinding {
            metadata: meta("kubeadm:bootstrap-signer-clusterinfo", Some("kube-public")),
            role_ref: RoleRef {
                api_group: RBAC_GROUP.to_string(),
                kind: "Role".to_string(),
                name: "kubeadm:bootstrap-signer-clusterinfo".to_string(),
            },
            subjects: Some(vec![Subject {
                api_group: Some(RBAC_GROUP.to_string()),
                kind: "User".to_string(),
                name: "system:anonymous".to_string(),
                namespace: None,
            }]),
        }),
    ])
}

/// Access to the API server of the cluster being bootstrapped
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Whether the API server answers its readiness endpoint
    async fn is_ready(&self, target: &ClusterTarget) -> Result<bool>;

    /// Create the object, replacing it if it already exists
    async fn apply(&self, target: &ClusterTarget, object: &ClusterObject) -> Result<()>;
}

/// Apply the cluster-init objects once the API server is up
///
/// Returns `false` without applying anything while the API server is not ready.
pub async fn initialize(
    api: &dyn ClusterApi,
    target: &ClusterTarget,
    cluster: &str,
    token_ttl: Duration,
) -> Result<bool> {
    if !api.is_ready(target).await? {
        debug!("API server {} is not ready yet", target.server);
        return Ok(false);
    }

    let ttl = chrono::Duration::from_std(token_ttl)
        .map_err(|e| BootstrapError::render_error("bootstrap token", e.to_string()))?;
    let token = BootstrapToken::for_cluster(cluster);
    let objects = cluster_objects(&token, Utc::now() + ttl, &target.server, &target.ca_pem)?;

    for object in &objects {
        api.apply(target, object).await?;
    }

    info!(
        "Initialized cluster at {} with bootstrap token {}",
        target.server, token.id
    );
    Ok(true)
}

/// reqwest client authenticating with the admin certificate
#[derive(Default)]
pub struct HttpClusterApi;

impl HttpClusterApi {
    pub fn new() -> Self {
        Self
    }

    fn client(&self, target: &ClusterTarget) -> Result<Client> {
        let err = |e: reqwest::Error| {
            BootstrapError::cluster_api_error(format!("Failed to build client: {}", e))
        };
        let ca = Certificate::from_pem(target.ca_pem.as_bytes()).map_err(err)?;
        let identity = Identity::from_pem(
            format!("{}{}", target.client.cert_pem, target.client.key_pem).as_bytes(),
        )
        .map_err(err)?;

        Client::builder()
            .use_rustls_tls()
            .add_root_certificate(ca)
            .identity(identity)
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(err)
    }
}

#[async_trait]
impl ClusterApi for HttpClusterApi {
    async fn is_ready(&self, target: &ClusterTarget) -> Result<bool> {
        let url = format!("{}/readyz", target.server.trim_end_matches('/'));
        debug!("GET {}", url);

        match self.client(target)?.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(e) => {
                debug!("API server not reachable: {}", e);
                Ok(false)
            }
        }
    }

    async fn apply(&self, target: &ClusterTarget, object: &ClusterObject) -> Result<()> {
        let client = self.client(target)?;
        let base = target.server.trim_end_matches('/');
        let body = object.to_json()?;

        let url = format!("{}{}", base, object.collection_path());
        debug!("POST {}", url);
        let resp = client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BootstrapError::cluster_api_error(format!("HTTP request failed: {}", e)))?;

        let resp = if resp.status() == StatusCode::CONFLICT {
            let url = format!("{}{}", base, object.path());
            debug!("PUT {}", url);
            client.put(&url).json(&body).send().await.map_err(|e| {
                BootstrapError::cluster_api_error(format!("HTTP request failed: {}", e))
            })?
        } else {
            resp
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BootstrapError::cluster_api_error(format!(
                "Apply {} failed with status {}: {}",
                object.path(),
                status,
                body
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
struct MockClusterState {
    ready: bool,
    objects: BTreeMap<String, Value>,
    applies: usize,
}

/// In-memory cluster API for tests and local runs
#[derive(Clone, Default)]
pub struct MockClusterApi {
    state: Arc<RwLock<MockClusterState>>,
}

impl MockClusterApi {
    /// A mock whose API server is already answering
    pub fn ready() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockClusterState {
                ready: true,
                ..Default::default()
            })),
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    /// Stored object by URL path
    pub async fn get(&self, path: &str) -> Option<Value> {
        self.state.read().await.objects.get(path).cloned()
    }

    pub async fn paths(&self) -> Vec<String> {
        self.state.read().await.objects.keys().cloned().collect()
    }

    pub async fn apply_count(&self) -> usize {
        self.state.read().await.applies
    }
}

#[async_trait]
impl ClusterApi for MockClusterApi {
    async fn is_ready(&self, _target: &ClusterTarget) -> Result<bool> {
        Ok(self.state.read().await.ready)
    }

    async fn apply(&self, _target: &ClusterTarget, object: &ClusterObject) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.ready {
            return Err(BootstrapError::cluster_api_error("connection refused"));
        }
        debug!("Mock: applied {}", object.path());
        state.objects.insert(object.path(), object.to_json()?);
        state.applies += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_target() -> ClusterTarget {
        ClusterTarget {
            server: "https://demo-master.elb:443".to_string(),
            ca_pem: "ca".to_string(),
            client: CertPair {
                cert_pem: "cert".to_string(),
                key_pem: "key".to_string(),
            },
        }
    }

    #[test]
    fn test_token_format() {
        let token = BootstrapToken::generate();
        let text = token.to_string();
        let (id, secret) = text.split_once('.').unwrap();
        assert_eq!(id.len(), 6);
        assert_eq!(secret.len(), 16);
        assert!(text
            .chars()
            .all(|c| c == '.' || c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_eq!(token.secret_name(), format!("bootstrap-token-{}", id));
    }

    #[test]
    fn test_object_paths() {
        let token = BootstrapToken {
            id: "abcdef".to_string(),
            secret: "0123456789abcdef".to_string(),
        };
        let objects = cluster_objects(&token, Utc::now(), "https://lb:443", "ca").unwrap();
        let paths: Vec<String> = objects.iter().map(ClusterObject::path).collect();

        assert_eq!(
            paths[0],
            "/api/v1/namespaces/kube-system/secrets/bootstrap-token-abcdef"
        );
        assert!(paths.contains(
            &"/apis/rbac.authorization.k8s.io/v1/clusterrolebindings/kubeadm:node-autoapprove-bootstrap"
                .to_string()
        ));
        assert!(paths.contains(&"/api/v1/namespaces/kube-public/configmaps/cluster-info".to_string()));
        assert!(paths.contains(
            &"/apis/rbac.authorization.k8s.io/v1/namespaces/kube-public/rolebindings/kubeadm:bootstrap-signer-clusterinfo"
                .to_string()
        ));
    }

    #[test]
    fn test_token_secret_content() {
        let token = BootstrapToken {
            id: "abcdef".to_string(),
            secret: "0123456789abcdef".to_string(),
        };
        let json = bootstrap_token_secret(&token, Utc::now()).to_json().unwrap();
        assert_eq!(json["type"], "bootstrap.kubernetes.io/token");
        assert_eq!(json["kind"], "Secret");
        assert_eq!(json["stringData"]["auth-extra-groups"], NODE_BOOTSTRAP_GROUP);
        assert_eq!(json["stringData"]["usage-bootstrap-signing"], "true");
    }

    #[tokio::test]
    async fn test_initialize_waits_for_api_server() {
        let api = MockClusterApi::default();
        let target = make_target();

        assert!(!initialize(&api, &target, "demo", Duration::from_secs(3600)).await.unwrap());
        assert_eq!(api.apply_count().await, 0);

        api.set_ready(true).await;
        assert!(initialize(&api, &target, "demo", Duration::from_secs(3600)).await.unwrap());
        assert_eq!(api.apply_count().await, 9);

        let cluster_info = api
            .get("/api/v1/namespaces/kube-public/configmaps/cluster-info")
            .await
            .unwrap();
        let kubeconfig = cluster_info["data"]["kubeconfig"].as_str().unwrap();
        assert!(kubeconfig.contains("server: https://demo-master.elb:443"));
    }

    #[test]
    fn test_token_id_is_stable_per_cluster() {
        let first = BootstrapToken::for_cluster("demo");
        let second = BootstrapToken::for_cluster("demo");
        assert_eq!(first.id, second.id);
        assert_eq!(first.secret_name(), second.secret_name());
        assert_ne!(first.id, BootstrapToken::for_cluster("other").id);
        assert!(first
            .to_string()
            .chars()
            .all(|c| c == '.' || c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[tokio::test]
    async fn test_retried_initialize_reuses_token_secret() {
        let api = MockClusterApi::ready();
        let target = make_target();

        assert!(initialize(&api, &target, "demo", Duration::from_secs(3600)).await.unwrap());
        assert!(initialize(&api, &target, "demo", Duration::from_secs(3600)).await.unwrap());

        let secrets: Vec<String> = api
            .paths()
            .await
            .into_iter()
            .filter(|p| p.contains("/secrets/bootstrap-token-"))
            .collect();
        assert_eq!(secrets.len(), 1);
        assert_eq!(
            secrets[0],
            format!(
                "/api/v1/namespaces/kube-system/secrets/{}",
                BootstrapToken::for_cluster("demo").secret_name()
            )
        );
    }

    #[test]
    fn test_http_client_rejects_bad_pem() {
        let err = HttpClusterApi::new().client(&make_target()).err().unwrap();
        assert!(matches!(err, BootstrapError::ClusterApiError { .. }));
    }
}
