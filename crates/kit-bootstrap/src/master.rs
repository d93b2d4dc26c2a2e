//! Master phase: cluster PKI, kubeconfigs and the control-plane static pods

use crate::config::{BootstrapConfig, API_SERVER_PORT, API_SERVICE_IP, CLUSTER_DOMAIN, SERVICE_CIDR};
use crate::distribution::Distributor;
use crate::error::{BootstrapError, Result};
use crate::etcd;
use crate::files::{path_in, NodeFiles, ETCD_PKI_DIR, KUBERNETES_DIR, MANIFESTS_DIR, PKI_DIR};
use crate::kubeconfig::{self, KubeconfigKind};
use crate::kubelet;
use crate::manifest::{merge_args, Args, HostMount, LivenessCheck, StaticPod};
use crate::nodes::Node;
use crate::pki::{CertPair, CertRequest, CertificateAuthority, ServiceAccountKey, Usage};
use kit_core::resources::control_plane::ComponentConfig;
use kit_core::ControlPlaneSpec;
use tracing::{debug, info};

/// Cluster-wide signing material shared by every master
pub struct ClusterPki {
    pub ca: CertificateAuthority,
    pub front_proxy_ca: CertificateAuthority,
    pub service_account: ServiceAccountKey,
    pub etcd_ca_pem: String,
    pub etcd_client: CertPair,
}

fn pki(name: &str) -> String {
    path_in(PKI_DIR, name)
}

/// Path of a kubeconfig on a master
pub fn kubeconfig_path(kind: KubeconfigKind) -> String {
    path_in(KUBERNETES_DIR, kind.file_name())
}

pub fn api_server_url(host: &str) -> String {
    format!("https://{}:{}", host, API_SERVER_PORT)
}

/// Names the API server certificate must be valid for
pub fn api_server_sans(node: &Node, load_balancer: &str) -> Vec<String> {
    vec![
        load_balancer.to_string(),
        node.ip.clone(),
        node.id.clone(),
        "kubernetes".to_string(),
        "kubernetes.default".to_string(),
        "kubernetes.default.svc".to_string(),
        format!("kubernetes.default.svc.{}", CLUSTER_DOMAIN),
        API_SERVICE_IP.to_string(),
    ]
}

async fn load_or_generate_ca(
    distributor: &Distributor,
    node: &str,
    base: &str,
    common_name: &str,
) -> Result<CertificateAuthority> {
    let cert = distributor.fetch_text(node, &pki(&format!("{}.crt", base))).await?;
    let key = distributor.fetch_text(node, &pki(&format!("{}.key", base))).await?;
    match (cert, key) {
        (Some(cert), Some(key)) => {
            debug!("Reusing {} staged on {}", base, node);
            CertificateAuthority::from_pem(base, &cert, &key)
        }
        _ => CertificateAuthority::generate(common_name),
    }
}

async fn required_text(distributor: &Distributor, node: &str, path: &str) -> Result<String> {
    distributor
        .fetch_text(node, path)
        .await?
        .ok_or_else(|| BootstrapError::missing_material(distributor.key(node, path)))
}

impl ClusterPki {
    /// Reuse authorities staged on the first master and pick up the etcd
    /// client material staged on the first etcd member
    pub async fn load(
        distributor: &Distributor,
        first_master: &Node,
        first_etcd: &Node,
    ) -> Result<Self> {
        let ca = load_or_generate_ca(distributor, &first_master.id, "ca", "kubernetes").await?;
        let front_proxy_ca =
            load_or_generate_ca(distributor, &first_master.id, "front-proxy-ca", "front-proxy-ca")
                .await?;
        let service_account = match distributor.fetch_text(&first_master.id, &pki("sa.key")).await? {
            Some(private_pem) => ServiceAccountKey::from_pem(&private_pem)?,
            None => ServiceAccountKey::generate()?,
        };

        let etcd_ca_pem = required_text(distributor, &first_etcd.id, &etcd::ca_cert_path()).await?;
        let etcd_client = CertPair {
            cert_pem: required_text(
                distributor,
                &first_etcd.id,
                &path_in(ETCD_PKI_DIR, "apiserver-etcd-client.crt"),
            )
            .await?,
            key_pem: required_text(
                distributor,
                &first_etcd.id,
                &path_in(ETCD_PKI_DIR, "apiserver-etcd-client.key"),
            )
            .await?,
        };

        Ok(Self {
            ca,
            front_proxy_ca,
            service_account,
            etcd_ca_pem,
            etcd_client,
        })
    }
}

fn overrides(component: Option<&ComponentConfig>) -> (Args, Option<String>) {
    component
        .map(|c| (c.args.clone(), c.image.clone()))
        .unwrap_or_default()
}

fn image(config: &BootstrapConfig, spec: &ControlPlaneSpec, binary: &str, custom: Option<String>) -> String {
    custom.unwrap_or_else(|| config.component_image(spec, binary))
}

fn cert_mounts() -> Vec<HostMount> {
    vec![
        HostMount::directory("k8s-certs", PKI_DIR, true),
        HostMount::directory("ca-certs", "/etc/ssl/certs", true),
        HostMount::directory("etc-pki", "/etc/pki", true),
    ]
}

pub fn api_server_pod(
    config: &BootstrapConfig,
    spec: &ControlPlaneSpec,
    etcd_nodes: &[Node],
    node: &Node,
) -> StaticPod {
    let defaults = Args::from([
        ("advertise-address".to_string(), node.ip.clone()),
        ("secure-port".to_string(), API_SERVER_PORT.to_string()),
        ("allow-privileged".to_string(), "true".to_string()),
        ("authorization-mode".to_string(), "Node,RBAC".to_string()),
        ("client-ca-file".to_string(), pki("ca.crt")),
        ("enable-admission-plugins".to_string(), "NodeRestriction".to_string()),
        ("enable-bootstrap-token-auth".to_string(), "true".to_string()),
        ("etcd-servers".to_string(), etcd::client_endpoints(etcd_nodes)),
        ("etcd-cafile".to_string(), path_in(ETCD_PKI_DIR, "ca.crt")),
        ("etcd-certfile".to_string(), pki("apiserver-etcd-client.crt")),
        ("etcd-keyfile".to_string(), pki("apiserver-etcd-client.key")),
        ("insecure-port".to_string(), "0".to_string()),
        ("kubelet-client-certificate".to_string(), pki("apiserver-kubelet-client.crt")),
        ("kubelet-client-key".to_string(), pki("apiserver-kubelet-client.key")),
        (
            "kubelet-preferred-address-types".to_string(),
            "InternalIP,ExternalIP,Hostname".to_string(),
        ),
        ("proxy-client-cert-file".to_string(), pki("front-proxy-client.crt")),
        ("proxy-client-key-file".to_string(), pki("front-proxy-client.key")),
        ("requestheader-allowed-names".to_string(), "front-proxy-client".to_string()),
        ("requestheader-client-ca-file".to_string(), pki("front-proxy-ca.crt")),
        ("requestheader-extra-headers-prefix".to_string(), "X-Remote-Extra-".to_string()),
        ("requestheader-group-headers".to_string(), "X-Remote-Group".to_string()),
        ("requestheader-username-headers".to_string(), "X-Remote-User".to_string()),
        ("service-account-key-file".to_string(), pki("sa.pub")),
        ("service-cluster-ip-range".to_string(), SERVICE_CIDR.to_string()),
        ("tls-cert-file".to_string(), pki("apiserver.crt")),
        ("tls-private-key-file".to_string(), pki("apiserver.key")),
    ]);
    let (user_args, custom_image) = overrides(spec.master.api_server.as_ref());

    StaticPod {
        name: "kube-apiserver".to_string(),
        image: image(config, spec, "kube-apiserver", custom_image),
        binary: "kube-apiserver".to_string(),
        args: merge_args(defaults, &user_args),
        mounts: cert_mounts(),
        liveness: Some(LivenessCheck {
            host: node.ip.clone(),
            port: i32::from(API_SERVER_PORT),
            path: "/livez".to_string(),
            scheme: "HTTPS".to_string(),
        }),
        cpu_request: "250m".to_string(),
    }
}

pub fn controller_manager_pod(
    config: &BootstrapConfig,
    spec: &ControlPlaneSpec,
    cluster: &str,
) -> StaticPod {
    let kubeconfig = kubeconfig_path(KubeconfigKind::ControllerManager);
    let defaults = Args::from([
        ("authentication-kubeconfig".to_string(), kubeconfig.clone()),
        ("authorization-kubeconfig".to_string(), kubeconfig.clone()),
        ("kubeconfig".to_string(), kubeconfig.clone()),
        ("bind-address".to_string(), "127.0.0.1".to_string()),
        ("client-ca-file".to_string(), pki("ca.crt")),
        ("cluster-name".to_string(), cluster.to_string()),
        ("cluster-signing-cert-file".to_string(), pki("ca.crt")),
        ("cluster-signing-key-file".to_string(), pki("ca.key")),
        ("controllers".to_string(), "*,bootstrapsigner,tokencleaner".to_string()),
        ("leader-elect".to_string(), "true".to_string()),
        ("port".to_string(), "0".to_string()),
        ("requestheader-client-ca-file".to_string(), pki("front-proxy-ca.crt")),
        ("root-ca-file".to_string(), pki("ca.crt")),
        ("service-account-private-key-file".to_string(), pki("sa.key")),
        ("use-service-account-credentials".to_string(), "true".to_string()),
    ]);
    let (user_args, custom_image) = overrides(spec.master.controller_manager.as_ref());

    let mut mounts = cert_mounts();
    mounts.push(HostMount::file("kubeconfig", &kubeconfig));

    StaticPod {
        name: "kube-controller-manager".to_string(),
        image: image(config, spec, "kube-controller-manager", custom_image),
        binary: "kube-controller-manager".to_string(),
        args: merge_args(defaults, &user_args),
        mounts,
        liveness: Some(LivenessCheck {
            host: "127.0.0.1".to_string(),
            port: 10257,
            path: "/healthz".to_string(),
            scheme: "HTTPS".to_string(),
        }),
        cpu_request: "200m".to_string(),
    }
}

pub fn scheduler_pod(config: &BootstrapConfig, spec: &ControlPlaneSpec) -> StaticPod {
    let kubeconfig = kubeconfig_path(KubeconfigKind::Scheduler);
    let defaults = Args::from([
        ("authentication-kubeconfig".to_string(), kubeconfig.clone()),
        ("authorization-kubeconfig".to_string(), kubeconfig.clone()),
        ("kubeconfig".to_string(), kubeconfig.clone()),
        ("bind-address".to_string(), "127.0.0.1".to_string()),
        ("leader-elect".to_string(), "true".to_string()),
        ("port".to_string(), "0".to_string()),
    ]);
    let (user_args, custom_image) = overrides(spec.master.scheduler.as_ref());

    StaticPod {
        name: "kube-scheduler".to_string(),
        image: image(config, spec, "kube-scheduler", custom_image),
        binary: "kube-scheduler".to_string(),
        args: merge_args(defaults, &user_args),
        mounts: vec![HostMount::file("kubeconfig", &kubeconfig)],
        liveness: Some(LivenessCheck {
            host: "127.0.0.1".to_string(),
            port: 10259,
            path: "/healthz".to_string(),
            scheme: "HTTPS".to_string(),
        }),
        cpu_request: "100m".to_string(),
    }
}

/// Everything one master needs on disk
#[allow(clippy::too_many_arguments)]
pub fn render_node(
    config: &BootstrapConfig,
    spec: &ControlPlaneSpec,
    cluster: &str,
    shared: &ClusterPki,
    etcd_nodes: &[Node],
    node: &Node,
    load_balancer: &str,
) -> Result<NodeFiles> {
    let mut files = NodeFiles::new();

    files.insert(pki("ca.crt"), shared.ca.cert_pem());
    files.insert(pki("ca.key"), shared.ca.key_pem());
    files.insert(pki("front-proxy-ca.crt"), shared.front_proxy_ca.cert_pem());
    files.insert(pki("front-proxy-ca.key"), shared.front_proxy_ca.key_pem());
    files.insert(pki("sa.key"), shared.service_account.private_pem.clone());
    files.insert(pki("sa.pub"), shared.service_account.public_pem.clone());
    files.insert(path_in(ETCD_PKI_DIR, "ca.crt"), shared.etcd_ca_pem.clone());
    files.insert_pair(PKI_DIR, "apiserver-etcd-client", &shared.etcd_client);

    let api_server = shared.ca.issue(
        &CertRequest::new("kube-apiserver", Usage::Server).sans(api_server_sans(node, load_balancer)),
    )?;
    files.insert_pair(PKI_DIR, "apiserver", &api_server);

    let kubelet_client = shared.ca.issue(
        &CertRequest::new("kube-apiserver-kubelet-client", Usage::Client)
            .organization("system:masters"),
    )?;
    files.insert_pair(PKI_DIR, "apiserver-kubelet-client", &kubelet_client);

    let front_proxy_client = shared
        .front_proxy_ca
        .issue(&CertRequest::new("front-proxy-client", Usage::Client))?;
    files.insert_pair(PKI_DIR, "front-proxy-client", &front_proxy_client);

    let external = api_server_url(load_balancer);
    let local = api_server_url(&node.ip);
    for kind in KubeconfigKind::ALL {
        let server = match kind {
            KubeconfigKind::Admin | KubeconfigKind::Kubelet => &external,
            KubeconfigKind::ControllerManager | KubeconfigKind::Scheduler => &local,
        };
        let (config, _) = kubeconfig::issue(&shared.ca, kind, &node.id, server)?;
        files.insert(kubeconfig_path(kind), config.render(kind.file_name())?);
    }

    for pod in [
        api_server_pod(config, spec, etcd_nodes, node),
        controller_manager_pod(config, spec, cluster),
        scheduler_pod(config, spec),
    ] {
        files.insert(path_in(MANIFESTS_DIR, &pod.file_name()), pod.render()?);
    }

    kubelet::stage_master(&mut files)?;
    Ok(files)
}

/// Generate and upload material for every master
pub async fn stage(
    config: &BootstrapConfig,
    spec: &ControlPlaneSpec,
    cluster: &str,
    distributor: &Distributor,
    masters: &[Node],
    etcd_nodes: &[Node],
    load_balancer: &str,
) -> Result<()> {
    let (Some(first_master), Some(first_etcd)) = (masters.first(), etcd_nodes.first()) else {
        return Ok(());
    };
    let shared = ClusterPki::load(distributor, first_master, first_etcd).await?;

    for node in masters {
        let files = render_node(config, spec, cluster, &shared, etcd_nodes, node, load_balancer)?;
        distributor.upload(&node.id, &files).await?;
    }

    info!("Staged master material for {} nodes", masters.len());
    Ok(())
}
