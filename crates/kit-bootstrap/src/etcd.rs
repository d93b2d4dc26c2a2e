//! ETCD phase: etcd CA, per-member certificates and the etcd static pod

use crate::config::{BootstrapConfig, ETCD_CLIENT_PORT, ETCD_PEER_PORT};
use crate::distribution::Distributor;
use crate::error::Result;
use crate::files::{path_in, NodeFiles, ETCD_PKI_DIR, MANIFESTS_DIR};
use crate::kubelet;
use crate::manifest::{merge_args, Args, HostMount, LivenessCheck, StaticPod};
use crate::nodes::Node;
use crate::pki::{CertRequest, CertificateAuthority, Usage};
use kit_core::ControlPlaneSpec;
use tracing::{debug, info};

pub const ETCD_DATA_DIR: &str = "/var/lib/etcd";
const METRICS_PORT: u16 = 2381;

/// Staged paths other phases read back
pub fn ca_cert_path() -> String {
    path_in(ETCD_PKI_DIR, "ca.crt")
}

pub fn ca_key_path() -> String {
    path_in(ETCD_PKI_DIR, "ca.key")
}

/// `id=https://ip:2380,...` in node order
pub fn initial_cluster(nodes: &[Node]) -> String {
    nodes
        .iter()
        .map(|n| format!("{}=https://{}:{}", n.id, n.ip, ETCD_PEER_PORT))
        .collect::<Vec<_>>()
        .join(",")
}

/// Client endpoints the API servers connect to
pub fn client_endpoints(nodes: &[Node]) -> String {
    nodes
        .iter()
        .map(|n| format!("https://{}:{}", n.ip, ETCD_CLIENT_PORT))
        .collect::<Vec<_>>()
        .join(",")
}

/// The etcd static pod for one member
pub fn etcd_pod(
    config: &BootstrapConfig,
    spec: &ControlPlaneSpec,
    nodes: &[Node],
    node: &Node,
) -> StaticPod {
    let pki = |name: &str| path_in(ETCD_PKI_DIR, name);
    let peer_url = format!("https://{}:{}", node.ip, ETCD_PEER_PORT);
    let client_url = format!("https://{}:{}", node.ip, ETCD_CLIENT_PORT);

    let defaults = Args::from([
        ("name".to_string(), node.id.clone()),
        ("data-dir".to_string(), ETCD_DATA_DIR.to_string()),
        ("initial-cluster".to_string(), initial_cluster(nodes)),
        ("initial-cluster-state".to_string(), "new".to_string()),
        ("initial-advertise-peer-urls".to_string(), peer_url.clone()),
        ("listen-peer-urls".to_string(), peer_url),
        ("advertise-client-urls".to_string(), client_url.clone()),
        (
            "listen-client-urls".to_string(),
            format!("https://127.0.0.1:{},{}", ETCD_CLIENT_PORT, client_url),
        ),
        (
            "listen-metrics-urls".to_string(),
            format!("http://127.0.0.1:{}", METRICS_PORT),
        ),
        ("client-cert-auth".to_string(), "true".to_string()),
        ("cert-file".to_string(), pki("server.crt")),
        ("key-file".to_string(), pki("server.key")),
        ("trusted-ca-file".to_string(), pki("ca.crt")),
        ("peer-client-cert-auth".to_string(), "true".to_string()),
        ("peer-cert-file".to_string(), pki("peer.crt")),
        ("peer-key-file".to_string(), pki("peer.key")),
        ("peer-trusted-ca-file".to_string(), pki("ca.crt")),
        ("snapshot-count".to_string(), "10000".to_string()),
    ]);

    StaticPod {
        name: "etcd".to_string(),
        image: config.etcd_image_for(spec).to_string(),
        binary: "etcd".to_string(),
        args: merge_args(defaults, &spec.etcd.args),
        mounts: vec![
            HostMount::directory("etcd-data", ETCD_DATA_DIR, false),
            HostMount::directory("etcd-certs", ETCD_PKI_DIR, true),
        ],
        liveness: Some(LivenessCheck {
            host: "127.0.0.1".to_string(),
            port: i32::from(METRICS_PORT),
            path: "/health".to_string(),
            scheme: "HTTP".to_string(),
        }),
        cpu_request: "100m".to_string(),
    }
}

/// Everything one etcd member needs on disk
pub fn render_node(
    config: &BootstrapConfig,
    spec: &ControlPlaneSpec,
    ca: &CertificateAuthority,
    nodes: &[Node],
    node: &Node,
    load_balancer: &str,
) -> Result<NodeFiles> {
    let mut files = NodeFiles::new();
    files.insert(ca_cert_path(), ca.cert_pem());
    files.insert(ca_key_path(), ca.key_pem());

    let member_sans = [
        node.ip.as_str(),
        node.id.as_str(),
        "localhost",
        "127.0.0.1",
        load_balancer,
    ];

    let server = ca.issue(
        &CertRequest::new(node.id.clone(), Usage::ServerAndClient).sans(member_sans),
    )?;
    files.insert_pair(ETCD_PKI_DIR, "server", &server);

    let peer = ca.issue(
        &CertRequest::new(node.id.clone(), Usage::ServerAndClient).sans(member_sans),
    )?;
    files.insert_pair(ETCD_PKI_DIR, "peer", &peer);

    let healthcheck = ca.issue(
        &CertRequest::new("kube-etcd-healthcheck-client", Usage::Client)
            .organization("system:masters"),
    )?;
    files.insert_pair(ETCD_PKI_DIR, "healthcheck-client", &healthcheck);

    let apiserver_client = ca.issue(
        &CertRequest::new("kube-apiserver-etcd-client", Usage::Client)
            .organization("system:masters"),
    )?;
    files.insert_pair(ETCD_PKI_DIR, "apiserver-etcd-client", &apiserver_client);

    let pod = etcd_pod(config, spec, nodes, node);
    files.insert(path_in(MANIFESTS_DIR, &pod.file_name()), pod.render()?);

    kubelet::stage_etcd(&mut files)?;
    Ok(files)
}

/// Load the etcd CA staged on the first member, or mint a new one
pub async fn load_or_generate_ca(
    distributor: &Distributor,
    first: &Node,
) -> Result<CertificateAuthority> {
    let cert = distributor.fetch_text(&first.id, &ca_cert_path()).await?;
    let key = distributor.fetch_text(&first.id, &ca_key_path()).await?;
    match (cert, key) {
        (Some(cert), Some(key)) => {
            debug!("Reusing etcd CA staged on {}", first.id);
            CertificateAuthority::from_pem("etcd-ca", &cert, &key)
        }
        _ => CertificateAuthority::generate("etcd-ca"),
    }
}

/// Generate and upload material for every etcd member
pub async fn stage(
    config: &BootstrapConfig,
    spec: &ControlPlaneSpec,
    distributor: &Distributor,
    nodes: &[Node],
    load_balancer: &str,
) -> Result<()> {
    let Some(first) = nodes.first() else {
        return Ok(());
    };
    let ca = load_or_generate_ca(distributor, first).await?;

    for node in nodes {
        let files = render_node(config, spec, &ca, nodes, node, load_balancer)?;
        distributor.upload(&node.id, &files).await?;
    }

    info!("Staged etcd material for {} members", nodes.len());
    Ok(())
}
