use crate::cluster_init::{self, ClusterApi, ClusterTarget};
use crate::config::BootstrapConfig;
use crate::distribution::Distributor;
use crate::error::{BootstrapError, Result};
use crate::etcd;
use crate::kubeconfig::{Kubeconfig, KubeconfigKind};
use crate::master;
use crate::nodes::{self, Node};
use crate::pki::CertPair;
use kit_cloud::{ComputeApi, ObjectStorageApi};
use kit_core::resources::control_plane::{BootstrapProgress, Infrastructure};
use kit_core::{Component, ControlPlaneSpec};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Where a bootstrap pass stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Fewer nodes of a role are running than the cluster expects
    WaitingForNodes { role: Component, expected: usize },
    /// Masters are staged but the API server does not answer yet
    WaitingForApiServer,
    Complete,
}

impl BootstrapOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, BootstrapOutcome::Complete)
    }

    /// Condition reason for this outcome
    pub fn reason(&self) -> &'static str {
        match self {
            BootstrapOutcome::WaitingForNodes { .. } => "WaitingForNodes",
            BootstrapOutcome::WaitingForApiServer => "WaitingForApiServer",
            BootstrapOutcome::Complete => "Complete",
        }
    }
}

impl fmt::Display for BootstrapOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapOutcome::WaitingForNodes { role, expected } => {
                write!(f, "waiting for {} {} nodes", expected, role)
            }
            BootstrapOutcome::WaitingForApiServer => f.write_str("waiting for the API server"),
            BootstrapOutcome::Complete => f.write_str("complete"),
        }
    }
}

/// Drives a provisioned control plane through the ETCD, master and
/// cluster-init phases
///
/// Each pass re-discovers nodes and skips phases already recorded in the
/// progress flags. The caller persists the flags.
#[derive(Clone)]
pub struct BootstrapSequencer {
    config: BootstrapConfig,
    compute: Arc<dyn ComputeApi>,
    storage: Arc<dyn ObjectStorageApi>,
    cluster_api: Arc<dyn ClusterApi>,
}

fn load_balancer<'a>(infra: &'a Infrastructure, component: Component) -> Result<&'a str> {
    infra
        .load_balancers
        .get(component.as_str())
        .map(String::as_str)
        .ok_or_else(|| BootstrapError::missing_handle(format!("loadBalancers.{}", component)))
}

impl BootstrapSequencer {
    pub fn new(
        config: BootstrapConfig,
        compute: Arc<dyn ComputeApi>,
        storage: Arc<dyn ObjectStorageApi>,
        cluster_api: Arc<dyn ClusterApi>,
    ) -> Self {
        Self {
            config,
            compute,
            storage,
            cluster_api,
        }
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Run every phase whose preconditions hold
    pub async fn run(
        &self,
        cluster: &str,
        spec: &ControlPlaneSpec,
        infra: &Infrastructure,
        progress: &mut BootstrapProgress,
    ) -> Result<BootstrapOutcome> {
        if progress.cluster_initialized {
            return Ok(BootstrapOutcome::Complete);
        }

        let etcd_lb = load_balancer(infra, Component::Etcd)?;
        let master_lb = load_balancer(infra, Component::Master)?;
        let distributor = Distributor::new(self.storage.clone(), cluster);

        let expected = self.config.expected_nodes(spec, Component::Etcd);
        let Some(etcd_nodes) =
            nodes::discover(self.compute.as_ref(), cluster, Component::Etcd, expected).await?
        else {
            return Ok(BootstrapOutcome::WaitingForNodes {
                role: Component::Etcd,
                expected,
            });
        };
        if !progress.etcd_staged {
            etcd::stage(&self.config, spec, &distributor, &etcd_nodes, etcd_lb).await?;
            progress.etcd_staged = true;
        }

        let expected = self.config.expected_nodes(spec, Component::Master);
        let Some(masters) =
            nodes::discover(self.compute.as_ref(), cluster, Component::Master, expected).await?
        else {
            return Ok(BootstrapOutcome::WaitingForNodes {
                role: Component::Master,
                expected,
            });
        };
        if !progress.masters_staged {
            master::stage(
                &self.config,
                spec,
                cluster,
                &distributor,
                &masters,
                &etcd_nodes,
                master_lb,
            )
            .await?;
            progress.masters_staged = true;
        }

        let target = self.cluster_target(&distributor, &masters).await?;
        if !cluster_init::initialize(
            self.cluster_api.as_ref(),
            &target,
            cluster,
            self.config.token_ttl,
        )
        .await?
        {
            return Ok(BootstrapOutcome::WaitingForApiServer);
        }
        progress.cluster_initialized = true;

        info!("Cluster {} bootstrapped", cluster);
        Ok(BootstrapOutcome::Complete)
    }

    /// The first master's admin kubeconfig as a bootstrap target
    async fn cluster_target(&self, distributor: &Distributor, masters: &[Node]) -> Result<ClusterTarget> {
        let first = masters
            .first()
            .ok_or_else(|| BootstrapError::missing_handle("master nodes"))?;
        let path = master::kubeconfig_path(KubeconfigKind::Admin);
        let text = distributor
            .fetch_text(&first.id, &path)
            .await?
            .ok_or_else(|| BootstrapError::missing_material(distributor.key(&first.id, &path)))?;
        let admin: Kubeconfig = serde_yaml::from_str(&text)
            .map_err(|e| BootstrapError::invalid_material(&path, e.to_string()))?;

        let (Some(cluster), Some(user)) = (admin.clusters.first(), admin.users.first()) else {
            return Err(BootstrapError::invalid_material(&path, "no cluster or user entry"));
        };
        let utf8 = |bytes: &[u8]| {
            String::from_utf8(bytes.to_vec())
                .map_err(|e| BootstrapError::invalid_material(&path, e.to_string()))
        };

        debug!("Using {} on {} as bootstrap target", path, first.id);
        Ok(ClusterTarget {
            server: cluster.cluster.server.clone(),
            ca_pem: utf8(&cluster.cluster.certificate_authority_data.0)?,
            client: CertPair {
                cert_pem: utf8(&user.user.client_certificate_data.0)?,
                key_pem: utf8(&user.user.client_key_data.0)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_init::MockClusterApi;
    use kit_cloud::model::InstanceState;
    use kit_cloud::{owned_tags, MockCloud};
    use kit_core::naming::node_tag;

    struct Fixture {
        cloud: Arc<MockCloud>,
        cluster_api: MockClusterApi,
        sequencer: BootstrapSequencer,
        infra: Infrastructure,
    }

    async fn make_fixture() -> Fixture {
        let cloud = Arc::new(MockCloud::new());
        cloud
            .create_bucket("kit-demo", owned_tags("demo", "kit-demo", None))
            .await
            .unwrap();
        let cluster_api = MockClusterApi::default();
        let sequencer = BootstrapSequencer::new(
            BootstrapConfig::default(),
            cloud.clone(),
            cloud.clone(),
            Arc::new(cluster_api.clone()),
        );

        let mut infra = Infrastructure::default();
        infra
            .load_balancers
            .insert("etcd".to_string(), "demo-etcd.elb".to_string());
        infra
            .load_balancers
            .insert("master".to_string(), "demo-master.elb".to_string());

        Fixture {
            cloud,
            cluster_api,
            sequencer,
            infra,
        }
    }

    async fn make_nodes(cloud: &MockCloud, role: Component, count: usize) {
        for _ in 0..count {
            cloud
                .add_instance(
                    owned_tags("demo", &node_tag("demo", role.as_str()), Some(role.as_str())),
                    InstanceState::Running,
                )
                .await;
        }
    }

    #[tokio::test]
    async fn test_missing_load_balancer_handle() {
        let fixture = make_fixture().await;
        let mut progress = BootstrapProgress::default();

        let err = fixture
            .sequencer
            .run("demo", &ControlPlaneSpec::default(), &Infrastructure::default(), &mut progress)
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::MissingHandle { .. }));
    }

    #[tokio::test]
    async fn test_waits_for_etcd_nodes() {
        let fixture = make_fixture().await;
        make_nodes(&fixture.cloud, Component::Etcd, 2).await;
        let mut progress = BootstrapProgress::default();

        let outcome = fixture
            .sequencer
            .run("demo", &ControlPlaneSpec::default(), &fixture.infra, &mut progress)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            BootstrapOutcome::WaitingForNodes {
                role: Component::Etcd,
                expected: 3
            }
        );
        assert_eq!(progress, BootstrapProgress::default());
    }

    #[tokio::test]
    async fn test_phases_advance_as_preconditions_hold() {
        let fixture = make_fixture().await;
        let spec = ControlPlaneSpec::default();
        let mut progress = BootstrapProgress::default();
        make_nodes(&fixture.cloud, Component::Etcd, 3).await;

        let outcome = fixture
            .sequencer
            .run("demo", &spec, &fixture.infra, &mut progress)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            BootstrapOutcome::WaitingForNodes {
                role: Component::Master,
                ..
            }
        ));
        assert!(progress.etcd_staged);
        assert!(!progress.masters_staged);

        make_nodes(&fixture.cloud, Component::Master, 3).await;
        let outcome = fixture
            .sequencer
            .run("demo", &spec, &fixture.infra, &mut progress)
            .await
            .unwrap();
        assert_eq!(outcome, BootstrapOutcome::WaitingForApiServer);
        assert!(progress.masters_staged);

        let puts = fixture.cloud.calls("PutObject").await;
        fixture.cluster_api.set_ready(true).await;
        let outcome = fixture
            .sequencer
            .run("demo", &spec, &fixture.infra, &mut progress)
            .await
            .unwrap();
        assert!(outcome.is_complete());
        assert!(progress.cluster_initialized);
        // staged phases are not repeated
        assert_eq!(fixture.cloud.calls("PutObject").await, puts);

        let applies = fixture.cluster_api.apply_count().await;
        let outcome = fixture
            .sequencer
            .run("demo", &spec, &fixture.infra, &mut progress)
            .await
            .unwrap();
        assert!(outcome.is_complete());
        assert_eq!(fixture.cluster_api.apply_count().await, applies);
    }

    #[tokio::test]
    async fn test_extra_etcd_node_fails() {
        let fixture = make_fixture().await;
        make_nodes(&fixture.cloud, Component::Etcd, 4).await;
        let mut progress = BootstrapProgress::default();

        let err = fixture
            .sequencer
            .run("demo", &ControlPlaneSpec::default(), &fixture.infra, &mut progress)
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::NodeCardinality { .. }));
        assert!(!progress.etcd_staged);
    }
}
