//! Resource controllers, one per cloud object family, plus the
//! control-plane pipeline that creates their records

pub mod auto_scaling_group;
pub mod bucket;
pub mod control_plane;
pub mod elastic_ip;
pub mod instance_profile;
pub mod internet_gateway;
pub mod launch_template;
pub mod load_balancer;
pub mod nat_gateway;
pub mod policy;
pub mod role;
pub mod route_table;
pub mod security_group;
pub mod subnet;
pub mod target_group;
pub mod vpc;

pub use auto_scaling_group::AutoScalingGroupController;
pub use bucket::BucketController;
pub use control_plane::{ControlPlaneController, Stage};
pub use elastic_ip::ElasticIpController;
pub use instance_profile::InstanceProfileController;
pub use internet_gateway::InternetGatewayController;
pub use launch_template::LaunchTemplateController;
pub use load_balancer::LoadBalancerController;
pub use nat_gateway::NatGatewayController;
pub use policy::PolicyController;
pub use role::RoleController;
pub use route_table::RouteTableController;
pub use security_group::SecurityGroupController;
pub use subnet::SubnetController;
pub use target_group::TargetGroupController;
pub use vpc::VpcController;

use crate::config::ProvisioningDefaults;
use crate::error::{ReconcileError, Result};
use kit_cloud::CloudClients;
use kit_core::resources::control_plane::Infrastructure;
use kit_core::{ControlPlane, ControlPlaneSpec, Object, Spec};
use kit_storage::StateStore;
use serde_json::{json, Value};
use tracing::debug;

/// Shared handles every resource controller is built with
#[derive(Clone)]
pub struct Context {
    pub store: StateStore,
    pub clouds: CloudClients,
    pub defaults: ProvisioningDefaults,
}

impl Context {
    pub fn new(store: StateStore, clouds: CloudClients, defaults: ProvisioningDefaults) -> Self {
        Self {
            store,
            clouds,
            defaults,
        }
    }

    /// Handles published so far into the owning ControlPlane
    pub fn infrastructure<S: Spec>(&self, object: &Object<S>) -> Result<Infrastructure> {
        Ok(self
            .store
            .get::<ControlPlaneSpec>(object.namespace(), object.cluster_name())?
            .map(|cp| cp.status.infrastructure)
            .unwrap_or_default())
    }

    /// Merge `handles` into the owning ControlPlane's infrastructure status.
    ///
    /// A ControlPlane that is already gone is not an error; its handles no
    /// longer matter.
    pub fn publish<S: Spec>(&self, object: &Object<S>, handles: Value) -> Result<()> {
        let key = ControlPlane::key_for(object.namespace(), object.cluster_name());
        match self
            .store
            .patch_status(&key, &json!({ "infrastructure": handles }))
        {
            Ok(true) => {
                debug!("{} published {}", object.key(), handles);
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("{} has no ControlPlane to publish into", object.key());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Error for a handle the record needs but nobody has published yet
pub(crate) fn not_ready<S: Spec>(object: &Object<S>, dependency: &str) -> ReconcileError {
    ReconcileError::dependency_not_ready(object.key().to_string(), dependency)
}

/// Require a published handle
pub(crate) fn require<'a, S: Spec>(
    object: &Object<S>,
    handle: Option<&'a String>,
    dependency: &str,
) -> Result<&'a str> {
    handle
        .map(String::as_str)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| not_ready(object, dependency))
}

/// The single discovered object, or none; more is a cardinality violation
pub(crate) fn at_most_one<T>(kind: &str, cluster: &str, mut found: Vec<T>) -> Result<Option<T>> {
    if found.len() > 1 {
        return Err(ReconcileError::cardinality_violation(
            kind,
            cluster,
            1,
            found.len(),
        ));
    }
    Ok(found.pop())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use kit_cloud::MockCloud;
    use kit_storage::RedbBackend;
    use std::sync::Arc;

    pub const AMI_ID: &str = "ami-0123456789abcdef0";

    pub struct Fixture {
        pub cloud: Arc<MockCloud>,
        pub ctx: Context,
    }

    /// Store with a `demo` ControlPlane in `default`, and an empty mock cloud
    pub async fn make_fixture() -> Fixture {
        let store = StateStore::new(Arc::new(RedbBackend::in_memory().unwrap()), 256);
        store
            .create(ControlPlane::new(
                "default",
                "demo",
                ControlPlaneSpec::default(),
            ))
            .unwrap();

        let cloud = Arc::new(MockCloud::new());
        let defaults = ProvisioningDefaults::default();
        cloud.set_parameter(&defaults.ami_parameter, AMI_ID).await;

        Fixture {
            ctx: Context::new(store, CloudClients::mock(cloud.clone()), defaults),
            cloud,
        }
    }

    impl Fixture {
        pub fn infrastructure(&self) -> Infrastructure {
            self.ctx
                .store
                .get::<ControlPlaneSpec>("default", "demo")
                .unwrap()
                .unwrap()
                .status
                .infrastructure
        }

        pub fn publish(&self, handles: Value) {
            self.ctx
                .store
                .patch_status(
                    &ControlPlane::key_for("default", "demo"),
                    &json!({ "infrastructure": handles }),
                )
                .unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use kit_core::resources::{Vpc, VpcSpec};

    fn make_vpc() -> Vpc {
        Vpc::new(
            "default",
            "demo",
            VpcSpec {
                cluster_name: "demo".to_string(),
                cidr: "10.0.0.0/16".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_publish_merges_into_control_plane() {
        let fixture = make_fixture().await;
        let vpc = make_vpc();

        fixture
            .ctx
            .publish(&vpc, json!({ "vpcId": "vpc-1" }))
            .unwrap();
        fixture
            .ctx
            .publish(&vpc, json!({ "securityGroups": { "master": "sg-1" } }))
            .unwrap();

        let infra = fixture.ctx.infrastructure(&vpc).unwrap();
        assert_eq!(infra.vpc_id.as_deref(), Some("vpc-1"));
        assert_eq!(infra.security_groups["master"], "sg-1");
    }

    #[tokio::test]
    async fn test_publish_without_control_plane_is_ignored() {
        let fixture = make_fixture().await;
        let orphan = Vpc::new(
            "default",
            "other",
            VpcSpec {
                cluster_name: "other".to_string(),
                cidr: "10.0.0.0/16".to_string(),
            },
        );

        fixture
            .ctx
            .publish(&orphan, json!({ "vpcId": "vpc-1" }))
            .unwrap();
        assert_eq!(
            fixture.ctx.infrastructure(&orphan).unwrap(),
            Infrastructure::default()
        );
    }

    #[test]
    fn test_at_most_one() {
        assert_eq!(at_most_one::<u8>("vpc", "demo", vec![]).unwrap(), None);
        assert_eq!(at_most_one("vpc", "demo", vec![1]).unwrap(), Some(1));
        let err = at_most_one("vpc", "demo", vec![1, 2]).unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::CardinalityViolation { found: 2, .. }
        ));
    }

    #[test]
    fn test_require_rejects_empty_handles() {
        let vpc = make_vpc();
        let present = "vpc-1".to_string();
        let empty = String::new();

        assert_eq!(require(&vpc, Some(&present), "vpcId").unwrap(), "vpc-1");
        assert!(require(&vpc, Some(&empty), "vpcId")
            .unwrap_err()
            .is_dependency_not_ready());
        assert!(require(&vpc, None, "vpcId")
            .unwrap_err()
            .is_dependency_not_ready());
    }
}
