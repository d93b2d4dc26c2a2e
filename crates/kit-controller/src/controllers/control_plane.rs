use super::{not_ready, Context};
use crate::error::{ReconcileError, Result};
use crate::reconciler::{Action, Controller};
use async_trait::async_trait;
use kit_bootstrap::BootstrapSequencer;
use kit_core::naming::{
    auto_scaling_group_name, availability_zones, bucket_name, group_name, launch_template_name,
    load_balancer_name, object_name, policy_name, profile_name, role_name, subnet_cidrs,
    target_group_name,
};
use kit_core::resources::control_plane::Infrastructure;
use kit_core::resources::{
    AutoScalingGroupSpec, BucketSpec, ElasticIpSpec, InstanceProfileSpec, InternetGatewaySpec,
    IpPermission, LaunchTemplateSpec, LoadBalancerSpec, NatGatewaySpec, PermissionSource,
    PolicySpec, RoleSpec, RouteTableSpec, SecurityGroupSpec, SubnetProperty, SubnetSpec,
    TargetGroupSpec, VpcSpec,
};
use chrono::Utc;
use kit_core::conditions::{set_condition, ConditionStatus, BOOTSTRAPPED};
use kit_core::{Component, ControlPlane, GroupVersionKind, Object, ResourceKey, Spec};
use std::fmt;
use tracing::{debug, info};

/// Provisioning stages, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Vpc,
    Bucket,
    Subnet,
    InternetGateway,
    ElasticIp,
    NatGateway,
    RouteTable,
    SecurityGroup,
    Role,
    Policy,
    InstanceProfile,
    LaunchTemplate,
    AutoScalingGroup,
    TargetGroup,
    LoadBalancer,
}

impl Stage {
    pub const ALL: [Stage; 15] = [
        Stage::Vpc,
        Stage::Bucket,
        Stage::Subnet,
        Stage::InternetGateway,
        Stage::ElasticIp,
        Stage::NatGateway,
        Stage::RouteTable,
        Stage::SecurityGroup,
        Stage::Role,
        Stage::Policy,
        Stage::InstanceProfile,
        Stage::LaunchTemplate,
        Stage::AutoScalingGroup,
        Stage::TargetGroup,
        Stage::LoadBalancer,
    ];

    /// Kind of the child records this stage owns
    pub fn kind(&self) -> &'static str {
        match self {
            Stage::Vpc => VpcSpec::KIND,
            Stage::Bucket => BucketSpec::KIND,
            Stage::Subnet => SubnetSpec::KIND,
            Stage::InternetGateway => InternetGatewaySpec::KIND,
            Stage::ElasticIp => ElasticIpSpec::KIND,
            Stage::NatGateway => NatGatewaySpec::KIND,
            Stage::RouteTable => RouteTableSpec::KIND,
            Stage::SecurityGroup => SecurityGroupSpec::KIND,
            Stage::Role => RoleSpec::KIND,
            Stage::Policy => PolicySpec::KIND,
            Stage::InstanceProfile => InstanceProfileSpec::KIND,
            Stage::LaunchTemplate => LaunchTemplateSpec::KIND,
            Stage::AutoScalingGroup => AutoScalingGroupSpec::KIND,
            Stage::TargetGroup => TargetGroupSpec::KIND,
            Stage::LoadBalancer => LoadBalancerSpec::KIND,
        }
    }

    /// Names of the child records this stage owns for a cluster
    pub fn record_names(&self, cluster: &str) -> Vec<String> {
        match self {
            Stage::Vpc
            | Stage::Bucket
            | Stage::Subnet
            | Stage::InternetGateway
            | Stage::ElasticIp
            | Stage::NatGateway => vec![cluster.to_string()],
            Stage::RouteTable => vec![
                object_name(cluster, "public"),
                object_name(cluster, "private"),
            ],
            _ => Component::ALL
                .iter()
                .map(|c| object_name(cluster, c.as_str()))
                .collect(),
        }
    }

    /// First handle this stage produces that is not yet published
    pub fn missing_handle(&self, infra: &Infrastructure) -> Option<String> {
        let absent = |handle: &Option<String>| handle.as_deref().is_none_or(str::is_empty);
        let per_component = |map: &std::collections::BTreeMap<String, String>, field: &str| {
            Component::ALL
                .iter()
                .find(|c| map.get(c.as_str()).is_none_or(|h| h.is_empty()))
                .map(|c| format!("infrastructure.{}.{}", field, c))
        };
        match self {
            Stage::Vpc => absent(&infra.vpc_id).then(|| "infrastructure.vpcId".to_string()),
            Stage::Bucket => absent(&infra.bucket).then(|| "infrastructure.bucket".to_string()),
            Stage::Subnet => {
                if infra.private_subnets.is_empty() {
                    Some("infrastructure.privateSubnets".to_string())
                } else if infra.public_subnets.is_empty() {
                    Some("infrastructure.publicSubnets".to_string())
                } else {
                    None
                }
            }
            Stage::InternetGateway => absent(&infra.internet_gateway_id)
                .then(|| "infrastructure.internetGatewayId".to_string()),
            Stage::ElasticIp => absent(&infra.elastic_ip_allocation_id)
                .then(|| "infrastructure.elasticIpAllocationId".to_string()),
            Stage::NatGateway => {
                absent(&infra.nat_gateway_id).then(|| "infrastructure.natGatewayId".to_string())
            }
            Stage::RouteTable => {
                if absent(&infra.route_tables.public) {
                    Some("infrastructure.routeTables.public".to_string())
                } else if absent(&infra.route_tables.private) {
                    Some("infrastructure.routeTables.private".to_string())
                } else {
                    None
                }
            }
            Stage::SecurityGroup => per_component(&infra.security_groups, "securityGroups"),
            Stage::Role => per_component(&infra.roles, "roles"),
            Stage::Policy => per_component(&infra.policies, "policies"),
            Stage::InstanceProfile => per_component(&infra.instance_profiles, "instanceProfiles"),
            Stage::LaunchTemplate => per_component(&infra.launch_templates, "launchTemplates"),
            Stage::AutoScalingGroup => {
                per_component(&infra.auto_scaling_groups, "autoScalingGroups")
            }
            Stage::TargetGroup => per_component(&infra.target_groups, "targetGroups"),
            Stage::LoadBalancer => per_component(&infra.load_balancers, "loadBalancers"),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// The provisioning pipeline.
///
/// Each pass walks the stages in order, making sure the stage's child
/// records exist and that their controllers have published the handles the
/// next stage needs. The first missing handle ends the pass. Once every
/// stage is in place the bootstrap sequencer takes over.
pub struct ControlPlaneController {
    ctx: Context,
    sequencer: BootstrapSequencer,
}

impl ControlPlaneController {
    pub fn new(ctx: Context, sequencer: BootstrapSequencer) -> Self {
        Self { ctx, sequencer }
    }

    /// Create or update a child record of the control plane
    fn apply<S: Spec>(&self, cp: &ControlPlane, name: String, spec: S) -> Result<()> {
        self.ctx.store.apply(Object::new(cp.namespace(), name, spec))?;
        Ok(())
    }

    /// Make sure the child records of one stage exist with the desired spec
    fn ensure(&self, stage: Stage, cp: &ControlPlane) -> Result<()> {
        let cluster = cp.cluster_name().to_string();
        let c = || cluster.clone();
        let defaults = &self.ctx.defaults;
        let spec = &cp.spec;

        match stage {
            Stage::Vpc => self.apply(
                cp,
                c(),
                VpcSpec {
                    cluster_name: c(),
                    cidr: spec.vpc_cidr.clone().unwrap_or_else(|| defaults.vpc_cidr.clone()),
                },
            ),
            Stage::Bucket => self.apply(
                cp,
                c(),
                BucketSpec {
                    cluster_name: c(),
                    bucket_name: bucket_name(&cluster),
                },
            ),
            Stage::Subnet => {
                let cidr = spec.vpc_cidr.as_deref().unwrap_or(&defaults.vpc_cidr);
                let zones = availability_zones(&defaults.region);
                let items = subnet_cidrs(cidr)?
                    .into_iter()
                    .enumerate()
                    .map(|(i, cidr)| SubnetProperty {
                        cidr,
                        az: zones[i % zones.len()].clone(),
                        public: i >= zones.len(),
                    })
                    .collect();
                self.apply(
                    cp,
                    c(),
                    SubnetSpec {
                        cluster_name: c(),
                        items,
                    },
                )
            }
            Stage::InternetGateway => {
                self.apply(cp, c(), InternetGatewaySpec { cluster_name: c() })
            }
            Stage::ElasticIp => self.apply(cp, c(), ElasticIpSpec { cluster_name: c() }),
            Stage::NatGateway => self.apply(cp, c(), NatGatewaySpec { cluster_name: c() }),
            Stage::RouteTable => {
                for private in [false, true] {
                    let spec = RouteTableSpec {
                        cluster_name: c(),
                        for_private_subnets: private,
                    };
                    self.apply(cp, object_name(&cluster, spec.visibility()), spec)?;
                }
                Ok(())
            }
            _ => {
                for component in Component::ALL {
                    self.ensure_component(stage, cp, &cluster, component)?;
                }
                Ok(())
            }
        }
    }

    /// Child records that exist once per component
    fn ensure_component(
        &self,
        stage: Stage,
        cp: &ControlPlane,
        cluster: &str,
        component: Component,
    ) -> Result<()> {
        let comp = component.as_str();
        let name = object_name(cluster, comp);
        let cluster_name = cluster.to_string();
        let defaults = &self.ctx.defaults;
        let instances = cp.spec.instances(component);

        match stage {
            Stage::SecurityGroup => {
                let own = group_name(cluster, comp);
                let permissions = match component {
                    Component::Master => vec![IpPermission::tcp(
                        component.port(),
                        component.port(),
                        PermissionSource::Cidr("0.0.0.0/0".to_string()),
                    )],
                    Component::Etcd => vec![
                        IpPermission::tcp(2379, 2380, PermissionSource::GroupName(own.clone())),
                        IpPermission::tcp(
                            component.port(),
                            component.port(),
                            PermissionSource::GroupName(group_name(
                                cluster,
                                Component::Master.as_str(),
                            )),
                        ),
                    ],
                };
                self.apply(
                    cp,
                    name,
                    SecurityGroupSpec {
                        cluster_name,
                        component,
                        group_name: own,
                        permissions,
                    },
                )
            }
            Stage::Role => self.apply(
                cp,
                name,
                RoleSpec {
                    cluster_name,
                    component,
                    role_name: role_name(cluster, comp),
                },
            ),
            Stage::Policy => self.apply(
                cp,
                name,
                PolicySpec {
                    cluster_name,
                    component,
                    role_name: role_name(cluster, comp),
                    policy_name: policy_name(cluster, comp),
                },
            ),
            Stage::InstanceProfile => self.apply(
                cp,
                name,
                InstanceProfileSpec {
                    cluster_name,
                    component,
                    profile_name: profile_name(cluster, comp),
                    role_name: role_name(cluster, comp),
                },
            ),
            Stage::LaunchTemplate => self.apply(
                cp,
                name,
                LaunchTemplateSpec {
                    cluster_name,
                    component,
                    template_name: launch_template_name(cluster, comp),
                    instance_type: instances
                        .instance_type
                        .clone()
                        .unwrap_or_else(|| defaults.instance_type.clone()),
                    ami: instances.ami.clone(),
                    volume_size_gib: defaults.volume_size_gib,
                },
            ),
            Stage::AutoScalingGroup => {
                let count = self.sequencer.config().expected_nodes(&cp.spec, component) as u32;
                self.apply(
                    cp,
                    name,
                    AutoScalingGroupSpec {
                        cluster_name,
                        component,
                        group_name: auto_scaling_group_name(cluster, comp),
                        template_name: launch_template_name(cluster, comp),
                        instance_count: count,
                        min_size: defaults.min_size.min(count),
                        max_size: defaults.max_size.max(count),
                    },
                )
            }
            Stage::TargetGroup => self.apply(
                cp,
                name,
                TargetGroupSpec {
                    cluster_name,
                    component,
                    target_group_name: target_group_name(cluster, comp),
                    port: component.port(),
                    auto_scaling_group_name: auto_scaling_group_name(cluster, comp),
                },
            ),
            Stage::LoadBalancer => {
                let scheme = match component {
                    Component::Master => "internet-facing",
                    Component::Etcd => "internal",
                };
                self.apply(
                    cp,
                    name,
                    LoadBalancerSpec {
                        cluster_name,
                        component,
                        name: load_balancer_name(cluster, comp),
                        scheme: scheme.to_string(),
                        port: component.port(),
                    },
                )
            }
            _ => Ok(()),
        }
    }

    /// Keys of a stage's child records for a cluster
    fn record_keys(stage: Stage, cp: &ControlPlane) -> Vec<ResourceKey> {
        let gvk = GroupVersionKind::kit(stage.kind());
        stage
            .record_names(cp.cluster_name())
            .into_iter()
            .map(|name| ResourceKey::new(gvk.clone(), cp.namespace(), name))
            .collect()
    }
}

#[async_trait]
impl Controller for ControlPlaneController {
    type Spec = kit_core::ControlPlaneSpec;

    fn name(&self) -> &'static str {
        "control-plane"
    }

    /// Active turns True once every stage has its handles. Bootstrap
    /// progress is reported separately through the Bootstrapped condition.
    async fn reconcile(&self, cp: &mut ControlPlane) -> Result<Action> {
        let cluster = cp.cluster_name().to_string();

        for stage in Stage::ALL {
            self.ensure(stage, cp)?;
            let infra = self.ctx.infrastructure(cp)?;
            if let Some(missing) = stage.missing_handle(&infra) {
                debug!("Control plane {} waiting at stage {}", cluster, stage);
                return Err(not_ready(cp, &missing));
            }
        }

        let infra = self.ctx.infrastructure(cp)?;
        let outcome = self
            .sequencer
            .run(&cluster, &cp.spec, &infra, &mut cp.status.bootstrap)
            .await?;
        let status = if outcome.is_complete() {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        };
        set_condition(
            &mut cp.status.conditions,
            BOOTSTRAPPED,
            status,
            outcome.reason(),
            &outcome.to_string(),
            Utc::now(),
        );
        if outcome.is_complete() {
            return Ok(Action::await_change());
        }

        let after = self.sequencer.config().node_poll_interval;
        info!("Control plane {} provisioned, bootstrap {}", cluster, outcome);
        Ok(Action::requeue(after))
    }

    async fn finalize(&self, cp: &mut ControlPlane) -> Result<Action> {
        let cluster = cp.cluster_name().to_string();

        for stage in Stage::ALL.iter().rev() {
            let mut remaining = Vec::new();
            for key in Self::record_keys(*stage, cp) {
                if !self.ctx.store.mark_deleted(&key)? {
                    continue;
                }
                if self.ctx.store.get_raw(&key)?.is_some() {
                    remaining.push(key.name);
                }
            }
            if !remaining.is_empty() {
                debug!(
                    "Control plane {} waiting for {} records to go: {:?}",
                    cluster, stage, remaining
                );
                return Err(ReconcileError::dependency_not_ready(
                    cp.key().to_string(),
                    format!("deletion of {} {}", stage, remaining.join(", ")),
                ));
            }
        }

        info!("All provisioned records of control plane {} are gone", cluster);
        Ok(Action::await_change())
    }
}
