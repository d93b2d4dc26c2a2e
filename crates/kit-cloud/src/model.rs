//! Provider-neutral view of the cloud objects kit manages

use kit_core::naming::{CLUSTER_TAG, COMPONENT_TAG, NAME_TAG};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Key/value tags attached to a cloud object
pub type Tags = BTreeMap<String, String>;

/// Ownership tags every created object carries
pub fn owned_tags(cluster: &str, name: &str, component: Option<&str>) -> Tags {
    let mut tags = Tags::new();
    tags.insert(CLUSTER_TAG.to_string(), cluster.to_string());
    tags.insert(NAME_TAG.to_string(), name.to_string());
    if let Some(component) = component {
        tags.insert(COMPONENT_TAG.to_string(), component.to_string());
    }
    tags
}

/// Conjunction of required tag values; the only discovery key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    required: Tags,
}

impl TagFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Objects owned by a cluster
    pub fn cluster(cluster: &str) -> Self {
        Self::new().with(CLUSTER_TAG, cluster)
    }

    /// Objects of one component of a cluster
    pub fn component(cluster: &str, component: &str) -> Self {
        Self::cluster(cluster).with(COMPONENT_TAG, component)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.required.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, tags: &Tags) -> bool {
        self.required
            .iter()
            .all(|(k, v)| tags.get(k).is_some_and(|actual| actual == v))
    }
}

impl fmt::Display for TagFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .required
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vpc {
    pub vpc_id: String,
    pub cidr_block: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subnet {
    pub subnet_id: String,
    pub vpc_id: String,
    pub cidr_block: String,
    pub availability_zone: String,
    pub map_public_ip_on_launch: bool,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSubnet {
    pub vpc_id: String,
    pub cidr_block: String,
    pub availability_zone: String,
    pub map_public_ip_on_launch: bool,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternetGateway {
    pub internet_gateway_id: String,
    pub attached_vpc_id: Option<String>,
    pub tags: Tags,
}

/// Elastic IP address allocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub allocation_id: String,
    pub public_ip: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NatGatewayState {
    Pending,
    Available,
    Deleting,
    Deleted,
    Failed,
}

impl NatGatewayState {
    /// States in which the gateway no longer counts as existing
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            NatGatewayState::Deleting | NatGatewayState::Deleted | NatGatewayState::Failed
        )
    }
}

impl fmt::Display for NatGatewayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NatGatewayState::Pending => "pending",
            NatGatewayState::Available => "available",
            NatGatewayState::Deleting => "deleting",
            NatGatewayState::Deleted => "deleted",
            NatGatewayState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NatGateway {
    pub nat_gateway_id: String,
    pub subnet_id: String,
    pub allocation_id: String,
    pub state: NatGatewayState,
    pub tags: Tags,
}

/// Where a route sends its traffic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteTarget {
    InternetGateway(String),
    NatGateway(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub destination_cidr: String,
    pub target: RouteTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteTableAssociation {
    pub association_id: String,
    pub subnet_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteTable {
    pub route_table_id: String,
    pub vpc_id: String,
    pub routes: Vec<Route>,
    pub associations: Vec<RouteTableAssociation>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngressSource {
    Cidr(String),
    Group(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub protocol: String,
    pub from_port: u16,
    pub to_port: u16,
    pub source: IngressSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub group_id: String,
    pub group_name: String,
    pub vpc_id: String,
    pub ingress: Vec<IngressRule>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub role_name: String,
    pub arn: String,
    pub assume_role_policy: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceProfile {
    pub profile_name: String,
    pub arn: String,
    pub roles: Vec<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateLaunchTemplate {
    pub name: String,
    pub image_id: String,
    pub instance_type: String,
    pub volume_size_gib: u32,
    pub volume_type: String,
    pub security_group_ids: Vec<String>,
    pub instance_profile_name: String,
    /// Plain-text script; encoding for the wire is the client's job
    pub user_data: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchTemplate {
    pub launch_template_id: String,
    pub name: String,
    pub image_id: String,
    pub instance_type: String,
    pub tags: Tags,
}

/// Status the provider reports while a group is being torn down
pub const ASG_DELETE_IN_PROGRESS: &str = "Delete in progress";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAutoScalingGroup {
    pub name: String,
    pub launch_template_name: String,
    pub subnet_ids: Vec<String>,
    pub desired_capacity: u32,
    pub min_size: u32,
    pub max_size: u32,
    /// Tags propagated to launched instances
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoScalingGroup {
    pub name: String,
    pub launch_template_name: String,
    pub subnet_ids: Vec<String>,
    pub desired_capacity: u32,
    pub min_size: u32,
    pub max_size: u32,
    pub target_group_arns: Vec<String>,
    pub status: Option<String>,
    pub tags: Tags,
}

impl AutoScalingGroup {
    pub fn is_deleting(&self) -> bool {
        self.status.as_deref() == Some(ASG_DELETE_IN_PROGRESS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
}

impl InstanceState {
    /// Pending or running
    pub fn is_live(&self) -> bool {
        matches!(self, InstanceState::Pending | InstanceState::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: String,
    pub private_ip: Option<String>,
    pub state: InstanceState,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub arn: String,
    pub name: String,
    pub dns_name: String,
    pub scheme: String,
    pub subnet_ids: Vec<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listener {
    pub arn: String,
    pub load_balancer_arn: String,
    pub port: u16,
    pub protocol: String,
    pub target_group_arn: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetGroup {
    pub arn: String,
    pub name: String,
    pub port: u16,
    pub protocol: String,
    pub vpc_id: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
    pub tags: Tags,
}
