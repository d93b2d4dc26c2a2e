use super::{impl_status, Component, Object, Spec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use serde::{Deserialize, Serialize};

pub type Vpc = Object<VpcSpec>;
pub type Subnet = Object<SubnetSpec>;
pub type InternetGateway = Object<InternetGatewaySpec>;
pub type ElasticIp = Object<ElasticIpSpec>;
pub type NatGateway = Object<NatGatewaySpec>;
pub type RouteTable = Object<RouteTableSpec>;
pub type SecurityGroup = Object<SecurityGroupSpec>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcSpec {
    pub cluster_name: String,
    pub cidr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
}

impl Spec for VpcSpec {
    const KIND: &'static str = "Vpc";
    type Status = VpcStatus;

    fn cluster_name(&self) -> Option<&str> {
        Some(&self.cluster_name)
    }
}

/// One subnet to converge: its block, zone and whether it is public
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetProperty {
    pub cidr: String,
    pub az: String,
    #[serde(default)]
    pub public: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    pub cluster_name: String,
    #[serde(default)]
    pub items: Vec<SubnetProperty>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub private_subnets: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub public_subnets: Vec<String>,
}

impl Spec for SubnetSpec {
    const KIND: &'static str = "Subnet";
    type Status = SubnetStatus;

    fn cluster_name(&self) -> Option<&str> {
        Some(&self.cluster_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternetGatewaySpec {
    pub cluster_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternetGatewayStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internet_gateway_id: Option<String>,
}

impl Spec for InternetGatewaySpec {
    const KIND: &'static str = "InternetGateway";
    type Status = InternetGatewayStatus;

    fn cluster_name(&self) -> Option<&str> {
        Some(&self.cluster_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElasticIpSpec {
    pub cluster_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElasticIpStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
}

impl Spec for ElasticIpSpec {
    const KIND: &'static str = "ElasticIp";
    type Status = ElasticIpStatus;

    fn cluster_name(&self) -> Option<&str> {
        Some(&self.cluster_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatGatewaySpec {
    pub cluster_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatGatewayStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nat_gateway_id: Option<String>,
}

impl Spec for NatGatewaySpec {
    const KIND: &'static str = "NatGateway";
    type Status = NatGatewayStatus;

    fn cluster_name(&self) -> Option<&str> {
        Some(&self.cluster_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTableSpec {
    pub cluster_name: String,
    #[serde(default)]
    pub for_private_subnets: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTableStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_table_id: Option<String>,
}

impl Spec for RouteTableSpec {
    const KIND: &'static str = "RouteTable";
    type Status = RouteTableStatus;

    fn cluster_name(&self) -> Option<&str> {
        Some(&self.cluster_name)
    }
}

impl RouteTableSpec {
    /// "private" or "public", used in names and tags
    pub fn visibility(&self) -> &'static str {
        if self.for_private_subnets {
            "private"
        } else {
            "public"
        }
    }
}

/// Where ingress traffic may come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionSource {
    /// An IPv4 block
    Cidr(String),
    /// Another security group, by group name
    GroupName(String),
}

/// A single ingress rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpPermission {
    pub from_port: u16,
    pub to_port: u16,
    pub protocol: String,
    pub source: PermissionSource,
}

impl IpPermission {
    pub fn tcp(from_port: u16, to_port: u16, source: PermissionSource) -> Self {
        Self {
            from_port,
            to_port,
            protocol: "tcp".to_string(),
            source,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupSpec {
    pub cluster_name: String,
    pub component: Component,
    pub group_name: String,
    #[serde(default)]
    pub permissions: Vec<IpPermission>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group_id: Option<String>,
}

impl Spec for SecurityGroupSpec {
    const KIND: &'static str = "SecurityGroup";
    type Status = SecurityGroupStatus;

    fn cluster_name(&self) -> Option<&str> {
        Some(&self.cluster_name)
    }
}

impl_status!(
    VpcStatus,
    SubnetStatus,
    InternetGatewayStatus,
    ElasticIpStatus,
    NatGatewayStatus,
    RouteTableStatus,
    SecurityGroupStatus,
);
