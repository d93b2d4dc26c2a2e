use super::{impl_status, Component, Object, Spec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use serde::{Deserialize, Serialize};

pub type TargetGroup = Object<TargetGroupSpec>;
pub type LoadBalancer = Object<LoadBalancerSpec>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroupSpec {
    pub cluster_name: String,
    pub component: Component,
    pub target_group_name: String,
    pub port: u16,
    /// Scaling group whose instances register as targets
    pub auto_scaling_group_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroupStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_group_arn: Option<String>,
}

impl Spec for TargetGroupSpec {
    const KIND: &'static str = "TargetGroup";
    type Status = TargetGroupStatus;

    fn cluster_name(&self) -> Option<&str> {
        Some(&self.cluster_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerSpec {
    pub cluster_name: String,
    pub component: Component,
    pub name: String,
    pub scheme: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_name: Option<String>,
}

impl Spec for LoadBalancerSpec {
    const KIND: &'static str = "LoadBalancer";
    type Status = LoadBalancerStatus;

    fn cluster_name(&self) -> Option<&str> {
        Some(&self.cluster_name)
    }
}

impl_status!(TargetGroupStatus, LoadBalancerStatus);
