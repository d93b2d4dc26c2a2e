use super::{impl_status, Component, Object, Spec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use serde::{Deserialize, Serialize};

pub type LaunchTemplate = Object<LaunchTemplateSpec>;
pub type AutoScalingGroup = Object<AutoScalingGroupSpec>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchTemplateSpec {
    pub cluster_name: String,
    pub component: Component,
    pub template_name: String,
    pub instance_type: String,
    /// Explicit image; resolved from the AMI parameter when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ami: Option<String>,
    pub volume_size_gib: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchTemplateStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_template_id: Option<String>,
}

impl Spec for LaunchTemplateSpec {
    const KIND: &'static str = "LaunchTemplate";
    type Status = LaunchTemplateStatus;

    fn cluster_name(&self) -> Option<&str> {
        Some(&self.cluster_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoScalingGroupSpec {
    pub cluster_name: String,
    pub component: Component,
    pub group_name: String,
    pub template_name: String,
    pub instance_count: u32,
    pub min_size: u32,
    pub max_size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoScalingGroupStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
}

impl Spec for AutoScalingGroupSpec {
    const KIND: &'static str = "AutoScalingGroup";
    type Status = AutoScalingGroupStatus;

    fn cluster_name(&self) -> Option<&str> {
        Some(&self.cluster_name)
    }
}

impl_status!(LaunchTemplateStatus, AutoScalingGroupStatus);
