use super::{impl_status, Component, Object, Spec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use serde::{Deserialize, Serialize};

pub type Role = Object<RoleSpec>;
pub type Policy = Object<PolicySpec>;
pub type InstanceProfile = Object<InstanceProfileSpec>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    pub cluster_name: String,
    pub component: Component,
    pub role_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,
}

impl Spec for RoleSpec {
    const KIND: &'static str = "Role";
    type Status = RoleStatus;

    fn cluster_name(&self) -> Option<&str> {
        Some(&self.cluster_name)
    }
}

/// Inline permissions attached to a component's role
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    pub cluster_name: String,
    pub component: Component,
    pub role_name: String,
    pub policy_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<String>,
}

impl Spec for PolicySpec {
    const KIND: &'static str = "Policy";
    type Status = PolicyStatus;

    fn cluster_name(&self) -> Option<&str> {
        Some(&self.cluster_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceProfileSpec {
    pub cluster_name: String,
    pub component: Component,
    pub profile_name: String,
    pub role_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceProfileStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,
}

impl Spec for InstanceProfileSpec {
    const KIND: &'static str = "InstanceProfile";
    type Status = InstanceProfileStatus;

    fn cluster_name(&self) -> Option<&str> {
        Some(&self.cluster_name)
    }
}

impl_status!(RoleStatus, PolicyStatus, InstanceProfileStatus);
