use super::{impl_status, Component, Object, Spec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The top-level record. Its name is the cluster name.
pub type ControlPlane = Object<ControlPlaneSpec>;

pub const DEFAULT_VPC_CIDR: &str = "10.0.0.0/16";
pub const DEFAULT_INSTANCE_COUNT: u32 = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_cidr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,
    #[serde(default)]
    pub master: MasterSpec,
    #[serde(default)]
    pub etcd: EtcdSpec,
}

impl ControlPlaneSpec {
    pub fn vpc_cidr(&self) -> &str {
        self.vpc_cidr.as_deref().unwrap_or(DEFAULT_VPC_CIDR)
    }

    pub fn instances(&self, component: Component) -> &Instances {
        match component {
            Component::Master => &self.master.instances,
            Component::Etcd => &self.etcd.instances,
        }
    }
}

/// Compute shape of one component's nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instances {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ami: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_count: Option<u32>,
}

impl Instances {
    pub fn count(&self) -> u32 {
        self.instance_count.unwrap_or(DEFAULT_INSTANCE_COUNT)
    }
}

/// Extra flags and image override for one static-pod component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterSpec {
    #[serde(flatten)]
    pub instances: Instances,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server: Option<ComponentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_manager: Option<ComponentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<ComponentConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtcdSpec {
    #[serde(flatten)]
    pub instances: Instances,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTables {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<String>,
}

/// Handles published by the child controllers, keyed by component where
/// one object exists per component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Infrastructure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub private_subnets: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub public_subnets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internet_gateway_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elastic_ip_allocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nat_gateway_id: Option<String>,
    #[serde(default)]
    pub route_tables: RouteTables,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub security_groups: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub roles: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub policies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub instance_profiles: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub launch_templates: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub auto_scaling_groups: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub target_groups: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub load_balancers: BTreeMap<String, String>,
}

/// Which bootstrap phases have finished staging their material
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapProgress {
    #[serde(default)]
    pub etcd_staged: bool,
    #[serde(default)]
    pub masters_staged: bool,
    #[serde(default)]
    pub cluster_initialized: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub infrastructure: Infrastructure,
    #[serde(default)]
    pub bootstrap: BootstrapProgress,
}

impl Spec for ControlPlaneSpec {
    const KIND: &'static str = "ControlPlane";
    type Status = ControlPlaneStatus;
}

impl_status!(ControlPlaneStatus);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_defaults() {
        let spec = ControlPlaneSpec::default();
        assert_eq!(spec.vpc_cidr(), "10.0.0.0/16");
        assert_eq!(spec.instances(Component::Etcd).count(), 3);
    }

    #[test]
    fn test_spec_from_yaml() {
        let yaml = r#"
vpcCidr: 10.1.0.0/16
kubernetesVersion: v1.19.8-eks-1-19-4
master:
  instanceCount: 2
  instanceType: m5.large
  apiServer:
    args:
      audit-log-maxage: "30"
etcd:
  instanceCount: 3
  args:
    quota-backend-bytes: "8589934592"
"#;
        let spec: ControlPlaneSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.vpc_cidr(), "10.1.0.0/16");
        assert_eq!(spec.master.instances.count(), 2);
        assert_eq!(spec.master.instances.instance_type.as_deref(), Some("m5.large"));
        assert_eq!(
            spec.master.api_server.unwrap().args.get("audit-log-maxage"),
            Some(&"30".to_string())
        );
        assert_eq!(spec.etcd.args.len(), 1);
    }

    #[test]
    fn test_empty_status_serializes_compactly() {
        let status = ControlPlaneStatus::default();
        let json = serde_json::to_value(&status).unwrap();
        assert!(json["infrastructure"]["vpcId"].is_null());
        assert!(json.get("conditions").is_none());
    }
}
