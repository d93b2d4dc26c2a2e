pub mod compute;
pub mod control_plane;
pub mod identity;
pub mod load_balancing;
pub mod network;
pub mod storage;

pub use compute::{AutoScalingGroup, AutoScalingGroupSpec, LaunchTemplate, LaunchTemplateSpec};
pub use control_plane::{
    BootstrapProgress, ComponentConfig, ControlPlane, ControlPlaneSpec, ControlPlaneStatus,
    EtcdSpec, Infrastructure, Instances, MasterSpec, RouteTables,
};
pub use identity::{InstanceProfile, InstanceProfileSpec, Policy, PolicySpec, Role, RoleSpec};
pub use load_balancing::{LoadBalancer, LoadBalancerSpec, TargetGroup, TargetGroupSpec};
pub use network::{
    ElasticIp, ElasticIpSpec, InternetGateway, InternetGatewaySpec, IpPermission, NatGateway,
    NatGatewaySpec, PermissionSource, RouteTable, RouteTableSpec, SecurityGroup,
    SecurityGroupSpec, Subnet, SubnetProperty, SubnetSpec, Vpc, VpcSpec,
};
pub use storage::{Bucket, BucketSpec};

use crate::conditions::{self, ACTIVE};
use crate::naming::CLUSTER_TAG;
use crate::types::{GroupVersionKind, ResourceKey, ResourceVersion};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, ObjectMeta};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Base validation for all records
pub fn validate_base(metadata: &ObjectMeta) -> Result<(), ResourceError> {
    match &metadata.name {
        None => Err(ResourceError::MissingField("metadata.name".to_string())),
        Some(name) if !is_valid_name(name) => Err(ResourceError::InvalidName(name.clone())),
        Some(_) => Ok(()),
    }
}

/// Trait for stored records
pub trait Resource: Serialize + DeserializeOwned + Send + Sync {
    /// Get the API version of this record
    fn api_version(&self) -> String;

    /// Get the kind of this record
    fn kind(&self) -> String;

    /// Get the metadata of this record
    fn metadata(&self) -> &ObjectMeta;

    /// Get mutable metadata
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Get the GroupVersionKind
    fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::from_api_version_kind(&self.api_version(), &self.kind())
    }

    /// Get the ResourceKey
    fn resource_key(&self) -> Result<ResourceKey, ResourceError> {
        let metadata = self.metadata();
        let name = metadata
            .name
            .as_ref()
            .ok_or_else(|| ResourceError::MissingField("metadata.name".to_string()))?;
        let namespace = metadata
            .namespace
            .clone()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        Ok(ResourceKey::new(self.gvk(), namespace, name))
    }

    /// Get the resource version
    fn resource_version(&self) -> Option<ResourceVersion> {
        self.metadata()
            .resource_version
            .as_ref()
            .map(ResourceVersion::new)
    }

    /// Set the resource version
    fn set_resource_version(&mut self, version: ResourceVersion) {
        self.metadata_mut().resource_version = Some(version.0);
    }

    /// Set the UID
    fn set_uid(&mut self, uid: String) {
        self.metadata_mut().uid = Some(uid);
    }

    /// Validate the record
    fn validate(&self) -> Result<(), ResourceError> {
        validate_base(self.metadata())
    }
}

/// Record-related errors
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid resource name: {0}")]
    InvalidName(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

/// Validate a record name (DNS-1123 subdomain)
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    let bytes = name.as_bytes();
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    edge_ok(bytes[0])
        && edge_ok(bytes[bytes.len() - 1])
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-' || *b == b'.')
}

/// Namespace used when a record does not name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Desired configuration of a record kind
pub trait Spec:
    Serialize + DeserializeOwned + Clone + Default + PartialEq + fmt::Debug + Send + Sync + 'static
{
    /// Kind name stored in `kind` and used in storage keys
    const KIND: &'static str;

    /// Observed state paired with this spec
    type Status: ResourceStatus;

    /// Cluster the record belongs to, when the spec names it
    fn cluster_name(&self) -> Option<&str> {
        None
    }
}

/// Observed state of a record; always carries the condition list
pub trait ResourceStatus:
    Serialize + DeserializeOwned + Clone + Default + PartialEq + fmt::Debug + Send + Sync + 'static
{
    fn conditions(&self) -> &[Condition];
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
}

/// Implements `ResourceStatus` for status structs with a `conditions` field
macro_rules! impl_status {
    ($($status:ty),+ $(,)?) => {
        $(
            impl $crate::resources::ResourceStatus for $status {
                fn conditions(&self) -> &[k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition] {
                    &self.conditions
                }
                fn conditions_mut(
                    &mut self,
                ) -> &mut Vec<k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition> {
                    &mut self.conditions
                }
            }
        )+
    };
}
pub(crate) use impl_status;

/// A typed record: metadata, desired spec and observed status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound = "")]
pub struct Object<S: Spec> {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: S,
    #[serde(default)]
    pub status: S::Status,
}

impl<S: Spec> Object<S> {
    /// Build a record labelled with the cluster it belongs to
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: S) -> Self {
        let mut object = Self {
            api_version: Self::type_gvk().api_version(),
            kind: S::KIND.to_string(),
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(namespace.into()),
                ..Default::default()
            },
            spec,
            status: S::Status::default(),
        };
        let cluster = object.cluster_name().to_string();
        object
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(CLUSTER_TAG.to_string(), cluster);
        object
    }

    /// GVK of this record type
    pub fn type_gvk() -> GroupVersionKind {
        GroupVersionKind::kit(S::KIND)
    }

    /// Key for a record of this type
    pub fn key_for(namespace: &str, name: &str) -> ResourceKey {
        ResourceKey::new(Self::type_gvk(), namespace, name)
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata
            .namespace
            .as_deref()
            .unwrap_or(DEFAULT_NAMESPACE)
    }

    /// Key of this record
    pub fn key(&self) -> ResourceKey {
        Self::key_for(self.namespace(), self.name())
    }

    /// Cluster named by the spec, falling back to the record name
    pub fn cluster_name(&self) -> &str {
        self.spec.cluster_name().unwrap_or_else(|| self.name())
    }

    /// Whether a deletion timestamp is set
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|x| x == finalizer))
    }

    /// Whether the Active condition is True
    pub fn is_active(&self) -> bool {
        conditions::is_true(self.status.conditions(), ACTIVE)
    }
}

impl<S: Spec> Resource for Object<S> {
    fn api_version(&self) -> String {
        if self.api_version.is_empty() {
            Self::type_gvk().api_version()
        } else {
            self.api_version.clone()
        }
    }

    fn kind(&self) -> String {
        S::KIND.to_string()
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Control-plane component a child record is built for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    #[default]
    Master,
    Etcd,
}

impl Component {
    /// Every component, in provisioning order
    pub const ALL: [Component; 2] = [Component::Master, Component::Etcd];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Master => "master",
            Component::Etcd => "etcd",
        }
    }

    /// Port served behind the component's load balancer
    pub fn port(&self) -> u16 {
        match self {
            Component::Master => 443,
            Component::Etcd => 2379,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_name() {
        assert!(is_valid_name("demo"));
        assert!(is_valid_name("demo-master"));
        assert!(is_valid_name("demo.etcd-1"));

        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Demo"));
        assert!(!is_valid_name("-demo"));
        assert!(!is_valid_name("demo-"));
        assert!(!is_valid_name("demo_master"));
    }

    #[test]
    fn test_new_object_is_labelled_with_cluster() {
        let vpc = Vpc::new(
            "default",
            "demo",
            VpcSpec {
                cluster_name: "demo".to_string(),
                cidr: "10.0.0.0/16".to_string(),
            },
        );
        assert_eq!(vpc.kind, "Vpc");
        assert_eq!(vpc.api_version, "kit.k8s.amazonaws.com/v1alpha1");
        assert_eq!(
            vpc.metadata.labels.as_ref().unwrap().get(CLUSTER_TAG),
            Some(&"demo".to_string())
        );
        assert_eq!(vpc.key().storage_key(), "kit.k8s.amazonaws.com/v1alpha1/Vpc/default/demo");
    }

    #[test]
    fn test_control_plane_cluster_name_is_record_name() {
        let cp = ControlPlane::new("default", "demo", ControlPlaneSpec::default());
        assert_eq!(cp.cluster_name(), "demo");
        assert!(!cp.is_active());
        assert!(!cp.is_deleting());
    }

    #[test]
    fn test_object_json_shape() {
        let cp = ControlPlane::new("default", "demo", ControlPlaneSpec::default());
        let json = serde_json::to_value(&cp).unwrap();
        assert_eq!(json["kind"], "ControlPlane");
        assert_eq!(json["metadata"]["name"], "demo");
        assert!(json["status"].is_object());

        let back: ControlPlane = serde_json::from_value(json).unwrap();
        assert_eq!(back, cp);
    }

    #[test]
    fn test_component_ports() {
        assert_eq!(Component::Master.port(), 443);
        assert_eq!(Component::Etcd.port(), 2379);
        assert_eq!(Component::Etcd.to_string(), "etcd");
    }
}
