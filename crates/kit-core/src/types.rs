use serde::{Deserialize, Serialize};
use std::fmt;

/// API group served by every record kind in this crate
pub const GROUP: &str = "kit.k8s.amazonaws.com";

/// API version of the record kinds
pub const VERSION: &str = "v1alpha1";

/// GroupVersionKind uniquely identifies a record type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersionKind {
    /// API group (e.g., "kit.k8s.amazonaws.com")
    pub group: String,
    /// API version (e.g., "v1alpha1")
    pub version: String,
    /// Record kind (e.g., "ControlPlane", "Vpc")
    pub kind: String,
}

impl GroupVersionKind {
    /// Create a new GVK
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// GVK of a kind in the kit group
    pub fn kit(kind: impl Into<String>) -> Self {
        Self::new(GROUP, VERSION, kind)
    }

    /// Create a GVK from apiVersion and kind
    /// apiVersion format: "v1" or "group/version"
    pub fn from_api_version_kind(api_version: &str, kind: &str) -> Self {
        let (group, version) = match api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), api_version.to_string()),
        };

        Self {
            group,
            version,
            kind: kind.to_string(),
        }
    }

    /// Get the apiVersion string (group/version or just version)
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Storage prefix shared by every record of this kind
    pub fn storage_prefix(&self) -> String {
        format!("{}/{}/", self.api_version(), self.kind)
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// ResourceKey uniquely identifies a specific record instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    /// GroupVersionKind of the record
    pub gvk: GroupVersionKind,
    /// Namespace
    pub namespace: String,
    /// Record name
    pub name: String,
}

impl ResourceKey {
    /// Create a new ResourceKey
    pub fn new(
        gvk: GroupVersionKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            gvk,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Get the storage key encoding: {api_version}/{kind}/{namespace}/{name}
    pub fn storage_key(&self) -> String {
        format!(
            "{}{}/{}",
            self.gvk.storage_prefix(),
            self.namespace,
            self.name
        )
    }

    /// Key of the same kind at another name in the same namespace
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        Self::new(self.gvk.clone(), self.namespace.clone(), name)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.gvk.kind, self.namespace, self.name)
    }
}

/// Resource version, a monotonically increasing counter assigned by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceVersion(pub String);

impl ResourceVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ResourceVersion {
    fn from(v: u64) -> Self {
        Self(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gvk_from_api_version() {
        let gvk = GroupVersionKind::from_api_version_kind("v1", "ConfigMap");
        assert_eq!(gvk.group, "");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.api_version(), "v1");

        let gvk = GroupVersionKind::from_api_version_kind(
            "kit.k8s.amazonaws.com/v1alpha1",
            "ControlPlane",
        );
        assert_eq!(gvk, GroupVersionKind::kit("ControlPlane"));
        assert_eq!(gvk.api_version(), "kit.k8s.amazonaws.com/v1alpha1");
    }

    #[test]
    fn test_resource_key_storage_key() {
        let key = ResourceKey::new(GroupVersionKind::kit("Vpc"), "default", "demo");
        assert_eq!(key.storage_key(), "kit.k8s.amazonaws.com/v1alpha1/Vpc/default/demo");
        assert!(key
            .storage_key()
            .starts_with(&GroupVersionKind::kit("Vpc").storage_prefix()));
    }

    #[test]
    fn test_storage_prefix_does_not_overlap_between_kinds() {
        let vpc = GroupVersionKind::kit("Vpc").storage_prefix();
        let key = ResourceKey::new(GroupVersionKind::kit("VpcPeering"), "default", "x");
        assert!(!key.storage_key().starts_with(&vpc));
    }
}
