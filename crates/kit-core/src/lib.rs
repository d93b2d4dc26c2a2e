//! Kit Core - records, naming and conditions shared by the kit control-plane provisioner
//!
//! This crate provides:
//! - Typed records for the control plane and every cloud object it owns
//! - Error types with miette diagnostics
//! - Deterministic naming and tagging rules
//! - Condition helpers and serialization helpers

pub mod conditions;
pub mod error;
pub mod events;
pub mod naming;
pub mod resources;
pub mod types;

// Re-export commonly used types
pub use conditions::{ConditionStatus, ACTIVE, BOOTSTRAPPED};
pub use error::{KitError, Result};
pub use events::{ResourceEvent, WatchEventType};
pub use resources::{
    is_valid_name, Component, ControlPlane, ControlPlaneSpec, Object, Resource, ResourceError,
    ResourceStatus, Spec, DEFAULT_NAMESPACE,
};
pub use types::{GroupVersionKind, ResourceKey, ResourceVersion};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, ObjectMeta};

/// Serialize a record to JSON
pub fn to_json<T: serde::Serialize>(resource: &T) -> Result<String> {
    serde_json::to_string(resource).map_err(|e| {
        KitError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Serialize a record to a JSON value
pub fn to_value<T: serde::Serialize>(resource: &T) -> Result<serde_json::Value> {
    serde_json::to_value(resource).map_err(|e| {
        KitError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a record from JSON
pub fn from_json<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| {
        KitError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a record from a JSON value
pub fn from_value<T: for<'de> serde::Deserialize<'de>>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        KitError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Serialize a record to YAML
pub fn to_yaml<T: serde::Serialize>(resource: &T) -> Result<String> {
    serde_yaml::to_string(resource).map_err(|e| {
        KitError::serialization_error(
            format!("Failed to serialize to YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a record from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        KitError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_plane_from_yaml() {
        let yaml = r#"
apiVersion: kit.k8s.amazonaws.com/v1alpha1
kind: ControlPlane
metadata:
  name: demo
spec:
  master:
    instanceCount: 3
"#;
        let cp: ControlPlane = from_yaml(yaml).unwrap();
        assert_eq!(cp.name(), "demo");
        assert_eq!(cp.namespace(), DEFAULT_NAMESPACE);
        assert_eq!(cp.spec.master.instances.count(), 3);

        let json = to_json(&cp).unwrap();
        assert!(json.contains("\"kind\":\"ControlPlane\""));
    }

    #[test]
    fn test_bad_json_is_serialization_error() {
        let err = from_json::<ControlPlane>("{not json").unwrap_err();
        assert!(matches!(err, KitError::SerializationError { .. }));
    }
}
