use crate::naming::CLUSTER_TAG;
use crate::types::ResourceKey;
use serde::{Deserialize, Serialize};

/// Watch event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

/// A change notification emitted by the state store on every mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceEvent {
    /// Type of watch event (ADDED, MODIFIED, DELETED)
    pub event_type: WatchEventType,
    /// Full record key (gvk + namespace + name)
    pub resource_key: ResourceKey,
    /// The serialized record; for DELETED, the last known state
    pub object: serde_json::Value,
    /// Resource version at the time of the event
    pub resource_version: String,
}

impl ResourceEvent {
    pub fn new(
        event_type: WatchEventType,
        resource_key: ResourceKey,
        object: serde_json::Value,
        resource_version: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            resource_key,
            object,
            resource_version: resource_version.into(),
        }
    }

    /// Kind of the record this event is about
    pub fn kind(&self) -> &str {
        &self.resource_key.gvk.kind
    }

    /// Whether the record carries a deletion timestamp or is gone
    pub fn is_deletion(&self) -> bool {
        self.event_type == WatchEventType::Deleted
            || !self.object["metadata"]["deletionTimestamp"].is_null()
    }

    /// Cluster that owns the record, read from its cluster label
    pub fn cluster_label(&self) -> Option<&str> {
        self.object["metadata"]["labels"][CLUSTER_TAG].as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GroupVersionKind;

    fn make_event(event_type: WatchEventType, object: serde_json::Value) -> ResourceEvent {
        let key = ResourceKey::new(GroupVersionKind::kit("Subnet"), "default", "demo");
        ResourceEvent::new(event_type, key, object, "7")
    }

    #[test]
    fn test_event_serde_roundtrip() {
        let event = make_event(WatchEventType::Added, serde_json::json!({"kind": "Subnet"}));
        let serialized = serde_json::to_string(&event).unwrap();
        assert!(serialized.contains("\"ADDED\""));

        let back: ResourceEvent = serde_json::from_str(&serialized).unwrap();
        assert_eq!(back.event_type, WatchEventType::Added);
        assert_eq!(back.kind(), "Subnet");
        assert_eq!(back.resource_version, "7");
    }

    #[test]
    fn test_cluster_label_and_deletion_marker() {
        let event = make_event(
            WatchEventType::Modified,
            serde_json::json!({
                "metadata": {
                    "labels": {CLUSTER_TAG: "demo"},
                    "deletionTimestamp": "2024-01-01T00:00:00Z"
                }
            }),
        );
        assert_eq!(event.cluster_label(), Some("demo"));
        assert!(event.is_deletion());

        let live = make_event(WatchEventType::Modified, serde_json::json!({"metadata": {}}));
        assert_eq!(live.cluster_label(), None);
        assert!(!live.is_deletion());
    }
}
