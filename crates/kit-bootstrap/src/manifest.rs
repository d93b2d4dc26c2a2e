//! Static pod manifests for the control-plane components

use crate::error::{BootstrapError, Result};
use k8s_openapi::api::core::v1::{
    Container, HTTPGetAction, HostPathVolumeSource, Pod, PodSpec, Probe, ResourceRequirements,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

/// Command-line flags without the leading dashes
pub type Args = BTreeMap<String, String>;

/// Overlay user-supplied flags on computed defaults; the user wins ties
pub fn merge_args(defaults: Args, overrides: &Args) -> Args {
    let mut merged = defaults;
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// `binary --key=value ...` in flag-name order
pub fn command(binary: &str, args: &Args) -> Vec<String> {
    std::iter::once(binary.to_string())
        .chain(args.iter().map(|(k, v)| format!("--{}={}", k, v)))
        .collect()
}

/// A host directory or file mounted into the pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMount {
    pub name: String,
    pub path: String,
    pub read_only: bool,
    /// Host path type, e.g. `DirectoryOrCreate`
    pub kind: String,
}

impl HostMount {
    pub fn directory(name: &str, path: &str, read_only: bool) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            read_only,
            kind: "DirectoryOrCreate".to_string(),
        }
    }

    pub fn file(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            read_only: true,
            kind: "FileOrCreate".to_string(),
        }
    }
}

/// HTTP liveness check against the node's loopback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessCheck {
    pub host: String,
    pub port: i32,
    pub path: String,
    pub scheme: String,
}

/// Everything needed to render one control-plane static pod
#[derive(Debug, Clone, PartialEq)]
pub struct StaticPod {
    pub name: String,
    pub image: String,
    pub binary: String,
    pub args: Args,
    pub mounts: Vec<HostMount>,
    pub liveness: Option<LivenessCheck>,
    pub cpu_request: String,
}

impl StaticPod {
    pub fn to_pod(&self) -> Pod {
        let labels = BTreeMap::from([
            ("component".to_string(), self.name.clone()),
            ("tier".to_string(), "control-plane".to_string()),
        ]);

        let volume_mounts = self
            .mounts
            .iter()
            .map(|m| VolumeMount {
                name: m.name.clone(),
                mount_path: m.path.clone(),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();

        let volumes = self
            .mounts
            .iter()
            .map(|m| Volume {
                name: m.name.clone(),
                host_path: Some(HostPathVolumeSource {
                    path: m.path.clone(),
                    type_: Some(m.kind.clone()),
                }),
                ..Default::default()
            })
            .collect();

        let liveness_probe = self.liveness.as_ref().map(|check| Probe {
            http_get: Some(HTTPGetAction {
                host: Some(check.host.clone()),
                path: Some(check.path.clone()),
                port: IntOrString::Int(check.port),
                scheme: Some(check.scheme.clone()),
                ..Default::default()
            }),
            initial_delay_seconds: Some(10),
            timeout_seconds: Some(15),
            failure_threshold: Some(8),
            ..Default::default()
        });

        Pod {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some("kube-system".to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: self.name.clone(),
                    image: Some(self.image.clone()),
                    image_pull_policy: Some("IfNotPresent".to_string()),
                    command: Some(command(&self.binary, &self.args)),
                    volume_mounts: Some(volume_mounts),
                    liveness_probe,
                    resources: Some(ResourceRequirements {
                        requests: Some(BTreeMap::from([(
                            "cpu".to_string(),
                            Quantity(self.cpu_request.clone()),
                        )])),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                host_network: Some(true),
                priority_class_name: Some("system-node-critical".to_string()),
                volumes: Some(volumes),
                ..Default::default()
            }),
            status: None,
        }
    }

    /// Manifest file content
    pub fn render(&self) -> Result<String> {
        serde_yaml::to_string(&self.to_pod())
            .map_err(|e| BootstrapError::render_error(format!("{}.yaml", self.name), e.to_string()))
    }

    /// Manifest file name under the manifests directory
    pub fn file_name(&self) -> String {
        format!("{}.yaml", self.name)
    }
}
