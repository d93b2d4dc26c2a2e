use super::{impl_status, Object, Spec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use serde::{Deserialize, Serialize};

/// Object storage bucket that serves as the bootstrap distribution target
pub type Bucket = Object<BucketSpec>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSpec {
    pub cluster_name: String,
    pub bucket_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,
}

impl Spec for BucketSpec {
    const KIND: &'static str = "Bucket";
    type Status = BucketStatus;

    fn cluster_name(&self) -> Option<&str> {
        Some(&self.cluster_name)
    }
}

impl_status!(BucketStatus);
