use super::{at_most_one, Context};
use crate::error::Result;
use crate::reconciler::{Action, Controller};
use async_trait::async_trait;
use kit_cloud::{ignore_not_found, owned_tags, TagFilter};
use kit_core::resources::{Bucket, BucketSpec};
use serde_json::json;
use tracing::{debug, info};

/// Keys removed per batch delete call
const DELETE_BATCH: usize = 1000;

/// The bucket nodes pull their bootstrap material from
pub struct BucketController {
    ctx: Context,
}

impl BucketController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Controller for BucketController {
    type Spec = BucketSpec;

    fn name(&self) -> &'static str {
        "bucket"
    }

    async fn reconcile(&self, bucket: &mut Bucket) -> Result<Action> {
        let cluster = bucket.cluster_name().to_string();
        let storage = &self.ctx.clouds.object_storage;

        let existing = storage.describe_buckets(&TagFilter::cluster(&cluster)).await?;
        let name = match at_most_one("bucket", &cluster, existing)? {
            Some(found) => found.name,
            None => {
                let created = storage
                    .create_bucket(
                        &bucket.spec.bucket_name,
                        owned_tags(&cluster, &bucket.spec.bucket_name, None),
                    )
                    .await?;
                info!("Created bucket {} for cluster {}", created.name, cluster);
                created.name
            }
        };

        bucket.status.bucket_name = Some(name.clone());
        self.ctx.publish(bucket, json!({ "bucket": name }))?;
        Ok(Action::await_change())
    }

    async fn finalize(&self, bucket: &mut Bucket) -> Result<Action> {
        let cluster = bucket.cluster_name().to_string();
        let storage = &self.ctx.clouds.object_storage;

        for found in storage.describe_buckets(&TagFilter::cluster(&cluster)).await? {
            let keys = storage.list_objects(&found.name, "").await?;
            debug!("Emptying bucket {} ({} objects)", found.name, keys.len());
            for batch in keys.chunks(DELETE_BATCH) {
                storage.delete_objects(&found.name, batch.to_vec()).await?;
            }
            ignore_not_found(storage.delete_bucket(&found.name).await)?;
            info!("Deleted bucket {} of cluster {}", found.name, cluster);
        }

        bucket.status.bucket_name = None;
        self.ctx.publish(bucket, json!({ "bucket": null }))?;
        Ok(Action::await_change())
    }
}
