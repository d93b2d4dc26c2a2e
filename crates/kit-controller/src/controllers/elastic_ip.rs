use super::{at_most_one, Context};
use crate::error::Result;
use crate::reconciler::{Action, Controller};
use async_trait::async_trait;
use kit_cloud::{ignore_not_found, owned_tags, TagFilter};
use kit_core::resources::{ElasticIp, ElasticIpSpec};
use serde_json::json;
use tracing::info;

/// Public address for the NAT gateway
pub struct ElasticIpController {
    ctx: Context,
}

impl ElasticIpController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Controller for ElasticIpController {
    type Spec = ElasticIpSpec;

    fn name(&self) -> &'static str {
        "elastic-ip"
    }

    async fn reconcile(&self, address: &mut ElasticIp) -> Result<Action> {
        let cluster = address.cluster_name().to_string();
        let network = &self.ctx.clouds.network;

        let existing = network.describe_addresses(&TagFilter::cluster(&cluster)).await?;
        let found = match at_most_one("elastic ip", &cluster, existing)? {
            Some(found) => found,
            None => {
                let allocated = network
                    .allocate_address(owned_tags(&cluster, &cluster, None))
                    .await?;
                info!(
                    "Allocated address {} ({}) for cluster {}",
                    allocated.allocation_id, allocated.public_ip, cluster
                );
                allocated
            }
        };

        address.status.allocation_id = Some(found.allocation_id.clone());
        address.status.public_ip = Some(found.public_ip);
        self.ctx.publish(
            address,
            json!({ "elasticIpAllocationId": found.allocation_id }),
        )?;
        Ok(Action::await_change())
    }

    async fn finalize(&self, address: &mut ElasticIp) -> Result<Action> {
        let cluster = address.cluster_name().to_string();
        let network = &self.ctx.clouds.network;

        for found in network.describe_addresses(&TagFilter::cluster(&cluster)).await? {
            ignore_not_found(network.release_address(&found.allocation_id).await)?;
            info!("Released address {} of cluster {}", found.allocation_id, cluster);
        }

        address.status.allocation_id = None;
        address.status.public_ip = None;
        self.ctx
            .publish(address, json!({ "elasticIpAllocationId": null }))?;
        Ok(Action::await_change())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::make_fixture;
    use super::*;
    use kit_cloud::NetworkApi;

    fn make_address() -> ElasticIp {
        ElasticIp::new(
            "default",
            "demo",
            ElasticIpSpec {
                cluster_name: "demo".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_allocates_once() {
        let fixture = make_fixture().await;
        let controller = ElasticIpController::new(fixture.ctx.clone());
        let mut address = make_address();

        controller.reconcile(&mut address).await.unwrap();
        controller.reconcile(&mut address).await.unwrap();

        assert_eq!(fixture.cloud.calls("AllocateAddress").await, 1);
        assert!(address.status.public_ip.is_some());
        assert_eq!(
            fixture.infrastructure().elastic_ip_allocation_id,
            address.status.allocation_id
        );
    }

    #[tokio::test]
    async fn test_finalize_releases() {
        let fixture = make_fixture().await;
        let controller = ElasticIpController::new(fixture.ctx.clone());
        let mut address = make_address();
        controller.reconcile(&mut address).await.unwrap();

        controller.finalize(&mut address).await.unwrap();

        assert!(fixture
            .cloud
            .describe_addresses(&TagFilter::cluster("demo"))
            .await
            .unwrap()
            .is_empty());
        assert!(fixture.infrastructure().elastic_ip_allocation_id.is_none());
    }
}
