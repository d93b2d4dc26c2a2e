use super::{at_most_one, Context};
use crate::error::Result;
use crate::reconciler::{Action, Controller};
use async_trait::async_trait;
use kit_cloud::{ignore_not_found, owned_tags, TagFilter};
use kit_core::resources::{Vpc, VpcSpec};
use serde_json::json;
use tracing::info;

/// One VPC per cluster
pub struct VpcController {
    ctx: Context,
}

impl VpcController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Controller for VpcController {
    type Spec = VpcSpec;

    fn name(&self) -> &'static str {
        "vpc"
    }

    async fn reconcile(&self, vpc: &mut Vpc) -> Result<Action> {
        let cluster = vpc.cluster_name().to_string();
        let network = &self.ctx.clouds.network;

        let existing = network.describe_vpcs(&TagFilter::cluster(&cluster)).await?;
        let vpc_id = match at_most_one("vpc", &cluster, existing)? {
            Some(found) => found.vpc_id,
            None => {
                let created = network
                    .create_vpc(&vpc.spec.cidr, owned_tags(&cluster, &cluster, None))
                    .await?;
                info!("Created VPC {} ({}) for cluster {}", created.vpc_id, vpc.spec.cidr, cluster);
                created.vpc_id
            }
        };

        vpc.status.vpc_id = Some(vpc_id.clone());
        self.ctx.publish(vpc, json!({ "vpcId": vpc_id }))?;
        Ok(Action::await_change())
    }

    async fn finalize(&self, vpc: &mut Vpc) -> Result<Action> {
        let cluster = vpc.cluster_name().to_string();
        let network = &self.ctx.clouds.network;

        for found in network.describe_vpcs(&TagFilter::cluster(&cluster)).await? {
            ignore_not_found(network.delete_vpc(&found.vpc_id).await)?;
            info!("Deleted VPC {} of cluster {}", found.vpc_id, cluster);
        }

        vpc.status.vpc_id = None;
        self.ctx.publish(vpc, json!({ "vpcId": null }))?;
        Ok(Action::await_change())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::make_fixture;
    use super::*;
    use kit_cloud::NetworkApi;

    fn make_vpc() -> Vpc {
        Vpc::new(
            "default",
            "demo",
            VpcSpec {
                cluster_name: "demo".to_string(),
                cidr: "10.0.0.0/16".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_reconcile_creates_once() {
        let fixture = make_fixture().await;
        let controller = VpcController::new(fixture.ctx.clone());
        let mut vpc = make_vpc();

        controller.reconcile(&mut vpc).await.unwrap();
        let first = vpc.status.clone();
        controller.reconcile(&mut vpc).await.unwrap();

        assert_eq!(vpc.status, first);
        assert_eq!(fixture.cloud.calls("CreateVpc").await, 1);
        assert_eq!(fixture.infrastructure().vpc_id, first.vpc_id);
    }

    #[tokio::test]
    async fn test_duplicate_vpcs_are_a_cardinality_violation() {
        let fixture = make_fixture().await;
        for _ in 0..2 {
            fixture
                .cloud
                .create_vpc("10.0.0.0/16", owned_tags("demo", "demo", None))
                .await
                .unwrap();
        }
        let controller = VpcController::new(fixture.ctx.clone());
        let mut vpc = make_vpc();

        let err = controller.reconcile(&mut vpc).await.unwrap_err();
        assert_eq!(err.reason(), "CardinalityViolation");
        assert!(vpc.status.vpc_id.is_none());
        assert!(fixture.infrastructure().vpc_id.is_none());
    }

    #[tokio::test]
    async fn test_discovery_is_scoped_to_the_cluster() {
        let fixture = make_fixture().await;
        fixture
            .cloud
            .create_vpc("10.0.0.0/16", owned_tags("other", "demo", None))
            .await
            .unwrap();
        let controller = VpcController::new(fixture.ctx.clone());
        let mut vpc = make_vpc();

        controller.reconcile(&mut vpc).await.unwrap();
        assert_eq!(fixture.cloud.calls("CreateVpc").await, 2);
    }

    #[tokio::test]
    async fn test_finalize_without_vpc_does_not_delete() {
        let fixture = make_fixture().await;
        let controller = VpcController::new(fixture.ctx.clone());

        let action = controller.finalize(&mut make_vpc()).await.unwrap();
        assert_eq!(action, Action::AwaitChange);
        assert_eq!(fixture.cloud.calls("DeleteVpc").await, 0);
    }

    #[tokio::test]
    async fn test_finalize_deletes_and_clears_handle() {
        let fixture = make_fixture().await;
        let controller = VpcController::new(fixture.ctx.clone());
        let mut vpc = make_vpc();
        controller.reconcile(&mut vpc).await.unwrap();

        controller.finalize(&mut vpc).await.unwrap();
        assert!(fixture.infrastructure().vpc_id.is_none());
        assert!(fixture
            .cloud
            .describe_vpcs(&TagFilter::cluster("demo"))
            .await
            .unwrap()
            .is_empty());
    }
}
