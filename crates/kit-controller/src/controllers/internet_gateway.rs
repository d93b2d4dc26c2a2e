use super::{at_most_one, require, Context};
use crate::error::Result;
use crate::reconciler::{Action, Controller};
use async_trait::async_trait;
use kit_cloud::{ignore_not_found, owned_tags, TagFilter};
use kit_core::resources::{InternetGateway, InternetGatewaySpec};
use serde_json::json;
use tracing::info;

/// The cluster's internet gateway, attached to its VPC
pub struct InternetGatewayController {
    ctx: Context,
}

impl InternetGatewayController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Controller for InternetGatewayController {
    type Spec = InternetGatewaySpec;

    fn name(&self) -> &'static str {
        "internet-gateway"
    }

    async fn reconcile(&self, gateway: &mut InternetGateway) -> Result<Action> {
        let cluster = gateway.cluster_name().to_string();
        let network = &self.ctx.clouds.network;
        let infra = self.ctx.infrastructure(gateway)?;
        let vpc_id = require(gateway, infra.vpc_id.as_ref(), "infrastructure.vpcId")?;

        let existing = network
            .describe_internet_gateways(&TagFilter::cluster(&cluster))
            .await?;
        let found = match at_most_one("internet gateway", &cluster, existing)? {
            Some(found) => found,
            None => {
                let created = network
                    .create_internet_gateway(owned_tags(&cluster, &cluster, None))
                    .await?;
                info!("Created internet gateway {} for cluster {}", created.internet_gateway_id, cluster);
                created
            }
        };

        if found.attached_vpc_id.as_deref() != Some(vpc_id) {
            network
                .attach_internet_gateway(&found.internet_gateway_id, vpc_id)
                .await?;
            info!("Attached internet gateway {} to {}", found.internet_gateway_id, vpc_id);
        }

        gateway.status.internet_gateway_id = Some(found.internet_gateway_id.clone());
        self.ctx.publish(
            gateway,
            json!({ "internetGatewayId": found.internet_gateway_id }),
        )?;
        Ok(Action::await_change())
    }

    async fn finalize(&self, gateway: &mut InternetGateway) -> Result<Action> {
        let cluster = gateway.cluster_name().to_string();
        let network = &self.ctx.clouds.network;

        for found in network
            .describe_internet_gateways(&TagFilter::cluster(&cluster))
            .await?
        {
            if let Some(vpc_id) = &found.attached_vpc_id {
                ignore_not_found(
                    network
                        .detach_internet_gateway(&found.internet_gateway_id, vpc_id)
                        .await,
                )?;
            }
            ignore_not_found(network.delete_internet_gateway(&found.internet_gateway_id).await)?;
            info!("Deleted internet gateway {} of cluster {}", found.internet_gateway_id, cluster);
        }

        gateway.status.internet_gateway_id = None;
        self.ctx.publish(gateway, json!({ "internetGatewayId": null }))?;
        Ok(Action::await_change())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::make_fixture;
    use super::*;
    use kit_cloud::NetworkApi;

    fn make_gateway() -> InternetGateway {
        InternetGateway::new(
            "default",
            "demo",
            InternetGatewaySpec {
                cluster_name: "demo".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_creates_and_attaches() {
        let fixture = make_fixture().await;
        let vpc = fixture
            .cloud
            .create_vpc("10.0.0.0/16", owned_tags("demo", "demo", None))
            .await
            .unwrap();
        fixture.publish(json!({ "vpcId": vpc.vpc_id }));
        let controller = InternetGatewayController::new(fixture.ctx.clone());
        let mut gateway = make_gateway();

        controller.reconcile(&mut gateway).await.unwrap();
        controller.reconcile(&mut gateway).await.unwrap();

        assert_eq!(fixture.cloud.calls("CreateInternetGateway").await, 1);
        assert_eq!(fixture.cloud.calls("AttachInternetGateway").await, 1);
        let found = fixture
            .cloud
            .describe_internet_gateways(&TagFilter::cluster("demo"))
            .await
            .unwrap();
        assert_eq!(found[0].attached_vpc_id.as_deref(), Some(vpc.vpc_id.as_str()));
        assert!(fixture.infrastructure().internet_gateway_id.is_some());
    }

    #[tokio::test]
    async fn test_finalize_detaches_before_delete() {
        let fixture = make_fixture().await;
        let vpc = fixture
            .cloud
            .create_vpc("10.0.0.0/16", owned_tags("demo", "demo", None))
            .await
            .unwrap();
        fixture.publish(json!({ "vpcId": vpc.vpc_id }));
        let controller = InternetGatewayController::new(fixture.ctx.clone());
        let mut gateway = make_gateway();
        controller.reconcile(&mut gateway).await.unwrap();

        controller.finalize(&mut gateway).await.unwrap();

        assert_eq!(fixture.cloud.calls("DetachInternetGateway").await, 1);
        // the VPC is free to go once the gateway is detached
        fixture.cloud.delete_vpc(&vpc.vpc_id).await.unwrap();
    }
}
