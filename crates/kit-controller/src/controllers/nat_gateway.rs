use super::{at_most_one, not_ready, require, Context};
use crate::error::Result;
use crate::reconciler::{Action, Controller};
use async_trait::async_trait;
use kit_cloud::model::NatGateway as CloudNatGateway;
use kit_cloud::{ignore_not_found, owned_tags, NetworkApi, TagFilter};
use kit_core::resources::{NatGateway, NatGatewaySpec};
use serde_json::json;
use tracing::info;

/// NAT gateways of a cluster that still count as existing
pub(crate) async fn live_nat_gateways(
    network: &dyn NetworkApi,
    cluster: &str,
) -> kit_cloud::Result<Vec<CloudNatGateway>> {
    Ok(network
        .describe_nat_gateways(&TagFilter::cluster(cluster))
        .await?
        .into_iter()
        .filter(|gw| !gw.state.is_gone())
        .collect())
}

/// Egress for the private subnets, placed in the first public subnet
pub struct NatGatewayController {
    ctx: Context,
}

impl NatGatewayController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Controller for NatGatewayController {
    type Spec = NatGatewaySpec;

    fn name(&self) -> &'static str {
        "nat-gateway"
    }

    async fn reconcile(&self, gateway: &mut NatGateway) -> Result<Action> {
        let cluster = gateway.cluster_name().to_string();
        let network = self.ctx.clouds.network.as_ref();
        let infra = self.ctx.infrastructure(gateway)?;
        let allocation_id = require(
            gateway,
            infra.elastic_ip_allocation_id.as_ref(),
            "infrastructure.elasticIpAllocationId",
        )?;
        let subnet_id = infra
            .public_subnets
            .first()
            .ok_or_else(|| not_ready(gateway, "infrastructure.publicSubnets"))?;

        let existing = live_nat_gateways(network, &cluster).await?;
        let nat_gateway_id = match at_most_one("nat gateway", &cluster, existing)? {
            Some(found) => found.nat_gateway_id,
            None => {
                let created = network
                    .create_nat_gateway(subnet_id, allocation_id, owned_tags(&cluster, &cluster, None))
                    .await?;
                info!(
                    "Created NAT gateway {} in {} for cluster {}",
                    created.nat_gateway_id, subnet_id, cluster
                );
                created.nat_gateway_id
            }
        };

        gateway.status.nat_gateway_id = Some(nat_gateway_id.clone());
        self.ctx
            .publish(gateway, json!({ "natGatewayId": nat_gateway_id }))?;
        Ok(Action::await_change())
    }

    async fn finalize(&self, gateway: &mut NatGateway) -> Result<Action> {
        let cluster = gateway.cluster_name().to_string();
        let network = self.ctx.clouds.network.as_ref();

        for found in live_nat_gateways(network, &cluster).await? {
            ignore_not_found(network.delete_nat_gateway(&found.nat_gateway_id).await)?;
            info!("Deleted NAT gateway {} of cluster {}", found.nat_gateway_id, cluster);
        }

        gateway.status.nat_gateway_id = None;
        self.ctx.publish(gateway, json!({ "natGatewayId": null }))?;
        Ok(Action::await_change())
    }
}
