use super::nat_gateway::live_nat_gateways;
use super::{at_most_one, not_ready, require, Context};
use crate::error::Result;
use crate::reconciler::{Action, Controller};
use async_trait::async_trait;
use kit_cloud::model::{NatGatewayState, Route, RouteTarget};
use kit_cloud::{ignore_not_found, owned_tags, TagFilter};
use kit_core::naming::object_name;
use kit_core::resources::{RouteTable, RouteTableSpec};
use serde_json::json;
use tracing::{debug, info};

const DEFAULT_ROUTE: &str = "0.0.0.0/0";

/// Public tables route through the internet gateway, private ones through
/// the NAT gateway. Each table is associated with every subnet of its kind.
pub struct RouteTableController {
    ctx: Context,
}

impl RouteTableController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    async fn default_target(&self, table: &RouteTable) -> Result<RouteTarget> {
        let infra = self.ctx.infrastructure(table)?;
        if !table.spec.for_private_subnets {
            let gateway = require(
                table,
                infra.internet_gateway_id.as_ref(),
                "infrastructure.internetGatewayId",
            )?;
            return Ok(RouteTarget::InternetGateway(gateway.to_string()));
        }

        let nat_gateway_id = require(
            table,
            infra.nat_gateway_id.as_ref(),
            "infrastructure.natGatewayId",
        )?;
        let available = live_nat_gateways(self.ctx.clouds.network.as_ref(), table.cluster_name())
            .await?
            .into_iter()
            .any(|gw| gw.nat_gateway_id == nat_gateway_id && gw.state == NatGatewayState::Available);
        if !available {
            return Err(not_ready(table, "an available NAT gateway"));
        }
        Ok(RouteTarget::NatGateway(nat_gateway_id.to_string()))
    }
}

#[async_trait]
impl Controller for RouteTableController {
    type Spec = RouteTableSpec;

    fn name(&self) -> &'static str {
        "route-table"
    }

    async fn reconcile(&self, table: &mut RouteTable) -> Result<Action> {
        let cluster = table.cluster_name().to_string();
        let visibility = table.spec.visibility();
        let network = &self.ctx.clouds.network;
        let infra = self.ctx.infrastructure(table)?;
        let vpc_id = require(table, infra.vpc_id.as_ref(), "infrastructure.vpcId")?;
        let (subnets, dependency) = if table.spec.for_private_subnets {
            (&infra.private_subnets, "infrastructure.privateSubnets")
        } else {
            (&infra.public_subnets, "infrastructure.publicSubnets")
        };
        if subnets.is_empty() {
            return Err(not_ready(table, dependency));
        }
        let target = self.default_target(table).await?;

        let existing = network
            .describe_route_tables(&TagFilter::component(&cluster, visibility))
            .await?;
        let found = match at_most_one("route table", &cluster, existing)? {
            Some(found) => found,
            None => {
                let created = network
                    .create_route_table(
                        vpc_id,
                        owned_tags(&cluster, &object_name(&cluster, visibility), Some(visibility)),
                    )
                    .await?;
                info!("Created {} route table {} for cluster {}", visibility, created.route_table_id, cluster);
                created
            }
        };

        if !found.routes.iter().any(|r| r.destination_cidr == DEFAULT_ROUTE) {
            debug!("Adding default route via {:?} to {}", target, found.route_table_id);
            network
                .create_route(
                    &found.route_table_id,
                    Route {
                        destination_cidr: DEFAULT_ROUTE.to_string(),
                        target,
                    },
                )
                .await?;
        }

        for subnet_id in subnets {
            if found.associations.iter().any(|a| &a.subnet_id == subnet_id) {
                continue;
            }
            network
                .associate_route_table(&found.route_table_id, subnet_id)
                .await?;
            debug!("Associated {} with route table {}", subnet_id, found.route_table_id);
        }

        table.status.route_table_id = Some(found.route_table_id.clone());
        self.ctx.publish(
            table,
            json!({ "routeTables": { visibility: found.route_table_id } }),
        )?;
        Ok(Action::await_change())
    }

    async fn finalize(&self, table: &mut RouteTable) -> Result<Action> {
        let cluster = table.cluster_name().to_string();
        let visibility = table.spec.visibility();
        let network = &self.ctx.clouds.network;

        for found in network
            .describe_route_tables(&TagFilter::component(&cluster, visibility))
            .await?
        {
            for association in &found.associations {
                ignore_not_found(
                    network
                        .disassociate_route_table(&association.association_id)
                        .await,
                )?;
            }
            ignore_not_found(network.delete_route_table(&found.route_table_id).await)?;
            info!("Deleted {} route table {} of cluster {}", visibility, found.route_table_id, cluster);
        }

        table.status.route_table_id = None;
        self.ctx
            .publish(table, json!({ "routeTables": { visibility: null } }))?;
        Ok(Action::await_change())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{make_fixture, Fixture};
    use super::*;
    use kit_cloud::model::CreateSubnet;
    use kit_cloud::NetworkApi;

    fn make_table(private: bool) -> RouteTable {
        let name = if private { "demo-private" } else { "demo-public" };
        RouteTable::new(
            "default",
            name,
            RouteTableSpec {
                cluster_name: "demo".to_string(),
                for_private_subnets: private,
            },
        )
    }

    /// VPC, gateway, one public and one private subnet, all published
    async fn make_network(fixture: &Fixture) {
        let cloud = &fixture.cloud;
        let vpc = cloud
            .create_vpc("10.0.0.0/16", owned_tags("demo", "demo", None))
            .await
            .unwrap();
        let gateway = cloud
            .create_internet_gateway(owned_tags("demo", "demo", None))
            .await
            .unwrap();
        let mut ids = Vec::new();
        for (cidr, public) in [("10.0.0.0/20", false), ("10.0.48.0/20", true)] {
            let subnet = cloud
                .create_subnet(CreateSubnet {
                    vpc_id: vpc.vpc_id.clone(),
                    cidr_block: cidr.to_string(),
                    availability_zone: "us-west-2a".to_string(),
                    map_public_ip_on_launch: public,
                    tags: owned_tags("demo", cidr, None),
                })
                .await
                .unwrap();
            ids.push(subnet.subnet_id);
        }
        fixture.publish(json!({
            "vpcId": vpc.vpc_id,
            "internetGatewayId": gateway.internet_gateway_id,
            "privateSubnets": [ids[0]],
            "publicSubnets": [ids[1]],
        }));
    }

    #[tokio::test]
    async fn test_public_table_routes_through_gateway() {
        let fixture = make_fixture().await;
        make_network(&fixture).await;
        let controller = RouteTableController::new(fixture.ctx.clone());
        let mut table = make_table(false);

        controller.reconcile(&mut table).await.unwrap();
        controller.reconcile(&mut table).await.unwrap();

        assert_eq!(fixture.cloud.calls("CreateRouteTable").await, 1);
        assert_eq!(fixture.cloud.calls("CreateRoute").await, 1);
        assert_eq!(fixture.cloud.calls("AssociateRouteTable").await, 1);
        let infra = fixture.infrastructure();
        assert_eq!(infra.route_tables.public, table.status.route_table_id);
        assert!(infra.route_tables.private.is_none());

        let found = fixture
            .cloud
            .describe_route_tables(&TagFilter::component("demo", "public"))
            .await
            .unwrap();
        assert!(matches!(
            found[0].routes[0].target,
            RouteTarget::InternetGateway(_)
        ));
    }

    #[tokio::test]
    async fn test_private_table_waits_for_available_nat() {
        let fixture = make_fixture().await;
        make_network(&fixture).await;
        let controller = RouteTableController::new(fixture.ctx.clone());
        let mut table = make_table(true);

        let err = controller.reconcile(&mut table).await.unwrap_err();
        assert!(err.is_dependency_not_ready());

        let infra = fixture.infrastructure();
        let address = fixture
            .cloud
            .allocate_address(owned_tags("demo", "demo", None))
            .await
            .unwrap();
        let nat = fixture
            .cloud
            .create_nat_gateway(
                &infra.public_subnets[0],
                &address.allocation_id,
                owned_tags("demo", "demo", None),
            )
            .await
            .unwrap();
        fixture
            .cloud
            .set_nat_gateway_state(&nat.nat_gateway_id, NatGatewayState::Pending)
            .await;
        fixture.publish(json!({ "natGatewayId": nat.nat_gateway_id }));

        let err = controller.reconcile(&mut table).await.unwrap_err();
        assert!(err.is_dependency_not_ready());
        assert_eq!(fixture.cloud.calls("CreateRouteTable").await, 0);

        fixture
            .cloud
            .set_nat_gateway_state(&nat.nat_gateway_id, NatGatewayState::Available)
            .await;
        controller.reconcile(&mut table).await.unwrap();
        assert!(fixture.infrastructure().route_tables.private.is_some());
    }

    #[tokio::test]
    async fn test_finalize_disassociates_then_deletes() {
        let fixture = make_fixture().await;
        make_network(&fixture).await;
        let controller = RouteTableController::new(fixture.ctx.clone());
        let mut table = make_table(false);
        controller.reconcile(&mut table).await.unwrap();

        controller.finalize(&mut table).await.unwrap();

        assert_eq!(fixture.cloud.calls("DisassociateRouteTable").await, 1);
        assert!(fixture
            .cloud
            .describe_route_tables(&TagFilter::cluster("demo"))
            .await
            .unwrap()
            .is_empty());
        assert!(fixture.infrastructure().route_tables.public.is_none());
    }
}
