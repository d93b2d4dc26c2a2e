use super::{require, Context};
use crate::error::{ReconcileError, Result};
use crate::reconciler::{Action, Controller};
use async_trait::async_trait;
use kit_cloud::model::CreateSubnet;
use kit_cloud::{ignore_not_found, owned_tags, TagFilter};
use kit_core::naming::object_name;
use kit_core::resources::{Subnet, SubnetProperty, SubnetSpec};
use serde_json::json;
use tracing::info;

fn visibility(item: &SubnetProperty) -> &'static str {
    if item.public {
        "public"
    } else {
        "private"
    }
}

/// Private and public subnets, one of each per availability zone
pub struct SubnetController {
    ctx: Context,
}

impl SubnetController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Controller for SubnetController {
    type Spec = SubnetSpec;

    fn name(&self) -> &'static str {
        "subnet"
    }

    async fn reconcile(&self, subnet: &mut Subnet) -> Result<Action> {
        let cluster = subnet.cluster_name().to_string();
        let network = &self.ctx.clouds.network;
        let infra = self.ctx.infrastructure(subnet)?;
        let vpc_id = require(subnet, infra.vpc_id.as_ref(), "infrastructure.vpcId")?;

        let mut existing = network.describe_subnets(&TagFilter::cluster(&cluster)).await?;
        if existing.len() > subnet.spec.items.len() {
            return Err(ReconcileError::cardinality_violation(
                "subnet",
                &cluster,
                subnet.spec.items.len(),
                existing.len(),
            ));
        }

        let mut private = Vec::new();
        let mut public = Vec::new();
        for item in &subnet.spec.items {
            let id = match existing.iter().find(|s| s.cidr_block == item.cidr) {
                Some(found) => found.subnet_id.clone(),
                None => {
                    let name = object_name(&cluster, &format!("{}-{}", visibility(item), item.az));
                    let created = network
                        .create_subnet(CreateSubnet {
                            vpc_id: vpc_id.to_string(),
                            cidr_block: item.cidr.clone(),
                            availability_zone: item.az.clone(),
                            map_public_ip_on_launch: item.public,
                            tags: owned_tags(&cluster, &name, Some(visibility(item))),
                        })
                        .await?;
                    info!(
                        "Created {} subnet {} ({}) in {}",
                        visibility(item),
                        created.subnet_id,
                        item.cidr,
                        item.az
                    );
                    let id = created.subnet_id.clone();
                    existing.push(created);
                    id
                }
            };
            if item.public {
                public.push(id);
            } else {
                private.push(id);
            }
        }

        subnet.status.private_subnets = private.clone();
        subnet.status.public_subnets = public.clone();
        self.ctx.publish(
            subnet,
            json!({ "privateSubnets": private, "publicSubnets": public }),
        )?;
        Ok(Action::await_change())
    }

    async fn finalize(&self, subnet: &mut Subnet) -> Result<Action> {
        let cluster = subnet.cluster_name().to_string();
        let network = &self.ctx.clouds.network;

        for found in network.describe_subnets(&TagFilter::cluster(&cluster)).await? {
            ignore_not_found(network.delete_subnet(&found.subnet_id).await)?;
            info!("Deleted subnet {} of cluster {}", found.subnet_id, cluster);
        }

        subnet.status.private_subnets.clear();
        subnet.status.public_subnets.clear();
        self.ctx.publish(
            subnet,
            json!({ "privateSubnets": null, "publicSubnets": null }),
        )?;
        Ok(Action::await_change())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::make_fixture;
    use super::*;
    use kit_cloud::NetworkApi;
    use kit_core::naming::{availability_zones, subnet_cidrs};

    fn make_subnet() -> Subnet {
        let zones = availability_zones("us-west-2");
        let items = subnet_cidrs("10.0.0.0/16")
            .unwrap()
            .into_iter()
            .enumerate()
            .map(|(i, cidr)| SubnetProperty {
                cidr,
                az: zones[i % 3].clone(),
                public: i >= 3,
            })
            .collect();
        Subnet::new(
            "default",
            "demo",
            SubnetSpec {
                cluster_name: "demo".to_string(),
                items,
            },
        )
    }

    async fn make_vpc(fixture: &super::super::testing::Fixture) -> String {
        let vpc = fixture
            .cloud
            .create_vpc("10.0.0.0/16", owned_tags("demo", "demo", None))
            .await
            .unwrap();
        fixture.publish(json!({ "vpcId": vpc.vpc_id }));
        vpc.vpc_id
    }

    #[tokio::test]
    async fn test_waits_for_vpc() {
        let fixture = make_fixture().await;
        let controller = SubnetController::new(fixture.ctx.clone());

        let err = controller.reconcile(&mut make_subnet()).await.unwrap_err();
        assert!(err.is_dependency_not_ready());
        assert_eq!(fixture.cloud.calls("CreateSubnet").await, 0);
    }

    #[tokio::test]
    async fn test_creates_six_subnets_once() {
        let fixture = make_fixture().await;
        make_vpc(&fixture).await;
        let controller = SubnetController::new(fixture.ctx.clone());
        let mut subnet = make_subnet();

        controller.reconcile(&mut subnet).await.unwrap();
        controller.reconcile(&mut subnet).await.unwrap();

        assert_eq!(fixture.cloud.calls("CreateSubnet").await, 6);
        let infra = fixture.infrastructure();
        assert_eq!(infra.private_subnets.len(), 3);
        assert_eq!(infra.public_subnets.len(), 3);
        assert_eq!(infra.private_subnets, subnet.status.private_subnets);

        let public = fixture
            .cloud
            .describe_subnets(&TagFilter::component("demo", "public"))
            .await
            .unwrap();
        assert!(public.iter().all(|s| s.map_public_ip_on_launch));
    }

    #[tokio::test]
    async fn test_missing_subnet_is_recreated_alone() {
        let fixture = make_fixture().await;
        make_vpc(&fixture).await;
        let controller = SubnetController::new(fixture.ctx.clone());
        let mut subnet = make_subnet();
        controller.reconcile(&mut subnet).await.unwrap();

        let lost = subnet.status.public_subnets[1].clone();
        fixture.cloud.delete_subnet(&lost).await.unwrap();
        controller.reconcile(&mut subnet).await.unwrap();

        assert_eq!(fixture.cloud.calls("CreateSubnet").await, 7);
        assert_ne!(subnet.status.public_subnets[1], lost);
    }

    #[tokio::test]
    async fn test_extra_subnet_is_a_cardinality_violation() {
        let fixture = make_fixture().await;
        let vpc_id = make_vpc(&fixture).await;
        let controller = SubnetController::new(fixture.ctx.clone());
        let mut subnet = make_subnet();
        controller.reconcile(&mut subnet).await.unwrap();
        let before = subnet.status.clone();

        fixture
            .cloud
            .create_subnet(CreateSubnet {
                vpc_id,
                cidr_block: "10.0.200.0/24".to_string(),
                availability_zone: "us-west-2a".to_string(),
                map_public_ip_on_launch: false,
                tags: owned_tags("demo", "stray", None),
            })
            .await
            .unwrap();

        let err = controller.reconcile(&mut subnet).await.unwrap_err();
        assert_eq!(err.reason(), "CardinalityViolation");
        assert_eq!(subnet.status, before);
    }
}
