use super::target_group::PROTOCOL;
use super::{at_most_one, not_ready, require, Context};
use crate::error::Result;
use crate::reconciler::{Action, Controller};
use async_trait::async_trait;
use kit_cloud::{ignore_not_found, owned_tags, TagFilter};
use kit_core::resources::{LoadBalancer, LoadBalancerSpec};
use serde_json::json;
use tracing::info;

/// Network load balancer in front of a component, listening on its port.
///
/// The published handle is the DNS name; bootstrap uses it as the
/// component's endpoint.
pub struct LoadBalancerController {
    ctx: Context,
}

impl LoadBalancerController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Controller for LoadBalancerController {
    type Spec = LoadBalancerSpec;

    fn name(&self) -> &'static str {
        "load-balancer"
    }

    async fn reconcile(&self, balancer: &mut LoadBalancer) -> Result<Action> {
        let cluster = balancer.cluster_name().to_string();
        let component = balancer.spec.component.as_str();
        let load_balancing = &self.ctx.clouds.load_balancing;
        let infra = self.ctx.infrastructure(balancer)?;
        let target_group_arn = require(
            balancer,
            infra.target_groups.get(component),
            &format!("infrastructure.targetGroups.{}", component),
        )?;
        if infra.public_subnets.is_empty() {
            return Err(not_ready(balancer, "infrastructure.publicSubnets"));
        }

        let existing = load_balancing
            .describe_load_balancers(&TagFilter::component(&cluster, component))
            .await?;
        let found = match at_most_one("load balancer", &cluster, existing)? {
            Some(found) => found,
            None => {
                let created = load_balancing
                    .create_load_balancer(
                        &balancer.spec.name,
                        &balancer.spec.scheme,
                        infra.public_subnets.clone(),
                        owned_tags(&cluster, &balancer.spec.name, Some(component)),
                    )
                    .await?;
                info!(
                    "Created {} load balancer {} ({}) for cluster {}",
                    created.scheme, created.name, created.dns_name, cluster
                );
                created
            }
        };

        let listeners = load_balancing.describe_listeners(&found.arn).await?;
        if !listeners.iter().any(|l| l.port == balancer.spec.port) {
            load_balancing
                .create_listener(&found.arn, balancer.spec.port, PROTOCOL, target_group_arn)
                .await?;
            info!("Listening on {} at {}", balancer.spec.port, found.dns_name);
        }

        balancer.status.load_balancer_arn = Some(found.arn);
        balancer.status.dns_name = Some(found.dns_name.clone());
        self.ctx.publish(
            balancer,
            json!({ "loadBalancers": { component: found.dns_name } }),
        )?;
        Ok(Action::await_change())
    }

    async fn finalize(&self, balancer: &mut LoadBalancer) -> Result<Action> {
        let cluster = balancer.cluster_name().to_string();
        let component = balancer.spec.component.as_str();
        let load_balancing = &self.ctx.clouds.load_balancing;

        for found in load_balancing
            .describe_load_balancers(&TagFilter::component(&cluster, component))
            .await?
        {
            ignore_not_found(load_balancing.delete_load_balancer(&found.arn).await)?;
            info!("Deleted load balancer {} of cluster {}", found.name, cluster);
        }

        balancer.status.load_balancer_arn = None;
        balancer.status.dns_name = None;
        self.ctx.publish(
            balancer,
            json!({ "loadBalancers": { component: null } }),
        )?;
        Ok(Action::await_change())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::make_fixture;
    use super::*;
    use kit_cloud::{LoadBalancingApi, NetworkApi};
    use kit_core::Component;

    fn make_balancer() -> LoadBalancer {
        LoadBalancer::new(
            "default",
            "demo-master",
            LoadBalancerSpec {
                cluster_name: "demo".to_string(),
                component: Component::Master,
                name: "demo-master".to_string(),
                scheme: "internet-facing".to_string(),
                port: 443,
            },
        )
    }

    #[tokio::test]
    async fn test_publishes_dns_name_and_listens_once() {
        let fixture = make_fixture().await;
        let vpc = fixture
            .cloud
            .create_vpc("10.0.0.0/16", owned_tags("demo", "demo", None))
            .await
            .unwrap();
        let target = fixture
            .cloud
            .create_target_group("demo-master-tg", 443, PROTOCOL, &vpc.vpc_id, Default::default())
            .await
            .unwrap();
        let controller = LoadBalancerController::new(fixture.ctx.clone());
        let mut balancer = make_balancer();

        fixture.publish(json!({ "targetGroups": { "master": target.arn } }));
        let err = controller.reconcile(&mut balancer).await.unwrap_err();
        assert!(err.is_dependency_not_ready());

        fixture.publish(json!({ "publicSubnets": ["subnet-a", "subnet-b"] }));
        controller.reconcile(&mut balancer).await.unwrap();
        controller.reconcile(&mut balancer).await.unwrap();

        assert_eq!(fixture.cloud.calls("CreateLoadBalancer").await, 1);
        assert_eq!(fixture.cloud.calls("CreateListener").await, 1);
        let dns = balancer.status.dns_name.clone().unwrap();
        assert_eq!(fixture.infrastructure().load_balancers["master"], dns);

        let found = fixture
            .cloud
            .describe_load_balancers(&TagFilter::component("demo", "master"))
            .await
            .unwrap();
        assert_eq!(found[0].scheme, "internet-facing");

        controller.finalize(&mut balancer).await.unwrap();
        assert!(fixture.infrastructure().load_balancers.is_empty());
        // the listener went with the balancer
        fixture.cloud.delete_target_group(&target.arn).await.unwrap();
    }
}
