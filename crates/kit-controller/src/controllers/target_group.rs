use super::{at_most_one, require, Context};
use crate::error::Result;
use crate::reconciler::{Action, Controller};
use async_trait::async_trait;
use kit_cloud::{ignore_not_found, owned_tags, TagFilter};
use kit_core::resources::{TargetGroup, TargetGroupSpec};
use serde_json::json;
use tracing::info;

pub(crate) const PROTOCOL: &str = "TCP";

/// TCP target group fed by a component's scaling group
pub struct TargetGroupController {
    ctx: Context,
}

impl TargetGroupController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Controller for TargetGroupController {
    type Spec = TargetGroupSpec;

    fn name(&self) -> &'static str {
        "target-group"
    }

    async fn reconcile(&self, target: &mut TargetGroup) -> Result<Action> {
        let cluster = target.cluster_name().to_string();
        let component = target.spec.component.as_str();
        let load_balancing = &self.ctx.clouds.load_balancing;
        let infra = self.ctx.infrastructure(target)?;
        let vpc_id = require(target, infra.vpc_id.as_ref(), "infrastructure.vpcId")?;
        let group_name = require(
            target,
            infra.auto_scaling_groups.get(component),
            &format!("infrastructure.autoScalingGroups.{}", component),
        )?;

        let existing = load_balancing
            .describe_target_groups(&TagFilter::component(&cluster, component))
            .await?;
        let arn = match at_most_one("target group", &cluster, existing)? {
            Some(found) => found.arn,
            None => {
                let created = load_balancing
                    .create_target_group(
                        &target.spec.target_group_name,
                        target.spec.port,
                        PROTOCOL,
                        vpc_id,
                        owned_tags(&cluster, &target.spec.target_group_name, Some(component)),
                    )
                    .await?;
                info!("Created target group {} for cluster {}", created.name, cluster);
                created.arn
            }
        };

        let attached = self
            .ctx
            .clouds
            .compute
            .describe_auto_scaling_groups(&TagFilter::component(&cluster, component))
            .await?
            .into_iter()
            .any(|g| g.name == group_name && g.target_group_arns.contains(&arn));
        if !attached {
            load_balancing.attach_target_group(group_name, &arn).await?;
            info!("Attached target group {} to {}", target.spec.target_group_name, group_name);
        }

        target.status.target_group_arn = Some(arn.clone());
        self.ctx.publish(
            target,
            json!({ "targetGroups": { component: arn } }),
        )?;
        Ok(Action::await_change())
    }

    async fn finalize(&self, target: &mut TargetGroup) -> Result<Action> {
        let cluster = target.cluster_name().to_string();
        let component = target.spec.component.as_str();
        let load_balancing = &self.ctx.clouds.load_balancing;

        // Fails with a dependency violation while a listener still forwards here
        for found in load_balancing
            .describe_target_groups(&TagFilter::component(&cluster, component))
            .await?
        {
            ignore_not_found(load_balancing.delete_target_group(&found.arn).await)?;
            info!("Deleted target group {} of cluster {}", found.name, cluster);
        }

        target.status.target_group_arn = None;
        self.ctx.publish(
            target,
            json!({ "targetGroups": { component: null } }),
        )?;
        Ok(Action::await_change())
    }
}

#[cfg(test)]
mod tests {
    use super::super::role::assume_role_policy;
    use super::super::testing::{make_fixture, Fixture};
    use super::*;
    use kit_cloud::model::{CreateAutoScalingGroup, CreateLaunchTemplate};
    use kit_cloud::{ComputeApi, IdentityApi, LoadBalancingApi, NetworkApi};
    use kit_core::Component;

    fn make_target() -> TargetGroup {
        TargetGroup::new(
            "default",
            "demo-etcd",
            TargetGroupSpec {
                cluster_name: "demo".to_string(),
                component: Component::Etcd,
                target_group_name: "demo-etcd-tg".to_string(),
                port: 2379,
                auto_scaling_group_name: "demo-etcd-asg".to_string(),
            },
        )
    }

    /// VPC and a running etcd scaling group, both published
    async fn make_group(fixture: &Fixture) {
        let cloud = &fixture.cloud;
        let vpc = cloud
            .create_vpc("10.0.0.0/16", owned_tags("demo", "demo", None))
            .await
            .unwrap();
        cloud
            .create_role("demo-etcd-role", &assume_role_policy(), Default::default())
            .await
            .unwrap();
        cloud
            .create_instance_profile("demo-etcd-profile", Default::default())
            .await
            .unwrap();
        cloud
            .create_launch_template(CreateLaunchTemplate {
                name: "demo-etcd-template".to_string(),
                image_id: "ami-1".to_string(),
                instance_type: "t2.large".to_string(),
                volume_size_gib: 40,
                volume_type: "gp3".to_string(),
                security_group_ids: vec![],
                instance_profile_name: "demo-etcd-profile".to_string(),
                user_data: String::new(),
                tags: Default::default(),
            })
            .await
            .unwrap();
        cloud
            .create_auto_scaling_group(CreateAutoScalingGroup {
                name: "demo-etcd-asg".to_string(),
                launch_template_name: "demo-etcd-template".to_string(),
                subnet_ids: vec![],
                desired_capacity: 1,
                min_size: 1,
                max_size: 4,
                tags: owned_tags("demo", "demo-etcd", Some("etcd")),
            })
            .await
            .unwrap();
        fixture.publish(json!({
            "vpcId": vpc.vpc_id,
            "autoScalingGroups": { "etcd": "demo-etcd-asg" },
        }));
    }

    #[tokio::test]
    async fn test_waits_for_scaling_group() {
        let fixture = make_fixture().await;
        let controller = TargetGroupController::new(fixture.ctx.clone());

        let err = controller.reconcile(&mut make_target()).await.unwrap_err();
        assert!(err.is_dependency_not_ready());
    }

    #[tokio::test]
    async fn test_creates_and_attaches_once() {
        let fixture = make_fixture().await;
        make_group(&fixture).await;
        let controller = TargetGroupController::new(fixture.ctx.clone());
        let mut target = make_target();

        controller.reconcile(&mut target).await.unwrap();
        controller.reconcile(&mut target).await.unwrap();

        assert_eq!(fixture.cloud.calls("CreateTargetGroup").await, 1);
        assert_eq!(fixture.cloud.calls("AttachLoadBalancerTargetGroups").await, 1);
        let arn = target.status.target_group_arn.clone().unwrap();
        let groups = fixture
            .cloud
            .describe_auto_scaling_groups(&TagFilter::component("demo", "etcd"))
            .await
            .unwrap();
        assert_eq!(groups[0].target_group_arns, vec![arn.clone()]);
        assert_eq!(fixture.infrastructure().target_groups["etcd"], arn);
    }

    #[tokio::test]
    async fn test_finalize_blocked_by_listener() {
        let fixture = make_fixture().await;
        make_group(&fixture).await;
        let controller = TargetGroupController::new(fixture.ctx.clone());
        let mut target = make_target();
        controller.reconcile(&mut target).await.unwrap();
        let arn = target.status.target_group_arn.clone().unwrap();

        let lb = fixture
            .cloud
            .create_load_balancer("demo-etcd", "internal", vec![], owned_tags("demo", "demo-etcd", Some("etcd")))
            .await
            .unwrap();
        fixture
            .cloud
            .create_listener(&lb.arn, 2379, PROTOCOL, &arn)
            .await
            .unwrap();

        let err = controller.finalize(&mut target).await.unwrap_err();
        assert_eq!(err.reason(), "DependencyViolation");

        fixture.cloud.delete_load_balancer(&lb.arn).await.unwrap();
        controller.finalize(&mut target).await.unwrap();
        assert!(fixture.infrastructure().target_groups.is_empty());
    }
}
