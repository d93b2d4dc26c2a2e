use super::{at_most_one, not_ready, require, Context};
use crate::error::Result;
use crate::reconciler::{Action, Controller};
use async_trait::async_trait;
use kit_cloud::model::CreateAutoScalingGroup;
use kit_cloud::{ignore_not_found, owned_tags, TagFilter};
use kit_core::naming::node_tag;
use kit_core::resources::{AutoScalingGroup, AutoScalingGroupSpec};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

/// How often to look again while the provider tears a group down
const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Scaling group running a component's nodes in the private subnets
pub struct AutoScalingGroupController {
    ctx: Context,
}

impl AutoScalingGroupController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Controller for AutoScalingGroupController {
    type Spec = AutoScalingGroupSpec;

    fn name(&self) -> &'static str {
        "auto-scaling-group"
    }

    async fn reconcile(&self, group: &mut AutoScalingGroup) -> Result<Action> {
        let cluster = group.cluster_name().to_string();
        let component = group.spec.component.as_str();
        let compute = &self.ctx.clouds.compute;
        let infra = self.ctx.infrastructure(group)?;
        let template_name = require(
            group,
            infra.launch_templates.get(component),
            &format!("infrastructure.launchTemplates.{}", component),
        )?;
        if infra.private_subnets.is_empty() {
            return Err(not_ready(group, "infrastructure.privateSubnets"));
        }

        // A group still being torn down does not count as existing
        let existing: Vec<_> = compute
            .describe_auto_scaling_groups(&TagFilter::component(&cluster, component))
            .await?
            .into_iter()
            .filter(|g| !g.is_deleting())
            .collect();
        let group_name = match at_most_one("auto scaling group", &cluster, existing)? {
            Some(found) => found.name,
            None => {
                let created = compute
                    .create_auto_scaling_group(CreateAutoScalingGroup {
                        name: group.spec.group_name.clone(),
                        launch_template_name: template_name.to_string(),
                        subnet_ids: infra.private_subnets.clone(),
                        desired_capacity: group.spec.instance_count,
                        min_size: group.spec.min_size,
                        max_size: group.spec.max_size,
                        tags: owned_tags(&cluster, &node_tag(&cluster, component), Some(component)),
                    })
                    .await?;
                info!(
                    "Created auto scaling group {} with {} instances for cluster {}",
                    created.name, created.desired_capacity, cluster
                );
                created.name
            }
        };

        group.status.group_name = Some(group_name.clone());
        self.ctx.publish(
            group,
            json!({ "autoScalingGroups": { component: group_name } }),
        )?;
        Ok(Action::await_change())
    }

    async fn finalize(&self, group: &mut AutoScalingGroup) -> Result<Action> {
        let cluster = group.cluster_name().to_string();
        let component = group.spec.component.as_str();
        let compute = &self.ctx.clouds.compute;

        let found = compute
            .describe_auto_scaling_groups(&TagFilter::component(&cluster, component))
            .await?;
        if let Some(deleting) = found.iter().find(|g| g.is_deleting()) {
            debug!("Auto scaling group {} is still being deleted", deleting.name);
            return Ok(Action::requeue(DELETE_POLL_INTERVAL));
        }
        for existing in found {
            ignore_not_found(compute.delete_auto_scaling_group(&existing.name).await)?;
            info!("Deleted auto scaling group {} of cluster {}", existing.name, cluster);
        }

        group.status.group_name = None;
        self.ctx.publish(
            group,
            json!({ "autoScalingGroups": { component: null } }),
        )?;
        Ok(Action::await_change())
    }
}
