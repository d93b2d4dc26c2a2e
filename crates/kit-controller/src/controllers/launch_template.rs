use super::{at_most_one, require, Context};
use crate::error::Result;
use crate::reconciler::{Action, Controller};
use async_trait::async_trait;
use kit_bootstrap::files::SYNCED_DIRS;
use kit_cloud::model::CreateLaunchTemplate;
use kit_cloud::{ignore_not_found, owned_tags, TagFilter};
use kit_core::naming::bucket_name;
use kit_core::resources::{LaunchTemplate, LaunchTemplateSpec};
use serde_json::json;
use std::fmt::Write;
use tracing::{debug, info};

/// Boot script for control plane nodes.
///
/// Each node waits for its own prefix in the cluster bucket, mirrors the
/// staged directories onto the root filesystem and restarts the kubelet.
/// The sync loop keeps running so material staged after boot is picked up.
pub fn user_data(cluster: &str) -> String {
    let bucket = bucket_name(cluster);
    let mut script = String::from(
        "#!/bin/bash\n\
         set -euo pipefail\n\
         swapoff -a\n\
         INSTANCE_ID=$(curl -s http://169.254.169.254/latest/meta-data/instance-id)\n",
    );
    let _ = writeln!(script, "PREFIX=s3://{}/{}/${{INSTANCE_ID}}", bucket, cluster);
    script.push_str("sync_node() {\n");
    for dir in SYNCED_DIRS {
        let _ = writeln!(script, "  aws s3 sync --quiet ${{PREFIX}}{} {}", dir, dir);
    }
    script.push_str(
        "}\n\
         until aws s3 ls ${PREFIX}/ > /dev/null 2>&1; do sleep 10; done\n\
         sync_node\n\
         systemctl daemon-reload\n\
         systemctl enable --now kubelet\n\
         systemctl restart kubelet\n\
         while true; do sleep 60; sync_node || true; done &\n",
    );
    script
}

/// Launch template of a component's nodes
pub struct LaunchTemplateController {
    ctx: Context,
}

impl LaunchTemplateController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    async fn image_id(&self, template: &LaunchTemplate) -> Result<String> {
        if let Some(ami) = template.spec.ami.as_ref().filter(|a| !a.is_empty()) {
            return Ok(ami.clone());
        }
        let parameter = &self.ctx.defaults.ami_parameter;
        let ami = self.ctx.clouds.compute.resolve_parameter(parameter).await?;
        debug!("Resolved {} to {}", parameter, ami);
        Ok(ami)
    }
}

#[async_trait]
impl Controller for LaunchTemplateController {
    type Spec = LaunchTemplateSpec;

    fn name(&self) -> &'static str {
        "launch-template"
    }

    async fn reconcile(&self, template: &mut LaunchTemplate) -> Result<Action> {
        let cluster = template.cluster_name().to_string();
        let component = template.spec.component.as_str();
        let compute = &self.ctx.clouds.compute;
        let infra = self.ctx.infrastructure(template)?;
        let security_group = require(
            template,
            infra.security_groups.get(component),
            &format!("infrastructure.securityGroups.{}", component),
        )?;
        let profile = require(
            template,
            infra.instance_profiles.get(component),
            &format!("infrastructure.instanceProfiles.{}", component),
        )?;

        let existing = compute
            .describe_launch_templates(&TagFilter::component(&cluster, component))
            .await?;
        let launch_template_id = match at_most_one("launch template", &cluster, existing)? {
            Some(found) => found.launch_template_id,
            None => {
                let created = compute
                    .create_launch_template(CreateLaunchTemplate {
                        name: template.spec.template_name.clone(),
                        image_id: self.image_id(template).await?,
                        instance_type: template.spec.instance_type.clone(),
                        volume_size_gib: template.spec.volume_size_gib,
                        volume_type: self.ctx.defaults.volume_type.clone(),
                        security_group_ids: vec![security_group.to_string()],
                        instance_profile_name: profile.to_string(),
                        user_data: user_data(&cluster),
                        tags: owned_tags(&cluster, &template.spec.template_name, Some(component)),
                    })
                    .await?;
                info!(
                    "Created launch template {} ({}) for cluster {}",
                    created.name, created.image_id, cluster
                );
                created.launch_template_id
            }
        };

        template.status.launch_template_id = Some(launch_template_id);
        self.ctx.publish(
            template,
            json!({ "launchTemplates": { component: template.spec.template_name } }),
        )?;
        Ok(Action::await_change())
    }

    async fn finalize(&self, template: &mut LaunchTemplate) -> Result<Action> {
        let cluster = template.cluster_name().to_string();
        let component = template.spec.component.as_str();
        let compute = &self.ctx.clouds.compute;

        for found in compute
            .describe_launch_templates(&TagFilter::component(&cluster, component))
            .await?
        {
            ignore_not_found(compute.delete_launch_template(&found.launch_template_id).await)?;
            info!("Deleted launch template {} of cluster {}", found.name, cluster);
        }

        template.status.launch_template_id = None;
        self.ctx.publish(
            template,
            json!({ "launchTemplates": { component: null } }),
        )?;
        Ok(Action::await_change())
    }
}
