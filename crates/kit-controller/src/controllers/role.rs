use super::{at_most_one, Context};
use crate::error::Result;
use crate::reconciler::{Action, Controller};
use async_trait::async_trait;
use kit_cloud::{ignore_not_found, owned_tags, TagFilter};
use kit_core::resources::{Role, RoleSpec};
use serde_json::json;
use tracing::info;

/// Trust policy letting EC2 instances assume the role
pub fn assume_role_policy() -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Action": "sts:AssumeRole",
            "Effect": "Allow",
            "Principal": { "Service": "ec2.amazonaws.com" }
        }]
    })
    .to_string()
}

/// Node role of one component
pub struct RoleController {
    ctx: Context,
}

impl RoleController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Controller for RoleController {
    type Spec = RoleSpec;

    fn name(&self) -> &'static str {
        "role"
    }

    async fn reconcile(&self, role: &mut Role) -> Result<Action> {
        let cluster = role.cluster_name().to_string();
        let component = role.spec.component.as_str();
        let identity = &self.ctx.clouds.identity;

        let existing = identity
            .list_roles(&TagFilter::component(&cluster, component))
            .await?;
        let role_name = match at_most_one("role", &cluster, existing)? {
            Some(found) => found.role_name,
            None => {
                let created = identity
                    .create_role(
                        &role.spec.role_name,
                        &assume_role_policy(),
                        owned_tags(&cluster, &role.spec.role_name, Some(component)),
                    )
                    .await?;
                info!("Created role {} for cluster {}", created.role_name, cluster);
                created.role_name
            }
        };

        role.status.role_name = Some(role_name.clone());
        self.ctx
            .publish(role, json!({ "roles": { component: role_name } }))?;
        Ok(Action::await_change())
    }

    async fn finalize(&self, role: &mut Role) -> Result<Action> {
        let cluster = role.cluster_name().to_string();
        let component = role.spec.component.as_str();
        let identity = &self.ctx.clouds.identity;

        for found in identity
            .list_roles(&TagFilter::component(&cluster, component))
            .await?
        {
            ignore_not_found(identity.delete_role(&found.role_name).await)?;
            info!("Deleted role {} of cluster {}", found.role_name, cluster);
        }

        role.status.role_name = None;
        self.ctx
            .publish(role, json!({ "roles": { component: null } }))?;
        Ok(Action::await_change())
    }
}
