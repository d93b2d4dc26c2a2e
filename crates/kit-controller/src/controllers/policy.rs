use super::{require, Context};
use crate::error::Result;
use crate::reconciler::{Action, Controller};
use async_trait::async_trait;
use kit_core::naming::bucket_name;
use kit_core::resources::{Policy, PolicySpec};
use kit_core::Component;
use serde_json::{json, Value};
use tracing::{debug, info};

/// Inline policy document for a component's node role.
///
/// Both components may read the cluster bucket their boot material is
/// staged in; masters additionally drive the cloud provider integration.
pub fn policy_document(cluster: &str, component: Component) -> Value {
    let bucket = bucket_name(cluster);
    let read_bucket = json!({
        "Action": ["s3:GetObject", "s3:ListBucket"],
        "Resource": [
            format!("arn:aws:s3:::{}", bucket),
            format!("arn:aws:s3:::{}/*", bucket),
        ],
        "Effect": "Allow"
    });
    let actions: &[&str] = match component {
        Component::Master => &[
            "ec2:*",
            "elasticloadbalancing:*",
            "autoscaling:DescribeAutoScalingGroups",
            "autoscaling:DescribeTags",
            "ecr:GetAuthorizationToken",
            "ecr:BatchGetImage",
            "ecr:GetDownloadUrlForLayer",
        ],
        Component::Etcd => &[
            "ec2:DescribeInstances",
            "ec2:DescribeTags",
            "ecr:GetAuthorizationToken",
        ],
    };
    json!({
        "Version": "2012-10-17",
        "Statement": [
            { "Action": actions, "Resource": "*", "Effect": "Allow" },
            read_bucket,
        ]
    })
}

/// Inline policy on a component's role
pub struct PolicyController {
    ctx: Context,
}

impl PolicyController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Controller for PolicyController {
    type Spec = PolicySpec;

    fn name(&self) -> &'static str {
        "policy"
    }

    async fn reconcile(&self, policy: &mut Policy) -> Result<Action> {
        let cluster = policy.cluster_name().to_string();
        let component = policy.spec.component;
        let identity = &self.ctx.clouds.identity;
        let infra = self.ctx.infrastructure(policy)?;
        let role_name = require(
            policy,
            infra.roles.get(component.as_str()),
            &format!("infrastructure.roles.{}", component),
        )?;

        let desired = policy_document(&cluster, component);
        let current = identity
            .get_role_policy(role_name, &policy.spec.policy_name)
            .await?
            .and_then(|doc| serde_json::from_str::<Value>(&doc).ok());
        if current.as_ref() == Some(&desired) {
            debug!("Policy {} on {} is up to date", policy.spec.policy_name, role_name);
        } else {
            identity
                .put_role_policy(role_name, &policy.spec.policy_name, &desired.to_string())
                .await?;
            info!("Put policy {} on role {}", policy.spec.policy_name, role_name);
        }

        policy.status.policy_name = Some(policy.spec.policy_name.clone());
        self.ctx.publish(
            policy,
            json!({ "policies": { component.as_str(): policy.spec.policy_name } }),
        )?;
        Ok(Action::await_change())
    }

    async fn finalize(&self, policy: &mut Policy) -> Result<Action> {
        let component = policy.spec.component;
        let identity = &self.ctx.clouds.identity;

        match identity
            .delete_role_policy(&policy.spec.role_name, &policy.spec.policy_name)
            .await
        {
            Ok(()) => info!(
                "Deleted policy {} from role {}",
                policy.spec.policy_name, policy.spec.role_name
            ),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        policy.status.policy_name = None;
        self.ctx.publish(
            policy,
            json!({ "policies": { component.as_str(): null } }),
        )?;
        Ok(Action::await_change())
    }
}
