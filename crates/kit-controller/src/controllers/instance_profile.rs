use super::{at_most_one, require, Context};
use crate::error::Result;
use crate::reconciler::{Action, Controller};
use async_trait::async_trait;
use kit_cloud::{ignore_not_found, owned_tags, TagFilter};
use kit_core::resources::{InstanceProfile, InstanceProfileSpec};
use serde_json::json;
use tracing::info;

/// Instance profile carrying a component's role onto its nodes
pub struct InstanceProfileController {
    ctx: Context,
}

impl InstanceProfileController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Controller for InstanceProfileController {
    type Spec = InstanceProfileSpec;

    fn name(&self) -> &'static str {
        "instance-profile"
    }

    async fn reconcile(&self, profile: &mut InstanceProfile) -> Result<Action> {
        let cluster = profile.cluster_name().to_string();
        let component = profile.spec.component.as_str();
        let identity = &self.ctx.clouds.identity;
        let infra = self.ctx.infrastructure(profile)?;
        let role_name = require(
            profile,
            infra.roles.get(component),
            &format!("infrastructure.roles.{}", component),
        )?;

        let existing = identity
            .list_instance_profiles(&TagFilter::component(&cluster, component))
            .await?;
        let found = match at_most_one("instance profile", &cluster, existing)? {
            Some(found) => found,
            None => {
                let created = identity
                    .create_instance_profile(
                        &profile.spec.profile_name,
                        owned_tags(&cluster, &profile.spec.profile_name, Some(component)),
                    )
                    .await?;
                info!("Created instance profile {} for cluster {}", created.profile_name, cluster);
                created
            }
        };

        if !found.roles.iter().any(|r| r == role_name) {
            for stale in &found.roles {
                identity
                    .remove_role_from_instance_profile(&found.profile_name, stale)
                    .await?;
            }
            identity
                .add_role_to_instance_profile(&found.profile_name, role_name)
                .await?;
            info!("Added role {} to instance profile {}", role_name, found.profile_name);
        }

        profile.status.profile_name = Some(found.profile_name.clone());
        self.ctx.publish(
            profile,
            json!({ "instanceProfiles": { component: found.profile_name } }),
        )?;
        Ok(Action::await_change())
    }

    async fn finalize(&self, profile: &mut InstanceProfile) -> Result<Action> {
        let cluster = profile.cluster_name().to_string();
        let component = profile.spec.component.as_str();
        let identity = &self.ctx.clouds.identity;

        for found in identity
            .list_instance_profiles(&TagFilter::component(&cluster, component))
            .await?
        {
            for role in &found.roles {
                ignore_not_found(
                    identity
                        .remove_role_from_instance_profile(&found.profile_name, role)
                        .await,
                )?;
            }
            ignore_not_found(identity.delete_instance_profile(&found.profile_name).await)?;
            info!("Deleted instance profile {} of cluster {}", found.profile_name, cluster);
        }

        profile.status.profile_name = None;
        self.ctx.publish(
            profile,
            json!({ "instanceProfiles": { component: null } }),
        )?;
        Ok(Action::await_change())
    }
}

#[cfg(test)]
mod tests {
    use super::super::role::assume_role_policy;
    use super::super::testing::make_fixture;
    use super::*;
    use kit_cloud::IdentityApi;
    use kit_core::Component;

    fn make_profile() -> InstanceProfile {
        InstanceProfile::new(
            "default",
            "demo-master",
            InstanceProfileSpec {
                cluster_name: "demo".to_string(),
                component: Component::Master,
                profile_name: "demo-master-profile".to_string(),
                role_name: "demo-master-role".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_profile_carries_role() {
        let fixture = make_fixture().await;
        let controller = InstanceProfileController::new(fixture.ctx.clone());
        let mut profile = make_profile();

        let err = controller.reconcile(&mut profile).await.unwrap_err();
        assert!(err.is_dependency_not_ready());

        fixture
            .cloud
            .create_role(
                "demo-master-role",
                &assume_role_policy(),
                owned_tags("demo", "demo-master-role", Some("master")),
            )
            .await
            .unwrap();
        fixture.publish(json!({ "roles": { "master": "demo-master-role" } }));
        controller.reconcile(&mut profile).await.unwrap();
        controller.reconcile(&mut profile).await.unwrap();

        assert_eq!(fixture.cloud.calls("AddRoleToInstanceProfile").await, 1);
        let found = fixture
            .cloud
            .list_instance_profiles(&TagFilter::component("demo", "master"))
            .await
            .unwrap();
        assert_eq!(found[0].roles, vec!["demo-master-role".to_string()]);
        assert_eq!(
            fixture.infrastructure().instance_profiles["master"],
            "demo-master-profile"
        );
    }

    #[tokio::test]
    async fn test_finalize_releases_role() {
        let fixture = make_fixture().await;
        fixture
            .cloud
            .create_role(
                "demo-master-role",
                &assume_role_policy(),
                owned_tags("demo", "demo-master-role", Some("master")),
            )
            .await
            .unwrap();
        fixture.publish(json!({ "roles": { "master": "demo-master-role" } }));
        let controller = InstanceProfileController::new(fixture.ctx.clone());
        let mut profile = make_profile();
        controller.reconcile(&mut profile).await.unwrap();

        controller.finalize(&mut profile).await.unwrap();

        // the role is free to go once no profile holds it
        fixture.cloud.delete_role("demo-master-role").await.unwrap();
        assert!(fixture.infrastructure().instance_profiles.is_empty());
    }
}
