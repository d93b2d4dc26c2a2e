use super::{at_most_one, not_ready, require, Context};
use crate::error::Result;
use crate::reconciler::{Action, Controller};
use async_trait::async_trait;
use kit_cloud::model::{IngressRule, IngressSource};
use kit_cloud::{ignore_not_found, owned_tags, TagFilter};
use kit_core::resources::{PermissionSource, SecurityGroup, SecurityGroupSpec};
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info};

/// Per-component security groups. Rules may reference other groups of the
/// same cluster by name, including the group itself.
pub struct SecurityGroupController {
    ctx: Context,
}

impl SecurityGroupController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Group ids of the cluster keyed by group name
    async fn cluster_groups(&self, cluster: &str) -> Result<HashMap<String, String>> {
        Ok(self
            .ctx
            .clouds
            .network
            .describe_security_groups(&TagFilter::cluster(cluster))
            .await?
            .into_iter()
            .map(|g| (g.group_name, g.group_id))
            .collect())
    }
}

#[async_trait]
impl Controller for SecurityGroupController {
    type Spec = SecurityGroupSpec;

    fn name(&self) -> &'static str {
        "security-group"
    }

    async fn reconcile(&self, group: &mut SecurityGroup) -> Result<Action> {
        let cluster = group.cluster_name().to_string();
        let component = group.spec.component.as_str();
        let network = &self.ctx.clouds.network;
        let infra = self.ctx.infrastructure(group)?;
        let vpc_id = require(group, infra.vpc_id.as_ref(), "infrastructure.vpcId")?;

        // Referenced groups must exist before this one is touched
        let known = self.cluster_groups(&cluster).await?;
        for permission in &group.spec.permissions {
            if let PermissionSource::GroupName(name) = &permission.source {
                if name != &group.spec.group_name && !known.contains_key(name) {
                    return Err(not_ready(group, &format!("security group {}", name)));
                }
            }
        }

        let existing = network
            .describe_security_groups(&TagFilter::component(&cluster, component))
            .await?;
        let found = match at_most_one("security group", &cluster, existing)? {
            Some(found) => found,
            None => {
                let created = network
                    .create_security_group(
                        vpc_id,
                        &group.spec.group_name,
                        &format!("{} nodes of cluster {}", component, cluster),
                        owned_tags(&cluster, &group.spec.group_name, Some(component)),
                    )
                    .await?;
                info!("Created security group {} ({})", created.group_name, created.group_id);
                created
            }
        };

        let mut missing = Vec::new();
        for permission in &group.spec.permissions {
            let source = match &permission.source {
                PermissionSource::Cidr(cidr) => IngressSource::Cidr(cidr.clone()),
                PermissionSource::GroupName(name) if name == &group.spec.group_name => {
                    IngressSource::Group(found.group_id.clone())
                }
                PermissionSource::GroupName(name) => match known.get(name) {
                    Some(id) => IngressSource::Group(id.clone()),
                    None => return Err(not_ready(group, &format!("security group {}", name))),
                },
            };
            let rule = IngressRule {
                protocol: permission.protocol.clone(),
                from_port: permission.from_port,
                to_port: permission.to_port,
                source,
            };
            if !found.ingress.contains(&rule) && !missing.contains(&rule) {
                missing.push(rule);
            }
        }
        if !missing.is_empty() {
            debug!("Authorizing {} ingress rules on {}", missing.len(), found.group_id);
            network.authorize_ingress(&found.group_id, missing).await?;
        }

        group.status.security_group_id = Some(found.group_id.clone());
        self.ctx.publish(
            group,
            json!({ "securityGroups": { component: found.group_id } }),
        )?;
        Ok(Action::await_change())
    }

    async fn finalize(&self, group: &mut SecurityGroup) -> Result<Action> {
        let cluster = group.cluster_name().to_string();
        let component = group.spec.component.as_str();
        let network = &self.ctx.clouds.network;

        // A group still referenced by a sibling fails with a dependency
        // violation and is retried once the sibling is gone
        for found in network
            .describe_security_groups(&TagFilter::component(&cluster, component))
            .await?
        {
            ignore_not_found(network.delete_security_group(&found.group_id).await)?;
            info!("Deleted security group {} of cluster {}", found.group_name, cluster);
        }

        group.status.security_group_id = None;
        self.ctx.publish(
            group,
            json!({ "securityGroups": { component: null } }),
        )?;
        Ok(Action::await_change())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{make_fixture, Fixture};
    use super::*;
    use kit_cloud::NetworkApi;
    use kit_core::resources::IpPermission;
    use kit_core::Component;

    fn make_master() -> SecurityGroup {
        SecurityGroup::new(
            "default",
            "demo-master",
            SecurityGroupSpec {
                cluster_name: "demo".to_string(),
                component: Component::Master,
                group_name: "demo-master-security-group".to_string(),
                permissions: vec![IpPermission::tcp(
                    443,
                    443,
                    PermissionSource::Cidr("0.0.0.0/0".to_string()),
                )],
            },
        )
    }

    fn make_etcd() -> SecurityGroup {
        SecurityGroup::new(
            "default",
            "demo-etcd",
            SecurityGroupSpec {
                cluster_name: "demo".to_string(),
                component: Component::Etcd,
                group_name: "demo-etcd-security-group".to_string(),
                permissions: vec![
                    IpPermission::tcp(
                        2379,
                        2380,
                        PermissionSource::GroupName("demo-etcd-security-group".to_string()),
                    ),
                    IpPermission::tcp(
                        2379,
                        2379,
                        PermissionSource::GroupName("demo-master-security-group".to_string()),
                    ),
                ],
            },
        )
    }

    async fn make_vpc(fixture: &Fixture) {
        let vpc = fixture
            .cloud
            .create_vpc("10.0.0.0/16", owned_tags("demo", "demo", None))
            .await
            .unwrap();
        fixture.publish(json!({ "vpcId": vpc.vpc_id }));
    }

    #[tokio::test]
    async fn test_etcd_waits_for_master_group() {
        let fixture = make_fixture().await;
        make_vpc(&fixture).await;
        let controller = SecurityGroupController::new(fixture.ctx.clone());
        let mut etcd = make_etcd();

        let err = controller.reconcile(&mut etcd).await.unwrap_err();
        assert!(err.is_dependency_not_ready());
        assert_eq!(fixture.cloud.calls("CreateSecurityGroup").await, 0);

        controller.reconcile(&mut make_master()).await.unwrap();
        controller.reconcile(&mut etcd).await.unwrap();

        let infra = fixture.infrastructure();
        assert_eq!(infra.security_groups.len(), 2);
        let etcd_id = &infra.security_groups["etcd"];
        let found = fixture
            .cloud
            .describe_security_groups(&TagFilter::component("demo", "etcd"))
            .await
            .unwrap();
        assert_eq!(found[0].ingress.len(), 2);
        assert!(found[0]
            .ingress
            .iter()
            .any(|r| r.source == IngressSource::Group(etcd_id.clone())));
    }

    #[tokio::test]
    async fn test_rules_are_authorized_once() {
        let fixture = make_fixture().await;
        make_vpc(&fixture).await;
        let controller = SecurityGroupController::new(fixture.ctx.clone());
        let mut master = make_master();

        controller.reconcile(&mut master).await.unwrap();
        controller.reconcile(&mut master).await.unwrap();

        assert_eq!(fixture.cloud.calls("CreateSecurityGroup").await, 1);
        assert_eq!(fixture.cloud.calls("AuthorizeSecurityGroupIngress").await, 1);
    }

    #[tokio::test]
    async fn test_referenced_group_is_deleted_last() {
        let fixture = make_fixture().await;
        make_vpc(&fixture).await;
        let controller = SecurityGroupController::new(fixture.ctx.clone());
        let mut master = make_master();
        let mut etcd = make_etcd();
        controller.reconcile(&mut master).await.unwrap();
        controller.reconcile(&mut etcd).await.unwrap();

        let err = controller.finalize(&mut master).await.unwrap_err();
        assert_eq!(err.reason(), "DependencyViolation");

        controller.finalize(&mut etcd).await.unwrap();
        controller.finalize(&mut master).await.unwrap();
        assert!(fixture.infrastructure().security_groups.is_empty());
    }
}
