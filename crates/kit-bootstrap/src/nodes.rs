use crate::error::{BootstrapError, Result};
use kit_cloud::{ComputeApi, TagFilter};
use kit_core::naming::{node_tag, NAME_TAG};
use kit_core::Component;
use tracing::debug;

/// A running control-plane instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: String,
    pub ip: String,
}

/// Find the live nodes of a role, sorted by instance id
///
/// Returns `None` while fewer than `expected` nodes have a private address;
/// more than `expected` is an error because membership is baked into the
/// generated certificates and manifests.
pub async fn discover(
    compute: &dyn ComputeApi,
    cluster: &str,
    role: Component,
    expected: usize,
) -> Result<Option<Vec<Node>>> {
    let filter = TagFilter::cluster(cluster).with(NAME_TAG, node_tag(cluster, role.as_str()));
    let mut nodes: Vec<Node> = compute
        .describe_instances(&filter)
        .await?
        .into_iter()
        .filter(|instance| instance.state.is_live())
        .filter_map(|instance| {
            instance.private_ip.map(|ip| Node {
                id: instance.instance_id,
                ip,
            })
        })
        .collect();

    if nodes.len() > expected {
        return Err(BootstrapError::node_cardinality(
            cluster,
            role.as_str(),
            expected,
            nodes.len(),
        ));
    }
    if nodes.len() < expected {
        debug!(
            "Found {}/{} {} nodes for cluster {}",
            nodes.len(),
            expected,
            role,
            cluster
        );
        return Ok(None);
    }

    nodes.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(Some(nodes))
}
