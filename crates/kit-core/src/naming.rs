//! Deterministic naming and tagging.
//!
//! Every cloud object and record name is derived from the cluster name and a
//! component identifier, so repeated reconciles always compute the same
//! desired identity.

use crate::error::{KitError, Result};
use std::net::Ipv4Addr;

/// Cluster-ownership tag carried by every cloud object; also the record label
pub const CLUSTER_TAG: &str = "kit.k8s.amazonaws.com/cluster-name";

/// Component tag ("master", "etcd", ...) on cloud objects
pub const COMPONENT_TAG: &str = "kit.k8s.amazonaws.com/component";

/// Human readable name tag
pub const NAME_TAG: &str = "Name";

const FINALIZER_DOMAIN: &str = "kit.k8s.amazonaws.com";

/// Load balancer and target group names are capped at 32 characters
pub const MAX_LB_NAME_LEN: usize = 32;

/// Finalizer string owned by the named controller
pub fn finalizer(controller: &str) -> String {
    format!("{}/{}", FINALIZER_DOMAIN, controller)
}

/// `{cluster}-{identifier}`, or just the cluster when no identifier is given
pub fn object_name(cluster: &str, identifier: &str) -> String {
    if identifier.is_empty() {
        cluster.to_string()
    } else {
        format!("{}-{}", cluster, identifier)
    }
}

/// Object storage bucket that holds the cluster's bootstrap material
pub fn bucket_name(cluster: &str) -> String {
    format!("kit-{}", cluster)
}

/// Name tag on instances of a role; node discovery filters on it
pub fn node_tag(cluster: &str, role: &str) -> String {
    object_name(cluster, role)
}

pub fn group_name(cluster: &str, component: &str) -> String {
    format!("{}-{}-security-group", cluster, component)
}

pub fn role_name(cluster: &str, component: &str) -> String {
    format!("{}-{}-role", cluster, component)
}

pub fn policy_name(cluster: &str, component: &str) -> String {
    format!("{}-{}-policy", cluster, component)
}

pub fn profile_name(cluster: &str, component: &str) -> String {
    format!("{}-{}-profile", cluster, component)
}

pub fn launch_template_name(cluster: &str, component: &str) -> String {
    format!("{}-{}-template", cluster, component)
}

pub fn auto_scaling_group_name(cluster: &str, component: &str) -> String {
    format!("{}-{}-asg", cluster, component)
}

/// Network load balancer name, `{cluster}-{component}` bounded to 32 chars
pub fn load_balancer_name(cluster: &str, component: &str) -> String {
    bounded_name(cluster, component)
}

/// Target group name, `{cluster}-{component}-tg` bounded to 32 chars
pub fn target_group_name(cluster: &str, component: &str) -> String {
    bounded_name(cluster, &format!("{}-tg", component))
}

/// Join prefix and suffix, replacing anything outside `[A-Za-z0-9-]` and
/// shortening the prefix so the suffix always survives.
fn bounded_name(prefix: &str, suffix: &str) -> String {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
            .collect()
    };
    let suffix = sanitize(suffix);
    let mut prefix = sanitize(prefix);
    let budget = MAX_LB_NAME_LEN.saturating_sub(suffix.len() + 1);
    prefix.truncate(budget);
    let prefix = prefix.trim_end_matches('-');
    format!("{}-{}", prefix, suffix)
}

/// Availability zones used for subnets: the region suffixed with a, b and c
pub fn availability_zones(region: &str) -> Vec<String> {
    ["a", "b", "c"]
        .iter()
        .map(|suffix| format!("{}{}", region, suffix))
        .collect()
}

/// Split a VPC block into six subnet blocks four bits longer than the VPC
/// prefix: three private subnets followed by three public subnets.
pub fn subnet_cidrs(vpc_cidr: &str) -> Result<Vec<String>> {
    let (network, prefix_len) = parse_cidr(vpc_cidr)?;
    if prefix_len > 24 {
        return Err(KitError::invalid_cidr(
            vpc_cidr,
            "prefix must be /24 or shorter to fit six subnets",
        ));
    }

    let subnet_prefix = prefix_len + 4;
    let block_size: u32 = 1 << (32 - subnet_prefix);
    let base = u32::from(network);

    Ok((0..6u32)
        .map(|i| format!("{}/{}", Ipv4Addr::from(base + i * block_size), subnet_prefix))
        .collect())
}

/// Parse `a.b.c.d/len` and return the masked network address and prefix length
pub fn parse_cidr(cidr: &str) -> Result<(Ipv4Addr, u8)> {
    let (addr_str, prefix_str) = cidr
        .split_once('/')
        .ok_or_else(|| KitError::invalid_cidr(cidr, "expected a.b.c.d/prefix"))?;

    let addr: Ipv4Addr = addr_str
        .parse()
        .map_err(|e| KitError::invalid_cidr(cidr, format!("invalid address: {}", e)))?;
    let prefix_len: u8 = prefix_str
        .parse()
        .map_err(|e| KitError::invalid_cidr(cidr, format!("invalid prefix: {}", e)))?;

    if prefix_len > 32 {
        return Err(KitError::invalid_cidr(cidr, "prefix longer than 32 bits"));
    }

    let mask = if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_len)
    };
    Ok((Ipv4Addr::from(u32::from(addr) & mask), prefix_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalizer_and_object_names() {
        assert_eq!(finalizer("vpc"), "kit.k8s.amazonaws.com/vpc");
        assert_eq!(object_name("demo", "master"), "demo-master");
        assert_eq!(object_name("demo", ""), "demo");
        assert_eq!(bucket_name("demo"), "kit-demo");
        assert_eq!(node_tag("demo", "etcd"), "demo-etcd");
        assert_eq!(role_name("demo", "etcd"), "demo-etcd-role");
    }

    #[test]
    fn test_load_balancer_name_truncation_keeps_suffix() {
        let long_cluster = "a".repeat(60);
        let name = target_group_name(&long_cluster, "master");
        assert!(name.len() <= MAX_LB_NAME_LEN);
        assert!(name.ends_with("-master-tg"));

        assert_eq!(load_balancer_name("demo", "etcd"), "demo-etcd");
    }

    #[test]
    fn test_load_balancer_name_sanitization() {
        assert_eq!(load_balancer_name("my.cluster", "master"), "my-cluster-master");
    }

    #[test]
    fn test_availability_zones() {
        assert_eq!(
            availability_zones("us-west-2"),
            vec!["us-west-2a", "us-west-2b", "us-west-2c"]
        );
    }

    #[test]
    fn test_subnet_cidrs_for_default_vpc() {
        let cidrs = subnet_cidrs("10.0.0.0/16").unwrap();
        assert_eq!(
            cidrs,
            vec![
                "10.0.0.0/20",
                "10.0.16.0/20",
                "10.0.32.0/20",
                "10.0.48.0/20",
                "10.0.64.0/20",
                "10.0.80.0/20",
            ]
        );
    }

    #[test]
    fn test_subnet_cidrs_rejects_small_blocks() {
        assert!(subnet_cidrs("10.0.0.0/26").is_err());
        assert!(subnet_cidrs("not-a-cidr").is_err());
    }

    #[test]
    fn test_parse_cidr_masks_host_bits() {
        let (net, len) = parse_cidr("192.168.1.77/24").unwrap();
        assert_eq!(net, Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(len, 24);
    }
}
