use crate::error::Result;
use crate::model::*;
use async_trait::async_trait;
use bytes::Bytes;

/// Virtual networks, subnets, gateways, addresses, routing and firewalls
#[async_trait]
pub trait NetworkApi: Send + Sync {
    // --- VPCs ---

    async fn describe_vpcs(&self, filter: &TagFilter) -> Result<Vec<Vpc>>;
    async fn create_vpc(&self, cidr_block: &str, tags: Tags) -> Result<Vpc>;
    async fn delete_vpc(&self, vpc_id: &str) -> Result<()>;

    // --- Subnets ---

    async fn describe_subnets(&self, filter: &TagFilter) -> Result<Vec<Subnet>>;
    async fn create_subnet(&self, input: CreateSubnet) -> Result<Subnet>;
    async fn delete_subnet(&self, subnet_id: &str) -> Result<()>;

    // --- Internet gateways ---

    async fn describe_internet_gateways(&self, filter: &TagFilter) -> Result<Vec<InternetGateway>>;
    async fn create_internet_gateway(&self, tags: Tags) -> Result<InternetGateway>;
    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()>;
    async fn detach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()>;
    async fn delete_internet_gateway(&self, gateway_id: &str) -> Result<()>;

    // --- Elastic IP addresses ---

    async fn describe_addresses(&self, filter: &TagFilter) -> Result<Vec<Address>>;
    async fn allocate_address(&self, tags: Tags) -> Result<Address>;
    async fn release_address(&self, allocation_id: &str) -> Result<()>;

    // --- NAT gateways ---

    async fn describe_nat_gateways(&self, filter: &TagFilter) -> Result<Vec<NatGateway>>;
    async fn create_nat_gateway(
        &self,
        subnet_id: &str,
        allocation_id: &str,
        tags: Tags,
    ) -> Result<NatGateway>;
    async fn delete_nat_gateway(&self, nat_gateway_id: &str) -> Result<()>;

    // --- Route tables ---

    async fn describe_route_tables(&self, filter: &TagFilter) -> Result<Vec<RouteTable>>;
    async fn create_route_table(&self, vpc_id: &str, tags: Tags) -> Result<RouteTable>;
    async fn create_route(&self, route_table_id: &str, route: Route) -> Result<()>;
    /// Returns the association id
    async fn associate_route_table(&self, route_table_id: &str, subnet_id: &str) -> Result<String>;
    async fn disassociate_route_table(&self, association_id: &str) -> Result<()>;
    async fn delete_route_table(&self, route_table_id: &str) -> Result<()>;

    // --- Security groups ---

    async fn describe_security_groups(&self, filter: &TagFilter) -> Result<Vec<SecurityGroup>>;
    async fn create_security_group(
        &self,
        vpc_id: &str,
        group_name: &str,
        description: &str,
        tags: Tags,
    ) -> Result<SecurityGroup>;
    async fn authorize_ingress(&self, group_id: &str, rules: Vec<IngressRule>) -> Result<()>;
    async fn delete_security_group(&self, group_id: &str) -> Result<()>;
}

/// Roles, inline policies and instance profiles
#[async_trait]
pub trait IdentityApi: Send + Sync {
    async fn list_roles(&self, filter: &TagFilter) -> Result<Vec<Role>>;
    async fn create_role(&self, role_name: &str, assume_role_policy: &str, tags: Tags) -> Result<Role>;
    async fn delete_role(&self, role_name: &str) -> Result<()>;

    /// Inline policy document, if present
    async fn get_role_policy(&self, role_name: &str, policy_name: &str) -> Result<Option<String>>;
    async fn put_role_policy(&self, role_name: &str, policy_name: &str, document: &str) -> Result<()>;
    async fn delete_role_policy(&self, role_name: &str, policy_name: &str) -> Result<()>;

    async fn list_instance_profiles(&self, filter: &TagFilter) -> Result<Vec<InstanceProfile>>;
    async fn create_instance_profile(&self, profile_name: &str, tags: Tags) -> Result<InstanceProfile>;
    async fn add_role_to_instance_profile(&self, profile_name: &str, role_name: &str) -> Result<()>;
    async fn remove_role_from_instance_profile(&self, profile_name: &str, role_name: &str) -> Result<()>;
    async fn delete_instance_profile(&self, profile_name: &str) -> Result<()>;
}

/// Launch templates, scaling groups, instances and parameter lookup
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn describe_launch_templates(&self, filter: &TagFilter) -> Result<Vec<LaunchTemplate>>;
    async fn create_launch_template(&self, input: CreateLaunchTemplate) -> Result<LaunchTemplate>;
    async fn delete_launch_template(&self, launch_template_id: &str) -> Result<()>;

    async fn describe_auto_scaling_groups(&self, filter: &TagFilter) -> Result<Vec<AutoScalingGroup>>;
    async fn create_auto_scaling_group(&self, input: CreateAutoScalingGroup) -> Result<AutoScalingGroup>;
    /// Force-deletes the group and terminates its instances
    async fn delete_auto_scaling_group(&self, name: &str) -> Result<()>;

    async fn describe_instances(&self, filter: &TagFilter) -> Result<Vec<Instance>>;

    /// Resolve a public parameter such as the recommended AMI id
    async fn resolve_parameter(&self, name: &str) -> Result<String>;
}

/// Network load balancers, listeners and target groups
#[async_trait]
pub trait LoadBalancingApi: Send + Sync {
    async fn describe_load_balancers(&self, filter: &TagFilter) -> Result<Vec<LoadBalancer>>;
    async fn create_load_balancer(
        &self,
        name: &str,
        scheme: &str,
        subnet_ids: Vec<String>,
        tags: Tags,
    ) -> Result<LoadBalancer>;
    async fn delete_load_balancer(&self, arn: &str) -> Result<()>;

    async fn describe_listeners(&self, load_balancer_arn: &str) -> Result<Vec<Listener>>;
    async fn create_listener(
        &self,
        load_balancer_arn: &str,
        port: u16,
        protocol: &str,
        target_group_arn: &str,
    ) -> Result<Listener>;

    async fn describe_target_groups(&self, filter: &TagFilter) -> Result<Vec<TargetGroup>>;
    async fn create_target_group(
        &self,
        name: &str,
        port: u16,
        protocol: &str,
        vpc_id: &str,
        tags: Tags,
    ) -> Result<TargetGroup>;
    async fn delete_target_group(&self, arn: &str) -> Result<()>;

    /// Register a scaling group's instances with a target group
    async fn attach_target_group(&self, auto_scaling_group: &str, target_group_arn: &str) -> Result<()>;
}

/// Buckets and the objects nodes pull at boot
#[async_trait]
pub trait ObjectStorageApi: Send + Sync {
    async fn describe_buckets(&self, filter: &TagFilter) -> Result<Vec<Bucket>>;
    async fn create_bucket(&self, name: &str, tags: Tags) -> Result<Bucket>;
    async fn delete_bucket(&self, name: &str) -> Result<()>;

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<()>;
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Bytes>>;
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;
    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<()>;
}
