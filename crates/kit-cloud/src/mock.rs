use crate::error::{CloudError, Result};
use crate::model::*;
use crate::traits::{ComputeApi, IdentityApi, LoadBalancingApi, NetworkApi, ObjectStorageApi};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Tag the provider stamps on instances launched by a scaling group
pub const ASG_NAME_TAG: &str = "aws:autoscaling:groupName";

trait Tagged {
    fn tags(&self) -> &Tags;
}

macro_rules! tagged {
    ($($ty:ty),+) => {
        $(impl Tagged for $ty {
            fn tags(&self) -> &Tags {
                &self.tags
            }
        })+
    };
}

tagged!(
    Vpc,
    Subnet,
    InternetGateway,
    Address,
    NatGateway,
    RouteTable,
    SecurityGroup,
    Role,
    InstanceProfile,
    LaunchTemplate,
    AutoScalingGroup,
    Instance,
    LoadBalancer,
    TargetGroup,
    Bucket
);

fn matching<'a, T: Tagged + Clone + 'a>(
    items: impl Iterator<Item = &'a T>,
    filter: &TagFilter,
) -> Vec<T> {
    items.filter(|item| filter.matches(item.tags())).cloned().collect()
}

/// In-memory cloud state for MockCloud
#[derive(Default)]
struct MockState {
    next_id: u64,
    next_ip: u32,
    vpcs: BTreeMap<String, Vpc>,
    subnets: BTreeMap<String, Subnet>,
    internet_gateways: BTreeMap<String, InternetGateway>,
    addresses: BTreeMap<String, Address>,
    nat_gateways: BTreeMap<String, NatGateway>,
    route_tables: BTreeMap<String, RouteTable>,
    security_groups: BTreeMap<String, SecurityGroup>,
    roles: BTreeMap<String, Role>,
    role_policies: BTreeMap<(String, String), String>,
    instance_profiles: BTreeMap<String, InstanceProfile>,
    launch_templates: BTreeMap<String, LaunchTemplate>,
    auto_scaling_groups: BTreeMap<String, AutoScalingGroup>,
    instances: BTreeMap<String, Instance>,
    load_balancers: BTreeMap<String, LoadBalancer>,
    listeners: BTreeMap<String, Listener>,
    target_groups: BTreeMap<String, TargetGroup>,
    buckets: BTreeMap<String, Bucket>,
    objects: BTreeMap<(String, String), Bytes>,
    parameters: BTreeMap<String, String>,
    calls: HashMap<String, usize>,
    faults: HashMap<String, CloudError>,
}

impl MockState {
    /// Record a call and surface any injected fault for it
    fn enter(&mut self, operation: &str) -> Result<()> {
        *self.calls.entry(operation.to_string()).or_default() += 1;
        match self.faults.remove(operation) {
            Some(err) => {
                debug!("Mock: injecting fault into {}: {}", operation, err);
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:08x}", prefix, self.next_id)
    }

    fn private_ip(&mut self) -> String {
        self.next_ip += 1;
        format!("10.0.{}.{}", 16 + (self.next_ip / 250), 10 + (self.next_ip % 250))
    }

    fn nat_in_use(&self, pred: impl Fn(&NatGateway) -> bool) -> bool {
        self.nat_gateways
            .values()
            .any(|nat| !nat.state.is_gone() && pred(nat))
    }
}

/// Mock cloud for tests and local runs.
///
/// Keeps every family's objects in one shared in-memory state and enforces
/// the provider rules that matter for convergence: deleting an object that
/// others still depend on fails with `DependencyViolation`, deleting an
/// absent object fails with `NotFound`. Every call is counted by operation
/// name and can be made to fail once with `fail_next`.
#[derive(Clone, Default)]
pub struct MockCloud {
    state: Arc<RwLock<MockState>>,
}

impl MockCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls made to an operation, e.g. "CreateVpc"
    pub async fn calls(&self, operation: &str) -> usize {
        self.state
            .read()
            .await
            .calls
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    /// Make the next call to `operation` fail with `err`
    pub async fn fail_next(&self, operation: &str, err: CloudError) {
        self.state
            .write()
            .await
            .faults
            .insert(operation.to_string(), err);
    }

    /// Define a public parameter for `resolve_parameter`
    pub async fn set_parameter(&self, name: &str, value: &str) {
        self.state
            .write()
            .await
            .parameters
            .insert(name.to_string(), value.to_string());
    }

    pub async fn set_nat_gateway_state(&self, nat_gateway_id: &str, state: NatGatewayState) {
        if let Some(nat) = self.state.write().await.nat_gateways.get_mut(nat_gateway_id) {
            nat.state = state;
        }
    }

    pub async fn set_auto_scaling_group_status(&self, name: &str, status: Option<&str>) {
        if let Some(group) = self.state.write().await.auto_scaling_groups.get_mut(name) {
            group.status = status.map(str::to_string);
        }
    }

    /// Launch a standalone instance, outside any scaling group
    pub async fn add_instance(&self, tags: Tags, state: InstanceState) -> Instance {
        let mut s = self.state.write().await;
        let instance = Instance {
            instance_id: s.id("i"),
            private_ip: Some(s.private_ip()),
            state,
            tags,
        };
        s.instances
            .insert(instance.instance_id.clone(), instance.clone());
        instance
    }

    /// Total number of objects of every family, for leak checks in tests
    pub async fn object_count(&self) -> usize {
        let s = self.state.read().await;
        s.vpcs.len()
            + s.subnets.len()
            + s.internet_gateways.len()
            + s.addresses.len()
            + s.nat_gateways.values().filter(|n| !n.state.is_gone()).count()
            + s.route_tables.len()
            + s.security_groups.len()
            + s.roles.len()
            + s.role_policies.len()
            + s.instance_profiles.len()
            + s.launch_templates.len()
            + s.auto_scaling_groups.len()
            + s.load_balancers.len()
            + s.listeners.len()
            + s.target_groups.len()
            + s.buckets.len()
            + s.objects.len()
    }
}

#[async_trait]
impl NetworkApi for MockCloud {
    async fn describe_vpcs(&self, filter: &TagFilter) -> Result<Vec<Vpc>> {
        let mut s = self.state.write().await;
        s.enter("DescribeVpcs")?;
        Ok(matching(s.vpcs.values(), filter))
    }

    async fn create_vpc(&self, cidr_block: &str, tags: Tags) -> Result<Vpc> {
        let mut s = self.state.write().await;
        s.enter("CreateVpc")?;
        let vpc = Vpc {
            vpc_id: s.id("vpc"),
            cidr_block: cidr_block.to_string(),
            tags,
        };
        s.vpcs.insert(vpc.vpc_id.clone(), vpc.clone());
        debug!("Mock: vpc created: {}", vpc.vpc_id);
        Ok(vpc)
    }

    async fn delete_vpc(&self, vpc_id: &str) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("DeleteVpc")?;
        if !s.vpcs.contains_key(vpc_id) {
            return Err(CloudError::not_found("DeleteVpc", vpc_id));
        }
        let in_use = s.subnets.values().any(|x| x.vpc_id == vpc_id)
            || s
                .internet_gateways
                .values()
                .any(|x| x.attached_vpc_id.as_deref() == Some(vpc_id))
            || s.security_groups.values().any(|x| x.vpc_id == vpc_id)
            || s.route_tables.values().any(|x| x.vpc_id == vpc_id)
            || s.target_groups.values().any(|x| x.vpc_id == vpc_id);
        if in_use {
            return Err(CloudError::dependency_violation(
                "DeleteVpc",
                vpc_id,
                "the vpc has dependencies and cannot be deleted",
            ));
        }
        s.vpcs.remove(vpc_id);
        debug!("Mock: vpc deleted: {}", vpc_id);
        Ok(())
    }

    async fn describe_subnets(&self, filter: &TagFilter) -> Result<Vec<Subnet>> {
        let mut s = self.state.write().await;
        s.enter("DescribeSubnets")?;
        Ok(matching(s.subnets.values(), filter))
    }

    async fn create_subnet(&self, input: CreateSubnet) -> Result<Subnet> {
        let mut s = self.state.write().await;
        s.enter("CreateSubnet")?;
        if !s.vpcs.contains_key(&input.vpc_id) {
            return Err(CloudError::not_found("CreateSubnet", &input.vpc_id));
        }
        if s
            .subnets
            .values()
            .any(|x| x.vpc_id == input.vpc_id && x.cidr_block == input.cidr_block)
        {
            return Err(CloudError::invalid_parameter(
                "CreateSubnet",
                format!("cidr {} conflicts with an existing subnet", input.cidr_block),
            ));
        }
        let subnet = Subnet {
            subnet_id: s.id("subnet"),
            vpc_id: input.vpc_id,
            cidr_block: input.cidr_block,
            availability_zone: input.availability_zone,
            map_public_ip_on_launch: input.map_public_ip_on_launch,
            tags: input.tags,
        };
        s.subnets.insert(subnet.subnet_id.clone(), subnet.clone());
        Ok(subnet)
    }

    async fn delete_subnet(&self, subnet_id: &str) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("DeleteSubnet")?;
        if !s.subnets.contains_key(subnet_id) {
            return Err(CloudError::not_found("DeleteSubnet", subnet_id));
        }
        let in_use = s.nat_in_use(|nat| nat.subnet_id == subnet_id)
            || s
                .load_balancers
                .values()
                .any(|lb| lb.subnet_ids.iter().any(|id| id == subnet_id))
            || s
                .auto_scaling_groups
                .values()
                .any(|g| g.subnet_ids.iter().any(|id| id == subnet_id));
        if in_use {
            return Err(CloudError::dependency_violation(
                "DeleteSubnet",
                subnet_id,
                "the subnet has dependencies and cannot be deleted",
            ));
        }
        s.subnets.remove(subnet_id);
        for table in s.route_tables.values_mut() {
            table.associations.retain(|a| a.subnet_id != subnet_id);
        }
        Ok(())
    }

    async fn describe_internet_gateways(&self, filter: &TagFilter) -> Result<Vec<InternetGateway>> {
        let mut s = self.state.write().await;
        s.enter("DescribeInternetGateways")?;
        Ok(matching(s.internet_gateways.values(), filter))
    }

    async fn create_internet_gateway(&self, tags: Tags) -> Result<InternetGateway> {
        let mut s = self.state.write().await;
        s.enter("CreateInternetGateway")?;
        let gateway = InternetGateway {
            internet_gateway_id: s.id("igw"),
            attached_vpc_id: None,
            tags,
        };
        s.internet_gateways
            .insert(gateway.internet_gateway_id.clone(), gateway.clone());
        Ok(gateway)
    }

    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("AttachInternetGateway")?;
        if !s.vpcs.contains_key(vpc_id) {
            return Err(CloudError::not_found("AttachInternetGateway", vpc_id));
        }
        let gateway = s
            .internet_gateways
            .get_mut(gateway_id)
            .ok_or_else(|| CloudError::not_found("AttachInternetGateway", gateway_id))?;
        if gateway.attached_vpc_id.is_some() {
            return Err(CloudError::invalid_parameter(
                "AttachInternetGateway",
                format!("{} is already attached", gateway_id),
            ));
        }
        gateway.attached_vpc_id = Some(vpc_id.to_string());
        Ok(())
    }

    async fn detach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("DetachInternetGateway")?;
        let gateway = s
            .internet_gateways
            .get_mut(gateway_id)
            .ok_or_else(|| CloudError::not_found("DetachInternetGateway", gateway_id))?;
        if gateway.attached_vpc_id.as_deref() != Some(vpc_id) {
            return Err(CloudError::not_found(
                "DetachInternetGateway",
                format!("attachment of {} to {}", gateway_id, vpc_id),
            ));
        }
        gateway.attached_vpc_id = None;
        Ok(())
    }

    async fn delete_internet_gateway(&self, gateway_id: &str) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("DeleteInternetGateway")?;
        let gateway = s
            .internet_gateways
            .get(gateway_id)
            .ok_or_else(|| CloudError::not_found("DeleteInternetGateway", gateway_id))?;
        if gateway.attached_vpc_id.is_some() {
            return Err(CloudError::dependency_violation(
                "DeleteInternetGateway",
                gateway_id,
                "the gateway is still attached",
            ));
        }
        s.internet_gateways.remove(gateway_id);
        Ok(())
    }

    async fn describe_addresses(&self, filter: &TagFilter) -> Result<Vec<Address>> {
        let mut s = self.state.write().await;
        s.enter("DescribeAddresses")?;
        Ok(matching(s.addresses.values(), filter))
    }

    async fn allocate_address(&self, tags: Tags) -> Result<Address> {
        let mut s = self.state.write().await;
        s.enter("AllocateAddress")?;
        let n = s.next_id + 1;
        let address = Address {
            allocation_id: s.id("eipalloc"),
            public_ip: format!("198.51.100.{}", n % 250),
            tags,
        };
        s.addresses
            .insert(address.allocation_id.clone(), address.clone());
        Ok(address)
    }

    async fn release_address(&self, allocation_id: &str) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("ReleaseAddress")?;
        if !s.addresses.contains_key(allocation_id) {
            return Err(CloudError::not_found("ReleaseAddress", allocation_id));
        }
        if s.nat_in_use(|nat| nat.allocation_id == allocation_id) {
            return Err(CloudError::dependency_violation(
                "ReleaseAddress",
                allocation_id,
                "the address is in use by a nat gateway",
            ));
        }
        s.addresses.remove(allocation_id);
        Ok(())
    }

    async fn describe_nat_gateways(&self, filter: &TagFilter) -> Result<Vec<NatGateway>> {
        let mut s = self.state.write().await;
        s.enter("DescribeNatGateways")?;
        Ok(matching(s.nat_gateways.values(), filter))
    }

    async fn create_nat_gateway(
        &self,
        subnet_id: &str,
        allocation_id: &str,
        tags: Tags,
    ) -> Result<NatGateway> {
        let mut s = self.state.write().await;
        s.enter("CreateNatGateway")?;
        if !s.subnets.contains_key(subnet_id) {
            return Err(CloudError::not_found("CreateNatGateway", subnet_id));
        }
        if !s.addresses.contains_key(allocation_id) {
            return Err(CloudError::not_found("CreateNatGateway", allocation_id));
        }
        let nat = NatGateway {
            nat_gateway_id: s.id("nat"),
            subnet_id: subnet_id.to_string(),
            allocation_id: allocation_id.to_string(),
            state: NatGatewayState::Available,
            tags,
        };
        s.nat_gateways.insert(nat.nat_gateway_id.clone(), nat.clone());
        Ok(nat)
    }

    async fn delete_nat_gateway(&self, nat_gateway_id: &str) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("DeleteNatGateway")?;
        let nat = s
            .nat_gateways
            .get_mut(nat_gateway_id)
            .ok_or_else(|| CloudError::not_found("DeleteNatGateway", nat_gateway_id))?;
        // Deleted gateways stay visible, as they do on the provider
        nat.state = NatGatewayState::Deleted;
        Ok(())
    }

    async fn describe_route_tables(&self, filter: &TagFilter) -> Result<Vec<RouteTable>> {
        let mut s = self.state.write().await;
        s.enter("DescribeRouteTables")?;
        Ok(matching(s.route_tables.values(), filter))
    }

    async fn create_route_table(&self, vpc_id: &str, tags: Tags) -> Result<RouteTable> {
        let mut s = self.state.write().await;
        s.enter("CreateRouteTable")?;
        if !s.vpcs.contains_key(vpc_id) {
            return Err(CloudError::not_found("CreateRouteTable", vpc_id));
        }
        let table = RouteTable {
            route_table_id: s.id("rtb"),
            vpc_id: vpc_id.to_string(),
            routes: Vec::new(),
            associations: Vec::new(),
            tags,
        };
        s.route_tables
            .insert(table.route_table_id.clone(), table.clone());
        Ok(table)
    }

    async fn create_route(&self, route_table_id: &str, route: Route) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("CreateRoute")?;
        let table = s
            .route_tables
            .get_mut(route_table_id)
            .ok_or_else(|| CloudError::not_found("CreateRoute", route_table_id))?;
        if table
            .routes
            .iter()
            .any(|r| r.destination_cidr == route.destination_cidr)
        {
            return Err(CloudError::invalid_parameter(
                "CreateRoute",
                format!("route to {} already exists", route.destination_cidr),
            ));
        }
        table.routes.push(route);
        Ok(())
    }

    async fn associate_route_table(&self, route_table_id: &str, subnet_id: &str) -> Result<String> {
        let mut s = self.state.write().await;
        s.enter("AssociateRouteTable")?;
        if !s.subnets.contains_key(subnet_id) {
            return Err(CloudError::not_found("AssociateRouteTable", subnet_id));
        }
        if s
            .route_tables
            .values()
            .any(|t| t.associations.iter().any(|a| a.subnet_id == subnet_id))
        {
            return Err(CloudError::invalid_parameter(
                "AssociateRouteTable",
                format!("{} is already associated", subnet_id),
            ));
        }
        let association_id = s.id("rtbassoc");
        let table = s
            .route_tables
            .get_mut(route_table_id)
            .ok_or_else(|| CloudError::not_found("AssociateRouteTable", route_table_id))?;
        table.associations.push(RouteTableAssociation {
            association_id: association_id.clone(),
            subnet_id: subnet_id.to_string(),
        });
        Ok(association_id)
    }

    async fn disassociate_route_table(&self, association_id: &str) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("DisassociateRouteTable")?;
        for table in s.route_tables.values_mut() {
            let before = table.associations.len();
            table
                .associations
                .retain(|a| a.association_id != association_id);
            if table.associations.len() != before {
                return Ok(());
            }
        }
        Err(CloudError::not_found("DisassociateRouteTable", association_id))
    }

    async fn delete_route_table(&self, route_table_id: &str) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("DeleteRouteTable")?;
        let table = s
            .route_tables
            .get(route_table_id)
            .ok_or_else(|| CloudError::not_found("DeleteRouteTable", route_table_id))?;
        if !table.associations.is_empty() {
            return Err(CloudError::dependency_violation(
                "DeleteRouteTable",
                route_table_id,
                "the route table has subnet associations",
            ));
        }
        s.route_tables.remove(route_table_id);
        Ok(())
    }

    async fn describe_security_groups(&self, filter: &TagFilter) -> Result<Vec<SecurityGroup>> {
        let mut s = self.state.write().await;
        s.enter("DescribeSecurityGroups")?;
        Ok(matching(s.security_groups.values(), filter))
    }

    async fn create_security_group(
        &self,
        vpc_id: &str,
        group_name: &str,
        _description: &str,
        tags: Tags,
    ) -> Result<SecurityGroup> {
        let mut s = self.state.write().await;
        s.enter("CreateSecurityGroup")?;
        if !s.vpcs.contains_key(vpc_id) {
            return Err(CloudError::not_found("CreateSecurityGroup", vpc_id));
        }
        if s
            .security_groups
            .values()
            .any(|g| g.vpc_id == vpc_id && g.group_name == group_name)
        {
            return Err(CloudError::invalid_parameter(
                "CreateSecurityGroup",
                format!("group {} already exists", group_name),
            ));
        }
        let group = SecurityGroup {
            group_id: s.id("sg"),
            group_name: group_name.to_string(),
            vpc_id: vpc_id.to_string(),
            ingress: Vec::new(),
            tags,
        };
        s.security_groups
            .insert(group.group_id.clone(), group.clone());
        Ok(group)
    }

    async fn authorize_ingress(&self, group_id: &str, rules: Vec<IngressRule>) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("AuthorizeSecurityGroupIngress")?;
        for rule in &rules {
            if let IngressSource::Group(source) = &rule.source {
                if !s.security_groups.contains_key(source) {
                    return Err(CloudError::not_found("AuthorizeSecurityGroupIngress", source));
                }
            }
        }
        let group = s
            .security_groups
            .get_mut(group_id)
            .ok_or_else(|| CloudError::not_found("AuthorizeSecurityGroupIngress", group_id))?;
        for rule in rules {
            if !group.ingress.contains(&rule) {
                group.ingress.push(rule);
            }
        }
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("DeleteSecurityGroup")?;
        if !s.security_groups.contains_key(group_id) {
            return Err(CloudError::not_found("DeleteSecurityGroup", group_id));
        }
        let referenced = s.security_groups.values().any(|g| {
            g.group_id != group_id
                && g.ingress
                    .iter()
                    .any(|r| r.source == IngressSource::Group(group_id.to_string()))
        });
        if referenced {
            return Err(CloudError::dependency_violation(
                "DeleteSecurityGroup",
                group_id,
                "the group is referenced by another group",
            ));
        }
        s.security_groups.remove(group_id);
        Ok(())
    }
}

#[async_trait]
impl IdentityApi for MockCloud {
    async fn list_roles(&self, filter: &TagFilter) -> Result<Vec<Role>> {
        let mut s = self.state.write().await;
        s.enter("ListRoles")?;
        Ok(matching(s.roles.values(), filter))
    }

    async fn create_role(&self, role_name: &str, assume_role_policy: &str, tags: Tags) -> Result<Role> {
        let mut s = self.state.write().await;
        s.enter("CreateRole")?;
        if s.roles.contains_key(role_name) {
            return Err(CloudError::invalid_parameter(
                "CreateRole",
                format!("role {} already exists", role_name),
            ));
        }
        let role = Role {
            role_name: role_name.to_string(),
            arn: format!("arn:aws:iam::000000000000:role/{}", role_name),
            assume_role_policy: assume_role_policy.to_string(),
            tags,
        };
        s.roles.insert(role_name.to_string(), role.clone());
        Ok(role)
    }

    async fn delete_role(&self, role_name: &str) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("DeleteRole")?;
        if !s.roles.contains_key(role_name) {
            return Err(CloudError::not_found("DeleteRole", role_name));
        }
        let in_use = s.role_policies.keys().any(|(role, _)| role == role_name)
            || s
                .instance_profiles
                .values()
                .any(|p| p.roles.iter().any(|r| r == role_name));
        if in_use {
            return Err(CloudError::dependency_violation(
                "DeleteRole",
                role_name,
                "the role has policies or instance profiles",
            ));
        }
        s.roles.remove(role_name);
        Ok(())
    }

    async fn get_role_policy(&self, role_name: &str, policy_name: &str) -> Result<Option<String>> {
        let mut s = self.state.write().await;
        s.enter("GetRolePolicy")?;
        if !s.roles.contains_key(role_name) {
            return Err(CloudError::not_found("GetRolePolicy", role_name));
        }
        Ok(s
            .role_policies
            .get(&(role_name.to_string(), policy_name.to_string()))
            .cloned())
    }

    async fn put_role_policy(&self, role_name: &str, policy_name: &str, document: &str) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("PutRolePolicy")?;
        if !s.roles.contains_key(role_name) {
            return Err(CloudError::not_found("PutRolePolicy", role_name));
        }
        s.role_policies.insert(
            (role_name.to_string(), policy_name.to_string()),
            document.to_string(),
        );
        Ok(())
    }

    async fn delete_role_policy(&self, role_name: &str, policy_name: &str) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("DeleteRolePolicy")?;
        s.role_policies
            .remove(&(role_name.to_string(), policy_name.to_string()))
            .map(|_| ())
            .ok_or_else(|| CloudError::not_found("DeleteRolePolicy", policy_name))
    }

    async fn list_instance_profiles(&self, filter: &TagFilter) -> Result<Vec<InstanceProfile>> {
        let mut s = self.state.write().await;
        s.enter("ListInstanceProfiles")?;
        Ok(matching(s.instance_profiles.values(), filter))
    }

    async fn create_instance_profile(&self, profile_name: &str, tags: Tags) -> Result<InstanceProfile> {
        let mut s = self.state.write().await;
        s.enter("CreateInstanceProfile")?;
        if s.instance_profiles.contains_key(profile_name) {
            return Err(CloudError::invalid_parameter(
                "CreateInstanceProfile",
                format!("instance profile {} already exists", profile_name),
            ));
        }
        let profile = InstanceProfile {
            profile_name: profile_name.to_string(),
            arn: format!("arn:aws:iam::000000000000:instance-profile/{}", profile_name),
            roles: Vec::new(),
            tags,
        };
        s.instance_profiles
            .insert(profile_name.to_string(), profile.clone());
        Ok(profile)
    }

    async fn add_role_to_instance_profile(&self, profile_name: &str, role_name: &str) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("AddRoleToInstanceProfile")?;
        if !s.roles.contains_key(role_name) {
            return Err(CloudError::not_found("AddRoleToInstanceProfile", role_name));
        }
        let profile = s
            .instance_profiles
            .get_mut(profile_name)
            .ok_or_else(|| CloudError::not_found("AddRoleToInstanceProfile", profile_name))?;
        if !profile.roles.is_empty() {
            return Err(CloudError::invalid_parameter(
                "AddRoleToInstanceProfile",
                "an instance profile holds at most one role",
            ));
        }
        profile.roles.push(role_name.to_string());
        Ok(())
    }

    async fn remove_role_from_instance_profile(&self, profile_name: &str, role_name: &str) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("RemoveRoleFromInstanceProfile")?;
        let profile = s
            .instance_profiles
            .get_mut(profile_name)
            .ok_or_else(|| CloudError::not_found("RemoveRoleFromInstanceProfile", profile_name))?;
        let before = profile.roles.len();
        profile.roles.retain(|r| r != role_name);
        if profile.roles.len() == before {
            return Err(CloudError::not_found("RemoveRoleFromInstanceProfile", role_name));
        }
        Ok(())
    }

    async fn delete_instance_profile(&self, profile_name: &str) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("DeleteInstanceProfile")?;
        let profile = s
            .instance_profiles
            .get(profile_name)
            .ok_or_else(|| CloudError::not_found("DeleteInstanceProfile", profile_name))?;
        if !profile.roles.is_empty() {
            return Err(CloudError::dependency_violation(
                "DeleteInstanceProfile",
                profile_name,
                "the instance profile still holds a role",
            ));
        }
        s.instance_profiles.remove(profile_name);
        Ok(())
    }
}

#[async_trait]
impl ComputeApi for MockCloud {
    async fn describe_launch_templates(&self, filter: &TagFilter) -> Result<Vec<LaunchTemplate>> {
        let mut s = self.state.write().await;
        s.enter("DescribeLaunchTemplates")?;
        Ok(matching(s.launch_templates.values(), filter))
    }

    async fn create_launch_template(&self, input: CreateLaunchTemplate) -> Result<LaunchTemplate> {
        let mut s = self.state.write().await;
        s.enter("CreateLaunchTemplate")?;
        if s.launch_templates.values().any(|t| t.name == input.name) {
            return Err(CloudError::invalid_parameter(
                "CreateLaunchTemplate",
                format!("launch template {} already exists", input.name),
            ));
        }
        if !s.instance_profiles.contains_key(&input.instance_profile_name) {
            return Err(CloudError::not_found(
                "CreateLaunchTemplate",
                &input.instance_profile_name,
            ));
        }
        let template = LaunchTemplate {
            launch_template_id: s.id("lt"),
            name: input.name,
            image_id: input.image_id,
            instance_type: input.instance_type,
            tags: input.tags,
        };
        s.launch_templates
            .insert(template.launch_template_id.clone(), template.clone());
        Ok(template)
    }

    async fn delete_launch_template(&self, launch_template_id: &str) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("DeleteLaunchTemplate")?;
        s.launch_templates
            .remove(launch_template_id)
            .map(|_| ())
            .ok_or_else(|| CloudError::not_found("DeleteLaunchTemplate", launch_template_id))
    }

    async fn describe_auto_scaling_groups(&self, filter: &TagFilter) -> Result<Vec<AutoScalingGroup>> {
        let mut s = self.state.write().await;
        s.enter("DescribeAutoScalingGroups")?;
        Ok(matching(s.auto_scaling_groups.values(), filter))
    }

    async fn create_auto_scaling_group(&self, input: CreateAutoScalingGroup) -> Result<AutoScalingGroup> {
        let mut s = self.state.write().await;
        s.enter("CreateAutoScalingGroup")?;
        if s.auto_scaling_groups.contains_key(&input.name) {
            return Err(CloudError::invalid_parameter(
                "CreateAutoScalingGroup",
                format!("auto scaling group {} already exists", input.name),
            ));
        }
        if !s
            .launch_templates
            .values()
            .any(|t| t.name == input.launch_template_name)
        {
            return Err(CloudError::not_found(
                "CreateAutoScalingGroup",
                &input.launch_template_name,
            ));
        }

        // Launch the desired capacity right away, propagating the group tags
        for _ in 0..input.desired_capacity {
            let mut tags = input.tags.clone();
            tags.insert(ASG_NAME_TAG.to_string(), input.name.clone());
            let instance = Instance {
                instance_id: s.id("i"),
                private_ip: Some(s.private_ip()),
                state: InstanceState::Running,
                tags,
            };
            s.instances.insert(instance.instance_id.clone(), instance);
        }

        let group = AutoScalingGroup {
            name: input.name,
            launch_template_name: input.launch_template_name,
            subnet_ids: input.subnet_ids,
            desired_capacity: input.desired_capacity,
            min_size: input.min_size,
            max_size: input.max_size,
            target_group_arns: Vec::new(),
            status: None,
            tags: input.tags,
        };
        s.auto_scaling_groups
            .insert(group.name.clone(), group.clone());
        Ok(group)
    }

    async fn delete_auto_scaling_group(&self, name: &str) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("DeleteAutoScalingGroup")?;
        if s.auto_scaling_groups.remove(name).is_none() {
            return Err(CloudError::not_found("DeleteAutoScalingGroup", name));
        }
        for instance in s.instances.values_mut() {
            if instance.tags.get(ASG_NAME_TAG).map(String::as_str) == Some(name) {
                instance.state = InstanceState::Terminated;
            }
        }
        Ok(())
    }

    async fn describe_instances(&self, filter: &TagFilter) -> Result<Vec<Instance>> {
        let mut s = self.state.write().await;
        s.enter("DescribeInstances")?;
        Ok(matching(s.instances.values(), filter))
    }

    async fn resolve_parameter(&self, name: &str) -> Result<String> {
        let mut s = self.state.write().await;
        s.enter("GetParameter")?;
        s.parameters
            .get(name)
            .cloned()
            .ok_or_else(|| CloudError::not_found("GetParameter", name))
    }
}

#[async_trait]
impl LoadBalancingApi for MockCloud {
    async fn describe_load_balancers(&self, filter: &TagFilter) -> Result<Vec<LoadBalancer>> {
        let mut s = self.state.write().await;
        s.enter("DescribeLoadBalancers")?;
        Ok(matching(s.load_balancers.values(), filter))
    }

    async fn create_load_balancer(
        &self,
        name: &str,
        scheme: &str,
        subnet_ids: Vec<String>,
        tags: Tags,
    ) -> Result<LoadBalancer> {
        let mut s = self.state.write().await;
        s.enter("CreateLoadBalancer")?;
        if s.load_balancers.values().any(|lb| lb.name == name) {
            return Err(CloudError::invalid_parameter(
                "CreateLoadBalancer",
                format!("load balancer {} already exists", name),
            ));
        }
        let id = s.id("net");
        let load_balancer = LoadBalancer {
            arn: format!(
                "arn:aws:elasticloadbalancing:mock:000000000000:loadbalancer/net/{}/{}",
                name, id
            ),
            name: name.to_string(),
            dns_name: format!("{}-{}.elb.amazonaws.com", name, id),
            scheme: scheme.to_string(),
            subnet_ids,
            tags,
        };
        s.load_balancers
            .insert(load_balancer.arn.clone(), load_balancer.clone());
        Ok(load_balancer)
    }

    async fn delete_load_balancer(&self, arn: &str) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("DeleteLoadBalancer")?;
        if s.load_balancers.remove(arn).is_none() {
            return Err(CloudError::not_found("DeleteLoadBalancer", arn));
        }
        s.listeners.retain(|_, l| l.load_balancer_arn != arn);
        Ok(())
    }

    async fn describe_listeners(&self, load_balancer_arn: &str) -> Result<Vec<Listener>> {
        let mut s = self.state.write().await;
        s.enter("DescribeListeners")?;
        if !s.load_balancers.contains_key(load_balancer_arn) {
            return Err(CloudError::not_found("DescribeListeners", load_balancer_arn));
        }
        Ok(s
            .listeners
            .values()
            .filter(|l| l.load_balancer_arn == load_balancer_arn)
            .cloned()
            .collect())
    }

    async fn create_listener(
        &self,
        load_balancer_arn: &str,
        port: u16,
        protocol: &str,
        target_group_arn: &str,
    ) -> Result<Listener> {
        let mut s = self.state.write().await;
        s.enter("CreateListener")?;
        if !s.load_balancers.contains_key(load_balancer_arn) {
            return Err(CloudError::not_found("CreateListener", load_balancer_arn));
        }
        if !s.target_groups.contains_key(target_group_arn) {
            return Err(CloudError::not_found("CreateListener", target_group_arn));
        }
        let id = s.id("listener");
        let listener = Listener {
            arn: format!("{}/{}", load_balancer_arn, id),
            load_balancer_arn: load_balancer_arn.to_string(),
            port,
            protocol: protocol.to_string(),
            target_group_arn: target_group_arn.to_string(),
        };
        s.listeners.insert(listener.arn.clone(), listener.clone());
        Ok(listener)
    }

    async fn describe_target_groups(&self, filter: &TagFilter) -> Result<Vec<TargetGroup>> {
        let mut s = self.state.write().await;
        s.enter("DescribeTargetGroups")?;
        Ok(matching(s.target_groups.values(), filter))
    }

    async fn create_target_group(
        &self,
        name: &str,
        port: u16,
        protocol: &str,
        vpc_id: &str,
        tags: Tags,
    ) -> Result<TargetGroup> {
        let mut s = self.state.write().await;
        s.enter("CreateTargetGroup")?;
        if !s.vpcs.contains_key(vpc_id) {
            return Err(CloudError::not_found("CreateTargetGroup", vpc_id));
        }
        let id = s.id("tg");
        let target_group = TargetGroup {
            arn: format!(
                "arn:aws:elasticloadbalancing:mock:000000000000:targetgroup/{}/{}",
                name, id
            ),
            name: name.to_string(),
            port,
            protocol: protocol.to_string(),
            vpc_id: vpc_id.to_string(),
            tags,
        };
        s.target_groups
            .insert(target_group.arn.clone(), target_group.clone());
        Ok(target_group)
    }

    async fn delete_target_group(&self, arn: &str) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("DeleteTargetGroup")?;
        if !s.target_groups.contains_key(arn) {
            return Err(CloudError::not_found("DeleteTargetGroup", arn));
        }
        if s.listeners.values().any(|l| l.target_group_arn == arn) {
            return Err(CloudError::dependency_violation(
                "DeleteTargetGroup",
                arn,
                "the target group is in use by a listener",
            ));
        }
        s.target_groups.remove(arn);
        for group in s.auto_scaling_groups.values_mut() {
            group.target_group_arns.retain(|a| a != arn);
        }
        Ok(())
    }

    async fn attach_target_group(&self, auto_scaling_group: &str, target_group_arn: &str) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("AttachLoadBalancerTargetGroups")?;
        if !s.target_groups.contains_key(target_group_arn) {
            return Err(CloudError::not_found("AttachLoadBalancerTargetGroups", target_group_arn));
        }
        let group = s
            .auto_scaling_groups
            .get_mut(auto_scaling_group)
            .ok_or_else(|| CloudError::not_found("AttachLoadBalancerTargetGroups", auto_scaling_group))?;
        if !group.target_group_arns.iter().any(|a| a == target_group_arn) {
            group.target_group_arns.push(target_group_arn.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStorageApi for MockCloud {
    async fn describe_buckets(&self, filter: &TagFilter) -> Result<Vec<Bucket>> {
        let mut s = self.state.write().await;
        s.enter("ListBuckets")?;
        Ok(matching(s.buckets.values(), filter))
    }

    async fn create_bucket(&self, name: &str, tags: Tags) -> Result<Bucket> {
        let mut s = self.state.write().await;
        s.enter("CreateBucket")?;
        if s.buckets.contains_key(name) {
            return Err(CloudError::invalid_parameter(
                "CreateBucket",
                format!("bucket {} already exists", name),
            ));
        }
        let bucket = Bucket {
            name: name.to_string(),
            tags,
        };
        s.buckets.insert(name.to_string(), bucket.clone());
        Ok(bucket)
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("DeleteBucket")?;
        if !s.buckets.contains_key(name) {
            return Err(CloudError::not_found("DeleteBucket", name));
        }
        if s.objects.keys().any(|(bucket, _)| bucket == name) {
            return Err(CloudError::dependency_violation(
                "DeleteBucket",
                name,
                "the bucket is not empty",
            ));
        }
        s.buckets.remove(name);
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("PutObject")?;
        if !s.buckets.contains_key(bucket) {
            return Err(CloudError::not_found("PutObject", bucket));
        }
        s.objects
            .insert((bucket.to_string(), key.to_string()), body);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Bytes>> {
        let mut s = self.state.write().await;
        s.enter("GetObject")?;
        if !s.buckets.contains_key(bucket) {
            return Err(CloudError::not_found("GetObject", bucket));
        }
        Ok(s
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut s = self.state.write().await;
        s.enter("ListObjects")?;
        if !s.buckets.contains_key(bucket) {
            return Err(CloudError::not_found("ListObjects", bucket));
        }
        Ok(s
            .objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }

    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<()> {
        let mut s = self.state.write().await;
        s.enter("DeleteObjects")?;
        for key in keys {
            s.objects.remove(&(bucket.to_string(), key));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tags(cluster: &str) -> Tags {
        owned_tags(cluster, cluster, None)
    }

    #[tokio::test]
    async fn test_vpc_with_subnet_cannot_be_deleted() {
        let cloud = MockCloud::new();
        let vpc = cloud.create_vpc("10.0.0.0/16", make_tags("demo")).await.unwrap();
        let subnet = cloud
            .create_subnet(CreateSubnet {
                vpc_id: vpc.vpc_id.clone(),
                cidr_block: "10.0.0.0/20".to_string(),
                availability_zone: "us-west-2a".to_string(),
                map_public_ip_on_launch: false,
                tags: make_tags("demo"),
            })
            .await
            .unwrap();

        let err = cloud.delete_vpc(&vpc.vpc_id).await.unwrap_err();
        assert!(err.is_dependency_violation());

        cloud.delete_subnet(&subnet.subnet_id).await.unwrap();
        cloud.delete_vpc(&vpc.vpc_id).await.unwrap();

        let err = cloud.delete_vpc(&vpc.vpc_id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_describe_is_tag_scoped() {
        let cloud = MockCloud::new();
        cloud.create_vpc("10.0.0.0/16", make_tags("a")).await.unwrap();
        cloud.create_vpc("10.0.0.0/16", make_tags("b")).await.unwrap();

        let a = cloud.describe_vpcs(&TagFilter::cluster("a")).await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(cloud.calls("CreateVpc").await, 2);
        assert_eq!(cloud.calls("DescribeVpcs").await, 1);
    }

    #[tokio::test]
    async fn test_fail_next_is_one_shot() {
        let cloud = MockCloud::new();
        cloud
            .fail_next("CreateVpc", CloudError::throttled("CreateVpc"))
            .await;

        let err = cloud.create_vpc("10.0.0.0/16", Tags::new()).await.unwrap_err();
        assert!(err.is_transient());
        assert!(cloud.create_vpc("10.0.0.0/16", Tags::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_referenced_security_group_cannot_be_deleted() {
        let cloud = MockCloud::new();
        let vpc = cloud.create_vpc("10.0.0.0/16", Tags::new()).await.unwrap();
        let master = cloud
            .create_security_group(&vpc.vpc_id, "master", "", Tags::new())
            .await
            .unwrap();
        let etcd = cloud
            .create_security_group(&vpc.vpc_id, "etcd", "", Tags::new())
            .await
            .unwrap();
        cloud
            .authorize_ingress(
                &etcd.group_id,
                vec![IngressRule {
                    protocol: "tcp".to_string(),
                    from_port: 2379,
                    to_port: 2379,
                    source: IngressSource::Group(master.group_id.clone()),
                }],
            )
            .await
            .unwrap();

        let err = cloud.delete_security_group(&master.group_id).await.unwrap_err();
        assert!(err.is_dependency_violation());

        cloud.delete_security_group(&etcd.group_id).await.unwrap();
        cloud.delete_security_group(&master.group_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_role_with_policy_cannot_be_deleted() {
        let cloud = MockCloud::new();
        cloud.create_role("demo-master-role", "{}", Tags::new()).await.unwrap();
        cloud
            .put_role_policy("demo-master-role", "demo-master-policy", "{}")
            .await
            .unwrap();

        let err = cloud.delete_role("demo-master-role").await.unwrap_err();
        assert!(err.is_dependency_violation());

        cloud
            .delete_role_policy("demo-master-role", "demo-master-policy")
            .await
            .unwrap();
        cloud.delete_role("demo-master-role").await.unwrap();
    }

    #[tokio::test]
    async fn test_auto_scaling_group_launches_tagged_instances() {
        let cloud = MockCloud::new();
        cloud.create_instance_profile("p", Tags::new()).await.unwrap();
        cloud
            .create_launch_template(CreateLaunchTemplate {
                name: "demo-etcd-template".to_string(),
                image_id: "ami-1".to_string(),
                instance_type: "t2.large".to_string(),
                volume_size_gib: 40,
                volume_type: "gp3".to_string(),
                security_group_ids: vec![],
                instance_profile_name: "p".to_string(),
                user_data: String::new(),
                tags: Tags::new(),
            })
            .await
            .unwrap();
        cloud
            .create_auto_scaling_group(CreateAutoScalingGroup {
                name: "demo-etcd-asg".to_string(),
                launch_template_name: "demo-etcd-template".to_string(),
                subnet_ids: vec![],
                desired_capacity: 3,
                min_size: 1,
                max_size: 4,
                tags: owned_tags("demo", "demo-etcd", Some("etcd")),
            })
            .await
            .unwrap();

        let filter = TagFilter::new().with("Name", "demo-etcd");
        let instances = cloud.describe_instances(&filter).await.unwrap();
        assert_eq!(instances.len(), 3);
        assert!(instances.iter().all(|i| i.state == InstanceState::Running));

        cloud.delete_auto_scaling_group("demo-etcd-asg").await.unwrap();
        let instances = cloud.describe_instances(&filter).await.unwrap();
        assert!(instances.iter().all(|i| i.state == InstanceState::Terminated));
    }

    #[tokio::test]
    async fn test_non_empty_bucket_cannot_be_deleted() {
        let cloud = MockCloud::new();
        cloud.create_bucket("kit-demo", Tags::new()).await.unwrap();
        cloud
            .put_object("kit-demo", "demo/i-1/etc/kubernetes/pki/ca.crt", Bytes::from("x"))
            .await
            .unwrap();

        assert!(cloud.delete_bucket("kit-demo").await.unwrap_err().is_dependency_violation());

        let keys = cloud.list_objects("kit-demo", "demo/").await.unwrap();
        cloud.delete_objects("kit-demo", keys).await.unwrap();
        cloud.delete_bucket("kit-demo").await.unwrap();
    }
}
