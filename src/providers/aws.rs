//! AWS adapter over the official EC2 SDK.
//!
//! Maps the uniform contract onto EC2/VPC primitives: servers are
//! instances found by `tag:Name`, networks are a VPC + public subnet +
//! internet gateway, firewalls are security groups, volumes are EBS.
//! Load balancers and managed certificates are not offered here; the
//! tunnel path carries web traffic on AWS deployments.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_ec2::error::ProvideErrorMetadata;
use aws_sdk_ec2::primitives::Blob;
use aws_sdk_ec2::types::{
    Filter, IpPermission, IpRange, ResourceType, Tag, TagSpecification,
};
use aws_sdk_ec2::Client;
use base64::{engine::general_purpose, Engine as _};

use crate::errors::{Error, Result};
use crate::providers::{
    Certificate, ComputeProvider, Firewall, FirewallRule, LoadBalancer, Network, RuleDirection,
    Server, ServerSpec, SshKey, Volume, VolumeSpec,
};
use crate::ssh::SshClient;
use crate::waiter;

const CONFLICT_CODES: &[&str] = &[
    "InvalidPermission.Duplicate",
    "InvalidKeyPair.Duplicate",
    "InvalidGroup.Duplicate",
    "VolumeInUse",
    "Resource.AlreadyAssociated",
];

pub struct AwsProvider {
    client: Client,
    region: String,
}

impl AwsProvider {
    pub async fn from_env() -> Result<Self> {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let region = config
            .region()
            .map(|r| r.to_string())
            .ok_or_else(|| {
                Error::Configuration("AWS region not configured; set AWS_REGION".to_string())
            })?;
        Ok(Self {
            client: Client::new(&config),
            region,
        })
    }

    fn name_filter(name: &str) -> Filter {
        Filter::builder().name("tag:Name").values(name).build()
    }

    fn tag_spec(resource_type: ResourceType, name: &str, labels: &HashMap<String, String>) -> TagSpecification {
        let mut builder = TagSpecification::builder()
            .resource_type(resource_type)
            .tags(Tag::builder().key("Name").value(name).build());
        for (key, value) in labels {
            builder = builder.tags(Tag::builder().key(key).value(value).build());
        }
        builder.build()
    }

    fn tags_to_labels(tags: &[Tag]) -> HashMap<String, String> {
        tags.iter()
            .filter_map(|t| match (t.key(), t.value()) {
                (Some(k), Some(v)) if k != "Name" => Some((k.to_string(), v.to_string())),
                _ => None,
            })
            .collect()
    }

    fn normalize_instance(&self, instance: &aws_sdk_ec2::types::Instance) -> Server {
        let name = instance
            .tags()
            .iter()
            .find(|t| t.key() == Some("Name"))
            .and_then(|t| t.value())
            .unwrap_or_default()
            .to_string();
        Server {
            id: instance.instance_id().unwrap_or_default().to_string(),
            name,
            public_ipv4: instance.public_ip_address().map(str::to_string),
            private_ipv4: instance.private_ip_address().map(str::to_string),
            instance_type: instance
                .instance_type()
                .map(|t| t.as_str().to_string())
                .unwrap_or_default(),
            location: self.region.clone(),
            status: instance
                .state()
                .and_then(|s| s.name())
                .map(|n| n.as_str().to_string())
                .unwrap_or_default(),
            labels: Self::tags_to_labels(instance.tags()),
        }
    }

    async fn find_subnet(&self, vpc_id: &str) -> Result<Option<String>> {
        let resp = self
            .client
            .describe_subnets()
            .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
            .send()
            .await
            .map_err(|e| aws_error("DescribeSubnets", e))?;
        Ok(resp
            .subnets()
            .first()
            .and_then(|s| s.subnet_id())
            .map(str::to_string))
    }

    async fn find_security_group(&self, name: &str) -> Result<Option<(String, Vec<FirewallRule>)>> {
        let resp = self
            .client
            .describe_security_groups()
            .filters(Filter::builder().name("group-name").values(name).build())
            .send()
            .await
            .map_err(|e| aws_error("DescribeSecurityGroups", e))?;
        Ok(resp.security_groups().first().map(|sg| {
            let rules = sg
                .ip_permissions()
                .iter()
                .map(|perm| FirewallRule {
                    direction: RuleDirection::In,
                    protocol: perm.ip_protocol().unwrap_or("tcp").to_string(),
                    port: perm.from_port().map(|p| p.to_string()),
                    source_ips: perm
                        .ip_ranges()
                        .iter()
                        .filter_map(|r| r.cidr_ip())
                        .map(str::to_string)
                        .collect(),
                })
                .collect();
            (sg.group_id().unwrap_or_default().to_string(), rules)
        }))
    }

    async fn authorize_rules(&self, group_id: &str, rules: &[FirewallRule]) -> Result<()> {
        for rule in rules {
            if rule.direction == RuleDirection::Out {
                continue; // security groups allow all egress by default
            }
            let port: i32 = rule
                .port
                .as_deref()
                .and_then(|p| p.split('-').next())
                .and_then(|p| p.parse().ok())
                .unwrap_or(-1);
            let mut perm = IpPermission::builder().ip_protocol(if rule.protocol == "icmp" {
                "icmp"
            } else {
                &rule.protocol
            });
            if port >= 0 {
                perm = perm.from_port(port).to_port(port);
            } else {
                perm = perm.from_port(-1).to_port(-1);
            }
            for ip in &rule.source_ips {
                if ip.contains(':') {
                    continue; // v6 ranges need Ipv6Range; tunnel traffic is v4
                }
                perm = perm.ip_ranges(IpRange::builder().cidr_ip(ip).build());
            }
            let result = self
                .client
                .authorize_security_group_ingress()
                .group_id(group_id)
                .ip_permissions(perm.build())
                .send()
                .await;
            if let Err(err) = result {
                let mapped = aws_error("AuthorizeSecurityGroupIngress", err);
                if !mapped.matches_conflict_marker(CONFLICT_CODES) {
                    return Err(mapped);
                }
            }
        }
        Ok(())
    }
}

fn aws_error<E, R>(op: &str, err: aws_sdk_ec2::error::SdkError<E, R>) -> Error
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    use aws_sdk_ec2::error::SdkError;
    match &err {
        SdkError::ServiceError(_) => {
            let code = err.code().unwrap_or("Unknown").to_string();
            let message = err.message().unwrap_or("").to_string();
            let status = if code.contains("NotFound") { 404 } else { 400 };
            Error::Api {
                status,
                body: code.clone(),
                message: format!("{} failed ({}): {}", op, code, message),
            }
        }
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
            Error::Connection(format!("{}: {:?}", op, err))
        }
        _ => Error::Other(format!("{}: {:?}", op, err)),
    }
}

#[async_trait]
impl ComputeProvider for AwsProvider {
    fn provider_name(&self) -> &'static str {
        "aws"
    }

    fn supports_self_hosted(&self) -> bool {
        false
    }

    fn vm_based(&self) -> bool {
        true
    }

    async fn validate_credentials(&self) -> Result<()> {
        let result = self.client.describe_regions().send().await;
        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let mapped = aws_error("DescribeRegions", err);
                if mapped.is_unauthorized() || matches!(&mapped, Error::Api { body, .. } if body.contains("AuthFailure")) {
                    Err(Error::Configuration(
                        "AWS credentials rejected; check AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY"
                            .to_string(),
                    ))
                } else {
                    Err(mapped)
                }
            }
        }
    }

    async fn list_servers(&self) -> Result<Vec<Server>> {
        let resp = self
            .client
            .describe_instances()
            .filters(
                Filter::builder()
                    .name("instance-state-name")
                    .values("pending")
                    .values("running")
                    .build(),
            )
            .send()
            .await
            .map_err(|e| aws_error("DescribeInstances", e))?;
        let mut servers = Vec::new();
        for reservation in resp.reservations() {
            for instance in reservation.instances() {
                servers.push(self.normalize_instance(instance));
            }
        }
        Ok(servers)
    }

    async fn find_server(&self, name: &str) -> Result<Option<Server>> {
        let resp = self
            .client
            .describe_instances()
            .filters(Self::name_filter(name))
            .filters(
                Filter::builder()
                    .name("instance-state-name")
                    .values("pending")
                    .values("running")
                    .build(),
            )
            .send()
            .await
            .map_err(|e| aws_error("DescribeInstances", e))?;
        Ok(resp
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .next()
            .map(|i| self.normalize_instance(i)))
    }

    async fn find_or_create_server(&self, spec: &ServerSpec) -> Result<Server> {
        if let Some(existing) = self.find_server(&spec.name).await? {
            tracing::debug!("instance {} already exists ({})", spec.name, existing.id);
            return Ok(existing);
        }

        let mut req = self
            .client
            .run_instances()
            .image_id(&spec.image)
            .instance_type(spec.instance_type.as_str().into())
            .min_count(1)
            .max_count(1)
            .tag_specifications(Self::tag_spec(
                ResourceType::Instance,
                &spec.name,
                &spec.labels,
            ));
        if let Some(user_data) = &spec.user_data {
            req = req.user_data(general_purpose::STANDARD.encode(user_data));
        }
        for sg in &spec.firewall_ids {
            req = req.security_group_ids(sg);
        }
        if let Some(vpc_id) = spec.network_ids.first() {
            if let Some(subnet) = self.find_subnet(vpc_id).await? {
                req = req.subnet_id(subnet);
            }
        }
        if let Some(key) = spec.ssh_key_ids.first() {
            req = req.key_name(key);
        }

        let resp = req.send().await.map_err(|e| aws_error("RunInstances", e))?;
        resp.instances()
            .first()
            .map(|i| self.normalize_instance(i))
            .ok_or_else(|| Error::Other(format!("RunInstances returned nothing for {}", spec.name)))
    }

    async fn delete_server_by_name(&self, name: &str) -> Result<()> {
        let Some(server) = self.find_server(name).await? else {
            return Ok(());
        };
        let result = self
            .client
            .terminate_instances()
            .instance_ids(&server.id)
            .send()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let mapped = aws_error("TerminateInstances", err);
                if mapped.is_not_found() {
                    Ok(())
                } else {
                    Err(mapped)
                }
            }
        }
    }

    async fn find_or_create_network(&self, name: &str, _location: &str) -> Result<Network> {
        let existing = self
            .client
            .describe_vpcs()
            .filters(Self::name_filter(name))
            .send()
            .await
            .map_err(|e| aws_error("DescribeVpcs", e))?;
        if let Some(vpc) = existing.vpcs().first() {
            return Ok(Network {
                id: vpc.vpc_id().unwrap_or_default().to_string(),
                name: name.to_string(),
                ip_range: vpc.cidr_block().unwrap_or_default().to_string(),
            });
        }

        let vpc = self
            .client
            .create_vpc()
            .cidr_block("10.0.0.0/16")
            .tag_specifications(Self::tag_spec(ResourceType::Vpc, name, &HashMap::new()))
            .send()
            .await
            .map_err(|e| aws_error("CreateVpc", e))?;
        let vpc_id = vpc
            .vpc()
            .and_then(|v| v.vpc_id())
            .ok_or_else(|| Error::Other("CreateVpc returned no id".to_string()))?
            .to_string();

        self.client
            .create_subnet()
            .vpc_id(&vpc_id)
            .cidr_block("10.0.1.0/24")
            .send()
            .await
            .map_err(|e| aws_error("CreateSubnet", e))?;

        // Public subnet: internet gateway + default route.
        let igw = self
            .client
            .create_internet_gateway()
            .send()
            .await
            .map_err(|e| aws_error("CreateInternetGateway", e))?;
        if let Some(igw_id) = igw
            .internet_gateway()
            .and_then(|g| g.internet_gateway_id())
        {
            self.client
                .attach_internet_gateway()
                .internet_gateway_id(igw_id)
                .vpc_id(&vpc_id)
                .send()
                .await
                .map_err(|e| aws_error("AttachInternetGateway", e))?;
            let tables = self
                .client
                .describe_route_tables()
                .filters(Filter::builder().name("vpc-id").values(&vpc_id).build())
                .send()
                .await
                .map_err(|e| aws_error("DescribeRouteTables", e))?;
            if let Some(table_id) = tables
                .route_tables()
                .first()
                .and_then(|t| t.route_table_id())
            {
                self.client
                    .create_route()
                    .route_table_id(table_id)
                    .destination_cidr_block("0.0.0.0/0")
                    .gateway_id(igw_id)
                    .send()
                    .await
                    .map_err(|e| aws_error("CreateRoute", e))?;
            }
        }

        Ok(Network {
            id: vpc_id,
            name: name.to_string(),
            ip_range: "10.0.0.0/16".to_string(),
        })
    }

    async fn delete_network_by_name(&self, name: &str) -> Result<()> {
        let existing = self
            .client
            .describe_vpcs()
            .filters(Self::name_filter(name))
            .send()
            .await
            .map_err(|e| aws_error("DescribeVpcs", e))?;
        let Some(vpc_id) = existing.vpcs().first().and_then(|v| v.vpc_id()) else {
            return Ok(());
        };
        let result = self.client.delete_vpc().vpc_id(vpc_id).send().await;
        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let mapped = aws_error("DeleteVpc", err);
                if mapped.is_not_found() {
                    Ok(())
                } else {
                    Err(mapped)
                }
            }
        }
    }

    async fn find_or_create_firewall(
        &self,
        name: &str,
        rules: &[FirewallRule],
    ) -> Result<Firewall> {
        if let Some((id, existing_rules)) = self.find_security_group(name).await? {
            return Ok(Firewall {
                id,
                name: name.to_string(),
                rules: existing_rules,
            });
        }
        let created = self
            .client
            .create_security_group()
            .group_name(name)
            .description(format!("managed by decker: {}", name))
            .send()
            .await
            .map_err(|e| aws_error("CreateSecurityGroup", e))?;
        let group_id = created
            .group_id()
            .ok_or_else(|| Error::Other("CreateSecurityGroup returned no id".to_string()))?
            .to_string();
        self.authorize_rules(&group_id, rules).await?;
        Ok(Firewall {
            id: group_id,
            name: name.to_string(),
            rules: rules.to_vec(),
        })
    }

    async fn get_firewall(&self, id: &str) -> Result<Firewall> {
        let resp = self
            .client
            .describe_security_groups()
            .group_ids(id)
            .send()
            .await
            .map_err(|e| aws_error("DescribeSecurityGroups", e))?;
        let sg = resp
            .security_groups()
            .first()
            .ok_or_else(|| Error::api(404, "", format!("security group {} not found", id)))?;
        let rules = sg
            .ip_permissions()
            .iter()
            .map(|perm| FirewallRule {
                direction: RuleDirection::In,
                protocol: perm.ip_protocol().unwrap_or("tcp").to_string(),
                port: perm.from_port().map(|p| p.to_string()),
                source_ips: perm
                    .ip_ranges()
                    .iter()
                    .filter_map(|r| r.cidr_ip())
                    .map(str::to_string)
                    .collect(),
            })
            .collect();
        Ok(Firewall {
            id: id.to_string(),
            name: sg.group_name().unwrap_or_default().to_string(),
            rules,
        })
    }

    async fn set_firewall_rules(&self, id: &str, rules: &[FirewallRule]) -> Result<()> {
        // Revoke what exists, then authorize the desired set.
        let current = self
            .client
            .describe_security_groups()
            .group_ids(id)
            .send()
            .await
            .map_err(|e| aws_error("DescribeSecurityGroups", e))?;
        if let Some(sg) = current.security_groups().first() {
            if !sg.ip_permissions().is_empty() {
                self.client
                    .revoke_security_group_ingress()
                    .group_id(id)
                    .set_ip_permissions(Some(sg.ip_permissions().to_vec()))
                    .send()
                    .await
                    .map_err(|e| aws_error("RevokeSecurityGroupIngress", e))?;
            }
        }
        self.authorize_rules(id, rules).await
    }

    async fn delete_firewall_by_name(&self, name: &str) -> Result<()> {
        let Some((id, _)) = self.find_security_group(name).await? else {
            return Ok(());
        };
        let result = self.client.delete_security_group().group_id(id).send().await;
        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let mapped = aws_error("DeleteSecurityGroup", err);
                if mapped.is_not_found() {
                    Ok(())
                } else {
                    Err(mapped)
                }
            }
        }
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>> {
        let resp = self
            .client
            .describe_volumes()
            .send()
            .await
            .map_err(|e| aws_error("DescribeVolumes", e))?;
        Ok(resp
            .volumes()
            .iter()
            .map(|v| Volume {
                id: v.volume_id().unwrap_or_default().to_string(),
                name: v
                    .tags()
                    .iter()
                    .find(|t| t.key() == Some("Name"))
                    .and_then(|t| t.value())
                    .unwrap_or_default()
                    .to_string(),
                size_gb: v.size().unwrap_or(0) as u32,
                location: v.availability_zone().unwrap_or_default().to_string(),
                server_id: v
                    .attachments()
                    .first()
                    .and_then(|a| a.instance_id())
                    .map(str::to_string),
            })
            .collect())
    }

    async fn find_or_create_volume(&self, spec: &VolumeSpec) -> Result<Volume> {
        if let Some(existing) = self
            .list_volumes()
            .await?
            .into_iter()
            .find(|v| v.name == spec.name)
        {
            return Ok(existing);
        }
        let resp = self
            .client
            .create_volume()
            .availability_zone(format!("{}a", self.region))
            .size(spec.size_gb as i32)
            .volume_type(aws_sdk_ec2::types::VolumeType::Gp3)
            .tag_specifications(Self::tag_spec(ResourceType::Volume, &spec.name, &spec.labels))
            .send()
            .await
            .map_err(|e| aws_error("CreateVolume", e))?;
        Ok(Volume {
            id: resp.volume_id().unwrap_or_default().to_string(),
            name: spec.name.clone(),
            size_gb: spec.size_gb,
            location: format!("{}a", self.region),
            server_id: None,
        })
    }

    async fn attach_volume(&self, volume_id: &str, server_id: &str) -> Result<()> {
        let result = self
            .client
            .attach_volume()
            .volume_id(volume_id)
            .instance_id(server_id)
            .device("/dev/sdf")
            .send()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let mapped = aws_error("AttachVolume", err);
                if mapped.matches_conflict_marker(CONFLICT_CODES) {
                    Ok(())
                } else {
                    Err(mapped)
                }
            }
        }
    }

    async fn wait_for_device_path(&self, volume_id: &str, ssh: &SshClient) -> Result<String> {
        // Nitro instances surface EBS as nvme with the volume id (sans
        // dash) as serial; older families keep the /dev/sdf name.
        let serial = volume_id.replace('-', "");
        let probe = format!(
            "lsblk -ndo NAME,SERIAL | awk '$2==\"{}\" {{print \"/dev/\"$1}}'; test -b /dev/sdf && echo /dev/sdf",
            serial
        );
        waiter::poll(
            30,
            Duration::from_secs(2),
            &format!("device for volume {} on {}", volume_id, ssh.host()),
            || async {
                let result = ssh
                    .execute_with(
                        &probe,
                        crate::ssh::ExecOptions {
                            raise_on_error: false,
                            ..Default::default()
                        },
                    )
                    .await?;
                Ok(!result.output.trim().is_empty())
            },
        )
        .await?;
        let result = ssh
            .execute_with(
                &probe,
                crate::ssh::ExecOptions {
                    raise_on_error: false,
                    ..Default::default()
                },
            )
            .await?;
        result
            .output
            .lines()
            .next()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .ok_or_else(|| {
                Error::Other(format!("volume {} attached but no device appeared", volume_id))
            })
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        let result = self.client.delete_volume().volume_id(volume_id).send().await;
        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let mapped = aws_error("DeleteVolume", err);
                if mapped.is_not_found() {
                    Ok(())
                } else {
                    Err(mapped)
                }
            }
        }
    }

    async fn find_or_create_load_balancer(
        &self,
        _name: &str,
        _location: &str,
    ) -> Result<LoadBalancer> {
        Err(Error::Configuration(
            "load balancers are not supported on the aws adapter".to_string(),
        ))
    }

    async fn attach_load_balancer_to_network(&self, _lb_id: &str, _network_id: &str) -> Result<()> {
        Err(Error::Configuration(
            "load balancers are not supported on the aws adapter".to_string(),
        ))
    }

    async fn add_load_balancer_target(&self, _lb_id: &str, _server_id: &str) -> Result<()> {
        Err(Error::Configuration(
            "load balancers are not supported on the aws adapter".to_string(),
        ))
    }

    async fn add_load_balancer_service(
        &self,
        _lb_id: &str,
        _listen_port: u16,
        _destination_port: u16,
    ) -> Result<()> {
        Err(Error::Configuration(
            "load balancers are not supported on the aws adapter".to_string(),
        ))
    }

    async fn find_or_create_ssh_key(&self, name: &str, public_key: &str) -> Result<SshKey> {
        let existing = self.client.describe_key_pairs().key_names(name).send().await;
        match existing {
            Ok(resp) => {
                if let Some(pair) = resp.key_pairs().first() {
                    return Ok(SshKey {
                        id: pair.key_name().unwrap_or(name).to_string(),
                        name: pair.key_name().unwrap_or(name).to_string(),
                        fingerprint: pair.key_fingerprint().map(str::to_string),
                    });
                }
            }
            Err(err) => {
                let mapped = aws_error("DescribeKeyPairs", err);
                if !mapped.is_not_found() && !mapped.matches_conflict_marker(&["InvalidKeyPair.NotFound"]) {
                    return Err(mapped);
                }
            }
        }
        let imported = self
            .client
            .import_key_pair()
            .key_name(name)
            .public_key_material(Blob::new(public_key.as_bytes()))
            .send()
            .await
            .map_err(|e| aws_error("ImportKeyPair", e))?;
        Ok(SshKey {
            id: imported.key_name().unwrap_or(name).to_string(),
            name: imported.key_name().unwrap_or(name).to_string(),
            fingerprint: imported.key_fingerprint().map(str::to_string),
        })
    }

    async fn find_or_create_managed_certificate(
        &self,
        _name: &str,
        _domain_names: &[String],
    ) -> Result<Certificate> {
        Err(Error::Configuration(
            "managed certificates are not supported on the aws adapter".to_string(),
        ))
    }
}
