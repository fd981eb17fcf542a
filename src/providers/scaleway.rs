//! Scaleway adapter: instance API for servers/volumes/security groups,
//! VPC API for private networks, IAM for SSH keys, LB API for load
//! balancers.
//!
//! Scaleway sizes volumes in bytes and scopes resources by zone
//! (`fr-par-1`) or region (`fr-par`); both conversions happen here and
//! nowhere else. Labels are carried as `key=value` tags.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::{Error, Result};
use crate::http::{ApiClient, Auth};
use crate::providers::{
    require_env, Certificate, ComputeProvider, Firewall, FirewallRule, LoadBalancer, Network,
    RuleDirection, Server, ServerSpec, SshKey, Volume, VolumeSpec,
};
use crate::ssh::SshClient;
use crate::waiter;

const API_BASE: &str = "https://api.scaleway.com";

const CONFLICT_MARKERS: &[&str] = &["already exists", "already attached", "duplicated"];

const GB: u64 = 1_000_000_000;

pub struct ScalewayProvider {
    api: ApiClient,
    zone: String,
    project_id: String,
}

// ── Wire types ───────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SServer {
    id: String,
    name: String,
    state: String,
    commercial_type: String,
    zone: String,
    public_ip: Option<SIp>,
    private_ip: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SIp {
    address: String,
}

#[derive(Debug, Deserialize)]
struct SVolume {
    id: String,
    name: String,
    size: u64,
    zone: String,
    server: Option<SVolumeServer>,
}

#[derive(Debug, Deserialize)]
struct SVolumeServer {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SSecurityGroup {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct SRule {
    direction: String,
    protocol: String,
    dest_port_from: Option<u16>,
    dest_port_to: Option<u16>,
    ip_range: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SPrivateNetwork {
    id: String,
    name: String,
    #[serde(default)]
    subnets: Vec<SSubnet>,
}

#[derive(Debug, Deserialize)]
struct SSubnet {
    subnet: String,
}

#[derive(Debug, Deserialize)]
struct SLb {
    id: String,
    name: String,
    #[serde(default)]
    ip: Vec<SLbIp>,
}

#[derive(Debug, Deserialize)]
struct SLbIp {
    ip_address: String,
}

#[derive(Debug, Deserialize)]
struct SSshKey {
    id: String,
    name: String,
    fingerprint: Option<String>,
}

impl ScalewayProvider {
    pub fn new(secret_key: &str, project_id: &str, zone: &str) -> Self {
        Self::with_base_url(API_BASE, secret_key, project_id, zone)
    }

    pub fn with_base_url(base_url: &str, secret_key: &str, project_id: &str, zone: &str) -> Self {
        Self {
            api: ApiClient::new(base_url, Auth::Header("X-Auth-Token", secret_key.to_string())),
            zone: zone.to_string(),
            project_id: project_id.to_string(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let zone =
            std::env::var("SCW_DEFAULT_ZONE").unwrap_or_else(|_| "fr-par-1".to_string());
        Ok(Self::new(
            &require_env("SCW_SECRET_KEY")?,
            &require_env("SCW_DEFAULT_PROJECT_ID")?,
            &zone,
        ))
    }

    fn instance_path(&self, tail: &str) -> String {
        format!("instance/v1/zones/{}/{}", self.zone, tail)
    }

    fn vpc_path(&self, tail: &str) -> String {
        format!("vpc/v2/regions/{}/{}", self.region(), tail)
    }

    fn lb_path(&self, tail: &str) -> String {
        format!("lb/v1/zones/{}/{}", self.zone, tail)
    }

    /// `fr-par-1` → `fr-par`.
    fn region(&self) -> String {
        self.zone
            .rsplit_once('-')
            .map(|(region, _)| region.to_string())
            .unwrap_or_else(|| self.zone.clone())
    }

    fn tags_from_labels(labels: &HashMap<String, String>) -> Vec<String> {
        let mut tags: Vec<String> =
            labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        tags.sort();
        tags
    }

    fn labels_from_tags(tags: &[String]) -> HashMap<String, String> {
        tags.iter()
            .filter_map(|t| t.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn normalize_server(s: SServer) -> Server {
        Server {
            id: s.id,
            name: s.name,
            public_ipv4: s.public_ip.map(|ip| ip.address),
            private_ipv4: s.private_ip,
            instance_type: s.commercial_type,
            location: s.zone,
            status: s.state,
            labels: Self::labels_from_tags(&s.tags),
        }
    }

    fn normalize_volume(v: SVolume) -> Volume {
        Volume {
            id: v.id,
            name: v.name,
            size_gb: (v.size / GB) as u32,
            location: v.zone,
            server_id: v.server.map(|s| s.id),
        }
    }

    async fn find_security_group(&self, name: &str) -> Result<Option<Firewall>> {
        #[derive(Deserialize)]
        struct Resp {
            security_groups: Vec<SSecurityGroup>,
        }
        let resp: Resp = self
            .api
            .get(&self.instance_path("security_groups"), &[("name", name)])
            .await?;
        match resp.security_groups.into_iter().find(|sg| sg.name == name) {
            Some(sg) => Ok(Some(self.get_firewall_inner(&sg.id, &sg.name).await?)),
            None => Ok(None),
        }
    }

    async fn get_firewall_inner(&self, id: &str, name: &str) -> Result<Firewall> {
        #[derive(Deserialize)]
        struct Resp {
            rules: Vec<SRule>,
        }
        let resp: Resp = self
            .api
            .get(
                &self.instance_path(&format!("security_groups/{}/rules", id)),
                &[],
            )
            .await?;
        let rules = resp
            .rules
            .into_iter()
            .map(|r| FirewallRule {
                direction: if r.direction == "outbound" {
                    RuleDirection::Out
                } else {
                    RuleDirection::In
                },
                protocol: r.protocol.to_lowercase(),
                port: match (r.dest_port_from, r.dest_port_to) {
                    (Some(from), Some(to)) if from != to => Some(format!("{}-{}", from, to)),
                    (Some(from), _) => Some(from.to_string()),
                    _ => None,
                },
                source_ips: r.ip_range.into_iter().collect(),
            })
            .collect();
        Ok(Firewall {
            id: id.to_string(),
            name: name.to_string(),
            rules,
        })
    }

    async fn replace_rules(&self, id: &str, rules: &[FirewallRule]) -> Result<()> {
        // The instance API has no bulk replace; PUT an explicit rule list.
        let body: Vec<Value> = rules
            .iter()
            .map(|r| {
                let port = r.port.as_ref().and_then(|p| {
                    p.split('-').next().and_then(|s| s.parse::<u16>().ok())
                });
                json!({
                    "direction": match r.direction {
                        RuleDirection::In => "inbound",
                        RuleDirection::Out => "outbound",
                    },
                    "protocol": r.protocol.to_uppercase(),
                    "action": "accept",
                    "dest_port_from": port,
                    "dest_port_to": port,
                    "ip_range": r.source_ips.first().cloned().unwrap_or_else(|| "0.0.0.0/0".to_string()),
                })
            })
            .collect();
        let _: Value = self
            .api
            .put(
                &self.instance_path(&format!("security_groups/{}/rules", id)),
                &json!({ "rules": body }),
            )
            .await?;
        Ok(())
    }

    async fn find_private_network(&self, name: &str) -> Result<Option<Network>> {
        #[derive(Deserialize)]
        struct Resp {
            private_networks: Vec<SPrivateNetwork>,
        }
        let resp: Resp = self
            .api
            .get(&self.vpc_path("private-networks"), &[("name", name)])
            .await?;
        Ok(resp
            .private_networks
            .into_iter()
            .find(|pn| pn.name == name)
            .map(|pn| Network {
                id: pn.id,
                name: pn.name,
                ip_range: pn
                    .subnets
                    .first()
                    .map(|s| s.subnet.clone())
                    .unwrap_or_default(),
            }))
    }

    async fn find_volume(&self, name: &str) -> Result<Option<Volume>> {
        #[derive(Deserialize)]
        struct Resp {
            volumes: Vec<SVolume>,
        }
        let resp: Resp = self
            .api
            .get(&self.instance_path("volumes"), &[("name", name)])
            .await?;
        Ok(resp
            .volumes
            .into_iter()
            .find(|v| v.name == name)
            .map(Self::normalize_volume))
    }
}

#[async_trait]
impl ComputeProvider for ScalewayProvider {
    fn provider_name(&self) -> &'static str {
        "scaleway"
    }

    fn supports_self_hosted(&self) -> bool {
        true
    }

    fn vm_based(&self) -> bool {
        true
    }

    async fn validate_credentials(&self) -> Result<()> {
        let result: Result<Value> = self
            .api
            .get(&self.instance_path("servers"), &[("per_page", "1")])
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_unauthorized() => Err(Error::Configuration(
                "scaleway secret key rejected; check SCW_SECRET_KEY".to_string(),
            )),
            Err(err) => Err(err),
        }
    }

    async fn list_servers(&self) -> Result<Vec<Server>> {
        #[derive(Deserialize)]
        struct Resp {
            servers: Vec<SServer>,
        }
        let resp: Resp = self
            .api
            .get(&self.instance_path("servers"), &[("per_page", "100")])
            .await?;
        Ok(resp.servers.into_iter().map(Self::normalize_server).collect())
    }

    async fn find_server(&self, name: &str) -> Result<Option<Server>> {
        #[derive(Deserialize)]
        struct Resp {
            servers: Vec<SServer>,
        }
        let resp: Resp = self
            .api
            .get(&self.instance_path("servers"), &[("name", name)])
            .await?;
        // The name filter is a prefix match; insist on equality.
        Ok(resp
            .servers
            .into_iter()
            .find(|s| s.name == name)
            .map(Self::normalize_server))
    }

    async fn find_or_create_server(&self, spec: &ServerSpec) -> Result<Server> {
        if let Some(existing) = self.find_server(&spec.name).await? {
            tracing::debug!("server {} already exists (id {})", spec.name, existing.id);
            return Ok(existing);
        }

        let mut body = json!({
            "name": spec.name,
            "commercial_type": spec.instance_type,
            "image": spec.image,
            "project": self.project_id,
            "tags": Self::tags_from_labels(&spec.labels),
            "dynamic_ip_required": true,
        });
        if let Some(sg) = spec.firewall_ids.first() {
            body["security_group"] = json!(sg);
        }

        #[derive(Deserialize)]
        struct Resp {
            server: SServer,
        }
        let created = match self
            .api
            .post::<Resp>(&self.instance_path("servers"), &body)
            .await
        {
            Ok(resp) => resp.server,
            Err(err) if err.matches_conflict_marker(CONFLICT_MARKERS) => {
                return self.find_server(&spec.name).await?.ok_or_else(|| {
                    Error::Other(format!("server {} vanished after conflict", spec.name))
                })
            }
            Err(err) => return Err(err),
        };

        // Cloud-init travels through the user_data endpoint, then the
        // server is powered on explicitly.
        if let Some(user_data) = &spec.user_data {
            let _: Value = self
                .api
                .put_raw(
                    &self.instance_path(&format!("servers/{}/user_data/cloud-init", created.id)),
                    user_data.clone().into_bytes(),
                    "text/plain",
                )
                .await?;
        }
        for network_id in &spec.network_ids {
            let body = json!({ "private_network_id": network_id });
            let result: Result<Value> = self
                .api
                .post(
                    &self.instance_path(&format!("servers/{}/private_nics", created.id)),
                    &body,
                )
                .await;
            if let Err(err) = result {
                if !err.matches_conflict_marker(CONFLICT_MARKERS) {
                    return Err(err);
                }
            }
        }
        let _: Value = self
            .api
            .post(
                &self.instance_path(&format!("servers/{}/action", created.id)),
                &json!({ "action": "poweron" }),
            )
            .await?;

        self.find_server(&spec.name).await?.ok_or_else(|| {
            Error::Other(format!("server {} not visible after create", spec.name))
        })
    }

    async fn delete_server_by_name(&self, name: &str) -> Result<()> {
        let Some(server) = self.find_server(name).await? else {
            return Ok(());
        };
        // terminate powers off, detaches and deletes in one action.
        let result: Result<Value> = self
            .api
            .post(
                &self.instance_path(&format!("servers/{}/action", server.id)),
                &json!({ "action": "terminate" }),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn find_or_create_network(&self, name: &str, _location: &str) -> Result<Network> {
        if let Some(existing) = self.find_private_network(name).await? {
            return Ok(existing);
        }
        let body = json!({ "name": name, "project_id": self.project_id });
        match self
            .api
            .post::<SPrivateNetwork>(&self.vpc_path("private-networks"), &body)
            .await
        {
            Ok(pn) => Ok(Network {
                ip_range: pn
                    .subnets
                    .first()
                    .map(|s| s.subnet.clone())
                    .unwrap_or_default(),
                id: pn.id,
                name: pn.name,
            }),
            Err(err) if err.matches_conflict_marker(CONFLICT_MARKERS) => self
                .find_private_network(name)
                .await?
                .ok_or_else(|| Error::Other(format!("network {} vanished after conflict", name))),
            Err(err) => Err(err),
        }
    }

    async fn delete_network_by_name(&self, name: &str) -> Result<()> {
        let Some(network) = self.find_private_network(name).await? else {
            return Ok(());
        };
        let result: Result<Value> = self
            .api
            .delete(&self.vpc_path(&format!("private-networks/{}", network.id)))
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn find_or_create_firewall(
        &self,
        name: &str,
        rules: &[FirewallRule],
    ) -> Result<Firewall> {
        if let Some(existing) = self.find_security_group(name).await? {
            return Ok(existing);
        }
        let body = json!({
            "name": name,
            "project": self.project_id,
            "inbound_default_policy": "drop",
            "outbound_default_policy": "accept",
            "stateful": true,
        });
        #[derive(Deserialize)]
        struct Resp {
            security_group: SSecurityGroup,
        }
        let sg = match self
            .api
            .post::<Resp>(&self.instance_path("security_groups"), &body)
            .await
        {
            Ok(resp) => resp.security_group,
            Err(err) if err.matches_conflict_marker(CONFLICT_MARKERS) => {
                return self.find_security_group(name).await?.ok_or_else(|| {
                    Error::Other(format!("security group {} vanished after conflict", name))
                })
            }
            Err(err) => return Err(err),
        };
        self.replace_rules(&sg.id, rules).await?;
        self.get_firewall_inner(&sg.id, &sg.name).await
    }

    async fn get_firewall(&self, id: &str) -> Result<Firewall> {
        #[derive(Deserialize)]
        struct Resp {
            security_group: SSecurityGroup,
        }
        let resp: Resp = self
            .api
            .get(&self.instance_path(&format!("security_groups/{}", id)), &[])
            .await?;
        self.get_firewall_inner(&resp.security_group.id, &resp.security_group.name)
            .await
    }

    async fn set_firewall_rules(&self, id: &str, rules: &[FirewallRule]) -> Result<()> {
        self.replace_rules(id, rules).await
    }

    async fn delete_firewall_by_name(&self, name: &str) -> Result<()> {
        let Some(firewall) = self.find_security_group(name).await? else {
            return Ok(());
        };
        let result: Result<Value> = self
            .api
            .delete(&self.instance_path(&format!("security_groups/{}", firewall.id)))
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>> {
        #[derive(Deserialize)]
        struct Resp {
            volumes: Vec<SVolume>,
        }
        let resp: Resp = self
            .api
            .get(&self.instance_path("volumes"), &[("per_page", "100")])
            .await?;
        Ok(resp.volumes.into_iter().map(Self::normalize_volume).collect())
    }

    async fn find_or_create_volume(&self, spec: &VolumeSpec) -> Result<Volume> {
        if let Some(existing) = self.find_volume(&spec.name).await? {
            return Ok(existing);
        }
        let body = json!({
            "name": spec.name,
            "size": spec.size_gb as u64 * GB,
            "volume_type": "b_ssd",
            "project": self.project_id,
        });
        #[derive(Deserialize)]
        struct Resp {
            volume: SVolume,
        }
        match self
            .api
            .post::<Resp>(&self.instance_path("volumes"), &body)
            .await
        {
            Ok(resp) => Ok(Self::normalize_volume(resp.volume)),
            Err(err) if err.matches_conflict_marker(CONFLICT_MARKERS) => self
                .find_volume(&spec.name)
                .await?
                .ok_or_else(|| Error::Other(format!("volume {} vanished after conflict", spec.name))),
            Err(err) => Err(err),
        }
    }

    async fn attach_volume(&self, volume_id: &str, server_id: &str) -> Result<()> {
        let body = json!({ "volume_id": volume_id });
        let result: Result<Value> = self
            .api
            .post(
                &self.instance_path(&format!("servers/{}/attach-volume", server_id)),
                &body,
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.matches_conflict_marker(CONFLICT_MARKERS) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn wait_for_device_path(&self, volume_id: &str, ssh: &SshClient) -> Result<String> {
        // Block volumes surface their Scaleway id as the disk serial.
        let short_id: String = volume_id.chars().take(20).collect();
        let probe = format!(
            "lsblk -ndo NAME,SERIAL | awk '$2 ~ /{}/ {{print \"/dev/\"$1}}'",
            short_id
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
                Ok(result.success() && !result.output.trim().is_empty())
            },
        )
        .await?;
        let result = ssh.execute(&probe).await?;
        let device = result.output.trim().to_string();
        if device.is_empty() {
            return Err(Error::Other(format!(
                "volume {} attached but no device appeared",
                volume_id
            )));
        }
        Ok(device)
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        let result: Result<Value> = self
            .api
            .delete(&self.instance_path(&format!("volumes/{}", volume_id)))
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn find_or_create_load_balancer(
        &self,
        name: &str,
        _location: &str,
    ) -> Result<LoadBalancer> {
        #[derive(Deserialize)]
        struct ListResp {
            lbs: Vec<SLb>,
        }
        let existing: ListResp = self.api.get(&self.lb_path("lbs"), &[("name", name)]).await?;
        if let Some(lb) = existing.lbs.into_iter().find(|lb| lb.name == name) {
            return Ok(LoadBalancer {
                public_ipv4: lb.ip.first().map(|ip| ip.ip_address.clone()),
                id: lb.id,
                name: lb.name,
            });
        }
        let body = json!({ "name": name, "project_id": self.project_id, "type": "LB-S" });
        let resp: SLb = self.api.post(&self.lb_path("lbs"), &body).await?;
        Ok(LoadBalancer {
            public_ipv4: resp.ip.first().map(|ip| ip.ip_address.clone()),
            id: resp.id,
            name: resp.name,
        })
    }

    async fn attach_load_balancer_to_network(&self, lb_id: &str, network_id: &str) -> Result<()> {
        let result: Result<Value> = self
            .api
            .post(
                &self.lb_path(&format!("lbs/{}/private-networks/{}/attach", lb_id, network_id)),
                &json!({}),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.matches_conflict_marker(CONFLICT_MARKERS) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn add_load_balancer_target(&self, lb_id: &str, server_id: &str) -> Result<()> {
        let Some(server) = self.list_servers().await?.into_iter().find(|s| s.id == server_id)
        else {
            return Err(Error::Other(format!("server {} not found for lb target", server_id)));
        };
        let ip = server
            .private_ipv4
            .or(server.public_ipv4)
            .ok_or_else(|| Error::Other(format!("server {} has no address", server_id)))?;
        let body = json!({ "name": format!("{}-backend", lb_id), "server_ip": [ip] });
        let result: Result<Value> = self
            .api
            .post(&self.lb_path(&format!("lbs/{}/backends", lb_id)), &body)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.matches_conflict_marker(CONFLICT_MARKERS) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn add_load_balancer_service(
        &self,
        lb_id: &str,
        listen_port: u16,
        destination_port: u16,
    ) -> Result<()> {
        let body = json!({
            "name": format!("{}-{}", lb_id, listen_port),
            "inbound_port": listen_port,
            "backend_port": destination_port,
        });
        let result: Result<Value> = self
            .api
            .post(&self.lb_path(&format!("lbs/{}/frontends", lb_id)), &body)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.matches_conflict_marker(CONFLICT_MARKERS) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn find_or_create_ssh_key(&self, name: &str, public_key: &str) -> Result<SshKey> {
        #[derive(Deserialize)]
        struct ListResp {
            ssh_keys: Vec<SSshKey>,
        }
        let existing: ListResp = self
            .api
            .get("iam/v1alpha1/ssh-keys", &[("name", name)])
            .await?;
        if let Some(key) = existing.ssh_keys.into_iter().find(|k| k.name == name) {
            return Ok(SshKey {
                id: key.id,
                name: key.name,
                fingerprint: key.fingerprint,
            });
        }
        let body = json!({
            "name": name,
            "public_key": public_key,
            "project_id": self.project_id,
        });
        match self.api.post::<SSshKey>("iam/v1alpha1/ssh-keys", &body).await {
            Ok(key) => Ok(SshKey {
                id: key.id,
                name: key.name,
                fingerprint: key.fingerprint,
            }),
            Err(err) if err.matches_conflict_marker(CONFLICT_MARKERS) => {
                let all: ListResp = self.api.get("iam/v1alpha1/ssh-keys", &[]).await?;
                all.ssh_keys
                    .into_iter()
                    .next()
                    .map(|key| SshKey {
                        id: key.id,
                        name: key.name,
                        fingerprint: key.fingerprint,
                    })
                    .ok_or_else(|| Error::Other(format!("ssh key {} vanished after conflict", name)))
            }
            Err(err) => Err(err),
        }
    }

    async fn find_or_create_managed_certificate(
        &self,
        _name: &str,
        _domain_names: &[String],
    ) -> Result<Certificate> {
        Err(Error::Configuration(
            "managed certificates are not supported on the scaleway adapter".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_from_zone() {
        let p = ScalewayProvider::new("key", "proj", "fr-par-1");
        assert_eq!(p.region(), "fr-par");
        let p = ScalewayProvider::new("key", "proj", "nl-ams-2");
        assert_eq!(p.region(), "nl-ams");
    }

    #[test]
    fn test_tags_round_trip_labels() {
        let labels = HashMap::from([
            ("app".to_string(), "shop".to_string()),
            ("managed-by".to_string(), "decker".to_string()),
        ]);
        let tags = ScalewayProvider::tags_from_labels(&labels);
        assert!(tags.contains(&"app=shop".to_string()));
        assert_eq!(ScalewayProvider::labels_from_tags(&tags), labels);
    }

    #[test]
    fn test_volume_size_normalized_to_gb() {
        let v = ScalewayProvider::normalize_volume(SVolume {
            id: "v1".into(),
            name: "data".into(),
            size: 25 * GB,
            zone: "fr-par-1".into(),
            server: None,
        });
        assert_eq!(v.size_gb, 25);
    }
}
