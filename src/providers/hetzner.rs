//! Hetzner Cloud v1 adapter.
//!
//! <https://docs.hetzner.cloud> — bearer token auth, JSON bodies, numeric
//! resource ids. Conflict codes (`uniqueness_error`, `already_added`,
//! `target_already_defined`, `already_attached`) mean the resource is in
//! the desired state and are swallowed here.

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

const API_BASE: &str = "https://api.hetzner.cloud/v1";

const CONFLICT_MARKERS: &[&str] = &[
    "uniqueness_error",
    "already_added",
    "already_attached",
    "target_already_defined",
];

pub struct HetznerProvider {
    api: ApiClient,
}

// ── Wire types (only the fields we read) ─────────────

#[derive(Debug, Deserialize)]
struct HServer {
    id: i64,
    name: String,
    status: String,
    server_type: HNamed,
    datacenter: HDatacenter,
    public_net: HPublicNet,
    #[serde(default)]
    private_net: Vec<HPrivateNet>,
    #[serde(default)]
    labels: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct HNamed {
    name: String,
}

#[derive(Debug, Deserialize)]
struct HDatacenter {
    location: HNamed,
}

#[derive(Debug, Deserialize)]
struct HPublicNet {
    ipv4: Option<HIp>,
}

#[derive(Debug, Deserialize)]
struct HIp {
    ip: String,
}

#[derive(Debug, Deserialize)]
struct HPrivateNet {
    network: i64,
    ip: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HNetwork {
    id: i64,
    name: String,
    ip_range: String,
}

#[derive(Debug, Deserialize)]
struct HFirewall {
    id: i64,
    name: String,
    #[serde(default)]
    rules: Vec<HRule>,
}

#[derive(Debug, Deserialize)]
struct HRule {
    direction: String,
    protocol: String,
    port: Option<String>,
    #[serde(default)]
    source_ips: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HVolume {
    id: i64,
    name: String,
    size: u32,
    location: HNamed,
    server: Option<i64>,
    linux_device: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HLoadBalancer {
    id: i64,
    name: String,
    public_net: Option<HLbPublicNet>,
}

#[derive(Debug, Deserialize)]
struct HLbPublicNet {
    ipv4: Option<HIp>,
}

#[derive(Debug, Deserialize)]
struct HSshKey {
    id: i64,
    name: String,
    fingerprint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HCertificate {
    id: i64,
    name: String,
    #[serde(default)]
    domain_names: Vec<String>,
}

impl HetznerProvider {
    pub fn new(token: &str) -> Self {
        Self::with_base_url(API_BASE, token)
    }

    pub fn with_base_url(base_url: &str, token: &str) -> Self {
        Self {
            api: ApiClient::new(base_url, Auth::Bearer(token.to_string())),
        }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(&require_env("HETZNER_API_TOKEN")?))
    }

    fn normalize_server(s: HServer) -> Server {
        Server {
            id: s.id.to_string(),
            name: s.name,
            public_ipv4: s.public_net.ipv4.map(|ip| ip.ip),
            private_ipv4: s.private_net.into_iter().find_map(|n| n.ip),
            instance_type: s.server_type.name,
            location: s.datacenter.location.name,
            status: s.status,
            labels: s.labels,
        }
    }

    fn normalize_firewall(f: HFirewall) -> Firewall {
        Firewall {
            id: f.id.to_string(),
            name: f.name,
            rules: f
                .rules
                .into_iter()
                .map(|r| FirewallRule {
                    direction: if r.direction == "out" {
                        RuleDirection::Out
                    } else {
                        RuleDirection::In
                    },
                    protocol: r.protocol,
                    port: r.port,
                    source_ips: r.source_ips,
                })
                .collect(),
        }
    }

    fn normalize_volume(v: HVolume) -> Volume {
        Volume {
            id: v.id.to_string(),
            name: v.name,
            size_gb: v.size,
            location: v.location.name,
            server_id: v.server.map(|id| id.to_string()),
        }
    }

    fn rules_body(rules: &[FirewallRule]) -> Vec<Value> {
        rules
            .iter()
            .map(|r| {
                let mut rule = json!({
                    "direction": match r.direction {
                        RuleDirection::In => "in",
                        RuleDirection::Out => "out",
                    },
                    "protocol": r.protocol,
                    "source_ips": r.source_ips,
                });
                if let Some(port) = &r.port {
                    rule["port"] = json!(port);
                }
                rule
            })
            .collect()
    }

    async fn find_network(&self, name: &str) -> Result<Option<Network>> {
        #[derive(Deserialize)]
        struct Resp {
            networks: Vec<HNetwork>,
        }
        let resp: Resp = self.api.get("networks", &[("name", name)]).await?;
        Ok(resp.networks.into_iter().next().map(|n| Network {
            id: n.id.to_string(),
            name: n.name,
            ip_range: n.ip_range,
        }))
    }

    async fn find_firewall(&self, name: &str) -> Result<Option<Firewall>> {
        #[derive(Deserialize)]
        struct Resp {
            firewalls: Vec<HFirewall>,
        }
        let resp: Resp = self.api.get("firewalls", &[("name", name)]).await?;
        Ok(resp.firewalls.into_iter().next().map(Self::normalize_firewall))
    }

    async fn find_volume(&self, name: &str) -> Result<Option<Volume>> {
        #[derive(Deserialize)]
        struct Resp {
            volumes: Vec<HVolume>,
        }
        let resp: Resp = self.api.get("volumes", &[("name", name)]).await?;
        Ok(resp.volumes.into_iter().next().map(Self::normalize_volume))
    }

    /// The zone Hetzner expects for network subnets, derived from the
    /// location name.
    fn network_zone(location: &str) -> &'static str {
        match location {
            "ash" => "us-east",
            "hil" => "us-west",
            "sin" => "ap-southeast",
            _ => "eu-central",
        }
    }
}

fn numeric_id(id: &str) -> Result<i64> {
    id.parse::<i64>()
        .map_err(|_| Error::Other(format!("expected numeric hetzner id, got {:?}", id)))
}

#[async_trait]
impl ComputeProvider for HetznerProvider {
    fn provider_name(&self) -> &'static str {
        "hetzner"
    }

    fn supports_self_hosted(&self) -> bool {
        true
    }

    fn vm_based(&self) -> bool {
        true
    }

    async fn validate_credentials(&self) -> Result<()> {
        let result: Result<Value> = self.api.get("ssh_keys", &[]).await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_unauthorized() => Err(Error::Configuration(
                "hetzner API token rejected; check HETZNER_API_TOKEN".to_string(),
            )),
            Err(err) => Err(err),
        }
    }

    async fn list_servers(&self) -> Result<Vec<Server>> {
        #[derive(Deserialize)]
        struct Resp {
            servers: Vec<HServer>,
        }
        let resp: Resp = self
            .api
            .get("servers", &[("per_page", "50"), ("sort", "name")])
            .await?;
        Ok(resp.servers.into_iter().map(Self::normalize_server).collect())
    }

    async fn find_server(&self, name: &str) -> Result<Option<Server>> {
        #[derive(Deserialize)]
        struct Resp {
            servers: Vec<HServer>,
        }
        let resp: Resp = self.api.get("servers", &[("name", name)]).await?;
        Ok(resp.servers.into_iter().next().map(Self::normalize_server))
    }

    async fn find_or_create_server(&self, spec: &ServerSpec) -> Result<Server> {
        if let Some(existing) = self.find_server(&spec.name).await? {
            tracing::debug!("server {} already exists (id {})", spec.name, existing.id);
            return Ok(existing);
        }

        let mut body = json!({
            "name": spec.name,
            "server_type": spec.instance_type,
            "location": spec.location,
            "image": spec.image,
            "labels": spec.labels,
            "start_after_create": true,
            "public_net": { "enable_ipv4": true, "enable_ipv6": true },
        });
        if let Some(user_data) = &spec.user_data {
            body["user_data"] = json!(user_data);
        }
        if !spec.firewall_ids.is_empty() {
            let firewalls: Result<Vec<Value>> = spec
                .firewall_ids
                .iter()
                .map(|id| Ok(json!({ "firewall": numeric_id(id)? })))
                .collect();
            body["firewalls"] = json!(firewalls?);
        }
        if !spec.network_ids.is_empty() {
            let networks: Result<Vec<i64>> =
                spec.network_ids.iter().map(|id| numeric_id(id)).collect();
            body["networks"] = json!(networks?);
        }
        if !spec.ssh_key_ids.is_empty() {
            let keys: Result<Vec<i64>> =
                spec.ssh_key_ids.iter().map(|id| numeric_id(id)).collect();
            body["ssh_keys"] = json!(keys?);
        }

        #[derive(Deserialize)]
        struct Resp {
            server: HServer,
        }
        match self.api.post::<Resp>("servers", &body).await {
            Ok(resp) => Ok(Self::normalize_server(resp.server)),
            Err(err) if err.matches_conflict_marker(CONFLICT_MARKERS) => self
                .find_server(&spec.name)
                .await?
                .ok_or_else(|| Error::Other(format!("server {} vanished after conflict", spec.name))),
            Err(err) => Err(err),
        }
    }

    async fn delete_server_by_name(&self, name: &str) -> Result<()> {
        let Some(server) = self.find_server(name).await? else {
            return Ok(());
        };
        let id = numeric_id(&server.id)?;

        // Detach from networks first; both detach and delete are
        // best-effort so a half-removed server converges next run.
        #[derive(Deserialize)]
        struct ServerResp {
            server: HServer,
        }
        if let Ok(resp) = self.api.get::<ServerResp>(&format!("servers/{}", id), &[]).await {
            for net in resp.server.private_net {
                let body = json!({ "network": net.network });
                let result: Result<Value> = self
                    .api
                    .post(&format!("servers/{}/actions/detach_from_network", id), &body)
                    .await;
                if let Err(err) = result {
                    tracing::warn!("detach {} from network {}: {}", name, net.network, err);
                }
            }
        }

        let result: Result<Value> = self.api.delete(&format!("servers/{}", id)).await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn find_or_create_network(&self, name: &str, location: &str) -> Result<Network> {
        if let Some(existing) = self.find_network(name).await? {
            return Ok(existing);
        }
        let body = json!({
            "name": name,
            "ip_range": "10.0.0.0/16",
            "subnets": [{
                "type": "cloud",
                "ip_range": "10.0.1.0/24",
                "network_zone": Self::network_zone(location),
            }],
        });
        #[derive(Deserialize)]
        struct Resp {
            network: HNetwork,
        }
        match self.api.post::<Resp>("networks", &body).await {
            Ok(resp) => Ok(Network {
                id: resp.network.id.to_string(),
                name: resp.network.name,
                ip_range: resp.network.ip_range,
            }),
            Err(err) if err.matches_conflict_marker(CONFLICT_MARKERS) => self
                .find_network(name)
                .await?
                .ok_or_else(|| Error::Other(format!("network {} vanished after conflict", name))),
            Err(err) => Err(err),
        }
    }

    async fn delete_network_by_name(&self, name: &str) -> Result<()> {
        let Some(network) = self.find_network(name).await? else {
            return Ok(());
        };
        let result: Result<Value> = self.api.delete(&format!("networks/{}", network.id)).await;
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
        if let Some(existing) = self.find_firewall(name).await? {
            return Ok(existing);
        }
        let body = json!({ "name": name, "rules": Self::rules_body(rules) });
        #[derive(Deserialize)]
        struct Resp {
            firewall: HFirewall,
        }
        match self.api.post::<Resp>("firewalls", &body).await {
            Ok(resp) => Ok(Self::normalize_firewall(resp.firewall)),
            Err(err) if err.matches_conflict_marker(CONFLICT_MARKERS) => self
                .find_firewall(name)
                .await?
                .ok_or_else(|| Error::Other(format!("firewall {} vanished after conflict", name))),
            Err(err) => Err(err),
        }
    }

    async fn get_firewall(&self, id: &str) -> Result<Firewall> {
        #[derive(Deserialize)]
        struct Resp {
            firewall: HFirewall,
        }
        let resp: Resp = self.api.get(&format!("firewalls/{}", id), &[]).await?;
        Ok(Self::normalize_firewall(resp.firewall))
    }

    async fn set_firewall_rules(&self, id: &str, rules: &[FirewallRule]) -> Result<()> {
        let body = json!({ "rules": Self::rules_body(rules) });
        let _: Value = self
            .api
            .post(&format!("firewalls/{}/actions/set_rules", id), &body)
            .await?;
        Ok(())
    }

    async fn delete_firewall_by_name(&self, name: &str) -> Result<()> {
        let Some(firewall) = self.find_firewall(name).await? else {
            return Ok(());
        };
        let result: Result<Value> = self.api.delete(&format!("firewalls/{}", firewall.id)).await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>> {
        #[derive(Deserialize)]
        struct Resp {
            volumes: Vec<HVolume>,
        }
        let resp: Resp = self.api.get("volumes", &[("per_page", "50")]).await?;
        Ok(resp.volumes.into_iter().map(Self::normalize_volume).collect())
    }

    async fn find_or_create_volume(&self, spec: &VolumeSpec) -> Result<Volume> {
        if let Some(existing) = self.find_volume(&spec.name).await? {
            return Ok(existing);
        }
        // Hetzner sizes volumes in GB directly.
        let body = json!({
            "name": spec.name,
            "size": spec.size_gb,
            "location": spec.location,
            "labels": spec.labels,
            "format": "xfs",
        });
        #[derive(Deserialize)]
        struct Resp {
            volume: HVolume,
        }
        match self.api.post::<Resp>("volumes", &body).await {
            Ok(resp) => Ok(Self::normalize_volume(resp.volume)),
            Err(err) if err.matches_conflict_marker(CONFLICT_MARKERS) => self
                .find_volume(&spec.name)
                .await?
                .ok_or_else(|| Error::Other(format!("volume {} vanished after conflict", spec.name))),
            Err(err) => Err(err),
        }
    }

    async fn attach_volume(&self, volume_id: &str, server_id: &str) -> Result<()> {
        let body = json!({ "server": numeric_id(server_id)?, "automount": false });
        let result: Result<Value> = self
            .api
            .post(&format!("volumes/{}/actions/attach", volume_id), &body)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.matches_conflict_marker(CONFLICT_MARKERS) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn wait_for_device_path(&self, volume_id: &str, ssh: &SshClient) -> Result<String> {
        #[derive(Deserialize)]
        struct Resp {
            volume: HVolume,
        }
        let resp: Resp = self.api.get(&format!("volumes/{}", volume_id), &[]).await?;
        let device = resp
            .volume
            .linux_device
            .unwrap_or_else(|| format!("/dev/disk/by-id/scsi-0HC_Volume_{}", volume_id));

        let check = format!("test -b {}", device);
        waiter::poll(
            30,
            Duration::from_secs(2),
            &format!("device {} on {}", device, ssh.host()),
            || async {
                Ok(ssh
                    .execute_with(
                        &check,
                        crate::ssh::ExecOptions {
                            raise_on_error: false,
                            ..Default::default()
                        },
                    )
                    .await?
                    .success())
            },
        )
        .await?;
        Ok(device)
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        // A volume must be detached before deletion.
        let detach: Result<Value> = self
            .api
            .post(&format!("volumes/{}/actions/detach", volume_id), &json!({}))
            .await;
        if let Err(err) = detach {
            if !err.is_not_found() && !err.matches_conflict_marker(&["not_attached"]) {
                tracing::warn!("detach volume {}: {}", volume_id, err);
            }
        }
        let result: Result<Value> = self.api.delete(&format!("volumes/{}", volume_id)).await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn find_or_create_load_balancer(
        &self,
        name: &str,
        location: &str,
    ) -> Result<LoadBalancer> {
        #[derive(Deserialize)]
        struct ListResp {
            load_balancers: Vec<HLoadBalancer>,
        }
        let existing: ListResp = self.api.get("load_balancers", &[("name", name)]).await?;
        if let Some(lb) = existing.load_balancers.into_iter().next() {
            return Ok(LoadBalancer {
                id: lb.id.to_string(),
                name: lb.name,
                public_ipv4: lb.public_net.and_then(|n| n.ipv4).map(|ip| ip.ip),
            });
        }
        let body = json!({
            "name": name,
            "load_balancer_type": "lb11",
            "location": location,
        });
        #[derive(Deserialize)]
        struct Resp {
            load_balancer: HLoadBalancer,
        }
        let resp: Resp = self.api.post("load_balancers", &body).await?;
        Ok(LoadBalancer {
            id: resp.load_balancer.id.to_string(),
            name: resp.load_balancer.name,
            public_ipv4: resp
                .load_balancer
                .public_net
                .and_then(|n| n.ipv4)
                .map(|ip| ip.ip),
        })
    }

    async fn attach_load_balancer_to_network(&self, lb_id: &str, network_id: &str) -> Result<()> {
        let body = json!({ "network": numeric_id(network_id)? });
        let result: Result<Value> = self
            .api
            .post(
                &format!("load_balancers/{}/actions/attach_to_network", lb_id),
                &body,
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.matches_conflict_marker(CONFLICT_MARKERS) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn add_load_balancer_target(&self, lb_id: &str, server_id: &str) -> Result<()> {
        let body = json!({
            "type": "server",
            "server": { "id": numeric_id(server_id)? },
            "use_private_ip": true,
        });
        let result: Result<Value> = self
            .api
            .post(&format!("load_balancers/{}/actions/add_target", lb_id), &body)
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
            "protocol": "tcp",
            "listen_port": listen_port,
            "destination_port": destination_port,
        });
        let result: Result<Value> = self
            .api
            .post(&format!("load_balancers/{}/actions/add_service", lb_id), &body)
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
            ssh_keys: Vec<HSshKey>,
        }
        let existing: ListResp = self.api.get("ssh_keys", &[("name", name)]).await?;
        if let Some(key) = existing.ssh_keys.into_iter().next() {
            return Ok(SshKey {
                id: key.id.to_string(),
                name: key.name,
                fingerprint: key.fingerprint,
            });
        }
        let body = json!({ "name": name, "public_key": public_key });
        #[derive(Deserialize)]
        struct Resp {
            ssh_key: HSshKey,
        }
        match self.api.post::<Resp>("ssh_keys", &body).await {
            Ok(resp) => Ok(SshKey {
                id: resp.ssh_key.id.to_string(),
                name: resp.ssh_key.name,
                fingerprint: resp.ssh_key.fingerprint,
            }),
            Err(err) if err.matches_conflict_marker(CONFLICT_MARKERS) => {
                // Same key body under a different name; find it by
                // fingerprint-less list scan.
                let all: ListResp = self.api.get("ssh_keys", &[]).await?;
                all.ssh_keys
                    .into_iter()
                    .next()
                    .map(|key| SshKey {
                        id: key.id.to_string(),
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
        name: &str,
        domain_names: &[String],
    ) -> Result<Certificate> {
        #[derive(Deserialize)]
        struct ListResp {
            certificates: Vec<HCertificate>,
        }
        let existing: ListResp = self.api.get("certificates", &[("name", name)]).await?;
        if let Some(cert) = existing.certificates.into_iter().next() {
            return Ok(Certificate {
                id: cert.id.to_string(),
                name: cert.name,
                domain_names: cert.domain_names,
            });
        }
        let body = json!({
            "name": name,
            "type": "managed",
            "domain_names": domain_names,
        });
        #[derive(Deserialize)]
        struct Resp {
            certificate: HCertificate,
        }
        let resp: Resp = self.api.post("certificates", &body).await?;
        Ok(Certificate {
            id: resp.certificate.id.to_string(),
            name: resp.certificate.name,
            domain_names: resp.certificate.domain_names,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_zone_for_location() {
        assert_eq!(HetznerProvider::network_zone("nbg1"), "eu-central");
        assert_eq!(HetznerProvider::network_zone("fsn1"), "eu-central");
        assert_eq!(HetznerProvider::network_zone("ash"), "us-east");
        assert_eq!(HetznerProvider::network_zone("hil"), "us-west");
    }

    #[test]
    fn test_numeric_id_parses() {
        assert_eq!(numeric_id("42").unwrap(), 42);
        assert!(numeric_id("i-abc123").is_err());
    }

    #[test]
    fn test_rules_body_omits_port_for_icmp() {
        let rules = vec![FirewallRule::tcp_in("22"), FirewallRule::icmp_in()];
        let body = HetznerProvider::rules_body(&rules);
        assert_eq!(body[0]["port"], "22");
        assert!(body[1].get("port").is_none());
        assert_eq!(body[1]["protocol"], "icmp");
    }
}
