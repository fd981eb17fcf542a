//! Compute provider abstraction.
//!
//! Heterogeneous cloud APIs (servers, networks, firewalls, volumes, load
//! balancers, SSH keys, certificates) reduced to one `find_or_create` /
//! attach / detach / delete contract. Adapters normalize attributes into
//! the provider-agnostic records below; provider-specific conflict markers
//! and size units never leave the adapter that knows them.

mod aws;
mod hetzner;
mod scaleway;

pub use aws::AwsProvider;
pub use hetzner::HetznerProvider;
pub use scaleway::ScalewayProvider;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::ProviderKind;
use crate::errors::{Error, Result};
use crate::ssh::SshClient;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Normalized records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq)]
pub struct Server {
    pub id: String,
    pub name: String,
    pub public_ipv4: Option<String>,
    pub private_ipv4: Option<String>,
    pub instance_type: String,
    pub location: String,
    pub status: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub ip_range: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleDirection {
    In,
    Out,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FirewallRule {
    pub direction: RuleDirection,
    /// `tcp`, `udp`, or `icmp`.
    pub protocol: String,
    /// Port or range (`"80"`, `"6443"`, `"1000-2000"`); `None` for icmp.
    pub port: Option<String>,
    pub source_ips: Vec<String>,
}

impl FirewallRule {
    pub fn tcp_in(port: &str) -> Self {
        Self {
            direction: RuleDirection::In,
            protocol: "tcp".to_string(),
            port: Some(port.to_string()),
            source_ips: vec!["0.0.0.0/0".to_string(), "::/0".to_string()],
        }
    }

    pub fn icmp_in() -> Self {
        Self {
            direction: RuleDirection::In,
            protocol: "icmp".to_string(),
            port: None,
            source_ips: vec!["0.0.0.0/0".to_string(), "::/0".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Firewall {
    pub id: String,
    pub name: String,
    pub rules: Vec<FirewallRule>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub id: String,
    pub name: String,
    pub size_gb: u32,
    pub location: String,
    pub server_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadBalancer {
    pub id: String,
    pub name: String,
    pub public_ipv4: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SshKey {
    pub id: String,
    pub name: String,
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Certificate {
    pub id: String,
    pub name: String,
    pub domain_names: Vec<String>,
}

// ── Creation specs ───────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ServerSpec {
    pub name: String,
    pub instance_type: String,
    pub location: String,
    pub image: String,
    /// Cloud-init document applied on first boot.
    pub user_data: Option<String>,
    pub labels: HashMap<String, String>,
    pub firewall_ids: Vec<String>,
    pub network_ids: Vec<String>,
    pub ssh_key_ids: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct VolumeSpec {
    pub name: String,
    pub size_gb: u32,
    pub location: String,
    pub labels: HashMap<String, String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ComputeProvider — the uniform contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Every operation is idempotent: `find_or_create_X` never fails because
/// the resource already exists, attach operations swallow "already
/// attached" conflicts, deletes swallow "already absent".
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;
    fn supports_self_hosted(&self) -> bool;
    fn vm_based(&self) -> bool;

    /// Cheap authenticated call; `Error::Configuration` on bad credentials.
    async fn validate_credentials(&self) -> Result<()>;

    // ── servers ──────────────────────────────────────
    async fn list_servers(&self) -> Result<Vec<Server>>;
    async fn find_server(&self, name: &str) -> Result<Option<Server>>;
    async fn find_or_create_server(&self, spec: &ServerSpec) -> Result<Server>;
    /// Best-effort: removes firewall/network attachments first, ignores
    /// an already-absent server.
    async fn delete_server_by_name(&self, name: &str) -> Result<()>;

    // ── networks ─────────────────────────────────────
    async fn find_or_create_network(&self, name: &str, location: &str) -> Result<Network>;
    async fn delete_network_by_name(&self, name: &str) -> Result<()>;

    // ── firewalls ────────────────────────────────────
    async fn find_or_create_firewall(&self, name: &str, rules: &[FirewallRule])
        -> Result<Firewall>;
    async fn get_firewall(&self, id: &str) -> Result<Firewall>;
    async fn set_firewall_rules(&self, id: &str, rules: &[FirewallRule]) -> Result<()>;
    async fn delete_firewall_by_name(&self, name: &str) -> Result<()>;

    // ── volumes ──────────────────────────────────────
    async fn list_volumes(&self) -> Result<Vec<Volume>>;
    async fn find_or_create_volume(&self, spec: &VolumeSpec) -> Result<Volume>;
    async fn attach_volume(&self, volume_id: &str, server_id: &str) -> Result<()>;
    /// Resolve the Linux device path of an attached volume, polling over
    /// SSH until the kernel has it.
    async fn wait_for_device_path(&self, volume_id: &str, ssh: &SshClient) -> Result<String>;
    async fn delete_volume(&self, volume_id: &str) -> Result<()>;

    // ── load balancers ───────────────────────────────
    async fn find_or_create_load_balancer(
        &self,
        name: &str,
        location: &str,
    ) -> Result<LoadBalancer>;
    async fn attach_load_balancer_to_network(&self, lb_id: &str, network_id: &str) -> Result<()>;
    async fn add_load_balancer_target(&self, lb_id: &str, server_id: &str) -> Result<()>;
    async fn add_load_balancer_service(
        &self,
        lb_id: &str,
        listen_port: u16,
        destination_port: u16,
    ) -> Result<()>;

    // ── keys and certificates ────────────────────────
    async fn find_or_create_ssh_key(&self, name: &str, public_key: &str) -> Result<SshKey>;
    async fn find_or_create_managed_certificate(
        &self,
        name: &str,
        domain_names: &[String],
    ) -> Result<Certificate>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Construct the adapter for a provider kind from the process environment.
pub async fn provider_for(kind: ProviderKind) -> Result<Box<dyn ComputeProvider>> {
    match kind {
        ProviderKind::Hetzner => Ok(Box::new(HetznerProvider::from_env()?)),
        ProviderKind::Scaleway => Ok(Box::new(ScalewayProvider::from_env()?)),
        ProviderKind::Aws => Ok(Box::new(AwsProvider::from_env().await?)),
    }
}

pub(crate) fn require_env(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Configuration(format!("environment variable not set: {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_in_rule_is_world_open() {
        let rule = FirewallRule::tcp_in("443");
        assert_eq!(rule.direction, RuleDirection::In);
        assert_eq!(rule.protocol, "tcp");
        assert_eq!(rule.port.as_deref(), Some("443"));
        assert!(rule.source_ips.contains(&"0.0.0.0/0".to_string()));
        assert!(rule.source_ips.contains(&"::/0".to_string()));
    }

    #[test]
    fn test_icmp_rule_has_no_port() {
        assert_eq!(FirewallRule::icmp_in().port, None);
    }
}
