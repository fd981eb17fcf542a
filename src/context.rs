//! Per-run workspace passed between steps.
//!
//! Built once by a command from raw configuration (two-phase init:
//! clients first, then steps borrow them); owns the topology and every
//! client for the lifetime of the run. Steps are the only writers.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::cloudflare::{CloudflareClient, S3Credentials, TunnelSetup};
use crate::config::{Config, DatabaseKind};
use crate::errors::{Error, Result};
use crate::events::{DeployState, Observer, StepPhase};
use crate::naming::{self, Target};
use crate::providers::{self, Certificate, ComputeProvider, Firewall, LoadBalancer, Network, Volume};
use crate::ssh::{SshClient, SshIdentity};

/// Remote user every provisioned host is reachable as.
pub const DEPLOY_USER: &str = "deploy";

#[derive(Debug, Clone, PartialEq)]
pub struct TopologyServer {
    pub id: String,
    pub name: String,
    pub public_ip: String,
    pub private_ip: Option<String>,
    pub group: String,
    pub instance_type: String,
}

/// Observed and derived infrastructure state, mutated as steps converge
/// it toward the configuration.
#[derive(Default)]
pub struct Topology {
    /// Ordered `"<group>-<index>"` → server; the first entry is the master.
    pub servers: IndexMap<String, TopologyServer>,
    pub network: Option<Network>,
    pub firewall: Option<Firewall>,
    pub load_balancer: Option<LoadBalancer>,
    pub volumes: Vec<Volume>,
    pub dns_records: Vec<String>,
    pub certificates: Vec<Certificate>,
    pub tunnel: Option<TunnelSetup>,
    /// Full server names from previous runs that fell out of the desired
    /// set, reverse order; removed after a successful rollout.
    pub servers_to_remove: Vec<String>,
    /// Keys of servers created this run; must answer SSH before any
    /// remote step proceeds.
    pub new_servers: Vec<String>,
    pub state: DeployState,
}

pub struct Context<'a> {
    pub config: Config,
    pub prefix: String,
    pub topology: Topology,
    pub provider: Box<dyn ComputeProvider>,
    pub cloudflare: Option<CloudflareClient>,
    pub identity: SshIdentity,
    pub observer: &'a dyn Observer,

    /// Resolved at deploy time, consumed by the generators.
    pub database_passwords: HashMap<DatabaseKind, String>,
    pub bucket_credentials: IndexMap<String, S3Credentials>,
    pub app_image: Option<String>,
    pub git_sha: Option<String>,

    ssh_clients: HashMap<String, Arc<SshClient>>,
}

impl<'a> Context<'a> {
    /// Two-phase init: resolve prefix and identity, construct clients from
    /// raw configuration. No provider call happens here.
    pub async fn new(
        config: Config,
        slug: Option<String>,
        observer: &'a dyn Observer,
    ) -> Result<Context<'a>> {
        let prefix = naming::prefix(&config.name, config.target, slug.as_deref())?;

        let identity = match &config.compute.ssh_key_path {
            Some(path) => SshIdentity::load(path)?,
            None => SshIdentity::generate()?,
        };

        let provider = providers::provider_for(config.compute.provider).await?;
        let cloudflare = config
            .cloudflare
            .as_ref()
            .map(|cf| CloudflareClient::new(&cf.api_token, &cf.account_id));

        Ok(Context {
            config,
            prefix,
            topology: Topology {
                state: DeployState::Idle,
                ..Default::default()
            },
            provider,
            cloudflare,
            identity,
            observer,
            database_passwords: HashMap::new(),
            bucket_credentials: IndexMap::new(),
            app_image: None,
            git_sha: None,
            ssh_clients: HashMap::new(),
        })
    }

    pub fn is_sandbox(&self) -> bool {
        self.config.target == Target::Sandbox
    }

    pub fn master_key() -> String {
        naming::server_key(naming::MASTER_GROUP, 1)
    }

    pub fn master(&self) -> Result<&TopologyServer> {
        self.topology
            .servers
            .get(&Self::master_key())
            .ok_or_else(|| Error::Other("no master server in topology".to_string()))
    }

    /// Public address of the master, the anchor for SSH and DNS.
    pub fn server_ip(&self) -> Result<String> {
        Ok(self.master()?.public_ip.clone())
    }

    pub fn cloudflare(&self) -> Result<&CloudflareClient> {
        self.cloudflare
            .as_ref()
            .ok_or_else(|| Error::Configuration("this operation requires cloudflare".to_string()))
    }

    /// SSH client for a host, cached per address.
    pub fn ssh(&mut self, host: &str) -> Arc<SshClient> {
        self.ssh_clients
            .entry(host.to_string())
            .or_insert_with(|| {
                Arc::new(SshClient::new(host, DEPLOY_USER, self.identity.clone()))
            })
            .clone()
    }

    pub fn master_ssh(&mut self) -> Result<Arc<SshClient>> {
        let ip = self.server_ip()?;
        Ok(self.ssh(&ip))
    }

    /// The server a workload pinned to `group` lands on; master when the
    /// group has no machines.
    pub fn server_for_group(&self, group: &str) -> Result<&TopologyServer> {
        self.topology
            .servers
            .values()
            .find(|s| s.group == group)
            .map(Ok)
            .unwrap_or_else(|| self.master())
    }

    pub fn set_state(&mut self, state: DeployState) {
        self.topology.state = state;
        self.observer.on_state_change(state);
    }

    pub fn step_detail(&self, label: &str, detail: &str) {
        self.observer.on_step(label, StepPhase::InProgress, Some(detail));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_key() {
        assert_eq!(Context::master_key(), "master-1");
    }
}
