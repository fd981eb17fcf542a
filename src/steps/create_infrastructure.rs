//! Reconcile desired server topology against observed infrastructure.
//!
//! Discovers servers by name pattern, diffs against the configured
//! groups, creates what is missing with cloud-init provisioning the
//! `deploy` user, schedules the excess for post-deploy removal, and
//! waits for every new server to answer SSH.

use std::collections::HashMap;
use std::time::Duration;

use indexmap::IndexMap;

use crate::config::ServerGroupConfig;
use crate::context::{Context, TopologyServer, DEPLOY_USER};
use crate::errors::{Error, Result};
use crate::naming;
use crate::providers::{FirewallRule, Server, ServerSpec};

pub const LABEL: &str = "create_infrastructure";

const SSH_READY_ATTEMPTS: u32 = 36;
const SSH_READY_INTERVAL: Duration = Duration::from_secs(5);

/// The create/remove partition for one reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// Desired `"<group>-<index>"` keys in configuration order, with the
    /// instance type each should run.
    pub desired: IndexMap<String, String>,
    /// Desired keys with no matching server.
    pub to_create: Vec<String>,
    /// Observed server names with no place in the desired map, highest
    /// index first so groups shrink from the tail.
    pub to_remove: Vec<String>,
}

/// Pure planning: no side effects, fails before any provider mutation.
pub fn plan(
    master: &ServerGroupConfig,
    groups: &IndexMap<String, ServerGroupConfig>,
    prefix: &str,
    observed: &[Server],
) -> Result<Plan> {
    let mut desired: IndexMap<String, String> = IndexMap::new();
    for index in 1..=master.count.max(1) {
        desired.insert(
            naming::server_key(naming::MASTER_GROUP, index),
            master.instance_type.clone(),
        );
    }
    for (group, spec) in groups {
        for index in 1..=spec.count.max(1) {
            desired.insert(
                naming::server_key(group, index),
                spec.instance_type.clone(),
            );
        }
    }

    let pattern = naming::server_pattern(prefix);
    let mut observed_keys: HashMap<String, &Server> = HashMap::new();
    for server in observed {
        if let Some(caps) = pattern.captures(&server.name) {
            observed_keys.insert(format!("{}-{}", &caps[1], &caps[2]), server);
        }
    }

    // The master is immutable: a different instance type means a new
    // cluster, which only destroy-then-deploy may produce.
    let master_key = naming::server_key(naming::MASTER_GROUP, 1);
    if let Some(existing) = observed_keys.get(&master_key) {
        if existing.instance_type != master.instance_type {
            return Err(Error::Configuration(format!(
                "cannot change master instance type from {} to {} without destroying first",
                existing.instance_type, master.instance_type
            )));
        }
    }

    let to_create: Vec<String> = desired
        .keys()
        .filter(|key| !observed_keys.contains_key(*key))
        .cloned()
        .collect();

    let mut to_remove: Vec<String> = observed_keys
        .iter()
        .filter(|(key, _)| !desired.contains_key(*key))
        .map(|(_, server)| server.name.clone())
        .collect();
    to_remove.sort();
    to_remove.reverse();

    if to_remove
        .iter()
        .any(|name| name == &naming::server_name(prefix, naming::MASTER_GROUP, 1))
    {
        return Err(Error::Other(
            "refusing a plan that removes the master".to_string(),
        ));
    }

    Ok(Plan {
        desired,
        to_create,
        to_remove,
    })
}

/// Cloud-init document creating the deploy user with our public key.
fn cloud_init(public_key: &str) -> String {
    format!(
        r#"#cloud-config
users:
  - name: {user}
    groups: sudo
    sudo: ALL=(ALL) NOPASSWD:ALL
    shell: /bin/bash
    ssh_authorized_keys:
      - {key}
package_update: true
packages:
  - curl
  - xfsprogs
"#,
        user = DEPLOY_USER,
        key = public_key.trim()
    )
}

/// Firewall rules for the target. Sandboxes never expose the cluster API.
pub fn firewall_rules(sandbox: bool) -> Vec<FirewallRule> {
    let mut rules = vec![
        FirewallRule::icmp_in(),
        FirewallRule::tcp_in("22"),
        FirewallRule::tcp_in("80"),
        FirewallRule::tcp_in("443"),
    ];
    if !sandbox {
        rules.push(FirewallRule::tcp_in("6443"));
    }
    rules
}

pub async fn run(ctx: &mut Context<'_>) -> Result<()> {
    let prefix = ctx.prefix.clone();
    let labels = naming::labels(&ctx.config.name, &prefix);

    ctx.provider.validate_credentials().await?;

    let ssh_key = ctx
        .provider
        .find_or_create_ssh_key(&naming::ssh_key_name(&prefix), ctx.identity.public_key())
        .await?;
    let network = ctx
        .provider
        .find_or_create_network(&naming::network_name(&prefix), &ctx.config.compute.location)
        .await?;
    let firewall = ctx
        .provider
        .find_or_create_firewall(
            &naming::firewall_name(&prefix),
            &firewall_rules(ctx.is_sandbox()),
        )
        .await?;

    let observed = ctx.provider.list_servers().await?;
    let master = ctx.config.compute.master_group()?.clone();
    let groups = ctx.config.compute.servers.clone();
    let plan = plan(&master, &groups, &prefix, &observed)?;

    let mut known: HashMap<String, Server> = HashMap::new();
    let pattern = naming::server_pattern(&prefix);
    for server in observed {
        if let Some(caps) = pattern.captures(&server.name) {
            known.insert(format!("{}-{}", &caps[1], &caps[2]), server);
        }
    }

    for key in &plan.to_create {
        let name = format!("{}-{}", prefix, key);
        ctx.step_detail(LABEL, &format!("creating server {}", name));
        let mut server_labels = labels.clone();
        if ctx.is_sandbox() {
            server_labels.insert("purpose".to_string(), "sandbox".to_string());
        }
        let spec = ServerSpec {
            name: name.clone(),
            instance_type: plan.desired[key].clone(),
            location: ctx.config.compute.location.clone(),
            image: ctx.config.compute.image.clone(),
            user_data: Some(cloud_init(ctx.identity.public_key())),
            labels: server_labels,
            firewall_ids: vec![firewall.id.clone()],
            network_ids: vec![network.id.clone()],
            ssh_key_ids: vec![ssh_key.id.clone()],
        };
        let created = ctx.provider.find_or_create_server(&spec).await?;
        known.insert(key.clone(), created);
        ctx.topology.new_servers.push(key.clone());
    }

    // Final map preserves desired ordering; master first.
    let mut servers = IndexMap::new();
    for (key, instance_type) in &plan.desired {
        let Some(server) = known.get(key) else {
            return Err(Error::Other(format!("server {} missing after create", key)));
        };
        let public_ip = server.public_ipv4.clone().ok_or_else(|| {
            Error::Other(format!("server {} has no public address", server.name))
        })?;
        let group = key.rsplit_once('-').map(|(g, _)| g).unwrap_or(key);
        servers.insert(
            key.clone(),
            TopologyServer {
                id: server.id.clone(),
                name: server.name.clone(),
                public_ip,
                private_ip: server.private_ipv4.clone(),
                group: group.to_string(),
                instance_type: instance_type.clone(),
            },
        );
    }
    ctx.topology.servers = servers;
    ctx.topology.network = Some(network);
    ctx.topology.firewall = Some(firewall);
    ctx.topology.servers_to_remove = plan.to_remove;

    // New servers must answer SSH before any remote step runs; a server
    // that never comes up fails the deploy.
    for key in ctx.topology.new_servers.clone() {
        let host = ctx.topology.servers[&key].public_ip.clone();
        ctx.step_detail(LABEL, &format!("waiting for ssh on {}", host));
        let ssh = ctx.ssh(&host);
        ssh.wait_until_ready(SSH_READY_ATTEMPTS, SSH_READY_INTERVAL)
            .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(instance_type: &str, count: u32) -> ServerGroupConfig {
        ServerGroupConfig {
            instance_type: instance_type.to_string(),
            count,
        }
    }

    fn observed(name: &str, instance_type: &str) -> Server {
        Server {
            id: format!("id-{}", name),
            name: name.to_string(),
            public_ipv4: Some("203.0.113.1".to_string()),
            private_ipv4: None,
            instance_type: instance_type.to_string(),
            location: "nbg1".to_string(),
            status: "running".to_string(),
            labels: Default::default(),
        }
    }

    #[test]
    fn test_first_deploy_creates_everything() {
        let plan = plan(&group("cpx21", 1), &IndexMap::new(), "shop", &[]).unwrap();
        assert_eq!(plan.to_create, vec!["master-1"]);
        assert!(plan.to_remove.is_empty());
    }

    #[test]
    fn test_second_deploy_creates_nothing() {
        let existing = [observed("shop-master-1", "cpx21")];
        let plan = plan(&group("cpx21", 1), &IndexMap::new(), "shop", &existing).unwrap();
        assert!(plan.to_create.is_empty());
        assert!(plan.to_remove.is_empty());
    }

    #[test]
    fn test_scale_down_removes_reversed() {
        let existing = [
            observed("shop-master-1", "cpx21"),
            observed("shop-web-1", "cpx21"),
            observed("shop-web-2", "cpx21"),
        ];
        let plan = plan(&group("cpx21", 1), &IndexMap::new(), "shop", &existing).unwrap();
        assert_eq!(plan.to_remove, vec!["shop-web-2", "shop-web-1"]);
    }

    #[test]
    fn test_scale_up_creates_missing_only() {
        let existing = [
            observed("shop-master-1", "cpx21"),
            observed("shop-workers-1", "cpx31"),
        ];
        let mut groups = IndexMap::new();
        groups.insert("workers".to_string(), group("cpx31", 3));
        let plan = plan(&group("cpx21", 1), &groups, "shop", &existing).unwrap();
        assert_eq!(plan.to_create, vec!["workers-2", "workers-3"]);
        assert!(plan.to_remove.is_empty());
    }

    #[test]
    fn test_master_type_change_rejected() {
        let existing = [observed("shop-master-1", "cpx21")];
        let err = plan(&group("cpx31", 1), &IndexMap::new(), "shop", &existing).unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("cpx21"), "Expected old type in: {msg}");
        assert!(msg.contains("cpx31"), "Expected new type in: {msg}");
        assert!(msg.contains("destroy"), "Expected destroy hint in: {msg}");
    }

    #[test]
    fn test_foreign_servers_ignored() {
        let existing = [
            observed("shop-master-1", "cpx21"),
            observed("other-app-master-1", "cpx21"),
            observed("shopx-master-1", "cpx21"),
        ];
        let plan = plan(&group("cpx21", 1), &IndexMap::new(), "shop", &existing).unwrap();
        assert!(plan.to_create.is_empty());
        assert!(plan.to_remove.is_empty(), "foreign prefixes are not ours to remove");
    }

    #[test]
    fn test_desired_partition_is_disjoint_and_complete() {
        let existing = [
            observed("shop-master-1", "cpx21"),
            observed("shop-web-3", "cpx21"),
        ];
        let mut groups = IndexMap::new();
        groups.insert("web".to_string(), group("cpx21", 2));
        let plan = plan(&group("cpx21", 1), &groups, "shop", &existing).unwrap();
        assert_eq!(plan.to_create, vec!["web-1", "web-2"]);
        assert_eq!(plan.to_remove, vec!["shop-web-3"]);
        for key in &plan.to_create {
            assert!(plan.desired.contains_key(key));
        }
    }

    #[test]
    fn test_sandbox_firewall_omits_cluster_port() {
        let production = firewall_rules(false);
        let sandbox = firewall_rules(true);
        assert!(production.iter().any(|r| r.port.as_deref() == Some("6443")));
        assert!(!sandbox.iter().any(|r| r.port.as_deref() == Some("6443")));
    }

    #[test]
    fn test_cloud_init_contains_deploy_user_and_key() {
        let doc = cloud_init("ssh-ed25519 AAAA test@host");
        assert!(doc.starts_with("#cloud-config"));
        assert!(doc.contains("name: deploy"));
        assert!(doc.contains("ssh-ed25519 AAAA test@host"));
    }
}
