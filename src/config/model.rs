use std::fmt;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::naming::Target;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider and database kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Hetzner,
    Scaleway,
    Aws,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hetzner => write!(f, "hetzner"),
            Self::Scaleway => write!(f, "scaleway"),
            Self::Aws => write!(f, "aws"),
        }
    }
}

/// Only these two engines are accepted; anything else fails at parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Postgres,
    Sqlite,
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Postgres => write!(f, "postgres"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Configuration sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One server group: instance type + how many of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerGroupConfig {
    #[serde(rename = "type", alias = "instance_type")]
    pub instance_type: String,

    #[serde(default = "default_count")]
    pub count: u32,
}

fn default_count() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeConfig {
    pub provider: ProviderKind,

    #[serde(alias = "region")]
    pub location: String,

    pub image: String,

    #[serde(default)]
    pub ssh_key_path: Option<PathBuf>,

    /// Single-server mode: one machine carries everything.
    #[serde(default)]
    pub server: Option<ServerGroupConfig>,

    /// Multi-server mode: explicit master plus named worker groups.
    #[serde(default)]
    pub master: Option<ServerGroupConfig>,

    #[serde(default)]
    pub servers: IndexMap<String, ServerGroupConfig>,
}

impl ComputeConfig {
    /// The group that hosts the control plane.
    pub fn master_group(&self) -> Result<&ServerGroupConfig> {
        if let Some(server) = &self.server {
            return Ok(server);
        }
        self.master.as_ref().ok_or_else(|| {
            Error::Configuration(
                "compute requires either `server` or `master` + `servers`".to_string(),
            )
        })
    }

    /// Multi-server mode means worker groups exist; `runs_on` hints are
    /// only meaningful here.
    pub fn is_multi_server(&self) -> bool {
        !self.servers.is_empty()
    }

    /// All declared group names, master first.
    pub fn group_names(&self) -> Vec<String> {
        let mut names = vec![crate::naming::MASTER_GROUP.to_string()];
        names.extend(self.servers.keys().cloned());
        names
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudflareConfig {
    pub api_token: String,
    pub account_id: String,
    pub domain: String,

    /// DNS zone; defaults to `domain` when omitted.
    #[serde(default)]
    pub zone: Option<String>,
}

impl CloudflareConfig {
    pub fn zone_domain(&self) -> &str {
        self.zone.as_deref().unwrap_or(&self.domain)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GitConfig {
    #[serde(default)]
    pub repo: Option<String>,

    /// Personal access token for private repos.
    #[serde(default)]
    pub pat: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub image: Option<String>,

    #[serde(default = "default_db_user")]
    pub username: String,

    #[serde(default = "default_db_name")]
    pub database: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub runs_on: Option<RunsOn>,
}

fn default_db_user() -> String {
    "app".to_string()
}

fn default_db_name() -> String {
    "app".to_string()
}

/// Pin a workload to one group (hard) or several (soft affinity).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunsOn {
    Group(String),
    Groups(Vec<String>),
}

impl RunsOn {
    pub fn groups(&self) -> Vec<&str> {
        match self {
            Self::Group(g) => vec![g.as_str()],
            Self::Groups(gs) => gs.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub image: String,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub subdomain: Option<String>,

    /// Persistent volume mount; turns the deployment into a stateful set.
    #[serde(default)]
    pub mount_path: Option<String>,

    #[serde(default)]
    pub env: IndexMap<String, String>,

    #[serde(default)]
    pub runs_on: Option<RunsOn>,

    /// Dedicated node: a machine of this type is provisioned for the
    /// service and the workload pinned to it.
    #[serde(default)]
    pub instance_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub command: String,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub subdomain: Option<String>,

    #[serde(default)]
    pub replicas: Option<u32>,

    #[serde(default)]
    pub runs_on: Option<RunsOn>,

    /// One-off commands run inside the app image before rollout
    /// (migrations and the like).
    #[serde(default)]
    pub setup: Vec<String>,

    #[serde(default)]
    pub env: IndexMap<String, String>,

    #[serde(default)]
    pub instance_type: Option<String>,
}

impl ProcessConfig {
    /// Web processes default to 2 replicas so a rolling update always has
    /// a replica serving; background processes default to 1.
    pub fn replica_count(&self) -> u32 {
        self.replicas
            .unwrap_or(if self.subdomain.is_some() { 2 } else { 1 })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,

    #[serde(default = "default_platform")]
    pub platform: String,

    pub processes: IndexMap<String, ProcessConfig>,
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

fn default_platform() -> String {
    "linux/amd64".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorsRule {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,

    #[serde(default)]
    pub allowed_headers: Option<Vec<String>>,

    #[serde(default)]
    pub max_age_seconds: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BucketConfig {
    #[serde(default)]
    pub public: bool,

    #[serde(default)]
    pub cors: Option<Vec<CorsRule>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config — the whole document
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub name: String,

    #[serde(default)]
    pub target: Target,

    pub compute: ComputeConfig,

    #[serde(default)]
    pub cloudflare: Option<CloudflareConfig>,

    #[serde(default)]
    pub git: GitConfig,

    #[serde(default)]
    pub databases: IndexMap<DatabaseKind, DatabaseConfig>,

    #[serde(default)]
    pub services: IndexMap<String, ServiceConfig>,

    #[serde(default)]
    pub app: Option<AppConfig>,

    #[serde(default, alias = "env_vars")]
    pub env: IndexMap<String, String>,

    #[serde(default)]
    pub storage: IndexMap<String, BucketConfig>,
}

impl Config {
    /// Cross-field invariants beyond what serde enforces. Called by the
    /// loader; a failing config never reaches a provider API.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            || !self.name.starts_with(|c: char| c.is_ascii_lowercase())
        {
            return Err(Error::Configuration(format!(
                "name {:?} must be lowercase alphanumeric with dashes",
                self.name
            )));
        }

        match (&self.compute.server, &self.compute.master) {
            (Some(_), Some(_)) => {
                return Err(Error::Configuration(
                    "compute.server and compute.master are mutually exclusive".to_string(),
                ))
            }
            (None, None) => {
                return Err(Error::Configuration(
                    "compute requires either `server` or `master` + `servers`".to_string(),
                ))
            }
            (Some(_), None) if !self.compute.servers.is_empty() => {
                return Err(Error::Configuration(
                    "compute.servers requires compute.master instead of compute.server"
                        .to_string(),
                ))
            }
            _ => {}
        }

        let multi = self.compute.is_multi_server();
        let groups = self.compute.group_names();

        for (name, workload) in self.workload_placements() {
            if let Some(runs_on) = workload {
                if !multi {
                    return Err(Error::Configuration(format!(
                        "{}: runs_on is only valid in multi-server mode",
                        name
                    )));
                }
                for group in runs_on.groups() {
                    if !groups.iter().any(|g| g == group) {
                        return Err(Error::Configuration(format!(
                            "{}: runs_on references undeclared group {:?}",
                            name, group
                        )));
                    }
                }
            }
        }

        for (name, subdomain) in self.subdomains() {
            if self.cloudflare.is_none() {
                return Err(Error::Configuration(format!(
                    "{}: subdomain {:?} requires a cloudflare section",
                    name, subdomain
                )));
            }
        }

        if let Some(app) = &self.app {
            for (name, process) in &app.processes {
                if process.subdomain.is_some() && process.replica_count() < 2 {
                    return Err(Error::Configuration(format!(
                        "process {}: a subdomain requires at least 2 replicas for zero-downtime rollout",
                        name
                    )));
                }
            }
        }

        Ok(())
    }

    /// FQDN for a subdomain under the configured zone. An empty subdomain
    /// means the apex.
    pub fn fqdn(&self, subdomain: &str) -> Option<String> {
        let cf = self.cloudflare.as_ref()?;
        if subdomain.is_empty() || subdomain == "@" {
            Some(cf.zone_domain().to_string())
        } else {
            Some(format!("{}.{}", subdomain, cf.zone_domain()))
        }
    }

    fn workload_placements(&self) -> Vec<(String, Option<&RunsOn>)> {
        let mut out = Vec::new();
        for (kind, db) in &self.databases {
            out.push((format!("database {}", kind), db.runs_on.as_ref()));
        }
        for (name, svc) in &self.services {
            out.push((format!("service {}", name), svc.runs_on.as_ref()));
        }
        if let Some(app) = &self.app {
            for (name, process) in &app.processes {
                out.push((format!("process {}", name), process.runs_on.as_ref()));
            }
        }
        out
    }

    fn subdomains(&self) -> Vec<(String, &str)> {
        let mut out = Vec::new();
        for (name, svc) in &self.services {
            if let Some(sub) = &svc.subdomain {
                out.push((format!("service {}", name), sub.as_str()));
            }
        }
        if let Some(app) = &self.app {
            for (name, process) in &app.processes {
                if let Some(sub) = &process.subdomain {
                    out.push((format!("process {}", name), sub.as_str()));
                }
            }
        }
        out
    }
}
