use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::Config;
use crate::errors::{Error, Result};

lazy_static! {
    static ref PLACEHOLDER_RE: Regex = Regex::new(r"\$\{([^}]+)\}").expect("valid regex");
}

/// Load a config from a YAML file, resolving `${VAR}` environment
/// references and validating the result. An unset variable fails the load.
pub fn from_file(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        Error::Configuration(format!("cannot read config {}: {}", path.display(), e))
    })?;
    from_str(&raw)
}

/// Load a config from a YAML string (and the process environment).
pub fn from_str(yaml: &str) -> Result<Config> {
    let mut parsed: serde_yaml::Value = serde_yaml::from_str(yaml)?;
    resolve_placeholders_in_value(&mut parsed, &env_lookup)?;
    let config: Config = serde_yaml::from_value(parsed)?;
    config.validate()?;
    Ok(config)
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Walk the YAML tree and substitute `${VAR}` in every string scalar.
fn resolve_placeholders_in_value(
    value: &mut serde_yaml::Value,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<()> {
    match value {
        serde_yaml::Value::String(raw) => {
            *raw = resolve_placeholders(raw, lookup)?;
        }
        serde_yaml::Value::Sequence(items) => {
            for item in items.iter_mut() {
                resolve_placeholders_in_value(item, lookup)?;
            }
        }
        serde_yaml::Value::Mapping(map) => {
            for (_key, map_value) in map.iter_mut() {
                resolve_placeholders_in_value(map_value, lookup)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn resolve_placeholders(content: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Result<String> {
    let mut result = content.to_string();
    let captures: Vec<(String, String)> = PLACEHOLDER_RE
        .captures_iter(content)
        .map(|cap| (cap[0].to_string(), cap[1].to_string()))
        .collect();

    for (full_match, var_name) in captures {
        let value = lookup(&var_name).ok_or_else(|| {
            Error::Configuration(format!("environment variable not set: ${{{}}}", var_name))
        })?;
        result = result.replace(&full_match, &value);
    }
    Ok(result)
}

/// Discover the origin URL of the repository at `dir`, used when the
/// config omits `git.repo`.
pub fn discover_git_repo(dir: &Path) -> Option<String> {
    let output = std::process::Command::new("git")
        .args(["remote", "get-url", "origin"])
        .current_dir(dir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!url.is_empty()).then_some(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseKind, ProviderKind};
    use crate::naming::Target;
    use std::collections::HashMap;

    fn resolve_with_map(content: &str, vars: &HashMap<String, String>) -> Result<String> {
        resolve_placeholders(content, &|name| vars.get(name).cloned())
    }

    const MINIMAL: &str = r#"
name: shop
compute:
  provider: hetzner
  location: nbg1
  image: ubuntu-24.04
  server:
    type: cpx21
"#;

    #[test]
    fn test_minimal_config_parses() {
        let config = from_str(MINIMAL).expect("minimal config should load");
        assert_eq!(config.name, "shop");
        assert_eq!(config.target, Target::Production);
        assert_eq!(config.compute.provider, ProviderKind::Hetzner);
        assert_eq!(config.compute.master_group().unwrap().instance_type, "cpx21");
        assert!(!config.compute.is_multi_server());
    }

    #[test]
    fn test_interpolation_resolves_from_map() {
        let vars = HashMap::from([("DB_PASS".to_string(), "hunter2".to_string())]);
        let resolved = resolve_with_map("postgres://app:${DB_PASS}@db", &vars).unwrap();
        assert_eq!(resolved, "postgres://app:hunter2@db");
    }

    #[test]
    fn test_interpolation_unset_variable_fails() {
        let err = resolve_with_map("${DECKER_TEST_UNSET_VAR_98765}", &HashMap::new()).unwrap_err();
        let msg = format!("{err}");
        assert!(
            msg.contains("DECKER_TEST_UNSET_VAR_98765"),
            "Expected var name in: {msg}"
        );
    }

    #[test]
    fn test_interpolation_multiple_placeholders_in_one_string() {
        let vars = HashMap::from([
            ("A".to_string(), "1".to_string()),
            ("B".to_string(), "2".to_string()),
        ]);
        assert_eq!(resolve_with_map("${A}-${B}-${A}", &vars).unwrap(), "1-2-1");
    }

    #[test]
    fn test_full_config_parses() {
        std::env::set_var("DECKER_TEST_CF_TOKEN", "cf-token");
        let yaml = r#"
name: shop
target: production
compute:
  provider: hetzner
  location: nbg1
  image: ubuntu-24.04
  master:
    type: cpx21
  servers:
    workers:
      type: cpx31
      count: 2
cloudflare:
  api_token: ${DECKER_TEST_CF_TOKEN}
  account_id: acc123
  domain: example.com
databases:
  postgres:
    username: app
    database: app
services:
  redis:
    image: redis:7
    port: 6379
app:
  dockerfile: Dockerfile
  platform: linux/amd64
  processes:
    web:
      command: bin/rails server
      port: 3000
      subdomain: ""
    worker:
      command: bin/jobs
      runs_on: workers
env:
  RAILS_ENV: production
storage:
  uploads:
    public: false
"#;
        let config = from_str(yaml).expect("full config should load");
        assert_eq!(config.cloudflare.as_ref().unwrap().api_token, "cf-token");
        assert!(config.databases.contains_key(&DatabaseKind::Postgres));
        assert_eq!(
            config.app.as_ref().unwrap().processes["web"].replica_count(),
            2,
            "web process with subdomain defaults to 2 replicas"
        );
        assert_eq!(config.app.as_ref().unwrap().processes["worker"].replica_count(), 1);
        assert_eq!(config.fqdn("").as_deref(), Some("example.com"));
        assert_eq!(config.fqdn("api").as_deref(), Some("api.example.com"));
    }

    #[test]
    fn test_unknown_database_engine_rejected() {
        let yaml = r#"
name: shop
compute:
  provider: hetzner
  location: nbg1
  image: ubuntu-24.04
  server:
    type: cpx21
databases:
  mysql:
    username: app
"#;
        assert!(from_str(yaml).is_err(), "mysql is not a supported engine");
    }

    #[test]
    fn test_runs_on_rejected_in_single_server_mode() {
        let yaml = r#"
name: shop
compute:
  provider: hetzner
  location: nbg1
  image: ubuntu-24.04
  server:
    type: cpx21
services:
  redis:
    image: redis:7
    runs_on: workers
"#;
        let err = from_str(yaml).unwrap_err();
        assert!(
            format!("{err}").contains("multi-server"),
            "Expected multi-server error, got: {err}"
        );
    }

    #[test]
    fn test_subdomain_without_cloudflare_rejected() {
        let yaml = r#"
name: shop
compute:
  provider: hetzner
  location: nbg1
  image: ubuntu-24.04
  server:
    type: cpx21
app:
  processes:
    web:
      command: bin/server
      port: 3000
      subdomain: www
"#;
        let err = from_str(yaml).unwrap_err();
        assert!(
            format!("{err}").contains("cloudflare"),
            "Expected cloudflare requirement, got: {err}"
        );
    }

    #[test]
    fn test_subdomain_with_one_replica_rejected() {
        let yaml = r#"
name: shop
compute:
  provider: hetzner
  location: nbg1
  image: ubuntu-24.04
  server:
    type: cpx21
cloudflare:
  api_token: t
  account_id: a
  domain: example.com
app:
  processes:
    web:
      command: bin/server
      port: 3000
      subdomain: www
      replicas: 1
"#;
        let err = from_str(yaml).unwrap_err();
        assert!(
            format!("{err}").contains("2 replicas"),
            "Expected replica requirement, got: {err}"
        );
    }

    #[test]
    fn test_server_and_master_mutually_exclusive() {
        let yaml = r#"
name: shop
compute:
  provider: hetzner
  location: nbg1
  image: ubuntu-24.04
  server:
    type: cpx21
  master:
    type: cpx21
"#;
        assert!(from_str(yaml).is_err());
    }

    #[test]
    fn test_round_trip_preserves_structure() {
        let config = from_str(MINIMAL).unwrap();
        let serialized = serde_yaml::to_string(&config).unwrap();
        let reloaded = from_str(&serialized).unwrap();
        assert_eq!(config, reloaded, "load → serialize → load must be stable");
    }
}
