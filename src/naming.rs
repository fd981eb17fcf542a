//! Canonical resource naming, labels, sandbox slugs, and instance memory
//! tables.
//!
//! Every managed resource is scoped by a deterministic prefix so that
//! concurrent deploys of different apps (or sandboxes of the same app)
//! never collide, and so discovery can match resources back by name.

use std::collections::HashMap;

use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Label key marking resources managed by this tool.
pub const MANAGED_BY: &str = "decker";

pub const MASTER_GROUP: &str = "master";

lazy_static! {
    static ref SLUG_RE: Regex = Regex::new(r"^[a-f0-9]{6}$").expect("valid slug regex");
}

// ── Prefix ───────────────────────────────────────────

/// Deployment target flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Production,
    Sandbox,
}

impl Default for Target {
    fn default() -> Self {
        Self::Production
    }
}

/// Build the resource-name prefix for a run.
///
/// Production: `<name>`. Sandbox: `<name>-sandbox-<slug>`.
pub fn prefix(name: &str, target: Target, slug: Option<&str>) -> Result<String> {
    match target {
        Target::Production => Ok(name.to_string()),
        Target::Sandbox => {
            let slug = slug.ok_or_else(|| {
                Error::Configuration("sandbox target requires a slug".to_string())
            })?;
            validate_slug(slug)?;
            Ok(format!("{}-sandbox-{}", name, slug))
        }
    }
}

/// Generate a fresh 6-char lowercase-hex sandbox slug.
pub fn generate_slug() -> String {
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| {
            let n: u8 = rng.gen_range(0..16);
            char::from_digit(n as u32, 16).expect("hex digit")
        })
        .collect()
}

/// A slug must match `[a-f0-9]{6}` exactly.
pub fn validate_slug(slug: &str) -> Result<()> {
    if SLUG_RE.is_match(slug) {
        Ok(())
    } else {
        Err(Error::Configuration(format!(
            "invalid sandbox slug {:?}: expected 6 lowercase hex characters",
            slug
        )))
    }
}

// ── Resource names ───────────────────────────────────

/// Server key and name: `<prefix>-<group>-<index>`, 1-indexed.
pub fn server_name(prefix: &str, group: &str, index: u32) -> String {
    format!("{}-{}-{}", prefix, group, index)
}

pub fn server_key(group: &str, index: u32) -> String {
    format!("{}-{}", group, index)
}

pub fn network_name(prefix: &str) -> String {
    format!("{}-network", prefix)
}

pub fn firewall_name(prefix: &str) -> String {
    format!("{}-firewall", prefix)
}

pub fn volume_name(prefix: &str, workload: &str) -> String {
    format!("{}-{}-data", prefix, workload)
}

pub fn load_balancer_name(prefix: &str) -> String {
    format!("{}-lb", prefix)
}

pub fn ssh_key_name(prefix: &str) -> String {
    format!("{}-deploy-key", prefix)
}

pub fn tunnel_name(prefix: &str) -> String {
    prefix.to_string()
}

pub fn registry_bucket_name(prefix: &str) -> String {
    format!("{}-registry", prefix)
}

pub fn backup_bucket_name(prefix: &str) -> String {
    format!("{}-backups", prefix)
}

pub fn workload_name(prefix: &str, workload: &str) -> String {
    format!("{}-{}", prefix, workload)
}

/// Pattern matching servers owned by a prefix; capture groups are
/// `(group, index)`.
pub fn server_pattern(prefix: &str) -> Regex {
    Regex::new(&format!(
        r"^{}-([a-z0-9-]+?)-(\d+)$",
        regex::escape(prefix)
    ))
    .expect("valid server pattern")
}

/// Labels attached to every managed resource.
pub fn labels(app: &str, prefix: &str) -> HashMap<String, String> {
    HashMap::from([
        ("app".to_string(), app.to_string()),
        ("instance".to_string(), prefix.to_string()),
        ("managed-by".to_string(), MANAGED_BY.to_string()),
    ])
}

// ── Instance memory tables ───────────────────────────

/// Memory in MB for known instance types, keyed per provider. Used by the
/// manifest generator to fit workload requests onto node groups.
pub fn instance_memory_mb(provider: &str, instance_type: &str) -> Option<u32> {
    let table: &[(&str, u32)] = match provider {
        "hetzner" => &[
            ("cx22", 4096),
            ("cx32", 8192),
            ("cx42", 16384),
            ("cpx11", 2048),
            ("cpx21", 4096),
            ("cpx31", 8192),
            ("cpx41", 16384),
            ("cpx51", 32768),
            ("cax11", 4096),
            ("cax21", 8192),
            ("cax31", 16384),
            ("cax41", 32768),
        ],
        "scaleway" => &[
            ("DEV1-S", 2048),
            ("DEV1-M", 4096),
            ("DEV1-L", 8192),
            ("DEV1-XL", 12288),
            ("GP1-XS", 16384),
            ("GP1-S", 32768),
            ("PLAY2-PICO", 2048),
            ("PLAY2-NANO", 4096),
            ("PLAY2-MICRO", 8192),
        ],
        "aws" => &[
            ("t3.micro", 1024),
            ("t3.small", 2048),
            ("t3.medium", 4096),
            ("t3.large", 8192),
            ("t3.xlarge", 16384),
            ("m5.large", 8192),
            ("m5.xlarge", 16384),
            ("c5.large", 4096),
        ],
        _ => &[],
    };
    table
        .iter()
        .find(|(name, _)| *name == instance_type)
        .map(|(_, mb)| *mb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_prefix_is_bare_name() {
        assert_eq!(prefix("shop", Target::Production, None).unwrap(), "shop");
    }

    #[test]
    fn test_sandbox_prefix_includes_slug() {
        assert_eq!(
            prefix("shop", Target::Sandbox, Some("a1b2c3")).unwrap(),
            "shop-sandbox-a1b2c3"
        );
    }

    #[test]
    fn test_sandbox_prefix_requires_slug() {
        assert!(prefix("shop", Target::Sandbox, None).is_err());
    }

    #[test]
    fn test_slug_validation_rejects_bad_input() {
        assert!(validate_slug("a1b2c3").is_ok());
        assert!(validate_slug("A1B2C3").is_err(), "uppercase must be rejected");
        assert!(validate_slug("a1b2c").is_err(), "too short must be rejected");
        assert!(validate_slug("a1b2c3d").is_err(), "too long must be rejected");
        assert!(validate_slug("g1h2i3").is_err(), "non-hex must be rejected");
        assert!(validate_slug("").is_err());
    }

    #[test]
    fn test_generated_slug_is_valid() {
        for _ in 0..50 {
            let slug = generate_slug();
            assert!(validate_slug(&slug).is_ok(), "generated invalid slug {slug}");
        }
    }

    #[test]
    fn test_server_pattern_captures_group_and_index() {
        let re = server_pattern("shop");
        let caps = re.captures("shop-master-1").expect("should match");
        assert_eq!(&caps[1], "master");
        assert_eq!(&caps[2], "1");

        let caps = re.captures("shop-web-workers-12").expect("should match");
        assert_eq!(&caps[1], "web-workers");
        assert_eq!(&caps[2], "12");

        assert!(re.captures("shop-master").is_none());
        assert!(re.captures("other-master-1").is_none());
        assert!(
            re.captures("shop-master-1-extra").is_none(),
            "trailing segments must not match"
        );
    }

    #[test]
    fn test_labels_contain_required_keys() {
        let l = labels("shop", "shop-sandbox-a1b2c3");
        assert_eq!(l["app"], "shop");
        assert_eq!(l["instance"], "shop-sandbox-a1b2c3");
        assert_eq!(l["managed-by"], "decker");
    }

    #[test]
    fn test_instance_memory_lookup() {
        assert_eq!(instance_memory_mb("hetzner", "cpx21"), Some(4096));
        assert_eq!(instance_memory_mb("scaleway", "DEV1-M"), Some(4096));
        assert_eq!(instance_memory_mb("aws", "t3.medium"), Some(4096));
        assert_eq!(instance_memory_mb("hetzner", "nope"), None);
        assert_eq!(instance_memory_mb("unknown", "cpx21"), None);
    }
}
