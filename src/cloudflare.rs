//! Cloudflare v4 client: DNS zones and records, tunnels, R2 object
//! storage.
//!
//! Responses travel in the `{ success, errors, result }` envelope; every
//! `ensure_*` operation converges on the desired record instead of
//! failing on an existing one.

use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::errors::{Error, Result};
use crate::http::{ApiClient, Auth};

const API_BASE: &str = "https://api.cloudflare.com/client/v4";

pub struct CloudflareClient {
    api: ApiClient,
    account_id: String,
}

// ── Records ──────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DnsRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub content: String,
    #[serde(default)]
    pub proxied: bool,
}

#[derive(Debug, Clone)]
pub struct Tunnel {
    pub id: String,
    pub name: String,
    pub token: String,
}

/// S3-compatible credentials for a provisioned bucket, injected into
/// workloads as `STORAGE_<BUCKET>_*` environment.
#[derive(Debug, Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: String,
    pub region: String,
}

/// One ingress rule of a tunnel configuration. The last rule must be a
/// catch-all (`hostname: None`, service `http_status:404`).
#[derive(Debug, Clone)]
pub struct IngressRule {
    pub hostname: Option<String>,
    pub service: String,
}

impl IngressRule {
    pub fn catch_all() -> Self {
        Self {
            hostname: None,
            service: "http_status:404".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TunnelSetup {
    pub id: String,
    pub token: String,
    pub hostname: String,
}

// ── Envelope ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    code: Option<i64>,
    message: String,
}

impl<T> Envelope<T> {
    fn into_result(self, context: &str) -> Result<T> {
        if !self.success {
            let detail = self
                .errors
                .iter()
                .map(|e| format!("{} ({})", e.message, e.code.unwrap_or(0)))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::api(400, detail.clone(), format!("{}: {}", context, detail)));
        }
        self.result
            .ok_or_else(|| Error::Other(format!("{}: empty result", context)))
    }
}

impl CloudflareClient {
    pub fn new(api_token: &str, account_id: &str) -> Self {
        Self::with_base_url(API_BASE, api_token, account_id)
    }

    pub fn with_base_url(base_url: &str, api_token: &str, account_id: &str) -> Self {
        Self {
            api: ApiClient::new(base_url, Auth::Bearer(api_token.to_string())),
            account_id: account_id.to_string(),
        }
    }

    // ── zones and records ────────────────────────────

    pub async fn find_zone(&self, domain: &str) -> Result<Option<Zone>> {
        let resp: Envelope<Vec<Zone>> = self.api.get("zones", &[("name", domain)]).await?;
        Ok(resp.into_result("list zones")?.into_iter().next())
    }

    pub async fn zone_id(&self, domain: &str) -> Result<String> {
        self.find_zone(domain)
            .await?
            .map(|z| z.id)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "zone {} not found on this cloudflare account",
                    domain
                ))
            })
    }

    pub async fn find_dns_record(
        &self,
        zone_id: &str,
        hostname: &str,
    ) -> Result<Option<DnsRecord>> {
        let resp: Envelope<Vec<DnsRecord>> = self
            .api
            .get(&format!("zones/{}/dns_records", zone_id), &[("name", hostname)])
            .await?;
        Ok(resp.into_result("list dns records")?.into_iter().next())
    }

    /// Converge an A record: create if absent, update if the address or
    /// proxy flag drifted, leave alone otherwise.
    pub async fn ensure_a_record(
        &self,
        zone_id: &str,
        hostname: &str,
        ip: &str,
        proxied: bool,
    ) -> Result<DnsRecord> {
        self.ensure_record(zone_id, hostname, "A", ip, proxied).await
    }

    /// CNAME a hostname onto a tunnel.
    pub async fn ensure_tunnel_record(
        &self,
        zone_id: &str,
        hostname: &str,
        tunnel_id: &str,
    ) -> Result<DnsRecord> {
        let target = format!("{}.cfargotunnel.com", tunnel_id);
        self.ensure_record(zone_id, hostname, "CNAME", &target, true)
            .await
    }

    async fn ensure_record(
        &self,
        zone_id: &str,
        hostname: &str,
        record_type: &str,
        content: &str,
        proxied: bool,
    ) -> Result<DnsRecord> {
        let body = json!({
            "type": record_type,
            "name": hostname,
            "content": content,
            "proxied": proxied,
            "ttl": 1,
        });
        if let Some(existing) = self.find_dns_record(zone_id, hostname).await? {
            if existing.record_type == record_type
                && existing.content == content
                && existing.proxied == proxied
            {
                return Ok(existing);
            }
            let resp: Envelope<DnsRecord> = self
                .api
                .put(&format!("zones/{}/dns_records/{}", zone_id, existing.id), &body)
                .await?;
            return resp.into_result("update dns record");
        }
        let resp: Envelope<DnsRecord> = self
            .api
            .post(&format!("zones/{}/dns_records", zone_id), &body)
            .await?;
        resp.into_result("create dns record")
    }

    pub async fn delete_dns_record(&self, zone_id: &str, hostname: &str) -> Result<()> {
        let Some(record) = self.find_dns_record(zone_id, hostname).await? else {
            return Ok(());
        };
        let result: Result<Value> = self
            .api
            .delete(&format!("zones/{}/dns_records/{}", zone_id, record.id))
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// `flexible`, `full`, or `strict`.
    pub async fn set_ssl_mode(&self, zone_id: &str, mode: &str) -> Result<()> {
        let body = json!({ "value": mode });
        let resp: Envelope<Value> = self
            .api
            .patch(&format!("zones/{}/settings/ssl", zone_id), &body)
            .await?;
        resp.into_result("set ssl mode")?;
        Ok(())
    }

    // ── tunnels ──────────────────────────────────────

    pub async fn find_tunnel(&self, name: &str) -> Result<Option<Tunnel>> {
        #[derive(Deserialize)]
        struct T {
            id: String,
            name: String,
        }
        let resp: Envelope<Vec<T>> = self
            .api
            .get(
                &format!("accounts/{}/cfd_tunnel", self.account_id),
                &[("name", name), ("is_deleted", "false")],
            )
            .await?;
        let Some(t) = resp.into_result("list tunnels")?.into_iter().next() else {
            return Ok(None);
        };
        let token = self.get_tunnel_token(&t.id).await?;
        Ok(Some(Tunnel {
            id: t.id,
            name: t.name,
            token,
        }))
    }

    /// Create the tunnel with a fresh 32-byte secret if absent.
    pub async fn find_or_create_tunnel(&self, name: &str) -> Result<Tunnel> {
        if let Some(existing) = self.find_tunnel(name).await? {
            return Ok(existing);
        }
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let body = json!({
            "name": name,
            "tunnel_secret": general_purpose::STANDARD.encode(secret),
            "config_src": "cloudflare",
        });
        #[derive(Deserialize)]
        struct T {
            id: String,
            name: String,
        }
        let resp: Envelope<T> = self
            .api
            .post(&format!("accounts/{}/cfd_tunnel", self.account_id), &body)
            .await?;
        let t = resp.into_result("create tunnel")?;
        let token = self.get_tunnel_token(&t.id).await?;
        Ok(Tunnel {
            id: t.id,
            name: t.name,
            token,
        })
    }

    pub async fn get_tunnel_token(&self, tunnel_id: &str) -> Result<String> {
        let resp: Envelope<String> = self
            .api
            .get(
                &format!("accounts/{}/cfd_tunnel/{}/token", self.account_id, tunnel_id),
                &[],
            )
            .await?;
        resp.into_result("tunnel token")
    }

    /// Replace the tunnel's routing rules. The rule list must end with a
    /// catch-all; one is appended when missing.
    pub async fn configure_tunnel_ingress(
        &self,
        tunnel_id: &str,
        rules: &[IngressRule],
    ) -> Result<()> {
        let mut wire_rules: Vec<Value> = rules
            .iter()
            .map(|r| match &r.hostname {
                Some(hostname) => json!({ "hostname": hostname, "service": r.service }),
                None => json!({ "service": r.service }),
            })
            .collect();
        let has_catch_all = rules.last().map(|r| r.hostname.is_none()).unwrap_or(false);
        if !has_catch_all {
            wire_rules.push(json!({ "service": "http_status:404" }));
        }
        let body = json!({ "config": { "ingress": wire_rules } });
        let resp: Envelope<Value> = self
            .api
            .put(
                &format!(
                    "accounts/{}/cfd_tunnel/{}/configurations",
                    self.account_id, tunnel_id
                ),
                &body,
            )
            .await?;
        resp.into_result("configure tunnel ingress")?;
        Ok(())
    }

    /// Best-effort: drop live connections first, then the tunnel itself.
    pub async fn delete_tunnel(&self, tunnel_id: &str) -> Result<()> {
        let connections: Result<Value> = self
            .api
            .delete(&format!(
                "accounts/{}/cfd_tunnel/{}/connections",
                self.account_id, tunnel_id
            ))
            .await;
        if let Err(err) = connections {
            if !err.is_not_found() {
                tracing::warn!("delete tunnel connections {}: {}", tunnel_id, err);
            }
        }
        let result: Result<Value> = self
            .api
            .delete(&format!("accounts/{}/cfd_tunnel/{}", self.account_id, tunnel_id))
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Tunnel + ingress + DNS in one idempotent move.
    pub async fn setup_tunnel(
        &self,
        name: &str,
        hostname: &str,
        service_url: &str,
        zone_domain: &str,
    ) -> Result<TunnelSetup> {
        let tunnel = self.find_or_create_tunnel(name).await?;
        self.configure_tunnel_ingress(
            &tunnel.id,
            &[
                IngressRule {
                    hostname: Some(hostname.to_string()),
                    service: service_url.to_string(),
                },
                IngressRule::catch_all(),
            ],
        )
        .await?;
        let zone_id = self.zone_id(zone_domain).await?;
        self.ensure_tunnel_record(&zone_id, hostname, &tunnel.id).await?;
        Ok(TunnelSetup {
            id: tunnel.id,
            token: tunnel.token,
            hostname: hostname.to_string(),
        })
    }

    // ── object storage (R2) ──────────────────────────

    pub async fn ensure_bucket(&self, name: &str) -> Result<()> {
        let body = json!({ "name": name });
        let result: Result<Envelope<Value>> = self
            .api
            .post(&format!("accounts/{}/r2/buckets", self.account_id), &body)
            .await;
        match result {
            Ok(resp) => {
                resp.into_result("create bucket").map(|_| ()).or_else(|err| {
                    if err.matches_conflict_marker(&["already exists", "10004"]) {
                        Ok(())
                    } else {
                        Err(err)
                    }
                })
            }
            Err(err) if err.matches_conflict_marker(&["already exists", "10004"]) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Mint S3-compatible credentials scoped to this account's R2.
    ///
    /// The S3 secret is the SHA-256 hex digest of the created token's
    /// value, per Cloudflare's R2 token scheme. Pre-provisioned keys in
    /// `R2_ACCESS_KEY_ID` / `R2_SECRET_ACCESS_KEY` take precedence.
    pub async fn bucket_credentials(&self, token_name: &str) -> Result<S3Credentials> {
        let endpoint = format!("https://{}.r2.cloudflarestorage.com", self.account_id);
        if let (Ok(access_key_id), Ok(secret_access_key)) = (
            std::env::var("R2_ACCESS_KEY_ID"),
            std::env::var("R2_SECRET_ACCESS_KEY"),
        ) {
            return Ok(S3Credentials {
                access_key_id,
                secret_access_key,
                endpoint,
                region: "auto".to_string(),
            });
        }

        let mut resources = serde_json::Map::new();
        resources.insert(
            format!("com.cloudflare.api.account.{}", self.account_id),
            json!("*"),
        );
        let body = json!({
            "name": token_name,
            "policies": [{
                "effect": "allow",
                "permission_groups": [{ "name": "Workers R2 Storage Write" }],
                "resources": resources,
            }],
        });
        #[derive(Deserialize)]
        struct Token {
            id: String,
            value: String,
        }
        let resp: Envelope<Token> = self
            .api
            .post(&format!("accounts/{}/tokens", self.account_id), &body)
            .await?;
        let token = resp.into_result("create r2 token")?;
        let digest = Sha256::digest(token.value.as_bytes());
        Ok(S3Credentials {
            access_key_id: token.id,
            secret_access_key: format!("{:x}", digest),
            endpoint,
            region: "auto".to_string(),
        })
    }

    pub async fn configure_cors(&self, bucket: &str, rules: &Value) -> Result<()> {
        let resp: Envelope<Value> = self
            .api
            .put(
                &format!("accounts/{}/r2/buckets/{}/cors", self.account_id, bucket),
                &json!({ "rules": rules }),
            )
            .await?;
        resp.into_result("configure cors")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_success_returns_result() {
        let env: Envelope<Vec<Zone>> = serde_json::from_str(
            r#"{"success":true,"errors":[],"result":[{"id":"z1","name":"example.com"}]}"#,
        )
        .unwrap();
        let zones = env.into_result("zones").unwrap();
        assert_eq!(zones[0].id, "z1");
    }

    #[test]
    fn test_envelope_failure_surfaces_messages() {
        let env: Envelope<Value> = serde_json::from_str(
            r#"{"success":false,"errors":[{"code":10000,"message":"Authentication error"}],"result":null}"#,
        )
        .unwrap();
        let err = env.into_result("zones").unwrap_err();
        assert!(
            format!("{err}").contains("Authentication error"),
            "Expected error message in: {err}"
        );
    }

    #[test]
    fn test_catch_all_rule_has_no_hostname() {
        let rule = IngressRule::catch_all();
        assert!(rule.hostname.is_none());
        assert_eq!(rule.service, "http_status:404");
    }
}
