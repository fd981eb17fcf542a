//! Render the full manifest set, apply it on the cluster, and poll
//! rollout status per workload until everything is ready.

use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::config::DatabaseKind;
use crate::context::Context;
use crate::errors::{Error, Result};
use crate::events::RolloutProgress;
use crate::manifests::{self, ManifestInputs};
use crate::naming;
use crate::ssh::ExecOptions;

pub const LABEL: &str = "deploy_manifests";

const ROLLOUT_ATTEMPTS: u32 = 60;
const ROLLOUT_INTERVAL: Duration = Duration::from_secs(5);

/// Resolve the postgres password: config first, then the password file
/// persisted on the master from an earlier run, else mint one and
/// persist it so reruns converge on the same secret.
async fn resolve_postgres_password(ctx: &mut Context<'_>) -> Result<()> {
    let Some(db) = ctx.config.databases.get(&DatabaseKind::Postgres) else {
        return Ok(());
    };
    let configured = db.password.clone();
    if let Some(password) = configured {
        ctx.database_passwords.insert(DatabaseKind::Postgres, password);
        return Ok(());
    }

    let path = format!("/var/lib/decker/{}/postgres-password", ctx.prefix);
    let ssh = ctx.master_ssh()?;
    if let Some(existing) = ssh.read_file(&path).await {
        let existing = existing.trim().to_string();
        if !existing.is_empty() {
            ctx.database_passwords.insert(DatabaseKind::Postgres, existing);
            return Ok(());
        }
    }

    let password: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    ssh.execute(&format!("sudo mkdir -p /var/lib/decker/{} && sudo chown deploy /var/lib/decker/{}", ctx.prefix, ctx.prefix))
        .await?;
    ssh.write_file(&path, &password).await?;
    ctx.database_passwords.insert(DatabaseKind::Postgres, password);
    Ok(())
}

/// Buckets the manifests reference: user storage, plus backups when
/// postgres and cloudflare are both present.
async fn ensure_buckets(ctx: &mut Context<'_>) -> Result<()> {
    if ctx.cloudflare.is_none() {
        return Ok(());
    }
    let prefix = ctx.prefix.clone();
    let mut wanted: Vec<(String, Option<serde_json::Value>)> = Vec::new();
    for (bucket, config) in &ctx.config.storage {
        let cors = config
            .cors
            .as_ref()
            .map(|rules| serde_json::to_value(rules).expect("cors serializes"));
        wanted.push((naming::workload_name(&prefix, bucket), cors));
    }
    if ctx.config.databases.contains_key(&DatabaseKind::Postgres) {
        wanted.push((naming::backup_bucket_name(&prefix), None));
    }

    for (bucket, cors) in wanted {
        ctx.step_detail(LABEL, &format!("bucket {}", bucket));
        ctx.cloudflare()?.ensure_bucket(&bucket).await?;
        if let Some(rules) = cors {
            ctx.cloudflare()?.configure_cors(&bucket, &rules).await?;
        }
        if !ctx.bucket_credentials.contains_key(&bucket) {
            let creds = ctx.cloudflare()?.bucket_credentials(&bucket).await?;
            ctx.bucket_credentials.insert(bucket, creds);
        }
    }
    Ok(())
}

/// Workloads whose rollout we track: kind, name, desired replicas.
fn tracked_workloads(ctx: &Context<'_>) -> Vec<(&'static str, String, u32)> {
    let prefix = &ctx.prefix;
    let mut out = Vec::new();
    if ctx.config.databases.contains_key(&DatabaseKind::Postgres) {
        out.push(("statefulset", naming::workload_name(prefix, "postgres"), 1));
    }
    for (name, service) in &ctx.config.services {
        let kind = if service.mount_path.is_some() {
            "statefulset"
        } else {
            "deployment"
        };
        out.push((kind, naming::workload_name(prefix, name), 1));
    }
    if let Some(app) = &ctx.config.app {
        for (name, process) in &app.processes {
            out.push((
                "deployment",
                naming::workload_name(prefix, name),
                process.replica_count(),
            ));
        }
    }
    out
}

pub async fn run(ctx: &mut Context<'_>) -> Result<()> {
    resolve_postgres_password(ctx).await?;
    ensure_buckets(ctx).await?;

    let prefix = ctx.prefix.clone();
    let inputs = ManifestInputs {
        tunnel_token: ctx.topology.tunnel.as_ref().map(|t| t.token.clone()),
        bucket_credentials: ctx.bucket_credentials.clone(),
        database_passwords: ctx.database_passwords.clone(),
        app_image: ctx.app_image.clone(),
    };
    let manifest = manifests::generate(&ctx.config, &prefix, &inputs)?;

    let ssh = ctx.master_ssh()?;
    let remote_path = format!("/var/lib/decker/{}/manifests.yaml", prefix);
    ssh.execute(&format!(
        "sudo mkdir -p /var/lib/decker/{p} && sudo chown deploy /var/lib/decker/{p}",
        p = prefix
    ))
    .await?;
    ssh.write_file(&remote_path, &manifest).await?;
    ssh.execute(&format!("sudo k3s kubectl apply -f {}", remote_path))
        .await?;

    // Poll each workload until ready == desired; progress events carry
    // non-decreasing ready counts.
    let workloads = tracked_workloads(ctx);
    for attempt in 1..=ROLLOUT_ATTEMPTS {
        let mut all_ready = true;
        for (kind, name, desired) in &workloads {
            let query = format!(
                "sudo k3s kubectl get {} {} -o jsonpath='{{.status.readyReplicas}}'",
                kind, name
            );
            let ready: u32 = ssh
                .execute_with(
                    &query,
                    ExecOptions {
                        raise_on_error: false,
                        ..Default::default()
                    },
                )
                .await?
                .output
                .trim()
                .trim_matches('\'')
                .parse()
                .unwrap_or(0);
            ctx.observer.on_rollout_progress(&RolloutProgress {
                workload: name.clone(),
                ready,
                desired: *desired,
            });
            if ready < *desired {
                all_ready = false;
            }
        }
        if all_ready {
            return Ok(());
        }
        if attempt < ROLLOUT_ATTEMPTS {
            tokio::time::sleep(ROLLOUT_INTERVAL).await;
        }
    }

    Err(Error::Timeout("workload rollout".to_string()))
}
