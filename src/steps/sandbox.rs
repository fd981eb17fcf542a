//! Sandbox installation: a single host runs the stack under
//! docker-compose. The image is built on the host from the git repo, so
//! nothing binary ever crosses the wire.

use std::time::Duration;

use crate::compose::{self, ComposeInputs};
use crate::config::DatabaseKind;
use crate::context::Context;
use crate::errors::{Error, Result};
use crate::ssh::ExecOptions;

pub const SETUP_HOST: &str = "setup_sandbox_host";
pub const DEPLOY_COMPOSE: &str = "deploy_compose";
pub const DESTROY_COMPOSE: &str = "destroy_compose";

fn stack_dir(prefix: &str) -> String {
    format!("/opt/decker/{}", prefix)
}

/// Docker on the host, installed once.
pub async fn setup_host(ctx: &mut Context<'_>) -> Result<()> {
    let ssh = ctx.master_ssh()?;
    let has_docker = ssh
        .execute_with(
            "command -v docker",
            ExecOptions {
                raise_on_error: false,
                ..Default::default()
            },
        )
        .await?
        .success();
    if !has_docker {
        ctx.step_detail(SETUP_HOST, "installing docker");
        ssh.execute_with_retry(
            "curl -fsSL https://get.docker.com | sudo sh && sudo usermod -aG docker deploy",
            3,
            Duration::from_secs(5),
        )
        .await?;
    }
    Ok(())
}

/// Clone or update the repo on the host and build the app image there.
async fn build_on_host(ctx: &mut Context<'_>) -> Result<()> {
    let Some(app) = ctx.config.app.clone() else {
        return Ok(());
    };
    let repo = ctx
        .config
        .git
        .repo
        .clone()
        .or_else(|| crate::config::discover_git_repo(std::path::Path::new(".")))
        .ok_or_else(|| {
            Error::Configuration("sandbox app deploys need git.repo (or a local origin remote)".to_string())
        })?;
    let repo_url = match &ctx.config.git.pat {
        Some(pat) if repo.starts_with("https://") => {
            repo.replacen("https://", &format!("https://x-access-token:{}@", pat), 1)
        }
        _ => repo,
    };

    let dir = stack_dir(&ctx.prefix);
    let ssh = ctx.master_ssh()?;
    ctx.step_detail(DEPLOY_COMPOSE, "syncing repository");
    ssh.execute(&format!(
        "sudo mkdir -p {dir} && sudo chown deploy {dir} && \
         if [ -d {dir}/src/.git ]; then git -C {dir}/src pull --ff-only; \
         else git clone --depth 1 {url} {dir}/src; fi",
        dir = dir,
        url = repo_url
    ))
    .await?;

    let sha = ssh
        .execute(&format!("git -C {}/src rev-parse --short HEAD", dir))
        .await?
        .output
        .trim()
        .to_string();
    let tag = format!("{}:{}", ctx.prefix, sha);
    ctx.step_detail(DEPLOY_COMPOSE, &format!("building {}", tag));
    ssh.execute_with(
        &format!(
            "cd {}/src && sudo docker build --platform {} -f {} -t {} .",
            dir, app.platform, app.dockerfile, tag
        ),
        ExecOptions {
            timeout: Duration::from_secs(1800),
            ..Default::default()
        },
    )
    .await?;
    ctx.app_image = Some(tag);
    ctx.git_sha = Some(sha);
    Ok(())
}

/// Generate the compose file, ship it, bring the stack up.
pub async fn deploy_compose(ctx: &mut Context<'_>) -> Result<()> {
    build_on_host(ctx).await?;

    if ctx.config.databases.contains_key(&DatabaseKind::Postgres)
        && !ctx.database_passwords.contains_key(&DatabaseKind::Postgres)
    {
        let db = &ctx.config.databases[&DatabaseKind::Postgres];
        let password = db.password.clone().unwrap_or_else(|| {
            use rand::distributions::Alphanumeric;
            use rand::Rng;
            rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(24)
                .map(char::from)
                .collect()
        });
        ctx.database_passwords.insert(DatabaseKind::Postgres, password);
    }

    let yaml = compose::generate(
        &ctx.config,
        &ComposeInputs {
            app_image: ctx.app_image.clone(),
            database_passwords: ctx.database_passwords.clone(),
        },
    )?;

    let dir = stack_dir(&ctx.prefix);
    let ssh = ctx.master_ssh()?;
    ssh.execute(&format!("sudo mkdir -p {dir} && sudo chown deploy {dir}", dir = dir))
        .await?;
    ssh.write_file(&format!("{}/docker-compose.yml", dir), &yaml).await?;
    ctx.step_detail(DEPLOY_COMPOSE, "starting stack");
    ssh.execute_with(
        &format!("cd {} && sudo docker compose up -d --remove-orphans", dir),
        ExecOptions {
            timeout: Duration::from_secs(900),
            ..Default::default()
        },
    )
    .await?;
    Ok(())
}

/// Bring the stack down with volumes; missing host or stack is fine.
pub async fn destroy_compose(ctx: &mut Context<'_>) -> Result<()> {
    let name = crate::naming::server_name(&ctx.prefix, crate::naming::MASTER_GROUP, 1);
    let server = match ctx.provider.find_server(&name).await {
        Ok(Some(server)) => server,
        _ => return Ok(()),
    };
    let Some(ip) = server.public_ipv4 else {
        return Ok(());
    };
    let ssh = ctx.ssh(&ip);
    let dir = stack_dir(&ctx.prefix);
    let result = ssh
        .execute_with(
            &format!("cd {} && sudo docker compose down -v", dir),
            ExecOptions {
                raise_on_error: false,
                ..Default::default()
            },
        )
        .await;
    if let Err(err) = result {
        tracing::warn!("compose down: {}", err);
    }
    Ok(())
}
