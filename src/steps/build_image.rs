//! Build the app image locally and push it into the cluster registry
//! through an SSH tunnel; the registry is never exposed publicly.

use crate::context::Context;
use crate::errors::{Error, Result};
use crate::manifests::REGISTRY_PORT;
use crate::steps::run_local;

pub const LABEL: &str = "build_image";

/// Resolve the git sha the image is tagged with.
async fn git_sha(ctx: &Context<'_>) -> Result<String> {
    let output = run_local(
        "git",
        &["rev-parse", "--short", "HEAD"],
        ctx.observer,
        "build",
    )
    .await
    .map_err(|_| {
        Error::Configuration("app deploys require a git repository with at least one commit".to_string())
    })?;
    Ok(output.trim().to_string())
}

pub async fn run(ctx: &mut Context<'_>) -> Result<()> {
    let Some(app) = ctx.config.app.clone() else {
        return Ok(());
    };
    let prefix = ctx.prefix.clone();

    let sha = git_sha(ctx).await?;
    ctx.git_sha = Some(sha.clone());
    let local_tag = format!("{}:{}", prefix, sha);
    let registry_tag = format!("localhost:{}/{}", REGISTRY_PORT, local_tag);

    ctx.step_detail(LABEL, &format!("building {}", local_tag));
    run_local(
        "docker",
        &[
            "build",
            "--platform",
            &app.platform,
            "-f",
            &app.dockerfile,
            "-t",
            &local_tag,
            ".",
        ],
        ctx.observer,
        "build",
    )
    .await?;

    run_local("docker", &["tag", &local_tag, &registry_tag], ctx.observer, "build").await?;

    // Push through a forwarded port so the registry stays cluster-local.
    let master_ssh = ctx.master_ssh()?;
    let tunnel = master_ssh.open_tunnel(REGISTRY_PORT, REGISTRY_PORT).await?;
    ctx.step_detail(LABEL, &format!("pushing {}", registry_tag));
    let push_result = run_local("docker", &["push", &registry_tag], ctx.observer, "push").await;
    drop(tunnel);
    push_result?;

    ctx.app_image = Some(registry_tag);
    Ok(())
}
