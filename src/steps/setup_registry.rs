//! Stand up the in-cluster registry backed by object storage, then wait
//! for it to answer the v2 API before any image push.

use std::time::Duration;

use crate::context::Context;
use crate::errors::Result;
use crate::manifests::{self, REGISTRY_PORT};
use crate::naming;
use crate::waiter;

pub const LABEL: &str = "setup_registry";

const READY_ATTEMPTS: u32 = 60;
const READY_INTERVAL: Duration = Duration::from_secs(2);

pub async fn run(ctx: &mut Context<'_>) -> Result<()> {
    let prefix = ctx.prefix.clone();
    let bucket = naming::registry_bucket_name(&prefix);

    ctx.cloudflare()?.ensure_bucket(&bucket).await?;
    let creds = ctx
        .cloudflare()?
        .bucket_credentials(&format!("{}-registry", prefix))
        .await?;
    ctx.bucket_credentials.insert(bucket.clone(), creds.clone());

    let manifest = manifests::registry_manifest(&ctx.config, &prefix, &creds);
    let master_ssh = ctx.master_ssh()?;
    let remote_path = format!("/tmp/{}-registry.yaml", prefix);
    master_ssh.write_file(&remote_path, &manifest).await?;
    master_ssh
        .execute(&format!("sudo k3s kubectl apply -f {}", remote_path))
        .await?;

    // The registry is ready once /v2/ answers on the node port.
    let probe = format!(
        "curl -sf -o /dev/null http://localhost:{}/v2/",
        REGISTRY_PORT
    );
    waiter::poll(READY_ATTEMPTS, READY_INTERVAL, "registry /v2/", || async {
        Ok(master_ssh
            .execute_with(
                &probe,
                crate::ssh::ExecOptions {
                    raise_on_error: false,
                    ..Default::default()
                },
            )
            .await?
            .success())
    })
    .await?;

    Ok(())
}
