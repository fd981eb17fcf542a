//! Remove servers that fell out of the desired topology: drain the
//! node, delete it from the cluster, then delete the machine. Runs
//! after a successful rollout so capacity never dips mid-deploy. Every
//! sub-operation is best-effort, single attempt; whatever remains is
//! picked up by the next reconciliation.

use crate::context::Context;
use crate::errors::Result;
use crate::ssh::ExecOptions;

pub const LABEL: &str = "remove_excess_servers";

pub async fn run(ctx: &mut Context<'_>) -> Result<()> {
    let names = ctx.topology.servers_to_remove.clone();
    if names.is_empty() {
        return Ok(());
    }
    let master_ssh = ctx.master_ssh()?;

    for name in names {
        ctx.step_detail(LABEL, &format!("removing {}", name));

        let drain = master_ssh
            .execute_with(
                &format!(
                    "sudo k3s kubectl drain {} --ignore-daemonsets --delete-emptydir-data --force --timeout=120s",
                    name
                ),
                ExecOptions {
                    raise_on_error: false,
                    ..Default::default()
                },
            )
            .await;
        if let Err(err) = drain {
            tracing::warn!("drain {}: {}", name, err);
        }

        let delete_node = master_ssh
            .execute_with(
                &format!("sudo k3s kubectl delete node {}", name),
                ExecOptions {
                    raise_on_error: false,
                    ..Default::default()
                },
            )
            .await;
        if let Err(err) = delete_node {
            tracing::warn!("delete node {}: {}", name, err);
        }

        if let Err(err) = ctx.provider.delete_server_by_name(&name).await {
            tracing::warn!("delete server {}: {}", name, err);
        }
    }

    ctx.topology.servers_to_remove.clear();
    Ok(())
}
