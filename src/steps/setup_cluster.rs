//! Install the k3s cluster over SSH: master first, then workers joined
//! with the master's token, node labels for scheduling, and the
//! registry mirror every node pulls the app image through.

use std::time::Duration;

use crate::context::Context;
use crate::errors::{Error, Result};
use crate::manifests::REGISTRY_PORT;

pub const LABEL: &str = "setup_cluster";

/// Primary installer and a mirror fallback, tried in order. Each entry
/// carries the env prefix its mirror expects.
const INSTALLER_SOURCES: &[(&str, &str)] = &[
    ("https://get.k3s.io", ""),
    (
        "https://rancher-mirror.rancher.cn/k3s/k3s-install.sh",
        "INSTALL_K3S_MIRROR=cn ",
    ),
];

fn install_command(args: &str) -> String {
    // Chained fallback: the first mirror that answers wins.
    INSTALLER_SOURCES
        .iter()
        .map(|(url, env)| {
            format!(
                "curl -sfL {url} -o /tmp/k3s-install.sh && {env}sh /tmp/k3s-install.sh {args}"
            )
        })
        .collect::<Vec<_>>()
        .join(" || ")
}

fn registries_yaml() -> String {
    format!(
        r#"mirrors:
  "localhost:{port}":
    endpoint:
      - "http://localhost:{port}"
"#,
        port = REGISTRY_PORT
    )
}

pub async fn run(ctx: &mut Context<'_>) -> Result<()> {
    let master = ctx.master()?.clone();
    let master_ssh = ctx.ssh(&master.public_ip);

    // Master install is skipped when k3s already answers.
    if master_ssh.execute("sudo k3s kubectl get nodes").await.is_err() {
        ctx.step_detail(LABEL, &format!("installing k3s on {}", master.name));
        let install = install_command("server --write-kubeconfig-mode 644");
        master_ssh
            .execute_with_retry(&format!("sudo sh -c '{}'", install.replace('\'', r"'\''")), 3, Duration::from_secs(5))
            .await?;
    }

    // Registry mirror so every node resolves localhost:30500 over plain
    // http inside the cluster.
    let registries = registries_yaml();
    let current = master_ssh.read_file("/etc/rancher/k3s/registries.yaml").await;
    if current.as_deref() != Some(registries.as_str()) {
        master_ssh
            .execute("sudo mkdir -p /etc/rancher/k3s")
            .await?;
        master_ssh
            .write_file("/tmp/registries.yaml", &registries)
            .await?;
        master_ssh
            .execute("sudo mv /tmp/registries.yaml /etc/rancher/k3s/registries.yaml && sudo systemctl restart k3s")
            .await?;
    }

    // Join workers with the master's token over its private address.
    let token = master_ssh
        .read_file("/var/lib/rancher/k3s/server/node-token")
        .await
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Other("master has no node token".to_string()))?;
    let master_addr = master.private_ip.clone().unwrap_or(master.public_ip.clone());

    let workers: Vec<_> = ctx
        .topology
        .servers
        .values()
        .filter(|s| s.name != master.name)
        .cloned()
        .collect();
    for worker in workers {
        let ssh = ctx.ssh(&worker.public_ip);
        if ssh.execute("command -v k3s-agent-uninstall.sh || command -v k3s").await.is_ok() {
            continue;
        }
        ctx.step_detail(LABEL, &format!("joining {}", worker.name));
        let install = install_command("agent");
        let join = format!(
            "sudo K3S_URL=https://{}:6443 K3S_TOKEN={} sh -c '{}'",
            master_addr,
            token,
            install.replace('\'', r"'\''")
        );
        ssh.execute_with_retry(&join, 3, Duration::from_secs(5)).await?;
        if ssh.read_file("/etc/rancher/k3s/registries.yaml").await.is_none() {
            ssh.execute("sudo mkdir -p /etc/rancher/k3s").await?;
            ssh.write_file("/tmp/registries.yaml", &registries).await?;
            ssh.execute("sudo mv /tmp/registries.yaml /etc/rancher/k3s/registries.yaml")
                .await?;
        }
    }

    // Label nodes with their group so node selectors bind.
    let nodes: Vec<(String, String)> = ctx
        .topology
        .servers
        .values()
        .map(|s| (s.name.clone(), s.group.clone()))
        .collect();
    for (node, group) in nodes {
        master_ssh
            .execute(&format!(
                "sudo k3s kubectl label node {} server-group={} --overwrite",
                node, group
            ))
            .await?;
    }

    // k3s ships traefik as its ingress controller; wait for it rather
    // than installing another.
    let rollout = master_ssh
        .execute_with(
            "sudo k3s kubectl -n kube-system rollout status deployment/traefik --timeout=120s",
            crate::ssh::ExecOptions {
                raise_on_error: false,
                ..Default::default()
            },
        )
        .await?;
    if !rollout.success() {
        tracing::warn!("traefik rollout not confirmed: {}", rollout.output.trim());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_command_chains_mirrors() {
        let cmd = install_command("server");
        assert!(cmd.contains("https://get.k3s.io"));
        assert!(cmd.contains("rancher-mirror.rancher.cn"));
        assert!(cmd.contains(" || "), "mirrors must be chained fallbacks");
        assert!(
            cmd.contains("INSTALL_K3S_MIRROR=cn"),
            "mirror env must accompany the mirror url"
        );
    }

    #[test]
    fn test_registries_yaml_points_at_nodeport() {
        let yaml = registries_yaml();
        assert!(yaml.contains("localhost:30500"));
        assert!(yaml.contains("http://localhost:30500"));
    }
}
