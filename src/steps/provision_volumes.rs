//! Provision and mount persistent volumes for databases and stateful
//! services.
//!
//! Every mutation here is observable-idempotent: an attached volume is
//! not re-attached, a mounted filesystem is not re-mounted, and a device
//! that already carries a filesystem is never reformatted.

use crate::config::{DatabaseKind, RunsOn};
use crate::context::Context;
use crate::errors::Result;
use crate::naming;
use crate::providers::VolumeSpec;

pub const LABEL: &str = "provision_volumes";

const VOLUME_SIZE_GB: u32 = 10;

/// Workloads that need a volume: every database plus every service with
/// a mount path.
fn volume_workloads(ctx: &Context<'_>) -> Vec<(String, Option<RunsOn>)> {
    let mut out = Vec::new();
    for (kind, db) in &ctx.config.databases {
        let name = match kind {
            DatabaseKind::Postgres => "postgres",
            DatabaseKind::Sqlite => "sqlite",
        };
        out.push((name.to_string(), db.runs_on.clone()));
    }
    for (name, service) in &ctx.config.services {
        if service.mount_path.is_some() {
            out.push((name.clone(), service.runs_on.clone()));
        }
    }
    out
}

pub async fn run(ctx: &mut Context<'_>) -> Result<()> {
    let prefix = ctx.prefix.clone();
    let labels = naming::labels(&ctx.config.name, &prefix);
    let location = ctx.config.compute.location.clone();

    for (workload, runs_on) in volume_workloads(ctx) {
        let volume_name = naming::volume_name(&prefix, &workload);
        ctx.step_detail(LABEL, &format!("volume {}", volume_name));

        let target = match runs_on.as_ref().and_then(|r| r.groups().first().copied()) {
            Some(group) => ctx.server_for_group(group)?.clone(),
            None => ctx.master()?.clone(),
        };

        let volume = ctx
            .provider
            .find_or_create_volume(&VolumeSpec {
                name: volume_name.clone(),
                size_gb: VOLUME_SIZE_GB,
                location: location.clone(),
                labels: labels.clone(),
            })
            .await?;

        if volume.server_id.as_deref() != Some(target.id.as_str()) {
            ctx.provider.attach_volume(&volume.id, &target.id).await?;
        }

        let ssh = ctx.ssh(&target.public_ip);
        let device = ctx.provider.wait_for_device_path(&volume.id, &ssh).await?;
        let mount_point = format!("/mnt/{}", volume_name);

        let mounted = ssh
            .execute_with(
                &format!("mountpoint -q {}", mount_point),
                crate::ssh::ExecOptions {
                    raise_on_error: false,
                    ..Default::default()
                },
            )
            .await?
            .success();

        if !mounted {
            // Format only a blank device; an existing filesystem means
            // data we must not touch.
            let has_fs = ssh
                .execute_with(
                    &format!("sudo blkid {}", device),
                    crate::ssh::ExecOptions {
                        raise_on_error: false,
                        ..Default::default()
                    },
                )
                .await?
                .success();
            if !has_fs {
                ctx.step_detail(LABEL, &format!("formatting {}", device));
                ssh.execute(&format!("sudo mkfs.xfs {}", device)).await?;
            }
            ssh.execute(&format!(
                "sudo mkdir -p {mp} && sudo mount {dev} {mp}",
                mp = mount_point,
                dev = device
            ))
            .await?;
        }

        // fstab by UUID so the mount survives reboots; appended once.
        let uuid = ssh
            .execute(&format!("sudo blkid -s UUID -o value {}", device))
            .await?
            .output
            .trim()
            .to_string();
        if !uuid.is_empty() {
            let fstab_line = format!("UUID={} {} xfs defaults,nofail 0 2", uuid, mount_point);
            ssh.execute(&format!(
                "grep -q 'UUID={}' /etc/fstab || echo '{}' | sudo tee -a /etc/fstab",
                uuid, fstab_line
            ))
            .await?;
        }

        // The mount must hold before the workload schedules onto it.
        ssh.execute(&format!("mountpoint -q {}", mount_point)).await?;

        ctx.topology.volumes.push(volume);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::events::NullObserver;

    #[tokio::test]
    async fn test_volume_workloads_cover_databases_and_mounted_services() {
        std::env::set_var("HETZNER_API_TOKEN", "test-token");
        let config = config::from_str(
            r#"
name: shop
compute:
  provider: hetzner
  location: nbg1
  image: ubuntu-24.04
  server:
    type: cpx21
databases:
  postgres:
    username: app
services:
  redis:
    image: redis:7
    port: 6379
  minio:
    image: minio/minio
    mount_path: /data
"#,
        )
        .unwrap();
        let observer = NullObserver;
        let ctx = Context::new(config, None, &observer).await.unwrap();
        let workloads = volume_workloads(&ctx);
        let names: Vec<&str> = workloads.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["postgres", "minio"], "redis has no mount, no volume");
    }
}
