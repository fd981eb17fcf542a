//! Destroy-side steps. Each one swallows "already absent" so a repeated
//! destroy emits the same labels and changes nothing.

use crate::context::Context;
use crate::errors::Result;
use crate::naming;

pub const CLEANUP_TUNNEL: &str = "cleanup_tunnel";
pub const DELETE_SERVERS: &str = "delete_servers";
pub const DELETE_VOLUMES: &str = "delete_volumes";
pub const DELETE_NETWORK: &str = "delete_network";
pub const DELETE_FIREWALL: &str = "delete_firewall";

/// Remove DNS records and the tunnel, connections first.
pub async fn cleanup_tunnel(ctx: &mut Context<'_>) -> Result<()> {
    let Some(cf_config) = ctx.config.cloudflare.clone() else {
        return Ok(());
    };
    let prefix = ctx.prefix.clone();

    let zone = ctx.cloudflare()?.find_zone(cf_config.zone_domain()).await?;
    if let Some(zone) = zone {
        let mut hostnames = vec![cf_config.domain.clone()];
        for service in ctx.config.services.values() {
            if let Some(subdomain) = &service.subdomain {
                hostnames.extend(ctx.config.fqdn(subdomain));
            }
        }
        if let Some(app) = &ctx.config.app {
            for process in app.processes.values() {
                if let Some(subdomain) = &process.subdomain {
                    hostnames.extend(ctx.config.fqdn(subdomain));
                }
            }
        }
        hostnames.dedup();
        for hostname in hostnames {
            ctx.cloudflare()?.delete_dns_record(&zone.id, &hostname).await?;
        }
    }

    let tunnel = ctx
        .cloudflare()?
        .find_tunnel(&naming::tunnel_name(&prefix))
        .await?;
    if let Some(tunnel) = tunnel {
        ctx.cloudflare()?.delete_tunnel(&tunnel.id).await?;
    }
    Ok(())
}

/// Delete every server whose name matches our prefix.
pub async fn delete_servers(ctx: &mut Context<'_>) -> Result<()> {
    let pattern = naming::server_pattern(&ctx.prefix);
    let observed = ctx.provider.list_servers().await?;
    for server in observed {
        if pattern.is_match(&server.name) {
            ctx.step_detail(DELETE_SERVERS, &format!("deleting {}", server.name));
            ctx.provider.delete_server_by_name(&server.name).await?;
        }
    }
    ctx.topology.servers.clear();
    Ok(())
}

/// Delete volumes scoped to the prefix.
pub async fn delete_volumes(ctx: &mut Context<'_>) -> Result<()> {
    let scope = format!("{}-", ctx.prefix);
    let volumes = ctx.provider.list_volumes().await?;
    for volume in volumes {
        if volume.name.starts_with(&scope) {
            ctx.step_detail(DELETE_VOLUMES, &format!("deleting {}", volume.name));
            ctx.provider.delete_volume(&volume.id).await?;
        }
    }
    ctx.topology.volumes.clear();
    Ok(())
}

pub async fn delete_network(ctx: &mut Context<'_>) -> Result<()> {
    let name = naming::network_name(&ctx.prefix);
    ctx.provider.delete_network_by_name(&name).await?;
    ctx.topology.network = None;
    Ok(())
}

pub async fn delete_firewall(ctx: &mut Context<'_>) -> Result<()> {
    let name = naming::firewall_name(&ctx.prefix);
    ctx.provider.delete_firewall_by_name(&name).await?;
    ctx.topology.firewall = None;
    Ok(())
}
