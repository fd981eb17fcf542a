//! Expose the app through a tunnel instead of open ports: create or
//! reuse the tunnel, route the apex hostname at the in-cluster ingress,
//! and persist the connector token for the manifest generator.

use crate::context::Context;
use crate::errors::Result;
use crate::naming;

pub const LABEL: &str = "setup_tunnel";

pub async fn run(ctx: &mut Context<'_>) -> Result<()> {
    let Some(cf_config) = ctx.config.cloudflare.clone() else {
        return Ok(());
    };
    let prefix = ctx.prefix.clone();
    let name = naming::tunnel_name(&prefix);

    // Traffic lands on the in-cluster ingress controller; the connector
    // runs inside the cluster and reaches it as a node-local service.
    let setup = ctx
        .cloudflare()?
        .setup_tunnel(
            &name,
            &cf_config.domain,
            "http://traefik.kube-system.svc.cluster.local:80",
            cf_config.zone_domain(),
        )
        .await?;

    ctx.step_detail(LABEL, &format!("tunnel {} routes {}", name, setup.hostname));
    ctx.topology.dns_records.push(setup.hostname.clone());

    // Subdomains of services and processes ride the same tunnel via
    // additional DNS records.
    let zone_id = ctx.cloudflare()?.zone_id(cf_config.zone_domain()).await?;
    let mut hostnames = Vec::new();
    for service in ctx.config.services.values() {
        if let Some(subdomain) = &service.subdomain {
            if let Some(fqdn) = ctx.config.fqdn(subdomain) {
                hostnames.push(fqdn);
            }
        }
    }
    if let Some(app) = &ctx.config.app {
        for process in app.processes.values() {
            if let Some(subdomain) = &process.subdomain {
                if let Some(fqdn) = ctx.config.fqdn(subdomain) {
                    hostnames.push(fqdn);
                }
            }
        }
    }
    for hostname in hostnames {
        if hostname != setup.hostname {
            ctx.cloudflare()?
                .ensure_tunnel_record(&zone_id, &hostname, &setup.id)
                .await?;
            ctx.topology.dns_records.push(hostname);
        }
    }

    ctx.topology.tunnel = Some(setup);
    Ok(())
}
