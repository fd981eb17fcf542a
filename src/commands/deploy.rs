use crate::commands::step;
use crate::context::Context;
use crate::errors::Result;
use crate::events::DeployState;
use crate::steps;

/// Full production deploy: converge infrastructure, install the
/// cluster, provision state, and roll the workloads out.
pub struct Deploy;

impl Deploy {
    pub async fn run(ctx: &mut Context<'_>) -> Result<()> {
        ctx.set_state(DeployState::Provisioning);
        match Self::execute(ctx).await {
            Ok(()) => {
                ctx.set_state(DeployState::Deployed);
                Ok(())
            }
            Err(err) => {
                ctx.set_state(DeployState::Failed);
                Err(err)
            }
        }
    }

    async fn execute(ctx: &mut Context<'_>) -> Result<()> {
        step!(
            ctx,
            steps::create_infrastructure::LABEL,
            steps::create_infrastructure::run(ctx)
        );
        step!(ctx, steps::setup_cluster::LABEL, steps::setup_cluster::run(ctx));

        if has_volume_workloads(ctx) {
            step!(
                ctx,
                steps::provision_volumes::LABEL,
                steps::provision_volumes::run(ctx)
            );
        }
        if ctx.config.cloudflare.is_some() {
            step!(ctx, steps::setup_tunnel::LABEL, steps::setup_tunnel::run(ctx));
        }
        if ctx.config.cloudflare.is_some() && ctx.config.app.is_some() {
            step!(
                ctx,
                steps::setup_registry::LABEL,
                steps::setup_registry::run(ctx)
            );
        }
        if ctx.config.app.is_some() {
            step!(ctx, steps::build_image::LABEL, steps::build_image::run(ctx));
            step!(
                ctx,
                steps::cleanup_images::LABEL,
                steps::cleanup_images::run(ctx)
            );
        }
        step!(
            ctx,
            steps::deploy_manifests::LABEL,
            steps::deploy_manifests::run(ctx)
        );
        step!(
            ctx,
            steps::remove_servers::LABEL,
            steps::remove_servers::run(ctx)
        );
        Ok(())
    }
}

fn has_volume_workloads(ctx: &Context<'_>) -> bool {
    !ctx.config.databases.is_empty()
        || ctx
            .config
            .services
            .values()
            .any(|service| service.mount_path.is_some())
}
