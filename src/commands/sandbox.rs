use crate::commands::step;
use crate::context::Context;
use crate::errors::Result;
use crate::events::DeployState;
use crate::steps;
use crate::steps::destroy as d;

/// Ephemeral environment on one host under docker-compose; ends in
/// `running` rather than `deployed`.
pub struct DeploySandbox;

impl DeploySandbox {
    pub async fn run(ctx: &mut Context<'_>) -> Result<()> {
        ctx.set_state(DeployState::Provisioning);
        match Self::execute(ctx).await {
            Ok(()) => {
                ctx.set_state(DeployState::Running);
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
        step!(ctx, steps::sandbox::SETUP_HOST, steps::sandbox::setup_host(ctx));
        step!(
            ctx,
            steps::sandbox::DEPLOY_COMPOSE,
            steps::sandbox::deploy_compose(ctx)
        );
        Ok(())
    }
}

pub struct DestroySandbox;

impl DestroySandbox {
    pub async fn run(ctx: &mut Context<'_>) -> Result<()> {
        ctx.set_state(DeployState::Destroying);
        match Self::execute(ctx).await {
            Ok(()) => {
                ctx.set_state(DeployState::Destroyed);
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
            steps::sandbox::DESTROY_COMPOSE,
            steps::sandbox::destroy_compose(ctx)
        );
        step!(ctx, d::DELETE_SERVERS, d::delete_servers(ctx));
        step!(ctx, d::DELETE_VOLUMES, d::delete_volumes(ctx));
        step!(ctx, d::DELETE_NETWORK, d::delete_network(ctx));
        step!(ctx, d::DELETE_FIREWALL, d::delete_firewall(ctx));
        Ok(())
    }
}
