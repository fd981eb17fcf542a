use crate::commands::step;
use crate::context::Context;
use crate::errors::Result;
use crate::events::DeployState;
use crate::steps::destroy as d;

/// Tear down everything scoped to the prefix. Each step ignores what is
/// already absent, so re-running produces the same labels and no
/// changes.
pub struct Destroy;

impl Destroy {
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
        if ctx.config.cloudflare.is_some() {
            step!(ctx, d::CLEANUP_TUNNEL, d::cleanup_tunnel(ctx));
        }
        step!(ctx, d::DELETE_SERVERS, d::delete_servers(ctx));
        step!(ctx, d::DELETE_VOLUMES, d::delete_volumes(ctx));
        step!(ctx, d::DELETE_NETWORK, d::delete_network(ctx));
        step!(ctx, d::DELETE_FIREWALL, d::delete_firewall(ctx));
        Ok(())
    }
}
