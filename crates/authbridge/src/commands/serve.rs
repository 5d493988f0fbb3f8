//! Serve command - run the proxy.

use std::net::SocketAddr;

use anyhow::{Context as _, Result};
use authbridge_config::ServerSection;
use authbridge_server::{AppState, Server};
use clap::Args;

use super::Context;

/// Arguments for the serve command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on (overrides [server] bind)
    #[arg(long)]
    pub bind: Option<SocketAddr>,
}

/// Run the serve command.
pub async fn run(args: ServeArgs, ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;
    let mut config = loaded.config;

    let sources = loaded
        .sources
        .iter()
        .filter(|s| s.loaded)
        .map(|s| s.path.display().to_string())
        .collect::<Vec<_>>();
    if sources.is_empty() {
        anyhow::bail!(
            "No config file found. Run `authbridge config init` or pass --config <file>."
        );
    }
    tracing::info!(sources = ?sources, "Loaded configuration");

    if let Some(bind) = args.bind {
        let server = config.server.get_or_insert_with(ServerSection::default);
        server.bind = bind.to_string();
    }

    let state = AppState::from_bridge_config(&config).context("Invalid configuration")?;
    Server::from_state(state).run().await?;
    Ok(())
}
