use std::sync::Arc;

use anyhow::{Context, Result};
use autobot_cli::app_context::AppContext;
use autobot_cli::server;
use clap::Args;

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Bind address; overrides `server.bind` from the config
    #[arg(long)]
    pub bind: Option<String>,
}

pub async fn cmd_serve(args: ServeArgs, context: Arc<AppContext>) -> Result<()> {
    let bind = args
        .bind
        .unwrap_or_else(|| context.config().server.bind.clone());
    let addr = bind
        .parse()
        .with_context(|| format!("invalid bind address '{bind}'"))?;
    server::serve(context, addr).await
}
