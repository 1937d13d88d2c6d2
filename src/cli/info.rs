use anyhow::Result;
use autobot_cli::app_context::AppContext;
use serde_json::json;

use super::output::OutputFormat;

pub fn cmd_info(context: &AppContext, output: OutputFormat) -> Result<()> {
    let catalog = context.catalog();
    let actions: usize = catalog.values().map(Vec::len).sum();
    let config = context.config();
    let info = json!({
        "version": env!("CARGO_PKG_VERSION"),
        "build_date": option_env!("BUILD_DATE").unwrap_or("unknown"),
        "git_hash": option_env!("GIT_HASH").unwrap_or("unknown"),
        "git_branch": option_env!("GIT_BRANCH").unwrap_or("unknown"),
        "adapters": catalog.len(),
        "actions": actions,
        "profile": context.profile().current(),
        "confirmation_ttl": config.confirmation.ttl,
        "server_bind": config.server.bind,
    });
    output.emit(&info, || {
        println!("autobot {}", env!("CARGO_PKG_VERSION"));
        println!("Build Date: {}", option_env!("BUILD_DATE").unwrap_or("unknown"));
        println!("Git Commit: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
        println!("Adapters: {} ({} actions)", catalog.len(), actions);
        println!("Policy profile: {}", context.profile().current());
        println!("Confirmation ttl: {}", config.confirmation.ttl);
    })
}
