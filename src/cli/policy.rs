use anyhow::{Context, Result};
use autobot_cli::app_context::AppContext;
use autobot_core_types::Params;
use autobot_policy_center::Decision;
use clap::{Args, Subcommand};
use serde_json::json;

use super::output::OutputFormat;

#[derive(Args, Clone, Debug)]
pub struct PolicyArgs {
    #[command(subcommand)]
    pub command: PolicyCommand,
}

#[derive(Subcommand, Clone, Debug)]
pub enum PolicyCommand {
    /// Show the effective profile and denylist rules
    Show,
    /// Evaluate one action against the current policy
    Check(PolicyCheckArgs),
}

#[derive(Args, Clone, Debug)]
pub struct PolicyCheckArgs {
    /// Action as adapter.action
    pub action: String,
    /// Params as a JSON object
    #[arg(long, default_value = "{}")]
    pub params: String,
}

pub fn cmd_policy(args: PolicyArgs, context: &AppContext, output: OutputFormat) -> Result<()> {
    match args.command {
        PolicyCommand::Show => {
            let policy = context.policy_config();
            let state = context.profile().state();
            let payload = json!({
                "profile": state,
                "rules": policy.effective_rules(),
                "history": policy.history,
            });
            output.emit(&payload, || {
                println!("Profile: {} (source: {:?})", state.profile, state.source);
                println!("Rules:");
                for rule in policy.effective_rules() {
                    println!("  - {} on {}", rule.id, rule.actions.join(", "));
                }
            })
        }
        PolicyCommand::Check(check) => {
            let params: Params =
                serde_json::from_str(&check.params).context("--params must be a JSON object")?;
            let (spec, decision) = context.check_policy(&check.action, params)?;
            let payload = json!({
                "action": check.action,
                "sensitivity": spec.sensitivity,
                "profile": context.profile().current(),
                "decision": decision,
            });
            output.emit(&payload, || match &decision {
                Decision::Allow => println!("allow"),
                Decision::RequireConfirm { reason } => println!("require_confirm: {reason}"),
                Decision::Deny { reason } => println!("deny: {reason}"),
            })
        }
    }
}
