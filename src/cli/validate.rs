use std::path::PathBuf;

use action_flow::Plan;
use anyhow::Result;
use autobot_cli::app_context::AppContext;
use clap::Args;
use serde_json::json;

use super::output::OutputFormat;

#[derive(Args, Clone, Debug)]
pub struct ValidateArgs {
    /// Plan file (YAML or JSON)
    pub plan: PathBuf,
}

pub fn cmd_validate(args: ValidateArgs, context: &AppContext, output: OutputFormat) -> Result<()> {
    let plan = Plan::from_path(&args.plan)?;
    context.executor().validate_plan(&plan)?;
    let summary = json!({
        "valid": true,
        "plan": plan.name,
        "steps": plan.steps.len(),
    });
    output.emit(&summary, || {
        println!("Plan '{}' is valid ({} steps)", plan.name, plan.steps.len());
    })
}
