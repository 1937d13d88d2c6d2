use std::path::PathBuf;
use std::sync::Arc;

use action_flow::{Plan, RunControl, RunEvent, RunRecord, RunState, StepStatus};
use anyhow::{anyhow, bail, Result};
use autobot_cli::app_context::AppContext;
use autobot_core_types::RunId;
use autobot_policy_center::PolicyProfile;
use clap::{Args, ValueEnum};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::output::OutputFormat;

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Plan file (YAML or JSON)
    pub plan: PathBuf,

    /// Policy profile for this run (strict, balanced, trusted)
    #[arg(long)]
    pub profile: Option<PolicyProfile>,

    /// Write the run record (result plus telemetry) to this JSON file
    #[arg(long, value_name = "FILE")]
    pub record: Option<PathBuf>,

    /// Seed the run state; values parse as JSON when possible
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,

    /// How confirmation requests are answered
    #[arg(long, value_enum, default_value_t = ConfirmMode::Ask)]
    pub confirm: ConfirmMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ConfirmMode {
    /// Prompt on stdin
    Ask,
    Approve,
    Deny,
}

pub async fn cmd_run(args: RunArgs, context: Arc<AppContext>, output: OutputFormat) -> Result<()> {
    let plan = Plan::from_path(&args.plan)?;
    context.executor().validate_plan(&plan)?;
    let initial = parse_vars(&args.vars)?;

    if let Some(profile) = args.profile {
        context.set_profile(profile, None);
    }

    let control = RunControl::new();
    let responder = spawn_responder(
        Arc::clone(&context),
        context.executor().subscribe(),
        control.run_id().clone(),
        args.confirm,
    );

    let interrupt = control.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            interrupt.cancel();
        }
    });

    info!(plan = %plan.name, path = %args.plan.display(), "running plan");
    let result = context
        .executor()
        .run_with_state(&plan, &control, initial)
        .await;
    ctrl_c.abort();
    responder.abort();

    if let Some(path) = &args.record {
        let record = RunRecord::new(
            result.clone(),
            plan.description.clone(),
            context.telemetry().snapshot(),
        );
        record.write_json(path)?;
        info!(path = %path.display(), "run record written");
    }

    output.emit(&result, || {
        println!(
            "Plan '{}' ({}): {:?}, {}/{} steps completed",
            result.plan_name,
            result.run_id,
            result.status,
            result.completed_steps,
            result.total_steps
        );
        for outcome in &result.step_outcomes {
            let detail = match (&outcome.status, &outcome.error) {
                (_, Some(error)) => format!(" - {}: {}", error.kind, error.cause),
                (StepStatus::Ok, None) => outcome
                    .result
                    .as_ref()
                    .map(|value| format!(" -> {}", short(value)))
                    .unwrap_or_default(),
                _ => String::new(),
            };
            println!(
                "  [{}] {:<15} {}{}",
                outcome.index + 1,
                format!("{:?}", outcome.status),
                outcome.action,
                detail
            );
        }
    })?;

    if !result.success {
        bail!("run {} finished with status {:?}", result.run_id, result.status);
    }
    Ok(())
}

fn parse_vars(vars: &[String]) -> Result<RunState> {
    let mut state = RunState::new();
    for var in vars {
        let (key, raw) = var
            .split_once('=')
            .ok_or_else(|| anyhow!("--var expects KEY=VALUE, got '{var}'"))?;
        let key = key.trim();
        if key.is_empty() {
            bail!("--var key is empty in '{var}'");
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        state.insert(key, value);
    }
    Ok(state)
}

fn short(value: &Value) -> String {
    let text = match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    if text.chars().count() > 80 {
        format!("{}...", text.chars().take(77).collect::<String>())
    } else {
        text
    }
}

/// Answers confirmation requests of one run until it finishes.
fn spawn_responder(
    context: Arc<AppContext>,
    mut events: Receiver<RunEvent>,
    run_id: RunId,
    mode: ConfirmMode,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match events.recv().await {
                Ok(RunEvent::AwaitingConfirmation {
                    run_id: id,
                    index,
                    token,
                    adapter,
                    action,
                    reason,
                    expires_at,
                }) if id == run_id => {
                    let approve = match mode {
                        ConfirmMode::Approve => true,
                        ConfirmMode::Deny => false,
                        ConfirmMode::Ask => {
                            eprintln!(
                                "Step {} wants to run {}.{} ({}). Expires at {}.",
                                index + 1,
                                adapter,
                                action,
                                reason,
                                expires_at.format("%H:%M:%S UTC")
                            );
                            eprint!("Approve? [y/N] ");
                            match stdin.next_line().await {
                                Ok(Some(line)) => {
                                    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
                                }
                                _ => false,
                            }
                        }
                    };
                    let broker = context.broker();
                    let answered = if approve {
                        broker.confirm(&token).map(|_| ())
                    } else {
                        broker.cancel(&token).map(|_| ())
                    };
                    match answered {
                        Ok(()) => info!(token = %token, approve, "confirmation answered"),
                        Err(err) => warn!(token = %token, %err, "confirmation could not be answered"),
                    }
                }
                Ok(RunEvent::RunFinished { run_id: id, .. }) if id == run_id => break,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "confirmation responder lagged behind run events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
