//! Plan execution for site adapters
//!
//! A [`Plan`] is an ordered list of `adapter.action` steps. The
//! [`PlanExecutor`] gates each step through the policy engine, suspends on
//! the confirmation broker when a human decision is needed, paces and retries
//! dispatches, and records every attempt in adapter telemetry.

pub mod condition;
pub mod engine_adapter;
pub mod errors;
pub mod executor;
pub mod limiter;
pub mod plan;
pub mod record;
pub mod state;
pub mod strategies;

pub use condition::{Condition, StepCondition};
pub use engine_adapter::{EngineAdapter, ENGINE_ADAPTER};
pub use errors::FlowError;
pub use executor::{
    ConfirmedExecution, ExecutorConfig, ExecutorServices, PlanExecutor, RunControl, RunEvent,
};
pub use limiter::{ActionLimiter, LimiterConfig};
pub use plan::{Plan, Step};
pub use record::{ExecutionResult, RunRecord, RunStatus, StepError, StepOutcome, StepStatus};
pub use state::RunState;
