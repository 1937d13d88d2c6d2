pub mod collector;
pub mod export;
pub mod labels;
pub mod prometheus;
pub mod tracing;

pub use collector::{FailureDetail, Outcome, TelemetryCollector, TelemetryConfig};
pub use export::{
    ActionTelemetry, FailureSnapshot, ProbeTelemetry, ResolutionFailureCount, SelectorTelemetry,
    TelemetrySnapshot,
};
pub use prometheus::render_prometheus;
pub use self::tracing::{init_tracing, TracingError, TracingOptions};
