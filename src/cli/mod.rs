pub mod adapters;
pub mod info;
pub mod output;
pub mod policy;
pub mod run;
pub mod serve;
pub mod validate;

pub use adapters::cmd_adapters;
pub use info::cmd_info;
pub use output::OutputFormat;
pub use policy::{cmd_policy, PolicyArgs};
pub use run::{cmd_run, RunArgs};
pub use serve::{cmd_serve, ServeArgs};
pub use validate::{cmd_validate, ValidateArgs};
