//! UI driving primitives
//!
//! This crate defines the capability the adapter layer depends on:
//! - [`UiDriver`]: probe and act on a browser page or desktop window
//! - [`ExecCtx`]: deadline and cancellation for one dispatch
//! - [`DryRunDriver`]: a recording implementation for dry runs and tests

mod driver;
mod dry_run;
pub mod errors;
pub mod types;

pub use driver::*;
pub use dry_run::*;
pub use errors::*;
pub use types::*;
