//! Adapters: named bundles of actions on one UI surface
//!
//! Sites are declared in YAML and interpreted by [`SiteAdapter`], which
//! resolves logical targets through the selector resolver (or replays a
//! navigation recipe on keyboard-only drivers) after checking the session.

pub mod adapter;
pub mod builtin;
pub mod definition;
pub mod errors;
pub mod registry;
pub mod site;

pub use adapter::{ActionOutput, ActionSpec, Adapter, Diagnostics};
pub use builtin::{build_registry, builtin_definitions, recipe_book, selector_catalog};
pub use definition::{ActionDef, Op, SiteDefinition, Surface};
pub use errors::{AdapterError, AdapterResult};
pub use registry::AdapterRegistry;
pub use site::SiteAdapter;
