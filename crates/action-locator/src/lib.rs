//! Selector resolution for UI adapters
//!
//! This crate turns stable logical target names into concrete locators:
//! - per-site selector catalogs with hot reload
//! - ordered probing with per-locator samples
//! - keyboard recipes for driving modes without selectors

pub mod catalog;
pub mod errors;
pub mod recipes;
pub mod resolver;
pub mod types;

pub use catalog::*;
pub use errors::*;
pub use recipes::*;
pub use resolver::*;
pub use types::*;
