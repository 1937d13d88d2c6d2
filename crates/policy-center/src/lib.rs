pub mod defaults;
pub mod engine;
pub mod errors;
pub mod history;
pub mod loader;
pub mod model;
pub mod profile;
pub mod rules;

pub use defaults::{default_rules, MASS_MESSAGE_KEYWORDS};
pub use engine::{compile_rules, evaluate, PolicyEngine};
pub use errors::PolicyError;
pub use history::{ActionHistory, HistoryEntry};
pub use loader::{load_policy, load_policy_with_base, LoadOptions, LoadedPolicy, PolicyConfig};
pub use model::{Decision, PolicyProfile, PolicyRequest, PolicySource, RuleVerdict};
pub use profile::{ProfileHandle, ProfileState};
pub use rules::{DenylistRule, DenylistRuleSpec, RuleKind, RuleKindSpec};
