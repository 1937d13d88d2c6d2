use std::collections::BTreeMap;
use std::sync::Arc;

use action_primitives::ExecCtx;
use autobot_core_types::{ActionRef, Params};
use tracing::debug;

use crate::adapter::{ActionOutput, ActionSpec, Adapter, Diagnostics};
use crate::errors::{AdapterError, AdapterResult};

/// Name-indexed set of adapters the executor dispatches into.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn Adapter>) -> AdapterResult<()> {
        let name = adapter.name().to_string();
        if self.adapters.contains_key(&name) {
            return Err(AdapterError::Definition(format!(
                "adapter '{}' registered twice",
                name
            )));
        }
        debug!(adapter = %name, actions = adapter.actions().len(), "adapter registered");
        self.adapters.insert(name, adapter);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn spec(&self, action: &ActionRef) -> AdapterResult<ActionSpec> {
        let adapter = self
            .adapters
            .get(&action.adapter)
            .ok_or_else(|| AdapterError::UnknownAdapter(action.adapter.clone()))?;
        adapter
            .action(&action.action)
            .ok_or_else(|| AdapterError::UnknownAction {
                adapter: action.adapter.clone(),
                action: action.action.clone(),
            })
    }

    /// Every adapter with its action table.
    pub fn catalog(&self) -> BTreeMap<String, Vec<ActionSpec>> {
        self.adapters
            .iter()
            .map(|(name, adapter)| (name.clone(), adapter.actions()))
            .collect()
    }

    pub async fn dispatch(
        &self,
        action: &ActionRef,
        params: &Params,
        ctx: &ExecCtx,
    ) -> AdapterResult<ActionOutput> {
        self.spec(action)?;
        let adapter = self
            .get(&action.adapter)
            .ok_or_else(|| AdapterError::UnknownAdapter(action.adapter.clone()))?;
        adapter.execute(&action.action, params, ctx).await
    }

    pub async fn diagnostics(&self, adapter: &str, label: &str) -> Diagnostics {
        match self.adapters.get(adapter) {
            Some(adapter) => adapter.diagnostics(label).await,
            None => Diagnostics::default(),
        }
    }
}
