//! Per-site selector catalogs and the hot-reloadable registry

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::errors::LocatorError;
use crate::types::SelectorSpec;

/// `{site: {logical_name: [locator, ...]}}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectorCatalog {
    sites: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl SelectorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse JSON first, then YAML.
    pub fn parse(raw: &str) -> Result<Self, LocatorError> {
        let catalog: Self = match serde_json::from_str(raw) {
            Ok(catalog) => catalog,
            Err(json_err) => serde_yaml::from_str(raw).map_err(|yaml_err| {
                LocatorError::InvalidCatalog(format!(
                    "json error: {}; yaml error: {}",
                    json_err, yaml_err
                ))
            })?,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, LocatorError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&raw)
    }

    /// Catalog holding a single site's entries.
    pub fn for_site(site: impl Into<String>, entries: BTreeMap<String, Vec<String>>) -> Self {
        let mut sites = BTreeMap::new();
        sites.insert(site.into(), entries);
        Self { sites }
    }

    pub fn insert(
        &mut self,
        site: impl Into<String>,
        logical_name: impl Into<String>,
        locators: Vec<String>,
    ) {
        self.sites
            .entry(site.into())
            .or_default()
            .insert(logical_name.into(), locators);
    }

    /// Overlay `other`; its entries replace ours per logical name.
    pub fn merge(&mut self, other: SelectorCatalog) {
        for (site, entries) in other.sites {
            self.sites.entry(site).or_default().extend(entries);
        }
    }

    pub fn spec(&self, site: &str, logical_name: &str) -> Option<SelectorSpec> {
        self.sites
            .get(site)
            .and_then(|entries| entries.get(logical_name))
            .map(|locators| SelectorSpec::new(site, logical_name, locators.clone()))
    }

    pub fn sites(&self) -> impl Iterator<Item = &str> {
        self.sites.keys().map(String::as_str)
    }

    pub fn logical_names(&self, site: &str) -> Vec<String> {
        self.sites
            .get(site)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.sites.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate(&self) -> Result<(), LocatorError> {
        for (site, entries) in &self.sites {
            for (logical, locators) in entries {
                if locators.is_empty() || locators.iter().any(|l| l.trim().is_empty()) {
                    return Err(LocatorError::InvalidCatalog(format!(
                        "{site}.{logical} must list at least one non-empty locator"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Active catalog, swappable between runs without blocking readers.
pub struct SelectorRegistry {
    active: ArcSwap<SelectorCatalog>,
    /// Built-in entries that reloads are layered on top of
    base: SelectorCatalog,
}

impl SelectorRegistry {
    pub fn new(base: SelectorCatalog) -> Self {
        Self {
            active: ArcSwap::from_pointee(base.clone()),
            base,
        }
    }

    pub fn current(&self) -> Arc<SelectorCatalog> {
        self.active.load_full()
    }

    pub fn spec(&self, site: &str, logical_name: &str) -> Result<SelectorSpec, LocatorError> {
        self.active
            .load()
            .spec(site, logical_name)
            .ok_or_else(|| LocatorError::UnknownTarget {
                site: site.to_string(),
                logical_name: logical_name.to_string(),
            })
    }

    /// Layer `overrides` over the built-in catalog and publish the result.
    pub fn apply_overrides(&self, overrides: SelectorCatalog) -> usize {
        let mut next = self.base.clone();
        next.merge(overrides);
        let entries = next.len();
        self.active.store(Arc::new(next));
        entries
    }

    /// Re-read an override file. The previous catalog stays active on error.
    pub fn reload_from_path(&self, path: impl AsRef<Path>) -> Result<usize, LocatorError> {
        let overrides = SelectorCatalog::load_from_path(path.as_ref())?;
        let entries = self.apply_overrides(overrides);
        info!(
            path = %path.as_ref().display(),
            entries,
            "selector catalog reloaded"
        );
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_yaml_and_json() {
        let yaml = "whatsapp_web:\n  message_input:\n    - \"div[contenteditable='true']\"\n    - \"footer [role='textbox']\"\n";
        let catalog = SelectorCatalog::parse(yaml).unwrap();
        let spec = catalog.spec("whatsapp_web", "message_input").unwrap();
        assert_eq!(spec.locators.len(), 2);

        let json = r#"{"overleaf_web": {"compile_button": [".btn-recompile"]}}"#;
        let catalog = SelectorCatalog::parse(json).unwrap();
        assert_eq!(catalog.logical_names("overleaf_web"), vec!["compile_button"]);
    }

    #[test]
    fn rejects_empty_locator_lists() {
        let err = SelectorCatalog::parse(r#"{"site": {"button": []}}"#).unwrap_err();
        assert!(matches!(err, LocatorError::InvalidCatalog(_)));
    }

    #[test]
    fn overrides_replace_per_logical_name() {
        let mut base = SelectorCatalog::new();
        base.insert("site", "send", vec![".send".into()]);
        base.insert("site", "input", vec![".input".into()]);
        let registry = SelectorRegistry::new(base);

        let mut overrides = SelectorCatalog::new();
        overrides.insert("site", "send", vec![".send-v2".into(), ".send".into()]);
        registry.apply_overrides(overrides);

        assert_eq!(
            registry.spec("site", "send").unwrap().locators,
            vec![".send-v2", ".send"]
        );
        assert_eq!(registry.spec("site", "input").unwrap().locators, vec![".input"]);
    }

    #[test]
    fn failed_reload_keeps_previous_catalog() {
        let mut base = SelectorCatalog::new();
        base.insert("site", "send", vec![".send".into()]);
        let registry = SelectorRegistry::new(base);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "site: [not, a, map").unwrap();
        assert!(registry.reload_from_path(file.path()).is_err());
        assert!(registry.spec("site", "send").is_ok());
    }

    #[test]
    fn unknown_target_is_reported() {
        let registry = SelectorRegistry::new(SelectorCatalog::new());
        assert!(matches!(
            registry.spec("site", "missing"),
            Err(LocatorError::UnknownTarget { .. })
        ));
    }
}
