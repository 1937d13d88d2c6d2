//! Site definitions shipped with the binary

use std::collections::HashMap;
use std::sync::Arc;

use action_locator::{NavRecipeBook, SelectorCatalog, SelectorResolver};
use action_primitives::UiDriver;

use crate::definition::{SiteDefinition, Surface};
use crate::errors::{AdapterError, AdapterResult};
use crate::registry::AdapterRegistry;
use crate::site::SiteAdapter;

const BUILTIN_SITES: &[(&str, &str)] = &[
    ("whatsapp_web", include_str!("../sites/whatsapp_web.yaml")),
    ("instagram_web", include_str!("../sites/instagram_web.yaml")),
    ("overleaf_web", include_str!("../sites/overleaf_web.yaml")),
    ("google_docs_web", include_str!("../sites/google_docs_web.yaml")),
    ("grok_web", include_str!("../sites/grok_web.yaml")),
    ("vscode_desktop", include_str!("../sites/vscode_desktop.yaml")),
];

pub fn builtin_definitions() -> AdapterResult<Vec<SiteDefinition>> {
    BUILTIN_SITES
        .iter()
        .map(|(name, raw)| {
            SiteDefinition::from_yaml_str(raw)
                .map_err(|err| AdapterError::Definition(format!("built-in site {}: {}", name, err)))
        })
        .collect()
}

/// Selector catalog covering every definition.
pub fn selector_catalog(definitions: &[SiteDefinition]) -> SelectorCatalog {
    let mut catalog = SelectorCatalog::new();
    for definition in definitions {
        catalog.merge(definition.selector_catalog());
    }
    catalog
}

pub fn recipe_book(definitions: &[SiteDefinition]) -> NavRecipeBook {
    let mut book = NavRecipeBook::default();
    for definition in definitions {
        book.merge(definition.recipe_book());
    }
    book
}

/// Build one [`SiteAdapter`] per definition, bound to the driver for its
/// surface.
pub fn build_registry(
    definitions: Vec<SiteDefinition>,
    drivers: &HashMap<Surface, Arc<dyn UiDriver>>,
    resolver: Arc<SelectorResolver>,
    recipes: Arc<NavRecipeBook>,
) -> AdapterResult<AdapterRegistry> {
    let mut registry = AdapterRegistry::new();
    for definition in definitions {
        let driver = drivers.get(&definition.surface).cloned().ok_or_else(|| {
            AdapterError::Definition(format!(
                "no driver for {:?} surface of {}",
                definition.surface, definition.name
            ))
        })?;
        let adapter = SiteAdapter::new(definition, driver, Arc::clone(&resolver), Arc::clone(&recipes))?;
        registry.register(Arc::new(adapter))?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use autobot_core_types::Sensitivity;

    #[test]
    fn builtin_sites_parse_and_validate() {
        let definitions = builtin_definitions().unwrap();
        assert_eq!(definitions.len(), BUILTIN_SITES.len());

        let whatsapp = definitions.iter().find(|d| d.name == "whatsapp_web").unwrap();
        assert_eq!(
            whatsapp.actions["send_message_to_chat"].sensitivity,
            Sensitivity::MessageSend
        );
        assert_eq!(
            whatsapp.session.as_ref().unwrap().recovery_action.as_deref(),
            Some("attempt_google_continue_login")
        );

        let overleaf = definitions.iter().find(|d| d.name == "overleaf_web").unwrap();
        assert_eq!(overleaf.actions["download_pdf"].sensitivity, Sensitivity::FileDownload);

        let vscode = definitions.iter().find(|d| d.name == "vscode_desktop").unwrap();
        assert_eq!(vscode.surface, Surface::Desktop);
    }

    #[test]
    fn catalog_and_recipes_cover_sites() {
        let definitions = builtin_definitions().unwrap();
        let catalog = selector_catalog(&definitions);
        assert!(catalog.spec("whatsapp_web", "chat_search_input").is_some());
        let book = recipe_book(&definitions);
        assert!(book.has_recipe("vscode_desktop", "open_file"));
        assert!(book.has_recipe("overleaf_web", "compile_project"));
    }
}
