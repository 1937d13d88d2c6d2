//! Declarative site adapter definitions
//!
//! A site is described once (selectors, navigation recipes, session markers
//! and the action table) and interpreted by [`crate::SiteAdapter`].

use std::collections::BTreeMap;
use std::path::Path;

use action_locator::{NavRecipeBook, NavStep, SelectorCatalog};
use autobot_core_types::{Params, Sensitivity};
use serde::{Deserialize, Serialize};
use session_health::SessionProfile;

use crate::errors::{AdapterError, AdapterResult};

/// One UI operation inside an action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    /// Navigate unless the current URL already starts with `url`.
    EnsureUrl { url: String },
    Navigate { url: String },
    Click { target: String },
    /// Click the resolved target narrowed to elements containing `text`.
    ClickWithText { target: String, text: String },
    Fill { target: String, text: String },
    /// Click the first resolvable target; run `otherwise` when none resolves.
    ClickIfPresent {
        target: String,
        #[serde(default)]
        otherwise: Vec<Op>,
        #[serde(default)]
        required: bool,
    },
    Press { key: String },
    Hotkey { keys: Vec<String> },
    TypeText { text: String },
    /// Play a navigation recipe of this site.
    Recipe { name: String },
    /// Read visible texts; the result becomes the action value.
    ReadTexts {
        target: String,
        #[serde(default = "default_limit_param")]
        limit_param: String,
        default_limit: usize,
        #[serde(default)]
        from_end: bool,
        #[serde(default)]
        dedupe: bool,
    },
    /// Run another action of the same adapter with the current params.
    Invoke { action: String },
}

fn default_limit_param() -> String {
    "limit".to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionDef {
    pub description: String,
    #[serde(default = "default_sensitivity")]
    pub sensitivity: Sensitivity,
    /// Params that must be present and non-blank.
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub defaults: Params,
    /// Operations used when the driver resolves selectors.
    #[serde(default)]
    pub ops: Vec<Op>,
    /// Operations used when the driver is keyboard-only. Falls back to `ops`.
    #[serde(default)]
    pub human: Option<Vec<Op>>,
    /// Result template; `{param}` placeholders are filled from the params.
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub skip_session_check: bool,
}

fn default_sensitivity() -> Sensitivity {
    Sensitivity::Interactive
}

/// Which driver a site is reached through.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    #[default]
    Browser,
    Desktop,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SiteDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub surface: Surface,
    #[serde(default)]
    pub session: Option<SessionProfile>,
    #[serde(default)]
    pub selectors: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub recipes: BTreeMap<String, Vec<NavStep>>,
    pub actions: BTreeMap<String, ActionDef>,
}

impl SiteDefinition {
    pub fn from_yaml_str(raw: &str) -> AdapterResult<Self> {
        let definition: SiteDefinition =
            serde_yaml::from_str(raw).map_err(|err| AdapterError::Definition(err.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> AdapterResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            AdapterError::Definition(format!("{}: {}", path.display(), err))
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn selector_catalog(&self) -> SelectorCatalog {
        SelectorCatalog::for_site(self.name.clone(), self.selectors.clone())
    }

    pub fn recipe_book(&self) -> NavRecipeBook {
        NavRecipeBook::for_site(self.name.clone(), self.recipes.clone())
    }

    /// Locators whose presence means the login prompt is showing.
    pub fn login_markers(&self) -> Vec<String> {
        self.session
            .as_ref()
            .map(|session| session.login_markers.clone())
            .unwrap_or_default()
    }

    /// Cross-checks references inside the definition.
    pub fn validate(&self) -> AdapterResult<()> {
        if self.name.trim().is_empty() {
            return Err(AdapterError::Definition("site name is empty".into()));
        }
        if self.name.contains('.') {
            return Err(AdapterError::Definition(format!(
                "site name '{}' must not contain '.'",
                self.name
            )));
        }
        if let Some(recovery) = self.session.as_ref().and_then(|s| s.recovery_action.as_ref()) {
            if !self.actions.contains_key(recovery) {
                return Err(AdapterError::Definition(format!(
                    "{}: recovery action '{}' is not defined",
                    self.name, recovery
                )));
            }
        }
        for (name, action) in &self.actions {
            if action.ops.is_empty() && action.human.is_none() {
                return Err(AdapterError::Definition(format!(
                    "{}.{} has no operations",
                    self.name, name
                )));
            }
            let all_ops = action.ops.iter().chain(action.human.iter().flatten());
            for op in all_ops {
                self.check_op(name, op)?;
            }
        }
        Ok(())
    }

    fn check_op(&self, action: &str, op: &Op) -> AdapterResult<()> {
        match op {
            Op::Recipe { name } if !self.recipes.contains_key(name) => Err(AdapterError::Definition(
                format!("{}.{} uses unknown recipe '{}'", self.name, action, name),
            )),
            Op::Invoke { action: target } if target == action || !self.actions.contains_key(target) => {
                Err(AdapterError::Definition(format!(
                    "{}.{} invokes invalid action '{}'",
                    self.name, action, target
                )))
            }
            Op::ClickIfPresent { otherwise, .. } => {
                for nested in otherwise {
                    self.check_op(action, nested)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: &str = r#"
name: demo
selectors:
  send_button: [".send", "button[aria-label='Send']"]
recipes:
  compose:
    - hotkey: [ctrl, n]
    - type: "{text}"
actions:
  send:
    description: Send a message
    sensitivity: message_send
    required: [text]
    ops:
      - op: click_if_present
        target: send_button
        otherwise:
          - op: press
            key: Enter
    human:
      - op: recipe
        name: compose
"#;

    #[test]
    fn parses_ops_and_recipes() {
        let site = SiteDefinition::from_yaml_str(SITE).unwrap();
        let send = &site.actions["send"];
        assert_eq!(send.sensitivity, Sensitivity::MessageSend);
        assert!(matches!(
            &send.ops[0],
            Op::ClickIfPresent { otherwise, .. } if otherwise.len() == 1
        ));
        assert_eq!(site.recipe_book().render("demo", "compose", &Params::new()).unwrap().len(), 2);
        assert!(site.selector_catalog().spec("demo", "send_button").is_some());
    }

    #[test]
    fn rejects_dangling_recipe() {
        let raw = SITE.replace("name: compose", "name: missing");
        assert!(matches!(
            SiteDefinition::from_yaml_str(&raw),
            Err(AdapterError::Definition(_))
        ));
    }
}
