//! Human-navigation recipes
//!
//! When no selector-capable driving mode is available, adapters replay a
//! short keyboard script per action instead of resolving locators.

use action_primitives::{DriverError, ExecCtx, UiDriver};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::errors::LocatorError;

/// One primitive input step.
///
/// Written as a single-key map in catalog files, e.g. `{hotkey: [ctrl, p]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawNavStep", into = "RawNavStep")]
pub enum NavStep {
    /// Chord pressed together, e.g. `["ctrl", "p"]`
    Hotkey(Vec<String>),
    /// Text typed into the focused element; `{param}` placeholders allowed
    Type(String),
    /// Single key press
    Press(String),
    /// Pause in milliseconds
    SleepMs(u64),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawNavStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hotkey: Option<Vec<String>>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    type_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    press: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sleep_ms: Option<u64>,
}

impl TryFrom<RawNavStep> for NavStep {
    type Error = String;

    fn try_from(raw: RawNavStep) -> Result<Self, Self::Error> {
        match (raw.hotkey, raw.type_text, raw.press, raw.sleep_ms) {
            (Some(keys), None, None, None) if !keys.is_empty() => Ok(NavStep::Hotkey(keys)),
            (None, Some(text), None, None) => Ok(NavStep::Type(text)),
            (None, None, Some(key), None) => Ok(NavStep::Press(key)),
            (None, None, None, Some(ms)) => Ok(NavStep::SleepMs(ms)),
            _ => Err("nav step needs exactly one of hotkey, type, press, sleep_ms".to_string()),
        }
    }
}

impl From<NavStep> for RawNavStep {
    fn from(step: NavStep) -> Self {
        let mut raw = RawNavStep::default();
        match step {
            NavStep::Hotkey(keys) => raw.hotkey = Some(keys),
            NavStep::Type(text) => raw.type_text = Some(text),
            NavStep::Press(key) => raw.press = Some(key),
            NavStep::SleepMs(ms) => raw.sleep_ms = Some(ms),
        }
        raw
    }
}

/// `{site: {recipe_name: [step, ...]}}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NavRecipeBook {
    sites: BTreeMap<String, BTreeMap<String, Vec<NavStep>>>,
}

impl NavRecipeBook {
    pub fn parse(raw: &str) -> Result<Self, LocatorError> {
        match serde_json::from_str(raw) {
            Ok(book) => Ok(book),
            Err(json_err) => serde_yaml::from_str(raw).map_err(|yaml_err| {
                LocatorError::InvalidCatalog(format!(
                    "json error: {}; yaml error: {}",
                    json_err, yaml_err
                ))
            }),
        }
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, LocatorError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&raw)
    }

    pub fn for_site(site: impl Into<String>, recipes: BTreeMap<String, Vec<NavStep>>) -> Self {
        let mut sites = BTreeMap::new();
        sites.insert(site.into(), recipes);
        Self { sites }
    }

    pub fn merge(&mut self, other: NavRecipeBook) {
        for (site, recipes) in other.sites {
            self.sites.entry(site).or_default().extend(recipes);
        }
    }

    pub fn has_recipe(&self, site: &str, recipe: &str) -> bool {
        self.sites
            .get(site)
            .map(|recipes| recipes.contains_key(recipe))
            .unwrap_or(false)
    }

    /// Steps for `recipe` with placeholders filled from `params`.
    pub fn render(
        &self,
        site: &str,
        recipe: &str,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<NavStep>, LocatorError> {
        let steps = self
            .sites
            .get(site)
            .and_then(|recipes| recipes.get(recipe))
            .ok_or_else(|| LocatorError::UnknownRecipe {
                site: site.to_string(),
                recipe: recipe.to_string(),
            })?;

        Ok(steps
            .iter()
            .map(|step| match step {
                NavStep::Type(text) => NavStep::Type(fill_placeholders(text, params)),
                other => other.clone(),
            })
            .collect())
    }
}

/// Replace `{key}` with the matching parameter; unknown keys are left as-is.
pub fn fill_placeholders(
    template: &str,
    params: &serde_json::Map<String, serde_json::Value>,
) -> String {
    let mut out = template.to_string();
    for (key, value) in params {
        let needle = format!("{{{key}}}");
        if out.contains(&needle) {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out = out.replace(&needle, &text);
        }
    }
    out
}

/// Replay rendered steps through the driver.
pub async fn play(
    driver: &dyn UiDriver,
    ctx: &ExecCtx,
    steps: &[NavStep],
) -> Result<(), DriverError> {
    for step in steps {
        if ctx.is_cancelled() {
            return Err(DriverError::Interrupted("recipe cancelled".into()));
        }
        debug!(?step, "nav step");
        match step {
            NavStep::Hotkey(keys) => driver.hotkey(ctx, keys).await?,
            NavStep::Type(text) => driver.type_text(ctx, text).await?,
            NavStep::Press(key) => driver.press(ctx, key).await?,
            NavStep::SleepMs(ms) => {
                tokio::select! {
                    _ = ctx.cancel_token.cancelled() => {
                        return Err(DriverError::Interrupted("recipe cancelled".into()));
                    }
                    _ = tokio::time::sleep(Duration::from_millis(*ms)) => {}
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_primitives::{DriverCall, DryRunDriver};
    use serde_json::json;

    const BOOK: &str = r#"
vscode_desktop:
  open_file:
    - hotkey: [ctrl, p]
    - type: "{path}"
    - press: enter
overleaf_web:
  compile_project:
    - hotkey: [ctrl, enter]
    - sleep_ms: 5
"#;

    #[test]
    fn renders_placeholders() {
        let book = NavRecipeBook::parse(BOOK).unwrap();
        let params = json!({"path": "src/main.rs"}).as_object().cloned().unwrap();
        let steps = book.render("vscode_desktop", "open_file", &params).unwrap();
        assert_eq!(steps[1], NavStep::Type("src/main.rs".into()));
    }

    #[test]
    fn unknown_recipe_is_an_error() {
        let book = NavRecipeBook::parse(BOOK).unwrap();
        let err = book
            .render("vscode_desktop", "missing", &Default::default())
            .unwrap_err();
        assert!(matches!(err, LocatorError::UnknownRecipe { .. }));
    }

    #[test]
    fn placeholders_without_params_are_kept() {
        let params = json!({"a": 1}).as_object().cloned().unwrap();
        assert_eq!(fill_placeholders("{a}-{b}", &params), "1-{b}");
    }

    #[tokio::test]
    async fn play_drives_keyboard() {
        let book = NavRecipeBook::parse(BOOK).unwrap();
        let params = json!({"path": "README.md"}).as_object().cloned().unwrap();
        let steps = book.render("vscode_desktop", "open_file", &params).unwrap();
        let driver = DryRunDriver::keyboard_only();
        let ctx = ExecCtx::detached(Duration::from_secs(1));

        play(&driver, &ctx, &steps).await.unwrap();

        assert_eq!(
            driver.calls(),
            vec![
                DriverCall::Hotkey {
                    keys: vec!["ctrl".into(), "p".into()]
                },
                DriverCall::TypeText {
                    text: "README.md".into()
                },
                DriverCall::Press {
                    key: "enter".into()
                },
            ]
        );
    }
}
