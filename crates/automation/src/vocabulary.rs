use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use common::config::ConfigError;
use common::models::{Credentials, Direction};

use crate::host::ActionDescriptor;
use crate::provider::{ActionProvider, CLEAR_STATE_ACTION, OrderField, ProviderRegistry};

/// Action vocabulary document for one platform. String parameters may reference
/// `{instrument}`, `{login}`, `{password}`, `{server}`, `{field}` and `{value}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Vocabulary {
    pub platform: String,
    pub target: String,
    #[serde(default)]
    pub clear_session: Vec<ActionDescriptor>,
    pub authenticate: Vec<ActionDescriptor>,
    pub authenticated_probe: ActionDescriptor,
    pub locate_instrument: Vec<ActionDescriptor>,
    #[serde(default)]
    pub locate_instrument_fallback: Vec<ActionDescriptor>,
    pub instrument_selected_probe: ActionDescriptor,
    pub open_order_entry: Vec<ActionDescriptor>,
    pub order_entry_probe: ActionDescriptor,
    pub set_field: Vec<ActionDescriptor>,
    pub submit_buy: Vec<ActionDescriptor>,
    pub submit_sell: Vec<ActionDescriptor>,
    #[serde(default)]
    pub confirm: Vec<ActionDescriptor>,
    #[serde(default = "default_clear_state")]
    pub clear_all_state: ActionDescriptor,
}

fn default_clear_state() -> ActionDescriptor {
    ActionDescriptor::new(CLEAR_STATE_ACTION)
}

#[derive(Debug, Clone)]
pub struct VocabularyProvider {
    vocabulary: Vocabulary,
}

impl VocabularyProvider {
    pub fn new(vocabulary: Vocabulary) -> Self {
        Self { vocabulary }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let vocabulary: Vocabulary =
            serde_json::from_str(raw).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        Ok(Self::new(vocabulary))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json_str(&raw)
    }

    /// Loads every `*.json` file in `dir` into a registry keyed by platform.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<ProviderRegistry, ConfigError> {
        let dir = dir.as_ref();
        let io_error = |e| ConfigError::Io {
            path: dir.display().to_string(),
            source: e,
        };

        let mut registry = ProviderRegistry::new();
        for entry in std::fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let provider = Self::from_json_file(&path)?;
            info!(
                "Loaded action vocabulary for {} from {}",
                provider.platform(),
                path.display()
            );
            registry.register(std::sync::Arc::new(provider));
        }
        Ok(registry)
    }
}

fn render(templates: &[ActionDescriptor], vars: &[(&str, &str)]) -> Vec<ActionDescriptor> {
    templates.iter().map(|t| render_one(t, vars)).collect()
}

fn render_one(template: &ActionDescriptor, vars: &[(&str, &str)]) -> ActionDescriptor {
    ActionDescriptor {
        name: template.name.clone(),
        params: substitute(&template.params, vars),
    }
}

fn substitute(value: &Value, vars: &[(&str, &str)]) -> Value {
    match value {
        Value::String(s) => Value::String(substitute_str(s, vars)),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Single left-to-right pass; substituted values are never rescanned.
fn substitute_str(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let known = after.find('}').and_then(|close| {
            let key = &after[..close];
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value, close))
        });
        match known {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

impl ActionProvider for VocabularyProvider {
    fn platform(&self) -> &str {
        &self.vocabulary.platform
    }

    fn target(&self) -> &str {
        &self.vocabulary.target
    }

    fn clear_session(&self) -> Vec<ActionDescriptor> {
        self.vocabulary.clear_session.clone()
    }

    fn authenticate(&self, account: &Credentials) -> Vec<ActionDescriptor> {
        render(
            &self.vocabulary.authenticate,
            &[
                ("login", &account.login),
                ("password", &account.password),
                ("server", &account.server),
            ],
        )
    }

    fn authenticated_probe(&self) -> ActionDescriptor {
        self.vocabulary.authenticated_probe.clone()
    }

    fn locate_instrument(&self, instrument: &str) -> Vec<ActionDescriptor> {
        render(&self.vocabulary.locate_instrument, &[("instrument", instrument)])
    }

    fn locate_instrument_fallback(&self, instrument: &str) -> Vec<ActionDescriptor> {
        render(
            &self.vocabulary.locate_instrument_fallback,
            &[("instrument", instrument)],
        )
    }

    fn instrument_selected_probe(&self, instrument: &str) -> ActionDescriptor {
        render_one(
            &self.vocabulary.instrument_selected_probe,
            &[("instrument", instrument)],
        )
    }

    fn open_order_entry(&self) -> Vec<ActionDescriptor> {
        self.vocabulary.open_order_entry.clone()
    }

    fn order_entry_probe(&self) -> ActionDescriptor {
        self.vocabulary.order_entry_probe.clone()
    }

    fn set_field(&self, field: &OrderField) -> Vec<ActionDescriptor> {
        let value = field.value();
        render(
            &self.vocabulary.set_field,
            &[("field", field.key()), ("value", &value)],
        )
    }

    fn submit(&self, direction: Direction) -> Vec<ActionDescriptor> {
        match direction {
            Direction::Buy => self.vocabulary.submit_buy.clone(),
            Direction::Sell => self.vocabulary.submit_sell.clone(),
        }
    }

    fn confirm(&self) -> Vec<ActionDescriptor> {
        self.vocabulary.confirm.clone()
    }

    fn clear_all_state(&self) -> ActionDescriptor {
        self.vocabulary.clear_all_state.clone()
    }
}
