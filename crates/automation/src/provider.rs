use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use common::models::{Credentials, Direction};

use crate::host::ActionDescriptor;

pub const CLEAR_STATE_ACTION: &str = "host.clear_state";

/// One value typed into the order-entry form.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderField {
    Size(f64),
    StopLoss(f64),
    TakeProfit(f64),
    Tag(String),
}

impl OrderField {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Size(_) => "size",
            Self::StopLoss(_) => "stop_loss",
            Self::TakeProfit(_) => "take_profit",
            Self::Tag(_) => "tag",
        }
    }

    pub fn value(&self) -> String {
        match self {
            Self::Size(v) | Self::StopLoss(v) | Self::TakeProfit(v) => v.to_string(),
            Self::Tag(tag) => tag.clone(),
        }
    }
}

impl fmt::Display for OrderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key(), self.value())
    }
}

/// Per-platform vocabulary. Everything platform specific (selectors, labels, flows) lives
/// behind this trait; probes are actions the host answers with an `Observation`.
pub trait ActionProvider: Send + Sync {
    fn platform(&self) -> &str;

    /// What the host loads during initialization.
    fn target(&self) -> &str;

    fn clear_session(&self) -> Vec<ActionDescriptor>;

    fn authenticate(&self, account: &Credentials) -> Vec<ActionDescriptor>;

    fn authenticated_probe(&self) -> ActionDescriptor;

    fn locate_instrument(&self, instrument: &str) -> Vec<ActionDescriptor>;

    fn locate_instrument_fallback(&self, instrument: &str) -> Vec<ActionDescriptor>;

    fn instrument_selected_probe(&self, instrument: &str) -> ActionDescriptor;

    fn open_order_entry(&self) -> Vec<ActionDescriptor>;

    fn order_entry_probe(&self) -> ActionDescriptor;

    fn set_field(&self, field: &OrderField) -> Vec<ActionDescriptor>;

    fn submit(&self, direction: Direction) -> Vec<ActionDescriptor>;

    /// Dismisses a confirmation dialog if one shows up.
    fn confirm(&self) -> Vec<ActionDescriptor>;

    /// Must make the host answer with `StateCleared`.
    fn clear_all_state(&self) -> ActionDescriptor {
        ActionDescriptor::new(CLEAR_STATE_ACTION)
    }
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ActionProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn ActionProvider>) {
        self.providers
            .insert(provider.platform().to_ascii_lowercase(), provider);
    }

    pub fn get(&self, platform: &str) -> Option<Arc<dyn ActionProvider>> {
        self.providers
            .get(&platform.trim().to_ascii_lowercase())
            .cloned()
    }

    pub fn platforms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
