//! In-memory execution host, factory and provider for driving sessions without a real
//! remote surface.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use common::models::{Credentials, Direction};

use crate::error::HostError;
use crate::host::{ActionDescriptor, ExecutionHost, HostCommand, HostEvent, HostFactory, HostId};
use crate::provider::{ActionProvider, CLEAR_STATE_ACTION, OrderField};

pub mod actions {
    pub const SESSION_CLEAR: &str = "session.clear";
    pub const AUTH_FILL: &str = "auth.fill";
    pub const AUTH_SUBMIT: &str = "auth.submit";
    pub const PROBE_AUTHENTICATED: &str = "probe.authenticated";
    pub const INSTRUMENT_SEARCH: &str = "instrument.search";
    pub const INSTRUMENT_BROWSE: &str = "instrument.browse";
    pub const PROBE_INSTRUMENT_SELECTED: &str = "probe.instrument_selected";
    pub const ORDER_OPEN: &str = "order.open";
    pub const PROBE_ORDER_ENTRY: &str = "probe.order_entry";
    pub const ORDER_FIELD: &str = "order.field";
    pub const ORDER_SUBMIT: &str = "order.submit";
    pub const ORDER_CONFIRM: &str = "order.confirm";
}

use actions::*;

/// How a scripted host behaves.
#[derive(Debug, Clone)]
pub struct HostScript {
    pub ready: bool,
    pub clear_ack: bool,
    /// The authenticated probe answers present from this probe onwards; `None` never does.
    pub authenticated_after: Option<u32>,
    pub instrument_primary: bool,
    pub instrument_fallback: bool,
    /// Whether order entry opens, per trade. Missing entries open.
    pub order_entry: Vec<bool>,
    pub fail_on: Option<String>,
    pub panic_on: Option<String>,
    /// Records the command, then never returns from `send`.
    pub stall_on: Option<String>,
    pub create_fails: bool,
    pub create_hangs: bool,
}

impl Default for HostScript {
    fn default() -> Self {
        Self {
            ready: true,
            clear_ack: true,
            authenticated_after: Some(1),
            instrument_primary: true,
            instrument_fallback: true,
            order_entry: Vec::new(),
            fail_on: None,
            panic_on: None,
            stall_on: None,
            create_fails: false,
            create_hangs: false,
        }
    }
}

#[derive(Debug, Default)]
struct JournalState {
    created: Vec<HostId>,
    loads: Vec<(HostId, String)>,
    commands: Vec<(HostId, HostCommand)>,
    destroyed: Vec<HostId>,
    silenced: HashSet<HostId>,
}

/// Everything every scripted host was asked to do.
#[derive(Debug, Clone, Default)]
pub struct HostJournal {
    state: Arc<Mutex<JournalState>>,
}

impl HostJournal {
    pub fn created(&self) -> Vec<HostId> {
        self.state.lock().created.clone()
    }

    pub fn destroyed(&self) -> Vec<HostId> {
        self.state.lock().destroyed.clone()
    }

    pub fn loads(&self) -> Vec<(HostId, String)> {
        self.state.lock().loads.clone()
    }

    pub fn commands(&self) -> Vec<(HostId, HostCommand)> {
        self.state.lock().commands.clone()
    }

    pub fn command_names(&self, host: HostId) -> Vec<String> {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|(id, _)| *id == host)
            .map(|(_, c)| c.action.name.clone())
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|(_, c)| c.action.name == name)
            .count()
    }

    pub fn submits(&self) -> Vec<(HostId, HostCommand)> {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|(_, c)| c.action.name == ORDER_SUBMIT)
            .cloned()
            .collect()
    }

    /// Stops `host` from emitting any further events.
    pub fn silence(&self, host: HostId) {
        self.state.lock().silenced.insert(host);
    }

    fn is_silenced(&self, host: HostId) -> bool {
        self.state.lock().silenced.contains(&host)
    }
}

#[derive(Debug, Default)]
struct Progress {
    auth_probes: u32,
    fallback_sent: bool,
    trade: usize,
}

pub struct ScriptedHost {
    id: HostId,
    script: HostScript,
    journal: HostJournal,
    events: broadcast::Sender<HostEvent>,
    progress: Mutex<Progress>,
}

impl ScriptedHost {
    pub fn new(id: HostId, script: HostScript, journal: HostJournal) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            id,
            script,
            journal,
            events,
            progress: Mutex::new(Progress::default()),
        }
    }

    fn emit(&self, event: HostEvent) {
        if !self.journal.is_silenced(self.id) {
            let _ = self.events.send(event);
        }
    }

    fn respond(&self, command: &HostCommand) -> Option<HostEvent> {
        let mut progress = self.progress.lock();
        let observation = |present| HostEvent::Observation {
            seq: command.seq,
            present,
        };

        match command.action.name.as_str() {
            PROBE_AUTHENTICATED => {
                progress.auth_probes += 1;
                let present = self
                    .script
                    .authenticated_after
                    .is_some_and(|after| progress.auth_probes >= after);
                Some(observation(present))
            }
            INSTRUMENT_BROWSE => {
                progress.fallback_sent = true;
                None
            }
            PROBE_INSTRUMENT_SELECTED => Some(observation(
                self.script.instrument_primary
                    || (progress.fallback_sent && self.script.instrument_fallback),
            )),
            ORDER_OPEN => {
                progress.trade += 1;
                None
            }
            PROBE_ORDER_ENTRY => {
                let index = progress.trade.saturating_sub(1);
                Some(observation(
                    self.script.order_entry.get(index).copied().unwrap_or(true),
                ))
            }
            ORDER_SUBMIT => Some(HostEvent::Log {
                message: format!("order submitted ({})", command.action.params),
            }),
            CLEAR_STATE_ACTION if self.script.clear_ack => Some(HostEvent::StateCleared),
            _ => None,
        }
    }
}

#[async_trait]
impl ExecutionHost for ScriptedHost {
    fn id(&self) -> HostId {
        self.id
    }

    async fn load(&self, target: &str) -> Result<(), HostError> {
        self.journal
            .state
            .lock()
            .loads
            .push((self.id, target.to_string()));
        if self.script.ready {
            self.emit(HostEvent::Ready);
        }
        Ok(())
    }

    async fn send(&self, command: HostCommand) -> Result<(), HostError> {
        self.journal
            .state
            .lock()
            .commands
            .push((self.id, command.clone()));

        let name = command.action.name.as_str();
        if self.script.panic_on.as_deref() == Some(name) {
            panic!("scripted host blew up on {}", name);
        }
        if self.script.stall_on.as_deref() == Some(name) {
            std::future::pending::<()>().await;
        }
        if self.script.fail_on.as_deref() == Some(name) {
            return Err(HostError::Send {
                id: self.id,
                reason: format!("scripted failure on {}", name),
            });
        }

        if let Some(event) = self.respond(&command) {
            self.emit(event);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    async fn destroy(&self) -> Result<(), HostError> {
        self.journal.state.lock().destroyed.push(self.id);
        Ok(())
    }
}

pub struct ScriptedHostFactory {
    script: Mutex<HostScript>,
    journal: HostJournal,
}

impl ScriptedHostFactory {
    pub fn new(script: HostScript) -> Self {
        Self {
            script: Mutex::new(script),
            journal: HostJournal::default(),
        }
    }

    pub fn journal(&self) -> HostJournal {
        self.journal.clone()
    }

    /// Applies to hosts created from now on.
    pub fn set_script(&self, script: HostScript) {
        *self.script.lock() = script;
    }
}

#[async_trait]
impl HostFactory for ScriptedHostFactory {
    async fn create(&self, id: HostId) -> Result<Box<dyn ExecutionHost>, HostError> {
        let script = self.script.lock().clone();
        if script.create_hangs {
            std::future::pending::<()>().await;
        }
        if script.create_fails {
            return Err(HostError::Create {
                id,
                reason: "scripted creation failure".to_string(),
            });
        }
        self.journal.state.lock().created.push(id);
        Ok(Box::new(ScriptedHost::new(id, script, self.journal.clone())))
    }
}

/// Provider speaking the scripted host's vocabulary.
#[derive(Debug, Clone)]
pub struct StubProvider {
    platform: String,
}

impl StubProvider {
    pub fn for_platform(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
        }
    }
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::for_platform("stub")
    }
}

impl ActionProvider for StubProvider {
    fn platform(&self) -> &str {
        &self.platform
    }

    fn target(&self) -> &str {
        "stub://terminal"
    }

    fn clear_session(&self) -> Vec<ActionDescriptor> {
        vec![ActionDescriptor::new(SESSION_CLEAR)]
    }

    fn authenticate(&self, account: &Credentials) -> Vec<ActionDescriptor> {
        vec![
            ActionDescriptor::new(AUTH_FILL)
                .with_param("login", account.login.as_str())
                .with_param("server", account.server.as_str()),
            ActionDescriptor::new(AUTH_SUBMIT),
        ]
    }

    fn authenticated_probe(&self) -> ActionDescriptor {
        ActionDescriptor::new(PROBE_AUTHENTICATED)
    }

    fn locate_instrument(&self, instrument: &str) -> Vec<ActionDescriptor> {
        vec![ActionDescriptor::new(INSTRUMENT_SEARCH).with_param("instrument", instrument)]
    }

    fn locate_instrument_fallback(&self, instrument: &str) -> Vec<ActionDescriptor> {
        vec![ActionDescriptor::new(INSTRUMENT_BROWSE).with_param("instrument", instrument)]
    }

    fn instrument_selected_probe(&self, instrument: &str) -> ActionDescriptor {
        ActionDescriptor::new(PROBE_INSTRUMENT_SELECTED).with_param("instrument", instrument)
    }

    fn open_order_entry(&self) -> Vec<ActionDescriptor> {
        vec![ActionDescriptor::new(ORDER_OPEN)]
    }

    fn order_entry_probe(&self) -> ActionDescriptor {
        ActionDescriptor::new(PROBE_ORDER_ENTRY)
    }

    fn set_field(&self, field: &OrderField) -> Vec<ActionDescriptor> {
        vec![
            ActionDescriptor::new(ORDER_FIELD)
                .with_param("field", field.key())
                .with_param("value", field.value()),
        ]
    }

    fn submit(&self, direction: Direction) -> Vec<ActionDescriptor> {
        vec![ActionDescriptor::new(ORDER_SUBMIT).with_param("direction", direction.as_str())]
    }

    fn confirm(&self) -> Vec<ActionDescriptor> {
        vec![ActionDescriptor::new(ORDER_CONFIRM)]
    }
}
