#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use mockall::mock;
use tokio::sync::broadcast;

use automation::testing::{HostJournal, HostScript, ScriptedHostFactory, StubProvider};
use automation::{HostManager, ProviderRegistry, StatusReporter, StepExecutor};
use common::config::{AutomationConfig, DedupConfig, GateConfig, HostConfig};
use common::models::{
    Credentials, Direction, DirectionPolicy, Signal, SourceTag, StatusEvent, TradeConfig,
    TradeConfigLookup, normalize_instrument,
};
use executor::services::SessionRunner;
use executor::{Dispatcher, ExecutionGate};
use intake::DedupFilter;

mock! {
    pub Lookup {}

    impl TradeConfigLookup for Lookup {
        fn resolve(&self, instrument: &str) -> Option<TradeConfig>;
    }
}

pub fn trade_config(instrument: &str, order_count: u32) -> TradeConfig {
    TradeConfig {
        instrument: instrument.to_string(),
        lot_size: 0.1,
        order_count,
        direction_policy: DirectionPolicy::Follow,
        platform: "stub".to_string(),
        account: Credentials {
            login: "1001".to_string(),
            password: "secret".to_string(),
            server: "Demo-1".to_string(),
        },
        tag: None,
    }
}

/// Resolves only `config.instrument`.
pub fn lookup_for(config: TradeConfig) -> MockLookup {
    let mut lookup = MockLookup::new();
    lookup.expect_resolve().returning(move |instrument| {
        (normalize_instrument(instrument) == normalize_instrument(&config.instrument))
            .then(|| config.clone())
    });
    lookup
}

/// Resolves every instrument with the same order count.
pub fn lookup_any(order_count: u32) -> MockLookup {
    let mut lookup = MockLookup::new();
    lookup
        .expect_resolve()
        .returning(move |instrument| Some(trade_config(instrument, order_count)));
    lookup
}

pub fn fresh_signal(id: &str, instrument: &str, direction: Direction, age_secs: i64) -> Signal {
    Signal::new(id, instrument, direction, SourceTag::Foreground)
        .issued_at(Utc::now() - chrono::Duration::seconds(age_secs))
}

pub struct Rig {
    pub dispatcher: Arc<Dispatcher>,
    pub gate: ExecutionGate,
    pub filter: Arc<DedupFilter>,
    pub reporter: StatusReporter,
    pub runner: Arc<SessionRunner>,
    pub factory: Arc<ScriptedHostFactory>,
    pub journal: HostJournal,
}

impl Rig {
    pub fn new(script: HostScript, lookup: MockLookup) -> Self {
        Self::with_gate(script, lookup, GateConfig::default())
    }

    pub fn with_gate(script: HostScript, lookup: MockLookup, gate_config: GateConfig) -> Self {
        Self::build(
            script,
            lookup,
            gate_config,
            HostConfig::default(),
            AutomationConfig::default(),
        )
    }

    pub fn with_timeouts(
        script: HostScript,
        lookup: MockLookup,
        host_config: HostConfig,
        automation_config: AutomationConfig,
    ) -> Self {
        Self::build(
            script,
            lookup,
            GateConfig::default(),
            host_config,
            automation_config,
        )
    }

    fn build(
        script: HostScript,
        lookup: MockLookup,
        gate_config: GateConfig,
        host_config: HostConfig,
        automation_config: AutomationConfig,
    ) -> Self {
        let factory = Arc::new(ScriptedHostFactory::new(script));
        let journal = factory.journal();

        let mut providers = ProviderRegistry::new();
        providers.register(Arc::new(StubProvider::default()));

        let gate = ExecutionGate::new(gate_config);
        let reporter = StatusReporter::new(1024);
        let runner = Arc::new(SessionRunner::new(
            HostManager::new(factory.clone(), &host_config),
            providers,
            StepExecutor::new(automation_config),
            reporter.clone(),
            gate.clone(),
        ));
        let filter = Arc::new(DedupFilter::new(&DedupConfig::default()));
        let dispatcher = Arc::new(Dispatcher::new(
            filter.clone(),
            gate.clone(),
            Arc::new(lookup),
            runner.clone(),
        ));

        Self {
            dispatcher,
            gate,
            filter,
            reporter,
            runner,
            factory,
            journal,
        }
    }
}

pub fn drain(rx: &mut broadcast::Receiver<StatusEvent>) -> Vec<StatusEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
