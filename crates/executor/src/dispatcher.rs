use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use automation::{ExecutionSession, SessionId, SessionOutcome};
use common::models::{Direction, DirectionPolicy, Signal, TradeConfigLookup};
use intake::{DedupFilter, SourceEvent, Verdict};

use crate::error::DispatchError;
use crate::gate::{Admission, ExecutionGate, SuppressReason, remaining};
use crate::services::SessionRunner;

/// Why a signal did or did not start a session.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchDecision {
    Dispatched {
        session: SessionId,
    },
    /// Dropped while the gate is paused. The id is not recorded, so a re-delivery after the
    /// pause can still run.
    Paused,
    Rejected(Verdict),
    NoConfig,
    DirectionFiltered {
        policy: DirectionPolicy,
        direction: Direction,
    },
    UnsupportedPlatform(String),
    Suppressed(SuppressReason),
}

struct ActiveSession {
    id: SessionId,
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<SessionOutcome>,
}

/// Single ingestion point: every source fans in here before dedup and admission.
pub struct Dispatcher {
    filter: Arc<DedupFilter>,
    gate: ExecutionGate,
    lookup: Arc<dyn TradeConfigLookup>,
    runner: Arc<SessionRunner>,
    active: Mutex<Option<ActiveSession>>,
}

impl Dispatcher {
    pub fn new(
        filter: Arc<DedupFilter>,
        gate: ExecutionGate,
        lookup: Arc<dyn TradeConfigLookup>,
        runner: Arc<SessionRunner>,
    ) -> Self {
        Self {
            filter,
            gate,
            lookup,
            runner,
            active: Mutex::new(None),
        }
    }

    pub fn gate(&self) -> &ExecutionGate {
        &self.gate
    }

    /// Filters, admits and, if everything agrees, spawns a session. Never waits for it.
    pub fn ingest(&self, signal: Signal) -> DispatchDecision {
        if self.gate.is_paused() {
            return DispatchDecision::Paused;
        }

        let verdict = self.filter.evaluate(&signal);
        if !verdict.is_accept() {
            return DispatchDecision::Rejected(verdict);
        }

        let Some(config) = self.lookup.resolve(&signal.instrument) else {
            return DispatchDecision::NoConfig;
        };
        let Some(direction) = config.direction_policy.resolve(signal.direction) else {
            return DispatchDecision::DirectionFiltered {
                policy: config.direction_policy,
                direction: signal.direction,
            };
        };
        if !self.runner.supports(&config.platform) {
            return DispatchDecision::UnsupportedPlatform(config.platform);
        }

        let permit = match self.gate.try_admit(&signal) {
            Admission::Admitted(permit) => permit,
            Admission::Suppressed(reason) => return DispatchDecision::Suppressed(reason),
        };

        let id = permit.session();
        let session = ExecutionSession::new(id, signal, config, direction);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let runner = self.runner.clone();
        let handle = tokio::spawn(async move { runner.run(session, permit, cancel_rx).await });

        *self.active.lock() = Some(ActiveSession {
            id,
            cancel_tx,
            handle,
        });
        DispatchDecision::Dispatched { session: id }
    }

    /// Consumes the ingestion channel until it closes or `shutdown` fires, then cancels and
    /// waits for any session still running.
    pub async fn run(
        &self,
        mut rx: mpsc::Receiver<SourceEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), DispatchError> {
        info!("Dispatcher listening for signals");

        let result = loop {
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break Ok(()),
                event = rx.recv() => match event {
                    Some(SourceEvent::Signal(signal)) => {
                        let (id, source) = (signal.id.clone(), signal.source);
                        let decision = self.ingest(signal);
                        log_decision(&id, &source.to_string(), &decision);
                    }
                    Some(SourceEvent::Error { source, reason }) => {
                        warn!("{} source reported: {}", source, reason);
                    }
                    None => break Err(DispatchError::ChannelClosed),
                },
            }
        };

        if self.cancel() {
            info!("Cancelling active session before shutdown");
        }
        self.join_active().await?;
        result
    }

    /// Forces the active session, if any, to fail with `Cancelled`.
    pub fn cancel(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(active) if !active.handle.is_finished() => {
                active.cancel_tx.send_replace(true);
                true
            }
            _ => false,
        }
    }

    pub fn mark_executed(&self, instrument: &str) {
        self.gate.mark_executed(instrument);
    }

    /// Waits for the most recently dispatched session.
    pub async fn join_active(&self) -> Result<Option<SessionOutcome>, DispatchError> {
        let Some(active) = self.active.lock().take() else {
            return Ok(None);
        };
        active
            .handle
            .await
            .map(Some)
            .map_err(|e| DispatchError::SessionTask {
                session: active.id,
                reason: e.to_string(),
            })
    }
}

fn log_decision(id: &str, source: &str, decision: &DispatchDecision) {
    match decision {
        DispatchDecision::Dispatched { session } => {
            info!("Signal {} from {} dispatched as session {}", id, source, session)
        }
        DispatchDecision::Paused => debug!("Signal {} from {} dropped, gate paused", id, source),
        DispatchDecision::Rejected(verdict) => {
            debug!("Signal {} from {} rejected: {:?}", id, source, verdict)
        }
        DispatchDecision::NoConfig => {
            warn!("Signal {} from {} has no trade configuration", id, source)
        }
        DispatchDecision::DirectionFiltered { policy, direction } => info!(
            "Signal {} ({}) filtered by {:?} policy",
            id, direction, policy
        ),
        DispatchDecision::UnsupportedPlatform(platform) => {
            warn!("Signal {} targets unsupported platform {}", id, platform)
        }
        DispatchDecision::Suppressed(SuppressReason::Paused { until }) => debug!(
            "Signal {} suppressed, gate resumes in {:?}",
            id,
            remaining(*until)
        ),
        DispatchDecision::Suppressed(reason) => {
            info!("Signal {} from {} suppressed: {:?}", id, source, reason)
        }
    }
}
