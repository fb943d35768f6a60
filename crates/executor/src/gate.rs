use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use automation::{SessionId, SessionOutcome};
use common::config::GateConfig;
use common::models::{Signal, normalize_instrument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuppressReason {
    SessionActive { session: SessionId },
    /// `until` is `None` while the resume has not been scheduled yet.
    Paused { until: Option<Instant> },
    InstrumentCooldown { instrument: String, until: Instant },
}

#[derive(Debug)]
pub enum Admission {
    Admitted(SessionPermit),
    Suppressed(SuppressReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownState {
    pub paused: bool,
    pub paused_until: Option<Instant>,
}

#[derive(Debug, Default)]
struct GateState {
    paused: bool,
    paused_until: Option<Instant>,
    active: Option<SessionId>,
    last_session: SessionId,
    instrument_cooldowns: HashMap<String, Instant>,
}

impl GateState {
    /// Applies deadlines that have passed.
    fn refresh(&mut self, now: Instant) {
        let resume_due = self.paused_until.is_some_and(|until| now >= until);
        if self.active.is_none() && resume_due {
            self.paused = false;
            self.paused_until = None;
            info!("Execution gate resumed");
        }
        self.instrument_cooldowns.retain(|_, until| *until > now);
    }
}

struct GateInner {
    state: Mutex<GateState>,
    config: GateConfig,
}

/// Process-wide admission control: at most one session, a quiet window after each session,
/// and per-instrument cooldowns.
#[derive(Clone)]
pub struct ExecutionGate {
    inner: Arc<GateInner>,
}

impl ExecutionGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState::default()),
                config,
            }),
        }
    }

    /// Checks and closes the gate in one step.
    pub fn try_admit(&self, signal: &Signal) -> Admission {
        let now = Instant::now();
        let mut state = self.inner.state.lock();
        state.refresh(now);

        if let Some(session) = state.active {
            return Admission::Suppressed(SuppressReason::SessionActive { session });
        }
        if state.paused {
            return Admission::Suppressed(SuppressReason::Paused {
                until: state.paused_until,
            });
        }
        let instrument = normalize_instrument(&signal.instrument);
        if let Some(&until) = state.instrument_cooldowns.get(&instrument) {
            return Admission::Suppressed(SuppressReason::InstrumentCooldown { instrument, until });
        }

        state.last_session += 1;
        let session = state.last_session;
        state.active = Some(session);
        state.paused = true;
        state.paused_until = None;
        info!(
            "Gate closed for session {} (signal {} {} {})",
            session, signal.id, signal.instrument, signal.direction
        );

        Admission::Admitted(SessionPermit {
            session,
            gate: self.clone(),
            released: false,
        })
    }

    pub fn release(&self, permit: SessionPermit, outcome: &SessionOutcome) {
        permit.release(outcome);
    }

    /// Puts `instrument` on cooldown on top of the global gate.
    pub fn mark_executed(&self, instrument: &str) {
        let until = Instant::now() + self.inner.config.instrument_cooldown;
        let key = normalize_instrument(instrument);
        debug!(
            "{} on cooldown for {:?}",
            key, self.inner.config.instrument_cooldown
        );
        self.inner.state.lock().instrument_cooldowns.insert(key, until);
    }

    pub fn cooldown(&self) -> CooldownState {
        let mut state = self.inner.state.lock();
        state.refresh(Instant::now());
        CooldownState {
            paused: state.paused,
            paused_until: state.paused_until,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.cooldown().paused
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.inner.state.lock().active
    }

    /// `None` outcome means the permit was dropped without a release.
    fn finish(&self, session: SessionId, outcome: Option<&SessionOutcome>) {
        let config = &self.inner.config;
        let delay = match outcome {
            Some(outcome @ SessionOutcome::Failed { .. })
                if !outcome.mutated_remote() && config.resume_on_clean_failure =>
            {
                None
            }
            _ => Some(config.post_trade_cooldown),
        };

        let mut state = self.inner.state.lock();
        if state.active != Some(session) {
            warn!(
                "Ignoring release of session {}; active session is {:?}",
                session, state.active
            );
            return;
        }
        state.active = None;

        match delay {
            None => {
                state.paused = false;
                state.paused_until = None;
                info!("Session {} released, gate open", session);
            }
            Some(delay) => {
                state.paused_until = Some(Instant::now() + delay);
                info!("Session {} released, gate resumes in {:?}", session, delay);
            }
        }
    }
}

/// Proof of admission. Releasing it reopens the gate according to the outcome; dropping it
/// unreleased counts as an abandoned session that may have touched the remote.
#[derive(Debug)]
#[must_use = "dropping a permit abandons the session"]
pub struct SessionPermit {
    session: SessionId,
    gate: ExecutionGate,
    released: bool,
}

impl SessionPermit {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn release(mut self, outcome: &SessionOutcome) {
        self.released = true;
        self.gate.finish(self.session, Some(outcome));
    }
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        if !self.released {
            warn!("Session {} permit abandoned", self.session);
            self.gate.finish(self.session, None);
        }
    }
}

impl std::fmt::Debug for ExecutionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGate").finish_non_exhaustive()
    }
}

/// Time left until the gate reopens, if a resume is scheduled.
pub fn remaining(until: Option<Instant>) -> Option<Duration> {
    until.map(|u| u.saturating_duration_since(Instant::now()))
}
