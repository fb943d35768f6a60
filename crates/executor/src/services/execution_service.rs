use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::time;
use tracing::{error, info, warn};

use automation::{
    ActionProvider, ExecutionSession, FailureReason, HostManager, ProviderRegistry,
    SessionOutcome, SessionReporter, StatusReporter, Step, StepExecutor, cancelled,
};

use crate::gate::{ExecutionGate, SessionPermit};

/// Owns everything a session touches and guarantees the cleanup order: host released,
/// terminal event emitted, gate permit released. Nothing a session does can skip it.
pub struct SessionRunner {
    hosts: HostManager,
    providers: ProviderRegistry,
    executor: StepExecutor,
    reporter: StatusReporter,
    gate: ExecutionGate,
}

impl SessionRunner {
    pub fn new(
        hosts: HostManager,
        providers: ProviderRegistry,
        executor: StepExecutor,
        reporter: StatusReporter,
        gate: ExecutionGate,
    ) -> Self {
        Self {
            hosts,
            providers,
            executor,
            reporter,
            gate,
        }
    }

    pub fn supports(&self, platform: &str) -> bool {
        self.providers.get(platform).is_some()
    }

    pub fn reporter(&self) -> &StatusReporter {
        &self.reporter
    }

    pub fn live_hosts(&self) -> usize {
        self.hosts.live_hosts()
    }

    pub async fn run(
        &self,
        mut session: ExecutionSession,
        permit: SessionPermit,
        cancel: watch::Receiver<bool>,
    ) -> SessionOutcome {
        let mut reporter = self.reporter.session(session.id);

        let outcome = match self.providers.get(&session.config.platform) {
            Some(provider) => {
                self.drive(&mut session, provider.as_ref(), &mut reporter, cancel)
                    .await
            }
            None => SessionOutcome::failed(FailureReason::UnsupportedPlatform(
                session.config.platform.clone(),
            )),
        };

        // Already emitted unless the session never reached the executor or panicked.
        reporter.finish(&outcome);

        if outcome.mutated_remote() {
            self.gate.mark_executed(&session.signal.instrument);
        }
        permit.release(&outcome);

        info!(
            "Session {} for signal {} finished: {}",
            session.id, session.signal.id, outcome
        );
        outcome
    }

    async fn drive(
        &self,
        session: &mut ExecutionSession,
        provider: &dyn ActionProvider,
        reporter: &mut SessionReporter,
        mut cancel: watch::Receiver<bool>,
    ) -> SessionOutcome {
        // One deadline for acquisition and every step after it.
        let deadline = time::Instant::now() + self.executor.session_timeout();

        reporter.progress(Step::Initializing, "Acquiring execution host");
        let acquired = tokio::select! {
            acquired = self.hosts.acquire(provider) => acquired.map_err(|e| {
                error!("Session {} could not get a host: {}", session.id, e);
                FailureReason::HostUnavailable(e.to_string())
            }),
            _ = cancelled(&mut cancel) => Err(FailureReason::Cancelled),
            _ = time::sleep_until(deadline) => Err(FailureReason::SessionTimeout),
        };
        let handle = match acquired {
            Ok(handle) => handle,
            Err(reason) => {
                warn!("Session {} ended before a host was ready: {}", session.id, reason);
                return SessionOutcome::failed(reason);
            }
        };

        let result = AssertUnwindSafe(self.executor.execute_until(
            session,
            &handle,
            provider,
            reporter,
            cancel,
            deadline,
        ))
        .catch_unwind()
        .await;

        self.hosts.release(handle, provider).await;

        match result {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Session {} panicked: {}", session.id, message);
                SessionOutcome::Failed {
                    reason: FailureReason::Panicked(message),
                    trades_submitted: session.trades_submitted,
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
