use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use common::models::StatusEvent;

use crate::session::{SessionId, SessionOutcome, Step};

/// Fan-out of status events to whoever is listening (UI, notifier, tests).
#[derive(Debug, Clone)]
pub struct StatusReporter {
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusReporter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: StatusEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn session(&self, session: SessionId) -> SessionReporter {
        SessionReporter {
            session,
            reporter: self.clone(),
            finished: false,
        }
    }
}

/// Per-session view of the reporter; emits at most one terminal event.
#[derive(Debug)]
pub struct SessionReporter {
    session: SessionId,
    reporter: StatusReporter,
    finished: bool,
}

impl SessionReporter {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn progress(&self, step: Step, message: impl Into<String>) {
        let message = message.into();
        debug!("Session {} [{}] {}", self.session, step, message);
        self.reporter.publish(StatusEvent::Progress {
            session: self.session,
            step: step.to_string(),
            message,
            timestamp: Utc::now(),
        });
    }

    /// Emits the terminal event for `outcome`. Returns false if one was already emitted or the
    /// outcome is still pending.
    pub fn finish(&mut self, outcome: &SessionOutcome) -> bool {
        if self.finished {
            return false;
        }
        let Some(event) = outcome.to_status_event(self.session) else {
            return false;
        };
        self.finished = true;
        info!("Session {} {}", self.session, outcome);
        self.reporter.publish(event);
        true
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
