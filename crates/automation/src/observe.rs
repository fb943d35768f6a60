use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use common::config::StepPolicy;

use crate::error::HostError;
use crate::host::{ActionDescriptor, HostEvent, HostId};
use crate::lifecycle::HostHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Observed { attempts: u32 },
    NotObserved { attempts: u32 },
}

impl Observation {
    pub fn is_observed(&self) -> bool {
        matches!(self, Self::Observed { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Observed { attempts } | Self::NotObserved { attempts } => *attempts,
        }
    }
}

/// Fire-and-poll verification: sends `probe` up to `policy.attempts` times and waits for the
/// host to report the observable as present. Host diagnostics seen meanwhile are logged.
pub async fn await_observable(
    handle: &HostHandle,
    events: &mut broadcast::Receiver<HostEvent>,
    probe: &ActionDescriptor,
    policy: &StepPolicy,
) -> Result<Observation, HostError> {
    let attempts = policy.attempts.max(1);

    for attempt in 1..=attempts {
        let seq = handle.instruct(probe.clone()).await?;
        let deadline = Instant::now() + policy.attempt_timeout;

        loop {
            match time::timeout_at(deadline, next_event(handle.id(), events)).await {
                Err(_) => break,
                Ok(Err(e)) => return Err(e),
                Ok(Ok(HostEvent::Observation { seq: answered, present })) if answered == seq => {
                    if present {
                        return Ok(Observation::Observed { attempts: attempt });
                    }
                    break;
                }
                Ok(Ok(event)) => log_diagnostic(handle.id(), &event),
            }
        }

        debug!(
            "Host {} probe '{}' not observed (attempt {}/{})",
            handle.id(),
            probe.name,
            attempt,
            attempts
        );
        if attempt < attempts {
            time::sleep(policy.interval).await;
        }
    }

    Ok(Observation::NotObserved { attempts })
}

/// Waits up to `timeout` for an event matching `wanted`. Returns false on timeout.
pub async fn await_event<F>(
    host: HostId,
    events: &mut broadcast::Receiver<HostEvent>,
    timeout: Duration,
    wanted: F,
) -> Result<bool, HostError>
where
    F: Fn(&HostEvent) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        match time::timeout_at(deadline, next_event(host, events)).await {
            Err(_) => return Ok(false),
            Ok(Err(e)) => return Err(e),
            Ok(Ok(event)) if wanted(&event) => return Ok(true),
            Ok(Ok(event)) => log_diagnostic(host, &event),
        }
    }
}

async fn next_event(
    host: HostId,
    events: &mut broadcast::Receiver<HostEvent>,
) -> Result<HostEvent, HostError> {
    loop {
        match events.recv().await {
            Ok(event) => return Ok(event),
            Err(RecvError::Lagged(n)) => {
                warn!("Host {} event stream lagged, skipped {} events", host, n);
            }
            Err(RecvError::Closed) => return Err(HostError::EventsClosed(host)),
        }
    }
}

fn log_diagnostic(host: HostId, event: &HostEvent) {
    match event {
        HostEvent::Log { message } => debug!("Host {}: {}", host, message),
        HostEvent::Fault { message } => warn!("Host {} fault: {}", host, message),
        // Late answers to earlier probes and duplicate lifecycle events.
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostFactory;
    use crate::testing::{HostScript, ScriptedHostFactory};

    async fn handle_for(script: HostScript) -> HostHandle {
        let factory = ScriptedHostFactory::new(script);
        let host = factory.create(1).await.unwrap();
        HostHandle::new(1, host)
    }

    #[tokio::test(start_paused = true)]
    async fn test_observed_after_retries() {
        let handle = handle_for(HostScript {
            authenticated_after: Some(3),
            ..HostScript::default()
        })
        .await;
        let mut events = handle.subscribe();
        let policy = StepPolicy::new(5, Duration::from_secs(2), Duration::from_secs(1));

        let observation = await_observable(
            &handle,
            &mut events,
            &ActionDescriptor::new("probe.authenticated"),
            &policy,
        )
        .await
        .unwrap();
        assert_eq!(observation, Observation::Observed { attempts: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_takes_the_whole_budget() {
        let handle = handle_for(HostScript {
            authenticated_after: None,
            ..HostScript::default()
        })
        .await;
        let mut events = handle.subscribe();
        let policy = StepPolicy::new(4, Duration::from_secs(2), Duration::from_secs(1));

        let started = Instant::now();
        let observation = await_observable(
            &handle,
            &mut events,
            &ActionDescriptor::new("probe.authenticated"),
            &policy,
        )
        .await
        .unwrap();

        assert_eq!(observation, Observation::NotObserved { attempts: 4 });
        // Negative answers end an attempt early, so only the intervals elapse.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_host_times_out_each_attempt() {
        let handle = handle_for(HostScript::default()).await;
        let mut events = handle.subscribe();
        let policy = StepPolicy::new(2, Duration::from_secs(2), Duration::from_millis(500));

        let started = Instant::now();
        let observation = await_observable(
            &handle,
            &mut events,
            &ActionDescriptor::new("probe.unanswered"),
            &policy,
        )
        .await
        .unwrap();

        assert_eq!(observation, Observation::NotObserved { attempts: 2 });
        assert_eq!(started.elapsed(), policy.budget());
    }
}
