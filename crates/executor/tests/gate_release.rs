mod support;

use std::time::Duration;

use tokio::time;

use automation::testing::{HostScript, actions};
use automation::{FailureReason, SessionOutcome};
use common::config::{AutomationConfig, HostConfig};
use common::models::{Direction, StatusEvent};
use executor::{DispatchDecision, SuppressReason};

use support::{Rig, drain, fresh_signal, lookup_for, trade_config};

async fn run_one(script: HostScript) -> (Rig, SessionOutcome, Vec<StatusEvent>) {
    let rig = Rig::new(script, lookup_for(trade_config("EURUSD", 1)));
    let mut status = rig.reporter.subscribe();

    assert!(matches!(
        rig.dispatcher
            .ingest(fresh_signal("1", "EURUSD", Direction::Buy, 1)),
        DispatchDecision::Dispatched { .. }
    ));
    let outcome = rig.dispatcher.join_active().await.unwrap().unwrap();
    let events = drain(&mut status);
    (rig, outcome, events)
}

fn assert_cleaned_up(rig: &Rig, events: &[StatusEvent]) {
    assert_eq!(rig.gate.active_session(), None);
    assert_eq!(rig.runner.live_hosts(), 0);
    assert_eq!(rig.journal.created(), rig.journal.destroyed());
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(matches!(events.last(), Some(StatusEvent::Failed { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_clean_failures_at_every_step_reopen_the_gate() {
    let cases = [
        (
            HostScript {
                create_fails: true,
                ..HostScript::default()
            },
            "host creation",
        ),
        (
            HostScript {
                create_hangs: true,
                ..HostScript::default()
            },
            "hung host creation",
        ),
        (
            HostScript {
                ready: false,
                ..HostScript::default()
            },
            "initializing",
        ),
        (
            HostScript {
                authenticated_after: None,
                ..HostScript::default()
            },
            "authenticating",
        ),
        (
            HostScript {
                instrument_primary: false,
                instrument_fallback: false,
                ..HostScript::default()
            },
            "locating instrument",
        ),
        (
            HostScript {
                order_entry: vec![false],
                ..HostScript::default()
            },
            "executing trades",
        ),
    ];

    for (script, step) in cases {
        let (rig, outcome, events) = run_one(script).await;

        assert!(
            matches!(
                outcome,
                SessionOutcome::Failed {
                    trades_submitted: 0,
                    ..
                }
            ),
            "{}: {:?}",
            step,
            outcome
        );
        assert_cleaned_up(&rig, &events);
        assert!(!rig.gate.is_paused(), "{}: gate stayed paused", step);
    }
}

#[tokio::test(start_paused = true)]
async fn test_panic_before_submit_still_releases_everything() {
    let (rig, outcome, events) = run_one(HostScript {
        panic_on: Some(actions::AUTH_SUBMIT.to_string()),
        ..HostScript::default()
    })
    .await;

    assert!(matches!(
        outcome,
        SessionOutcome::Failed {
            reason: FailureReason::Panicked(_),
            trades_submitted: 0
        }
    ));
    assert_cleaned_up(&rig, &events);
    assert!(!rig.gate.is_paused());
}

#[tokio::test(start_paused = true)]
async fn test_panic_after_submit_keeps_the_quiet_window() {
    let (rig, outcome, events) = run_one(HostScript {
        panic_on: Some(actions::ORDER_CONFIRM.to_string()),
        ..HostScript::default()
    })
    .await;

    assert!(matches!(
        outcome,
        SessionOutcome::Failed {
            reason: FailureReason::Panicked(_),
            trades_submitted: 1
        }
    ));
    assert_cleaned_up(&rig, &events);
    assert!(rig.gate.is_paused());
    time::advance(Duration::from_secs(35)).await;
    assert!(!rig.gate.is_paused());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_fails_the_session_and_tears_down() {
    let rig = Rig::new(
        HostScript {
            authenticated_after: None,
            ..HostScript::default()
        },
        lookup_for(trade_config("EURUSD", 1)),
    );
    let mut status = rig.reporter.subscribe();

    rig.dispatcher
        .ingest(fresh_signal("1", "EURUSD", Direction::Buy, 1));
    time::sleep(Duration::from_secs(3)).await;
    assert!(rig.dispatcher.cancel());

    let outcome = rig.dispatcher.join_active().await.unwrap().unwrap();
    assert_eq!(outcome, SessionOutcome::failed(FailureReason::Cancelled));
    assert_cleaned_up(&rig, &drain(&mut status));
    assert!(!rig.dispatcher.cancel());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_platform_in_config_fails_cleanly() {
    let mut config = trade_config("EURUSD", 1);
    config.platform = "mt4".to_string();
    let rig = Rig::new(HostScript::default(), lookup_for(config));

    assert_eq!(
        rig.dispatcher
            .ingest(fresh_signal("1", "EURUSD", Direction::Buy, 1)),
        DispatchDecision::UnsupportedPlatform("mt4".to_string())
    );
    assert!(!rig.gate.is_paused());
    assert!(rig.journal.created().is_empty());
}

fn hung_creation_rig(session_timeout: Duration) -> Rig {
    Rig::with_timeouts(
        HostScript {
            create_hangs: true,
            ..HostScript::default()
        },
        lookup_for(trade_config("EURUSD", 1)),
        HostConfig {
            create_timeout: Duration::from_secs(3600),
            ..HostConfig::default()
        },
        AutomationConfig {
            session_timeout,
            ..AutomationConfig::default()
        },
    )
}

#[tokio::test(start_paused = true)]
async fn test_cancel_reaches_a_hung_host_creation() {
    let rig = hung_creation_rig(Duration::from_secs(7200));
    let mut status = rig.reporter.subscribe();

    rig.dispatcher
        .ingest(fresh_signal("1", "EURUSD", Direction::Buy, 1));
    time::sleep(Duration::from_secs(5)).await;
    assert!(rig.dispatcher.cancel());

    let outcome = time::timeout(Duration::from_secs(60), rig.dispatcher.join_active())
        .await
        .expect("session did not end after cancel")
        .unwrap()
        .unwrap();
    assert_eq!(outcome, SessionOutcome::failed(FailureReason::Cancelled));
    assert_cleaned_up(&rig, &drain(&mut status));
    assert!(!rig.gate.is_paused());
}

#[tokio::test(start_paused = true)]
async fn test_session_timeout_covers_host_creation() {
    let rig = hung_creation_rig(Duration::from_secs(20));
    let mut status = rig.reporter.subscribe();

    rig.dispatcher
        .ingest(fresh_signal("1", "EURUSD", Direction::Buy, 1));
    let started = time::Instant::now();
    let outcome = rig.dispatcher.join_active().await.unwrap().unwrap();

    assert_eq!(outcome, SessionOutcome::failed(FailureReason::SessionTimeout));
    assert!(started.elapsed() >= Duration::from_secs(20));
    assert!(started.elapsed() < Duration::from_secs(3600));
    assert_cleaned_up(&rig, &drain(&mut status));
    assert!(!rig.gate.is_paused());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_submit_keeps_the_quiet_window() {
    let rig = Rig::new(
        HostScript {
            stall_on: Some(actions::ORDER_SUBMIT.to_string()),
            ..HostScript::default()
        },
        lookup_for(trade_config("EURUSD", 1)),
    );
    let mut status = rig.reporter.subscribe();

    rig.dispatcher
        .ingest(fresh_signal("1", "EURUSD", Direction::Buy, 1));
    time::sleep(Duration::from_secs(30)).await;
    assert_eq!(rig.journal.submits().len(), 1);
    assert!(rig.dispatcher.cancel());

    let outcome = rig.dispatcher.join_active().await.unwrap().unwrap();
    assert_eq!(
        outcome,
        SessionOutcome::Failed {
            reason: FailureReason::Cancelled,
            trades_submitted: 1
        }
    );
    assert_cleaned_up(&rig, &drain(&mut status));
    assert!(rig.gate.is_paused());

    time::advance(Duration::from_secs(35)).await;
    assert!(!rig.gate.is_paused());
    assert!(matches!(
        rig.dispatcher
            .ingest(fresh_signal("2", "EURUSD", Direction::Buy, 1)),
        DispatchDecision::Suppressed(SuppressReason::InstrumentCooldown { .. })
    ));
}
