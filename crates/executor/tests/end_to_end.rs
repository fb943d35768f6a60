mod support;

use std::time::Duration;

use tokio::time;

use automation::SessionOutcome;
use automation::testing::{HostScript, actions};
use common::models::{Direction, StatusEvent};
use executor::{DispatchDecision, SuppressReason};
use intake::Verdict;

use support::{Rig, drain, fresh_signal, lookup_any, lookup_for, trade_config};

#[tokio::test(start_paused = true)]
async fn test_signal_to_success_end_to_end() {
    let rig = Rig::new(HostScript::default(), lookup_for(trade_config("EURUSD", 2)));
    let mut status = rig.reporter.subscribe();
    let signal = fresh_signal("42", "EURUSD", Direction::Buy, 5);

    assert_eq!(
        rig.dispatcher.ingest(signal.clone()),
        DispatchDecision::Dispatched { session: 1 }
    );
    assert!(rig.gate.is_paused());

    // Anything arriving mid-session is dropped without touching the ledger.
    assert_eq!(
        rig.dispatcher
            .ingest(fresh_signal("43", "EURUSD", Direction::Sell, 1)),
        DispatchDecision::Paused
    );
    assert!(!rig.filter.has_seen("43"));

    let outcome = rig.dispatcher.join_active().await.unwrap().unwrap();
    assert_eq!(outcome, SessionOutcome::Succeeded { total: 2 });

    let events = drain(&mut status);
    assert_eq!(events.last(), Some(&StatusEvent::Success { session: 1 }));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(events.iter().all(|e| e.session() == 1));

    let submits = rig.journal.submits();
    assert_eq!(submits.len(), 2);
    assert!(submits[0].1.seq < submits[1].1.seq);
    assert!(
        submits
            .iter()
            .all(|(host, command)| *host == 1 && command.action.params["direction"] == "BUY")
    );
    assert_eq!(rig.journal.count(actions::ORDER_OPEN), 2);

    // Paused through the quiet window, open right after it.
    assert!(rig.gate.is_paused());
    time::advance(Duration::from_secs(34)).await;
    assert!(rig.gate.is_paused());
    time::advance(Duration::from_secs(1)).await;
    assert!(!rig.gate.is_paused());

    assert_eq!(rig.runner.live_hosts(), 0);
    assert_eq!(rig.journal.destroyed(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_redelivery_after_resume_is_rejected() {
    let rig = Rig::new(HostScript::default(), lookup_for(trade_config("EURUSD", 1)));
    let signal = fresh_signal("42", "EURUSD", Direction::Buy, 5);

    rig.dispatcher.ingest(signal.clone());
    rig.dispatcher.join_active().await.unwrap();
    time::advance(Duration::from_secs(35)).await;

    assert_eq!(
        rig.dispatcher.ingest(signal),
        DispatchDecision::Rejected(Verdict::RejectAlreadySeen)
    );
    assert!(matches!(
        rig.dispatcher
            .ingest(fresh_signal("44", "eur/usd", Direction::Buy, 1)),
        DispatchDecision::Suppressed(SuppressReason::InstrumentCooldown { .. })
    ));
    assert_eq!(rig.journal.submits().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_sessions_never_share_a_host() {
    let rig = Rig::new(HostScript::default(), lookup_any(1));

    assert!(matches!(
        rig.dispatcher
            .ingest(fresh_signal("1", "EURUSD", Direction::Buy, 1)),
        DispatchDecision::Dispatched { session: 1 }
    ));
    rig.dispatcher.join_active().await.unwrap();
    time::advance(Duration::from_secs(35)).await;

    assert!(matches!(
        rig.dispatcher
            .ingest(fresh_signal("2", "XAUUSD", Direction::Sell, 1)),
        DispatchDecision::Dispatched { session: 2 }
    ));
    rig.dispatcher.join_active().await.unwrap();

    assert_eq!(rig.journal.created(), vec![1, 2]);
    assert_eq!(rig.journal.destroyed(), vec![1, 2]);
    let hosts: Vec<u64> = rig.journal.submits().iter().map(|(h, _)| *h).collect();
    assert_eq!(hosts, vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_partial_session_reports_counts() {
    let rig = Rig::new(
        HostScript {
            order_entry: vec![true, false, true],
            ..HostScript::default()
        },
        lookup_for(trade_config("EURUSD", 3)),
    );
    let mut status = rig.reporter.subscribe();

    rig.dispatcher
        .ingest(fresh_signal("7", "EURUSD", Direction::Sell, 2));
    let outcome = rig.dispatcher.join_active().await.unwrap().unwrap();

    assert_eq!(
        outcome,
        SessionOutcome::PartiallySucceeded {
            succeeded: 2,
            total: 3
        }
    );
    assert_eq!(rig.journal.count(actions::ORDER_OPEN), 3);
    assert_eq!(
        drain(&mut status).last(),
        Some(&StatusEvent::Partial {
            session: 1,
            succeeded: 2,
            total: 3
        })
    );
    assert!(rig.gate.is_paused());
}
