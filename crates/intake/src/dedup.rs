use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use common::config::DedupConfig;
use common::models::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    RejectAlreadySeen,
    RejectStale { age: Duration },
    RejectInvalidTimestamp,
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Bounded set of accepted signal ids, oldest evicted first.
#[derive(Debug)]
pub struct DedupLedger {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
    retain: usize,
}

impl DedupLedger {
    pub fn new(capacity: usize, retain: usize) -> Self {
        let retain = retain.clamp(1, capacity.max(1));
        Self {
            seen: HashSet::with_capacity(capacity + 1),
            order: VecDeque::with_capacity(capacity + 1),
            capacity,
            retain,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Returns false when the id was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if !self.seen.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());

        if self.order.len() > self.capacity {
            let before = self.order.len();
            while self.order.len() > self.retain {
                if let Some(oldest) = self.order.pop_front() {
                    self.seen.remove(&oldest);
                }
            }
            debug!(
                "Dedup ledger trimmed from {} to {} entries",
                before,
                self.order.len()
            );
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Exactly-once, age-bounded acceptance of raw signals, shared by every source.
#[derive(Debug)]
pub struct DedupFilter {
    ledger: Mutex<DedupLedger>,
    staleness_threshold: Duration,
}

impl DedupFilter {
    pub fn new(config: &DedupConfig) -> Self {
        Self {
            ledger: Mutex::new(DedupLedger::new(
                config.ledger_capacity,
                config.ledger_retain,
            )),
            staleness_threshold: config.staleness_threshold,
        }
    }

    pub fn evaluate(&self, signal: &Signal) -> Verdict {
        self.evaluate_at(signal, Utc::now())
    }

    pub fn evaluate_at(&self, signal: &Signal, now: DateTime<Utc>) -> Verdict {
        let Some(freshest) = signal.freshest_timestamp() else {
            debug!(
                "Signal {} from {} has no usable timestamp",
                signal.id, signal.source
            );
            return Verdict::RejectInvalidTimestamp;
        };

        // A source clock running ahead of ours yields a negative age; count it as fresh.
        let age = (now - freshest).to_std().unwrap_or(Duration::ZERO);
        if age > self.staleness_threshold {
            debug!(
                "Signal {} from {} is stale ({:.1}s old)",
                signal.id,
                signal.source,
                age.as_secs_f64()
            );
            return Verdict::RejectStale { age };
        }

        let mut ledger = self.ledger.lock();
        if !ledger.insert(&signal.id) {
            debug!("Signal {} from {} already seen", signal.id, signal.source);
            return Verdict::RejectAlreadySeen;
        }
        Verdict::Accept
    }

    pub fn has_seen(&self, id: &str) -> bool {
        self.ledger.lock().contains(id)
    }

    pub fn ledger_len(&self) -> usize {
        self.ledger.lock().len()
    }
}
