use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

use common::models::{Direction, Signal, StatusEvent, TradeConfig};

use crate::error::FailureReason;
use crate::host::HostId;

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Initializing,
    Authenticating,
    LocatingInstrument,
    ExecutingTrades,
    Reporting,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "Initializing",
            Self::Authenticating => "Authenticating",
            Self::LocatingInstrument => "LocatingInstrument",
            Self::ExecutingTrades => "ExecutingTrades",
            Self::Reporting => "Reporting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeResult {
    pub index: u32,
    pub submitted: bool,
    pub error: Option<String>,
}

impl TradeResult {
    pub fn succeeded(index: u32) -> Self {
        Self {
            index,
            submitted: true,
            error: None,
        }
    }

    pub fn failed(index: u32, submitted: bool, error: impl Into<String>) -> Self {
        Self {
            index,
            submitted,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Pending,
    Succeeded {
        total: u32,
    },
    PartiallySucceeded {
        succeeded: u32,
        total: u32,
    },
    Failed {
        reason: FailureReason,
        trades_submitted: u32,
    },
}

impl SessionOutcome {
    pub fn failed(reason: FailureReason) -> Self {
        Self::Failed {
            reason,
            trades_submitted: 0,
        }
    }

    /// Aggregates per-trade results of the trade loop.
    pub fn from_trades(trades: &[TradeResult]) -> Self {
        let total = trades.len() as u32;
        let succeeded = trades.iter().filter(|t| t.is_success()).count() as u32;
        let submitted = trades.iter().filter(|t| t.submitted).count() as u32;

        match succeeded {
            0 => Self::Failed {
                reason: FailureReason::NoTradesSucceeded,
                trades_submitted: submitted,
            },
            n if n == total => Self::Succeeded { total },
            n => Self::PartiallySucceeded {
                succeeded: n,
                total,
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Whether the remote surface may carry an order placed by this session.
    pub fn mutated_remote(&self) -> bool {
        match self {
            Self::Succeeded { .. } | Self::PartiallySucceeded { .. } => true,
            Self::Failed {
                trades_submitted, ..
            } => *trades_submitted > 0,
            Self::Pending => false,
        }
    }

    pub fn to_status_event(&self, session: SessionId) -> Option<StatusEvent> {
        match self {
            Self::Pending => None,
            Self::Succeeded { .. } => Some(StatusEvent::Success { session }),
            Self::PartiallySucceeded { succeeded, total } => Some(StatusEvent::Partial {
                session,
                succeeded: *succeeded,
                total: *total,
            }),
            Self::Failed { reason, .. } => Some(StatusEvent::Failed {
                session,
                reason: reason.to_string(),
            }),
        }
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Succeeded { total } => write!(f, "succeeded ({}/{})", total, total),
            Self::PartiallySucceeded { succeeded, total } => {
                write!(f, "partially succeeded ({}/{})", succeeded, total)
            }
            Self::Failed {
                reason,
                trades_submitted,
            } => write!(
                f,
                "failed: {} ({} trades submitted)",
                reason, trades_submitted
            ),
        }
    }
}

/// One attempt to turn an admitted signal into `order_count` trades.
#[derive(Debug, Clone)]
pub struct ExecutionSession {
    pub id: SessionId,
    pub signal: Signal,
    pub config: TradeConfig,
    pub direction: Direction,
    pub current_step: Step,
    pub attempts: HashMap<Step, u32>,
    pub started_at: DateTime<Utc>,
    pub host_id: Option<HostId>,
    pub trades: Vec<TradeResult>,
    pub trades_submitted: u32,
    pub outcome: SessionOutcome,
}

impl ExecutionSession {
    pub fn new(id: SessionId, signal: Signal, config: TradeConfig, direction: Direction) -> Self {
        Self {
            id,
            signal,
            config,
            direction,
            current_step: Step::Initializing,
            attempts: HashMap::new(),
            started_at: Utc::now(),
            host_id: None,
            trades: Vec::new(),
            trades_submitted: 0,
            outcome: SessionOutcome::Pending,
        }
    }

    pub fn enter(&mut self, step: Step) {
        self.current_step = step;
    }

    pub fn add_attempts(&mut self, step: Step, attempts: u32) {
        *self.attempts.entry(step).or_insert(0) += attempts;
    }

    pub fn attempts_for(&self, step: Step) -> u32 {
        self.attempts.get(&step).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregation_of_trade_results() {
        let mixed = [
            TradeResult::succeeded(1),
            TradeResult::failed(2, false, "order entry did not open"),
            TradeResult::succeeded(3),
        ];
        assert_eq!(
            SessionOutcome::from_trades(&mixed),
            SessionOutcome::PartiallySucceeded {
                succeeded: 2,
                total: 3
            }
        );

        let all = [TradeResult::succeeded(1), TradeResult::succeeded(2)];
        assert_eq!(
            SessionOutcome::from_trades(&all),
            SessionOutcome::Succeeded { total: 2 }
        );

        let none = [TradeResult::failed(1, false, "x")];
        let outcome = SessionOutcome::from_trades(&none);
        assert!(matches!(
            outcome,
            SessionOutcome::Failed {
                reason: FailureReason::NoTradesSucceeded,
                trades_submitted: 0
            }
        ));
        assert!(!outcome.mutated_remote());
    }

    #[test]
    fn test_failure_after_submit_counts_as_mutation() {
        let outcome = SessionOutcome::Failed {
            reason: FailureReason::Cancelled,
            trades_submitted: 1,
        };
        assert!(outcome.mutated_remote());
        assert!(outcome.is_terminal());
        assert!(!SessionOutcome::Pending.is_terminal());
    }

    #[test]
    fn test_terminal_status_events() {
        assert_eq!(
            SessionOutcome::Succeeded { total: 2 }.to_status_event(7),
            Some(StatusEvent::Success { session: 7 })
        );
        assert_eq!(
            SessionOutcome::failed(FailureReason::InstrumentNotFound("EURUSD".into()))
                .to_status_event(7),
            Some(StatusEvent::Failed {
                session: 7,
                reason: "instrument 'EURUSD' not found".to_string()
            })
        );
        assert_eq!(SessionOutcome::Pending.to_status_event(7), None);
    }
}
