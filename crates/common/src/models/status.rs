use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User-observable progress of execution sessions. Every session ends with exactly one
/// terminal variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    Progress {
        session: u64,
        step: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    Success {
        session: u64,
    },
    Partial {
        session: u64,
        succeeded: u32,
        total: u32,
    },
    Failed {
        session: u64,
        reason: String,
    },
}

impl StatusEvent {
    pub fn session(&self) -> u64 {
        match self {
            Self::Progress { session, .. }
            | Self::Success { session }
            | Self::Partial { session, .. }
            | Self::Failed { session, .. } => *session,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}
