use thiserror::Error;

use automation::SessionId;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Session {session} task did not complete: {reason}")]
    SessionTask { session: SessionId, reason: String },
    #[error("Ingestion channel closed")]
    ChannelClosed,
}
