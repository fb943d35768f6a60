pub mod dedup;
pub mod error;
pub mod remote;
pub mod services;
pub mod sources;
pub mod traits;

pub use dedup::{DedupFilter, DedupLedger, Verdict};
pub use error::IntakeError;
pub use sources::{SignalSink, SignalSource, SourceEvent};
