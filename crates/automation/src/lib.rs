pub mod bridge;
pub mod error;
pub mod executor;
pub mod host;
pub mod lifecycle;
pub mod observe;
pub mod provider;
pub mod reporter;
pub mod session;
pub mod vocabulary;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bridge::BridgeHostFactory;
pub use error::{FailureReason, HostError};
pub use executor::{StepExecutor, cancelled};
pub use host::{ActionDescriptor, ExecutionHost, HostCommand, HostEvent, HostFactory, HostId};
pub use lifecycle::{HostHandle, HostManager};
pub use observe::{Observation, await_observable};
pub use provider::{ActionProvider, OrderField, ProviderRegistry};
pub use reporter::{SessionReporter, StatusReporter};
pub use session::{ExecutionSession, SessionId, SessionOutcome, Step, TradeResult};
pub use vocabulary::VocabularyProvider;
