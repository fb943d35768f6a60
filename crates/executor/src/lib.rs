pub mod actors;
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod services;

pub use dispatcher::{DispatchDecision, Dispatcher};
pub use error::DispatchError;
pub use gate::{Admission, CooldownState, ExecutionGate, SessionPermit, SuppressReason};
