use common::models::SourceTag;

use crate::error::IntakeError;

/// Wire payloads that decode into a domain model once the delivering source is known.
pub trait RemoteResponse<T> {
    fn to_model(&self, source: SourceTag) -> Result<T, IntakeError>;
}
