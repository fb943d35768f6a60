use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("Signal payload is missing '{0}'")]
    MissingField(&'static str),
    #[error("Signal payload has an invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },
    #[error("Failed to decode signal payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Signal ingestion channel closed")]
    ChannelClosed,
}
