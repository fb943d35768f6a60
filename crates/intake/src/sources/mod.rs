use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use common::models::{Signal, SourceTag};

use crate::error::IntakeError;

pub mod channel;
pub mod polling;
pub mod push;

pub use channel::ChannelSource;
pub use polling::PollingSource;
pub use push::PushSource;

/// What sources push into the single ingestion point.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    Signal(Signal),
    Error { source: SourceTag, reason: String },
}

/// A source's handle on the shared ingestion channel.
#[derive(Debug, Clone)]
pub struct SignalSink {
    tag: SourceTag,
    tx: mpsc::Sender<SourceEvent>,
}

impl SignalSink {
    pub fn new(tag: SourceTag, tx: mpsc::Sender<SourceEvent>) -> Self {
        Self { tag, tx }
    }

    pub fn tag(&self) -> SourceTag {
        self.tag
    }

    pub async fn signal(&self, signal: Signal) -> Result<(), IntakeError> {
        self.tx
            .send(SourceEvent::Signal(signal))
            .await
            .map_err(|_| IntakeError::ChannelClosed)
    }

    pub async fn error(&self, reason: impl Into<String>) -> Result<(), IntakeError> {
        self.tx
            .send(SourceEvent::Error {
                source: self.tag,
                reason: reason.into(),
            })
            .await
            .map_err(|_| IntakeError::ChannelClosed)
    }
}

/// An independent producer of raw signals. Sources know nothing about each other or about
/// what happens downstream of the sink.
#[async_trait]
pub trait SignalSource: Send + Sync {
    fn tag(&self) -> SourceTag;

    /// Produces into `sink` until [`SignalSource::stop`] is called or the sink closes.
    async fn start(&mut self, sink: SignalSink) -> anyhow::Result<()>;

    fn stop(&self);
}

/// Latching stop flag shared between a source and whoever owns it.
#[derive(Debug, Clone)]
pub struct StopSwitch {
    tx: watch::Sender<bool>,
}

impl StopSwitch {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Resolves once the switch is triggered.
    pub async fn triggered(rx: &mut watch::Receiver<bool>) {
        if rx.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for StopSwitch {
    fn default() -> Self {
        Self::new()
    }
}
