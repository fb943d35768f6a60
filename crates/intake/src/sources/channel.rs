use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use common::models::{Signal, SourceTag};

use crate::sources::{SignalSink, SignalSource, StopSwitch};

/// In-process source fed through an mpsc sender, for manual injection.
pub struct ChannelSource {
    rx: mpsc::Receiver<Signal>,
    stop: StopSwitch,
}

impl ChannelSource {
    pub fn new(capacity: usize) -> (Self, mpsc::Sender<Signal>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                rx,
                stop: StopSwitch::new(),
            },
            tx,
        )
    }
}

#[async_trait]
impl SignalSource for ChannelSource {
    fn tag(&self) -> SourceTag {
        SourceTag::Manual
    }

    async fn start(&mut self, sink: SignalSink) -> anyhow::Result<()> {
        let mut stopped = self.stop.subscribe();
        loop {
            tokio::select! {
                _ = StopSwitch::triggered(&mut stopped) => break,
                next = self.rx.recv() => match next {
                    Some(signal) => sink.signal(signal).await?,
                    None => break,
                },
            }
        }
        info!("Manual signal feed closed");
        Ok(())
    }

    fn stop(&self) {
        self.stop.trigger();
    }
}
