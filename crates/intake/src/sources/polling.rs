use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

use common::models::SourceTag;

use crate::remote::SignalClient;
use crate::sources::{SignalSink, SignalSource, StopSwitch};

/// Periodically lists open signals from an HTTP backend.
pub struct PollingSource {
    tag: SourceTag,
    client: SignalClient,
    interval: Duration,
    stop: StopSwitch,
}

impl PollingSource {
    pub fn foreground(client: SignalClient, interval: Duration) -> Self {
        Self::with_tag(SourceTag::Foreground, client, interval)
    }

    pub fn background(client: SignalClient, interval: Duration) -> Self {
        Self::with_tag(SourceTag::Background, client, interval)
    }

    fn with_tag(tag: SourceTag, client: SignalClient, interval: Duration) -> Self {
        Self {
            tag,
            client,
            interval,
            stop: StopSwitch::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[async_trait]
impl SignalSource for PollingSource {
    fn tag(&self) -> SourceTag {
        self.tag
    }

    async fn start(&mut self, sink: SignalSink) -> anyhow::Result<()> {
        let mut stopped = self.stop.subscribe();
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Polling {} signals every {:?}", self.tag, self.interval);

        loop {
            tokio::select! {
                _ = StopSwitch::triggered(&mut stopped) => {
                    info!("{} poller stopped", self.tag);
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.client.fetch_signals(self.tag).await {
                        Ok(signals) => {
                            for signal in signals {
                                sink.signal(signal).await?;
                            }
                        }
                        Err(e) => {
                            warn!("{} poll failed: {:#}", self.tag, e);
                            sink.error(format!("Poll failed: {:#}", e)).await?;
                        }
                    }
                }
            }
        }
    }

    fn stop(&self) {
        self.stop.trigger();
    }
}
