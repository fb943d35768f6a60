use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use common::models::SourceTag;

use crate::remote::decode_signals;
use crate::sources::{SignalSink, SignalSource, StopSwitch};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Listens on a WebSocket that pushes signals as JSON text frames.
pub struct PushSource {
    url: String,
    reconnect_delay: Duration,
    stop: StopSwitch,
}

impl PushSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: RECONNECT_DELAY,
            stop: StopSwitch::new(),
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    async fn forward(text: &str, sink: &SignalSink) -> anyhow::Result<()> {
        let decoded = match decode_signals(text, SourceTag::Push) {
            Ok(decoded) => decoded,
            Err(e) => {
                sink.error(format!("Unknown socket payload: {}", e)).await?;
                return Ok(());
            }
        };

        for result in decoded {
            match result {
                Ok(signal) => sink.signal(signal).await?,
                Err(e) => warn!("Skipping malformed pushed signal: {}", e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SignalSource for PushSource {
    fn tag(&self) -> SourceTag {
        SourceTag::Push
    }

    async fn start(&mut self, sink: SignalSink) -> anyhow::Result<()> {
        let mut stopped = self.stop.subscribe();

        loop {
            info!("Connecting to: {}", self.url);

            let connection = tokio::select! {
                _ = StopSwitch::triggered(&mut stopped) => return Ok(()),
                connection = tokio_tungstenite::connect_async(self.url.as_str()) => connection,
            };

            match connection {
                Ok((ws_stream, _)) => {
                    let (mut write, mut read) = ws_stream.split();

                    loop {
                        let msg = tokio::select! {
                            _ = StopSwitch::triggered(&mut stopped) => {
                                let _ = write.send(Message::Close(None)).await;
                                info!("Push listener stopped");
                                return Ok(());
                            }
                            msg = read.next() => msg,
                        };

                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                Self::forward(text.as_str(), &sink).await?;
                            }
                            Some(Ok(Message::Ping(pg))) => {
                                write.send(Message::Pong(pg)).await?;
                                debug!("Ping - Pong message sent to websocket.");
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Close message received");
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error: {}", e);
                                sink.error(format!("WebSocket error: {}", e)).await?;
                                break;
                            }
                            Some(Ok(_)) => continue,
                        }
                    }
                }
                Err(e) => {
                    error!(
                        "Connection failed: {}. Retrying in {:?}...",
                        e, self.reconnect_delay
                    );
                    sink.error(format!("Connection failed: {}", e)).await?;
                }
            }

            tokio::select! {
                _ = StopSwitch::triggered(&mut stopped) => return Ok(()),
                _ = time::sleep(self.reconnect_delay) => {}
            }
        }
    }

    fn stop(&self) {
        self.stop.trigger();
    }
}
