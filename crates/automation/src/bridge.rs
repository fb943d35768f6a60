use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::HostError;
use crate::host::{ExecutionHost, HostCommand, HostEvent, HostFactory, HostId};

type BridgeSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeFrame<'a> {
    Load { target: &'a str },
    Command(&'a HostCommand),
    Destroy,
}

/// Hosts living in an external automation sidecar, one WebSocket connection per host.
#[derive(Debug, Clone)]
pub struct BridgeHostFactory {
    base: Url,
}

impl BridgeHostFactory {
    pub fn new(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            base: Url::parse(url)?,
        })
    }

    fn url_for(&self, id: HostId) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut().append_pair("host", &id.to_string());
        url
    }
}

#[async_trait]
impl HostFactory for BridgeHostFactory {
    async fn create(&self, id: HostId) -> Result<Box<dyn ExecutionHost>, HostError> {
        let url = self.url_for(id);
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| HostError::Create {
                id,
                reason: e.to_string(),
            })?;
        info!("Bridge connected for host {}", id);

        let (write, read) = ws_stream.split();
        let (events, _) = broadcast::channel(256);
        let reader = tokio::spawn(read_events(id, read, events.clone()));

        Ok(Box::new(BridgeHost {
            id,
            writer: Mutex::new(write),
            events,
            reader,
        }))
    }
}

pub struct BridgeHost {
    id: HostId,
    writer: Mutex<SplitSink<BridgeSocket, Message>>,
    events: broadcast::Sender<HostEvent>,
    reader: JoinHandle<()>,
}

impl BridgeHost {
    async fn send_frame(&self, frame: &BridgeFrame<'_>) -> Result<(), HostError> {
        let payload = serde_json::to_string(frame).map_err(|e| HostError::Send {
            id: self.id,
            reason: e.to_string(),
        })?;
        self.writer
            .lock()
            .await
            .send(Message::Text(payload.into()))
            .await
            .map_err(|_| HostError::Disconnected(self.id))
    }
}

#[async_trait]
impl ExecutionHost for BridgeHost {
    fn id(&self) -> HostId {
        self.id
    }

    async fn load(&self, target: &str) -> Result<(), HostError> {
        self.send_frame(&BridgeFrame::Load { target })
            .await
            .map_err(|e| HostError::Load {
                id: self.id,
                reason: e.to_string(),
            })
    }

    async fn send(&self, command: HostCommand) -> Result<(), HostError> {
        self.send_frame(&BridgeFrame::Command(&command)).await
    }

    fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    async fn destroy(&self) -> Result<(), HostError> {
        let result = self.send_frame(&BridgeFrame::Destroy).await;
        let _ = self.writer.lock().await.close().await;
        self.reader.abort();
        result
    }
}

impl Drop for BridgeHost {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_events(
    id: HostId,
    mut read: SplitStream<BridgeSocket>,
    events: broadcast::Sender<HostEvent>,
) {
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<HostEvent>(text.as_str()) {
                Ok(event) => {
                    let _ = events.send(event);
                }
                Err(e) => warn!("Host {} sent an unreadable frame: {}", id, e),
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!("Bridge error for host {}: {}", id, e);
                break;
            }
            _ => {}
        }
    }
    debug!("Bridge connection for host {} closed", id);
    let _ = events.send(HostEvent::Fault {
        message: "bridge connection closed".to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ActionDescriptor;
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_frames_round_trip_through_the_sidecar() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let sidecar = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut received = Vec::new();
            while let Some(Ok(msg)) = ws.next().await {
                let Message::Text(text) = msg else { continue };
                let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                let reply = match frame["type"].as_str() {
                    Some("load") => Some(json!({ "type": "ready" })),
                    Some("command") => Some(json!({
                        "type": "observation", "seq": frame["seq"], "present": true
                    })),
                    _ => None,
                };
                let done = frame["type"] == "destroy";
                received.push(frame);
                if let Some(reply) = reply {
                    ws.send(Message::Text(reply.to_string().into())).await.unwrap();
                }
                if done {
                    break;
                }
            }
            received
        });

        let factory = BridgeHostFactory::new(&format!("ws://{}/hosts", addr)).unwrap();
        let host = factory.create(7).await.unwrap();
        let mut events = host.subscribe();

        host.load("https://terminal.example").await.unwrap();
        assert_eq!(events.recv().await.unwrap(), HostEvent::Ready);

        host.send(HostCommand {
            seq: 1,
            action: ActionDescriptor::new("exists").with_param("selector", ".account"),
        })
        .await
        .unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            HostEvent::Observation { seq: 1, present: true }
        );

        host.destroy().await.unwrap();
        let received = sidecar.await.unwrap();
        assert_eq!(received[0], json!({ "type": "load", "target": "https://terminal.example" }));
        assert_eq!(
            received[1],
            json!({ "type": "command", "seq": 1, "name": "exists", "params": { "selector": ".account" } })
        );
        assert_eq!(received[2], json!({ "type": "destroy" }));
    }

    #[test]
    fn test_host_id_is_passed_in_the_query() {
        let factory = BridgeHostFactory::new("ws://127.0.0.1:9000/hosts").unwrap();
        assert_eq!(
            factory.url_for(12).as_str(),
            "ws://127.0.0.1:9000/hosts?host=12"
        );
    }
}
