use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use common::actors::{Actor, ActorType, ControlMessage};

use crate::sources::{SignalSink, SignalSource, SourceEvent};

/// Runs one signal source under the supervisor.
pub struct SourceActor {
    id: Uuid,
    source: Box<dyn SignalSource>,
    ingest_tx: mpsc::Sender<SourceEvent>,
}

impl SourceActor {
    pub fn new(source: Box<dyn SignalSource>, ingest_tx: mpsc::Sender<SourceEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            ingest_tx,
        }
    }
}

#[async_trait]
impl Actor for SourceActor {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> ActorType {
        ActorType::for_source(self.source.tag())
    }

    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        let heartbeat_handle = self.spawn_heartbeat(supervisor_tx.clone());
        let tag = self.source.tag();
        let sink = SignalSink::new(tag, self.ingest_tx.clone());

        info!("Starting {} signal source", tag);
        let result = self.source.start(sink).await;
        heartbeat_handle.abort();

        match result {
            Ok(()) => {
                info!("{} signal source finished", tag);
                supervisor_tx.send(ControlMessage::Shutdown(self.id)).await?;
                Ok(())
            }
            Err(e) => {
                error!("{} signal source failed: {:#}", tag, e);
                supervisor_tx
                    .send(ControlMessage::Error(self.id, format!("{:#}", e)))
                    .await?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::ChannelSource;
    use common::models::{Direction, Signal, SourceTag};

    #[tokio::test]
    async fn test_finished_source_reports_shutdown() {
        let (source, feed) = ChannelSource::new(4);
        let (ingest_tx, mut ingest_rx) = mpsc::channel(4);
        let (supervisor_tx, mut supervisor_rx) = mpsc::channel(16);

        let mut actor = SourceActor::new(Box::new(source), ingest_tx);
        let actor_id = actor.id();
        assert_eq!(actor.name(), ActorType::ManualFeed);

        feed.send(Signal::new("9", "GBPUSD", Direction::Sell, SourceTag::Manual))
            .await
            .unwrap();
        drop(feed);

        actor.run(supervisor_tx).await.unwrap();

        assert!(matches!(ingest_rx.recv().await, Some(SourceEvent::Signal(_))));

        let mut saw_shutdown = false;
        while let Ok(msg) = supervisor_rx.try_recv() {
            if let ControlMessage::Shutdown(id) = msg {
                assert_eq!(id, actor_id);
                saw_shutdown = true;
            }
        }
        assert!(saw_shutdown);
    }
}
