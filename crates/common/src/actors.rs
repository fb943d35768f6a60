use std::time::Duration;

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle};
use uuid::Uuid;

use crate::models::SourceTag;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorType {
    ForegroundPoller,
    BackgroundPoller,
    PushListener,
    ManualFeed,
}

impl ActorType {
    pub fn for_source(tag: SourceTag) -> Self {
        match tag {
            SourceTag::Foreground => Self::ForegroundPoller,
            SourceTag::Background => Self::BackgroundPoller,
            SourceTag::Push => Self::PushListener,
            SourceTag::Manual => Self::ManualFeed,
        }
    }
}

/// Messages sent from Actors to the Supervisor
pub enum ControlMessage {
    Spawn(Box<dyn Actor + Send + Sync>),
    Heartbeat(Uuid),
    Shutdown(Uuid),
    Error(Uuid, String),
}

impl std::fmt::Debug for ControlMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn(actor) => write!(f, "Spawn({:?})", actor.name()),
            Self::Heartbeat(id) => write!(f, "Heartbeat({})", id),
            Self::Shutdown(id) => write!(f, "Shutdown({})", id),
            Self::Error(id, err) => write!(f, "Error({}, {})", id, err),
        }
    }
}

/// Contract for every restartable service run under the supervisor.
#[async_trait]
pub trait Actor: Send + Sync {
    fn name(&self) -> ActorType;

    fn id(&self) -> Uuid;

    /// Main loop. Must keep the supervisor informed through `ControlMessage::Heartbeat`,
    /// usually by calling [`Actor::spawn_heartbeat`] first.
    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()>;

    fn spawn_heartbeat(&self, supervisor_tx: mpsc::Sender<ControlMessage>) -> JoinHandle<()> {
        let id = self.id();
        tokio::spawn(async move {
            loop {
                if supervisor_tx
                    .send(ControlMessage::Heartbeat(id))
                    .await
                    .is_err()
                {
                    break;
                }
                tokio::time::sleep(HEARTBEAT_INTERVAL).await;
            }
        })
    }
}
