use std::{collections::HashMap, time::Duration};
use tracing::{error, info, warn};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{self, Instant},
};
use uuid::Uuid;

use common::actors::{Actor, ActorType, ControlMessage};

type ActorFactory = Box<dyn Fn() -> Box<dyn Actor> + Send + Sync>;

const CHECK_INTERVAL: Duration = Duration::from_secs(1);
const PULSE_TIMEOUT: Duration = Duration::from_secs(3);

pub struct Supervisor {
    actor_factories: HashMap<ActorType, ActorFactory>,
    running: HashMap<Uuid, ActorType>,
    pulses: HashMap<Uuid, Instant>,
    handles: HashMap<Uuid, JoinHandle<()>>,
    tx: mpsc::Sender<ControlMessage>,
    rx: mpsc::Receiver<ControlMessage>,
}

impl Supervisor {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<ControlMessage>(512);
        Self {
            actor_factories: HashMap::new(),
            running: HashMap::new(),
            pulses: HashMap::new(),
            handles: HashMap::new(),
            tx,
            rx,
        }
    }

    pub fn sender(&self) -> mpsc::Sender<ControlMessage> {
        self.tx.clone()
    }

    pub fn register_actor(&mut self, actor_type: ActorType, factory: ActorFactory) {
        self.actor_factories.insert(actor_type, factory);
    }

    pub fn running(&self) -> usize {
        self.running.len()
    }

    /// Spawns every registered actor and keeps them alive until `shutdown` fires.
    pub async fn start(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut check_interval = time::interval(CHECK_INTERVAL);

        let actors: Vec<ActorType> = self.actor_factories.keys().copied().collect();
        for actor_type in actors {
            self.spawn_from_factory(actor_type);
        }

        loop {
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,

                Some(msg) = self.rx.recv() => self.handle_message(msg),

                _ = check_interval.tick() => {
                    let dead_timeout = Instant::now() - PULSE_TIMEOUT;

                    let dead_actors: Vec<Uuid> = self
                        .pulses
                        .iter()
                        .filter(|(_, last)| **last < dead_timeout)
                        .map(|(id, _)| *id)
                        .collect();

                    for id in dead_actors {
                        let actor_type = self.forget(id);
                        warn!("{:?} is unresponsive!", actor_type);
                        if let Some(actor_type) = actor_type {
                            self.spawn_from_factory(actor_type);
                        }
                    }
                }
            }
        }

        info!("Supervisor stopping {} actors", self.handles.len());
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
        self.running.clear();
        self.pulses.clear();
    }

    fn handle_message(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::Heartbeat(id) => {
                if self.running.contains_key(&id) {
                    self.pulses.insert(id, Instant::now());
                }
            }
            ControlMessage::Spawn(actor) => {
                let actor_type = actor.name();
                info!("Spawning dynamic {:?} actor", actor_type);
                self.spawn(actor_type, actor);
            }
            ControlMessage::Shutdown(id) => {
                let actor_type = self.forget(id);
                warn!("{:?} is shutting down gracefully.", actor_type);
            }
            ControlMessage::Error(id, error_msg) => {
                let actor_type = self.running.get(&id).copied();
                error!("Actor {:?} reported error: {}", actor_type, error_msg);
            }
        }
    }

    /// Drops all bookkeeping for `id` and aborts its task.
    fn forget(&mut self, id: Uuid) -> Option<ActorType> {
        self.pulses.remove(&id);
        if let Some(handle) = self.handles.remove(&id) {
            handle.abort();
        }
        self.running.remove(&id)
    }

    fn spawn_from_factory(&mut self, actor_type: ActorType) {
        let Some(factory) = self.actor_factories.get(&actor_type) else {
            return;
        };
        let actor = factory();
        self.spawn(actor_type, actor);
    }

    fn spawn(&mut self, actor_type: ActorType, mut actor: Box<dyn Actor>) {
        let id = actor.id();
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = actor.run(tx).await {
                error!("Actor {:?} crashed: {}", actor_type, e);
            }
        });
        self.handles.insert(id, handle);
        self.running.insert(id, actor_type);
        self.pulses.insert(id, Instant::now());
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Never sends a heartbeat, so the supervisor keeps replacing it.
    struct SilentActor {
        id: Uuid,
        starts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Actor for SilentActor {
        fn name(&self) -> ActorType {
            ActorType::ForegroundPoller
        }

        fn id(&self) -> Uuid {
            self.id
        }

        async fn run(&mut self, _tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_actor_is_restarted() {
        let starts = Arc::new(AtomicUsize::new(0));
        let mut supervisor = Supervisor::new();
        let counter = starts.clone();
        supervisor.register_actor(
            ActorType::ForegroundPoller,
            Box::new(move || -> Box<dyn Actor> {
                Box::new(SilentActor {
                    id: Uuid::new_v4(),
                    starts: counter.clone(),
                })
            }),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            supervisor.start(shutdown_rx).await;
            supervisor
        });

        time::sleep(Duration::from_secs(5)).await;
        shutdown_tx.send_replace(true);
        let supervisor = task.await.unwrap();

        assert!(starts.load(Ordering::SeqCst) >= 2);
        assert_eq!(supervisor.running(), 0);
    }
}
