use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;
use tracing::{debug, info, warn};

use common::config::HostConfig;

use crate::error::HostError;
use crate::host::{ActionDescriptor, ExecutionHost, HostCommand, HostEvent, HostFactory, HostId};
use crate::observe::await_event;
use crate::provider::ActionProvider;

/// Exclusive access to one freshly created host. Not `Clone`, never pooled; `release`
/// consumes it.
pub struct HostHandle {
    id: HostId,
    host: Box<dyn ExecutionHost>,
    seq: AtomicU64,
    tainted: AtomicBool,
    live: Option<Arc<AtomicUsize>>,
}

impl HostHandle {
    pub fn new(id: HostId, host: Box<dyn ExecutionHost>) -> Self {
        Self {
            id,
            host,
            seq: AtomicU64::new(0),
            tainted: AtomicBool::new(false),
            live: None,
        }
    }

    /// The handle counts itself in `live` until dropped.
    fn counted(id: HostId, host: Box<dyn ExecutionHost>, live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            id,
            host,
            seq: AtomicU64::new(0),
            tainted: AtomicBool::new(false),
            live: Some(live.clone()),
        }
    }

    pub fn id(&self) -> HostId {
        self.id
    }

    /// True once the host has been given anything beyond its own reset.
    pub fn is_tainted(&self) -> bool {
        self.tainted.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.host.subscribe()
    }

    pub async fn load(&self, target: &str) -> Result<(), HostError> {
        self.tainted.store(true, Ordering::SeqCst);
        self.host.load(target).await
    }

    /// Sends one action and returns the sequence number it was sent under.
    pub async fn instruct(&self, action: ActionDescriptor) -> Result<u64, HostError> {
        self.tainted.store(true, Ordering::SeqCst);
        self.send(action).await
    }

    pub async fn instruct_all(&self, actions: Vec<ActionDescriptor>) -> Result<(), HostError> {
        for action in actions {
            self.instruct(action).await?;
        }
        Ok(())
    }

    async fn send(&self, action: ActionDescriptor) -> Result<u64, HostError> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.host.send(HostCommand { seq, action }).await?;
        Ok(seq)
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        if let Some(live) = &self.live {
            live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl std::fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostHandle")
            .field("id", &self.id)
            .field("tainted", &self.is_tainted())
            .finish()
    }
}

/// Creates, resets and destroys execution hosts. Every session gets a brand-new host.
pub struct HostManager {
    factory: Arc<dyn HostFactory>,
    next_id: AtomicU64,
    live: Arc<AtomicUsize>,
    create_timeout: Duration,
    clear_timeout: Duration,
    destroy_timeout: Duration,
}

impl HostManager {
    pub fn new(factory: Arc<dyn HostFactory>, config: &HostConfig) -> Self {
        Self {
            factory,
            next_id: AtomicU64::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            create_timeout: config.create_timeout,
            clear_timeout: config.clear_timeout,
            destroy_timeout: config.destroy_timeout,
        }
    }

    /// Bounded by `create_timeout + clear_timeout + destroy_timeout`. Dropping the future
    /// part-way drops any host it created.
    pub async fn acquire(&self, provider: &dyn ActionProvider) -> Result<HostHandle, HostError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let host = time::timeout(self.create_timeout, self.factory.create(id))
            .await
            .map_err(|_| {
                warn!(
                    "Host {} was not created within {:?}",
                    id, self.create_timeout
                );
                HostError::CreateTimeout(id)
            })??;
        let handle = HostHandle::counted(id, host, &self.live);

        if let Err(e) = self.reset(&handle, provider).await {
            warn!("Host {} failed its initial reset: {}", id, e);
            self.destroy(handle).await;
            return Err(e);
        }

        info!("Host {} acquired for {}", id, provider.platform());
        Ok(handle)
    }

    /// Clears all host state and waits for the acknowledgement.
    pub async fn reset(
        &self,
        handle: &HostHandle,
        provider: &dyn ActionProvider,
    ) -> Result<(), HostError> {
        let id = handle.id();
        let mut events = handle.subscribe();

        let cleared = time::timeout(self.clear_timeout, async {
            handle.send(provider.clear_all_state()).await?;
            await_event(id, &mut events, self.clear_timeout, |e| {
                matches!(e, HostEvent::StateCleared)
            })
            .await
        })
        .await;

        match cleared {
            Ok(Ok(true)) => {
                debug!("Host {} state cleared", id);
                Ok(())
            }
            Ok(Ok(false)) | Err(_) => Err(HostError::ResetTimeout(id)),
            Ok(Err(e)) => Err(e),
        }
    }

    /// Best-effort clear, then destroy. Destruction happens whatever the clear did.
    pub async fn release(&self, handle: HostHandle, provider: &dyn ActionProvider) {
        if let Err(e) = self.reset(&handle, provider).await {
            warn!("Host {} could not be cleared before teardown: {}", handle.id(), e);
        }
        self.destroy(handle).await;
    }

    async fn destroy(&self, handle: HostHandle) {
        let id = handle.id();
        match time::timeout(self.destroy_timeout, handle.host.destroy()).await {
            Ok(Ok(())) => info!("Host {} destroyed", id),
            Ok(Err(e)) => warn!("Host {} destroy reported an error: {}", id, e),
            Err(_) => warn!(
                "Host {} did not finish destroying within {:?}",
                id, self.destroy_timeout
            ),
        }
    }

    pub fn live_hosts(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}
