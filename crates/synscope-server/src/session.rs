//! Latest viewer state plus the broadcaster that pushes it to viewers

use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use synscope_core::ViewerState;

const CHANNEL_CAPACITY: usize = 64;

/// The one viewer session the server hosts. Transport tasks only read the
/// current snapshot and subscribe; the controller stores and publishes.
pub struct Session {
    current: RwLock<Option<ViewerState>>,
    tx: broadcast::Sender<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Session {
            current: RwLock::new(None),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub async fn current(&self) -> Option<ViewerState> {
        self.current.read().await.clone()
    }

    /// Record a snapshot without waking viewers.
    pub async fn store(&self, state: ViewerState) {
        *self.current.write().await = Some(state);
    }

    /// Record a snapshot and send it to every connected viewer. Returns how
    /// many viewers were woken.
    pub async fn publish(&self, state: ViewerState) -> anyhow::Result<usize> {
        let msg = serde_json::to_string(&state)?;
        *self.current.write().await = Some(state);
        // no subscribers is fine: the snapshot is sent on connect
        let woken = self.tx.send(msg).unwrap_or(0);
        debug!("Published viewer state to {} connection(s)", woken);
        Ok(woken)
    }
}
