//! Sources of external entity changes

use crate::BridgeResult;
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// Default buffer of a [`ChannelSource`]
const DEFAULT_BUFFER: usize = 256;

/// A new state reported by the external platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub entity_id: String,
    /// The raw state string, e.g. `"on"` or `"21.5"`
    pub state: String,
}

impl StateChange {
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
        }
    }
}

/// Change feed of the external automation platform
#[async_trait]
pub trait ExternalStateSource: Send + Sync {
    /// Start watching `entity_ids` and hand back the stream of their changes
    async fn subscribe(&self, entity_ids: &[String]) -> BridgeResult<mpsc::Receiver<StateChange>>;
}

/// Source fed by hand through an mpsc sender
///
/// Every change sent is forwarded, watched or not. The receiving end can be
/// taken once.
pub struct ChannelSource {
    sender: mpsc::Sender<StateChange>,
    receiver: Mutex<Option<mpsc::Receiver<StateChange>>>,
    watched: Mutex<Vec<String>>,
}

impl ChannelSource {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        let (sender, receiver) = mpsc::channel(buffer);
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            watched: Mutex::new(Vec::new()),
        }
    }

    /// Sender for pushing changes into the bridge
    pub fn sender(&self) -> mpsc::Sender<StateChange> {
        self.sender.clone()
    }

    /// Entity ids passed to the last `subscribe`
    pub fn watched(&self) -> Vec<String> {
        self.watched
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }
}

impl Default for ChannelSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExternalStateSource for ChannelSource {
    async fn subscribe(&self, entity_ids: &[String]) -> BridgeResult<mpsc::Receiver<StateChange>> {
        let receiver = self
            .receiver
            .lock()
            .ok()
            .and_then(|mut r| r.take())
            .ok_or_else(|| crate::BridgeError::Source("channel source already subscribed".into()))?;

        if let Ok(mut watched) = self.watched.lock() {
            *watched = entity_ids.to_vec();
        }
        debug!(entities = entity_ids.len(), "Channel source subscribed");
        Ok(receiver)
    }
}
