//! External state bridge
//!
//! Keeps internal states bound to external entities (`bind: ha:<entity>`)
//! in step with the platform. Each change is coerced to the state's type
//! and written to the [`InternalStateStore`]. Writes do not trigger any
//! action evaluation.

mod source;

pub use source::{ChannelSource, ExternalStateSource, StateChange};

use esp_core::{coerce, CoercionError, InternalState, StoredInternalState};
use esp_state_store::{InternalStateStore, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Bridge errors
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A change arrived for an entity no internal state is bound to
    #[error("no internal state is bound to entity '{0}'")]
    UnboundEntity(String),

    #[error("bridge is already running")]
    AlreadyStarted,

    #[error("external source failed: {0}")]
    Source(String),

    #[error(transparent)]
    Coercion(#[from] CoercionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Mirrors bound external entities into the internal state store
pub struct StateBridge {
    store: Arc<InternalStateStore>,
    /// Entity id (prefix stripped) to the state it feeds
    bindings: HashMap<String, InternalState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StateBridge {
    /// Seed every state's default (existing values are kept) and index the
    /// bound entities
    #[instrument(skip_all, fields(states = states.len()))]
    pub fn new(store: Arc<InternalStateStore>, states: &[InternalState]) -> BridgeResult<Self> {
        let seeds: Vec<_> = states.iter().map(InternalState::to_stored).collect();
        let inserted = store.bulk_set_if_absent(&seeds)?;
        debug!(inserted, "Seeded internal states");

        let mut bindings = HashMap::new();
        for state in states {
            if let Some(entity) = state.external_entity() {
                if let Some(previous) = bindings.insert(entity.to_string(), state.clone()) {
                    warn!(
                        entity,
                        previous = %previous.name,
                        state = %state.name,
                        "Entity bound twice, keeping the later state"
                    );
                }
            }
        }

        Ok(Self {
            store,
            bindings,
            task: Mutex::new(None),
        })
    }

    /// Bound entity ids, sorted
    pub fn bound_entities(&self) -> Vec<String> {
        let mut entities: Vec<_> = self.bindings.keys().cloned().collect();
        entities.sort();
        entities
    }

    /// Name of the state fed by `entity_id`
    pub fn bound_state(&self, entity_id: &str) -> Option<&str> {
        self.bindings.get(entity_id).map(|s| s.name.as_str())
    }

    /// Coerce and store a new value for `entity_id`
    pub fn handle_change(&self, entity_id: &str, value: &str) -> BridgeResult<StoredInternalState> {
        let state = self
            .bindings
            .get(entity_id)
            .ok_or_else(|| BridgeError::UnboundEntity(entity_id.to_string()))?;
        let stored = coerce(value, state)?;
        self.store.set(&stored)?;
        debug!(entity = entity_id, state = %state.name, value = %stored.value, "Mirrored external state");
        Ok(stored)
    }

    /// Watch every bound entity on `source` and mirror changes on a
    /// dedicated task until the source closes or [`StateBridge::stop`]
    pub async fn start(self: &Arc<Self>, source: &dyn ExternalStateSource) -> BridgeResult<()> {
        if self.is_running() {
            return Err(BridgeError::AlreadyStarted);
        }

        let entities = self.bound_entities();
        let receiver = source.subscribe(&entities).await?;
        let handle = tokio::spawn(drain(Arc::downgrade(self), receiver));

        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!(entities = entities.len(), "State bridge started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Stop mirroring; the store keeps the last values
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
            info!("State bridge stopped");
        }
    }
}

impl Drop for StateBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn drain(bridge: Weak<StateBridge>, mut receiver: mpsc::Receiver<StateChange>) {
    while let Some(change) = receiver.recv().await {
        let Some(bridge) = bridge.upgrade() else {
            break;
        };
        match bridge.handle_change(&change.entity_id, &change.state) {
            Ok(_) => {}
            Err(BridgeError::UnboundEntity(entity)) => {
                error!(entity = %entity, "Received change for an entity with no bound state");
            }
            Err(e) => {
                warn!(entity = %change.entity_id, value = %change.state, error = %e, "Failed to mirror external state");
            }
        }
    }
    debug!("External state source closed");
}
