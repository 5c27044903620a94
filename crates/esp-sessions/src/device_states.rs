//! Per-device component states
//!
//! Each device keeps a free-form JSON object per UI component. The gateway
//! only stores and returns them; it never interprets their contents.

use crate::storage::{Storage, StorageFile, StorageResult};
use dashmap::DashMap;
use esp_core::SessionId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

const DEVICE_STATES_VERSION: u32 = 1;
const DEVICE_STATES_MINOR_VERSION: u32 = 1;

/// Component id → component state
pub type ComponentStates = IndexMap<String, Value>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct DeviceStatesData {
    #[serde(default)]
    states: ComponentStates,
}

/// Storage key for one device's component states
pub fn device_states_key(session: SessionId) -> String {
    format!("espdisplay.device_states.{}", session)
}

/// Cache of component states, loaded lazily per device
pub struct DeviceStateStore {
    storage: Storage,
    devices: DashMap<SessionId, Arc<Mutex<ComponentStates>>>,
}

impl DeviceStateStore {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            devices: DashMap::new(),
        }
    }

    async fn device(&self, session: SessionId) -> StorageResult<Arc<Mutex<ComponentStates>>> {
        if let Some(entry) = self.devices.get(&session) {
            return Ok(entry.clone());
        }

        let loaded: Option<DeviceStatesData> = self
            .storage
            .load(&device_states_key(session), DEVICE_STATES_VERSION)
            .await?;
        let states = loaded.unwrap_or_default().states;
        debug!(session, components = states.len(), "Loaded device states");

        // Another task may have loaded the same device meanwhile; keep theirs
        let entry = self
            .devices
            .entry(session)
            .or_insert_with(|| Arc::new(Mutex::new(states)))
            .clone();
        Ok(entry)
    }

    /// All component states of one device
    pub async fn get_states(&self, session: SessionId) -> StorageResult<ComponentStates> {
        let device = self.device(session).await?;
        let states = device.lock().await;
        Ok(states.clone())
    }

    /// Replace one component's state and persist the device's states
    ///
    /// A failed write is logged; the new state stays in memory.
    #[instrument(skip(self, state))]
    pub async fn update_component_state(
        &self,
        session: SessionId,
        component: &str,
        state: Value,
    ) -> StorageResult<Value> {
        let device = self.device(session).await?;
        let mut states = device.lock().await;
        states.insert(component.to_string(), state.clone());

        let file = StorageFile::new(
            device_states_key(session),
            DeviceStatesData {
                states: states.clone(),
            },
            DEVICE_STATES_VERSION,
            DEVICE_STATES_MINOR_VERSION,
        );
        if let Err(e) = self.storage.save(&file).await {
            warn!(session, error = %e, "Failed to persist device states");
        }
        Ok(state)
    }
}
