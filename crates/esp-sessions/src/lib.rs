//! Session bookkeeping for the ESP display gateway
//!
//! This crate provides the versioned JSON [`Storage`] helper, the
//! [`SessionRegistry`] that issues and persists session ids, and the
//! [`DeviceStateStore`] holding each device's component states.

mod device_states;
mod registry;
mod storage;

pub use device_states::{device_states_key, ComponentStates, DeviceStateStore};
pub use registry::{SessionRegistry, SESSIONS_KEY};
pub use storage::{RawContent, Storage, StorageError, StorageFile, StorageResult};

use esp_core::SessionId;
use thiserror::Error;

/// Errors looking up sessions
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(SessionId),
}
