//! Core types for the ESP display gateway
//!
//! This crate provides the fundamental types shared across the workspace:
//! session identifiers, the pub/sub topic layout, internal-state definitions
//! and the rules for coercing raw values into typed state values.

mod coerce;
mod state;
pub mod topics;

pub use coerce::{coerce, coerce_value, CoercionError};
pub use state::{
    InternalState, StateDefinition, StateValue, StoredInternalState, EXTERNAL_BIND_PREFIX,
};

/// Identifier assigned to one device by the subscribe handshake
pub type SessionId = u64;
