//! ESP display gateway server
//!
//! Wires the session handshake, one RPC channel per session, the baseline
//! device methods, the external state bridge and the action engine into a
//! [`Gateway`].

mod coordinator;
mod gateway;
pub mod handshake;
mod methods;

pub use coordinator::SessionCoordinator;
pub use gateway::{Gateway, GatewayError, GatewayResult};
pub use handshake::{Handshake, SubscribeReply, SubscribeRequest, SUBSCRIBE_REPLY};
pub use methods::{apply_config, gateway_methods, GatewayContext};
