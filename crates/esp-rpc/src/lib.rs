//! JSON-RPC 2.0 over topic-based pub/sub
//!
//! This crate provides the message codec, the per-channel method registry
//! and [`RpcChannel`], which correlates outbound calls with their replies
//! and dispatches inbound requests to registered methods.

mod channel;
mod error;
pub mod message;
mod registry;

pub use channel::{RpcChannel, Role, DEFAULT_CALL_TIMEOUT};
pub use error::{MethodError, RpcError, RpcResult};
pub use message::{ErrorObject, ErrorResponse, Request, Response, RpcMessage};
pub use registry::{handler, MethodFuture, MethodHandler, MethodRegistry, MethodResult, MethodSet};
