//! Per-session RPC channel
//!
//! A channel owns one session's pair of topics. Outbound calls register a
//! pending entry keyed by request id and wait for the matching reply;
//! inbound requests are looked up in the channel's method registry and each
//! one is dispatched on its own task, so a handler that calls back into the
//! device never blocks delivery of the reply it is waiting for.

use crate::error::{RpcError, RpcResult};
use crate::message::{ErrorResponse, Request, Response, RpcMessage, INTERNAL_ERROR, METHOD_NOT_FOUND};
use crate::registry::{MethodHandler, MethodRegistry};
use dashmap::DashMap;
use esp_core::{topics, SessionId};
use esp_transport::{Message, SharedTransport, TransportError};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, instrument, warn};

/// Default time a call waits for its reply
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Which end of the session this channel speaks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Listens on the `client` topic, publishes on the `server` topic
    Gateway,
    /// Listens on the `server` topic, publishes on the `client` topic
    Device,
}

enum Reply {
    Result(Value),
    Error {
        code: i64,
        message: String,
        data: Option<Value>,
    },
}

/// Removes a pending entry when the waiting call goes away, whether it
/// finished, timed out or was dropped
struct PendingGuard<'a> {
    pending: &'a DashMap<String, oneshot::Sender<Reply>>,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// Bidirectional JSON-RPC endpoint for one session
pub struct RpcChannel {
    session: SessionId,
    role: Role,
    transport: SharedTransport,
    methods: MethodRegistry,
    pending: DashMap<String, oneshot::Sender<Reply>>,
    timeout: Duration,
    started: AtomicBool,
}

impl RpcChannel {
    /// Gateway-side channel with the default call timeout
    pub fn new(session: SessionId, transport: SharedTransport) -> Arc<Self> {
        Self::with_timeout(session, transport, DEFAULT_CALL_TIMEOUT)
    }

    /// Gateway-side channel with a custom call timeout
    pub fn with_timeout(
        session: SessionId,
        transport: SharedTransport,
        timeout: Duration,
    ) -> Arc<Self> {
        Self::with_role(session, transport, Role::Gateway, timeout)
    }

    /// Device-side channel, mirroring the topics of the gateway side
    pub fn device(session: SessionId, transport: SharedTransport) -> Arc<Self> {
        Self::with_role(session, transport, Role::Device, DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_role(
        session: SessionId,
        transport: SharedTransport,
        role: Role,
        timeout: Duration,
    ) -> Arc<Self> {
        let channel = Self {
            session,
            role,
            transport,
            methods: MethodRegistry::new(),
            pending: DashMap::new(),
            timeout,
            started: AtomicBool::new(false),
        };
        channel.methods.register(
            "ping",
            crate::registry::handler(|params, _channel| async move { Ok(json!({ "pong": params })) }),
        );
        Arc::new(channel)
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn default_timeout(&self) -> Duration {
        self.timeout
    }

    /// Topic this channel listens on
    pub fn inbound_topic(&self) -> String {
        match self.role {
            Role::Gateway => topics::client(self.session),
            Role::Device => topics::server(self.session),
        }
    }

    /// Topic this channel publishes on
    pub fn outbound_topic(&self) -> String {
        match self.role {
            Role::Gateway => topics::server(self.session),
            Role::Device => topics::client(self.session),
        }
    }

    /// Subscribe to the inbound topic. Calling it again is a no-op.
    #[instrument(skip(self), fields(session = self.session))]
    pub async fn start(self: &Arc<Self>) -> RpcResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let topic = self.inbound_topic();
        let result = self
            .transport
            .subscribe(
                &topic,
                Arc::new(move |message: Message| {
                    if let Some(channel) = weak.upgrade() {
                        channel.handle_message(&message.payload);
                    }
                }),
            )
            .await;

        if let Err(e) = result {
            self.started.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        debug!(topic = %topic, "Channel started");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Call `method` on the other end and wait for its reply
    ///
    /// `timeout` falls back to the channel default when `None`.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> RpcResult<Value> {
        let request = Request::new(method, params);
        let id = request.id.clone();
        let payload = RpcMessage::from(request).to_bytes()?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id: id.clone(),
        };

        debug!(session = self.session, method, id = %id, "Sending request");
        self.transport
            .publish(&self.outbound_topic(), payload)
            .await?;

        let timeout = timeout.unwrap_or(self.timeout);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Reply::Result(value))) => Ok(value),
            Ok(Ok(Reply::Error {
                code,
                message,
                data,
            })) => Err(RpcError::Remote {
                code,
                message,
                data,
            }),
            Ok(Err(_)) => Err(RpcError::Transport(TransportError::Closed)),
            Err(_) => {
                warn!(session = self.session, method, id = %id, "Call timed out");
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    session: self.session,
                    timeout,
                })
            }
        }
    }

    /// Register a method on this channel
    pub fn register(&self, name: impl Into<String>, handler: MethodHandler) {
        self.methods.register(name, handler);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.methods.unregister(name)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.has_method(name)
    }

    pub fn method_names(&self) -> Vec<String> {
        self.methods.method_names()
    }

    pub fn methods(&self) -> &MethodRegistry {
        &self.methods
    }

    /// Ids of calls still waiting for a reply
    pub fn pending_ids(&self) -> Vec<String> {
        self.pending.iter().map(|e| e.key().clone()).collect()
    }

    /// Route one inbound payload. Never blocks and never panics.
    pub fn handle_message(self: &Arc<Self>, payload: &[u8]) {
        let message = match RpcMessage::parse(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(session = self.session, error = %e, "Dropping malformed message");
                return;
            }
        };

        match message {
            RpcMessage::Request(request) => {
                debug!(session = self.session, method = %request.method, id = %request.id, "Received request");
                tokio::spawn(Arc::clone(self).dispatch(request));
            }
            RpcMessage::Result(response) => {
                self.resolve(&response.id, Reply::Result(response.result));
            }
            RpcMessage::Error(reply) => match reply.id {
                Some(id) => self.resolve(
                    &id,
                    Reply::Error {
                        code: reply.error.code,
                        message: reply.error.message,
                        data: reply.error.data,
                    },
                ),
                None => {
                    warn!(
                        session = self.session,
                        code = reply.error.code,
                        message = %reply.error.message,
                        "Received error without id"
                    );
                }
            },
        }
    }

    fn resolve(&self, id: &str, reply: Reply) {
        match self.pending.remove(id) {
            Some((_, waiter)) => {
                // The caller may have given up in the meantime
                let _ = waiter.send(reply);
            }
            None => {
                warn!(session = self.session, id, "Reply for unknown request dropped");
            }
        }
    }

    async fn dispatch(self: Arc<Self>, request: Request) {
        let reply: RpcMessage = match self.methods.get(&request.method) {
            None => {
                let e = RpcError::UnknownMethod(request.method.clone());
                ErrorResponse::new(Some(request.id), METHOD_NOT_FOUND, e.to_string(), None).into()
            }
            Some(handler) => {
                let task = tokio::spawn(handler(request.params, Arc::clone(&self)));
                match task.await {
                    Ok(Ok(result)) => Response::new(request.id, result).into(),
                    Ok(Err(e)) => {
                        let failure = RpcError::HandlerFailure {
                            method: request.method.clone(),
                            reason: e.to_string(),
                        };
                        warn!(session = self.session, error = %failure, "Method failed");
                        internal_error(request.id, e.to_string())
                    }
                    Err(join_error) => {
                        error!(session = self.session, method = %request.method, "Method handler panicked");
                        internal_error(request.id, join_error.to_string())
                    }
                }
            }
        };

        if let Err(e) = self.send(&reply).await {
            warn!(session = self.session, error = %e, "Failed to send reply");
        }
    }

    async fn send(&self, message: &RpcMessage) -> RpcResult<()> {
        let payload = message.to_bytes()?;
        self.transport
            .publish(&self.outbound_topic(), payload)
            .await?;
        Ok(())
    }
}

fn internal_error(id: String, detail: String) -> RpcMessage {
    ErrorResponse::new(Some(id), INTERNAL_ERROR, "Internal error", Some(Value::String(detail))).into()
}

impl std::fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChannel")
            .field("session", &self.session)
            .field("role", &self.role)
            .field("timeout", &self.timeout)
            .field("pending", &self.pending.len())
            .finish()
    }
}
