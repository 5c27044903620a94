//! Session handshake
//!
//! A device without a session publishes `{"request_id": ...}` on
//! `espdisplay/subscribe`. The gateway allocates the next session id, makes
//! sure the session's channel is listening, then announces the id on
//! `espdisplay/broadcast` together with the device's `request_id`.

use crate::coordinator::SessionCoordinator;
use esp_core::{topics, SessionId};
use esp_transport::{Message, SharedTransport, TransportResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Value of `type` in a handshake reply
pub const SUBSCRIBE_REPLY: &str = "subscribe_reply";

#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeRequest {
    /// Opaque token chosen by the device, echoed in the reply
    pub request_id: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeReply {
    pub request_id: Value,
    #[serde(rename = "type")]
    pub kind: String,
    pub uuid: SessionId,
}

pub struct Handshake {
    coordinator: Arc<SessionCoordinator>,
    transport: SharedTransport,
}

impl Handshake {
    pub fn new(coordinator: Arc<SessionCoordinator>, transport: SharedTransport) -> Self {
        Self {
            coordinator,
            transport,
        }
    }

    /// Listen for handshake requests
    pub async fn start(self: &Arc<Self>) -> TransportResult<()> {
        let handshake = Arc::clone(self);
        self.transport
            .subscribe(
                topics::SUBSCRIBE,
                Arc::new(move |message: Message| {
                    let handshake = handshake.clone();
                    tokio::spawn(async move {
                        handshake.handle(&message.payload).await;
                    });
                }),
            )
            .await?;
        debug!(topic = topics::SUBSCRIBE, "Listening for handshakes");
        Ok(())
    }

    /// Serve one handshake payload, returning the reply that was published
    ///
    /// Payloads that are not an object with a `request_id` are ignored. No
    /// reply goes out when the new session's channel could not be started.
    pub async fn handle(&self, payload: &[u8]) -> Option<SubscribeReply> {
        let request = match parse_request(payload) {
            Some(request) => request,
            None => {
                warn!(
                    payload = %String::from_utf8_lossy(payload),
                    "Ignoring malformed handshake request"
                );
                return None;
            }
        };

        let uuid = self.coordinator.sessions().allocate().await;
        self.coordinator.reconcile().await;
        if self.coordinator.get_channel(uuid).is_err() {
            // The session stays listed; a later reconcile opens its channel
            warn!(session = uuid, "No channel for new session, not replying");
            return None;
        }

        let reply = SubscribeReply {
            request_id: request.request_id,
            kind: SUBSCRIBE_REPLY.to_string(),
            uuid,
        };
        let bytes = match serde_json::to_vec(&reply) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to encode handshake reply");
                return None;
            }
        };
        if let Err(e) = self.transport.publish(topics::BROADCAST, bytes).await {
            warn!(session = uuid, error = %e, "Failed to publish handshake reply");
            return None;
        }

        info!(session = uuid, "Device subscribed");
        Some(reply)
    }
}

fn parse_request(payload: &[u8]) -> Option<SubscribeRequest> {
    let value: Value = serde_json::from_slice(payload).ok()?;
    if !value.is_object() {
        return None;
    }
    let request: SubscribeRequest = serde_json::from_value(value).ok()?;
    (!request.request_id.is_null()).then_some(request)
}
