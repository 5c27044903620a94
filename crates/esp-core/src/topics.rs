//! Topic layout on the shared message bus
//!
//! Every device talks to the gateway over two per-session topics. The
//! `client` topic carries traffic from the device to the gateway and the
//! `server` topic carries traffic from the gateway to the device, so
//! requests and responses from the two directions never collide.

use crate::SessionId;

/// Prefix shared by every topic the gateway uses
pub const TOPIC_ROOT: &str = "espdisplay";

/// Inbound handshake requests (`{"request_id": ...}`)
pub const SUBSCRIBE: &str = "espdisplay/subscribe";

/// Outbound handshake replies, fanned out to every listening device
pub const BROADCAST: &str = "espdisplay/broadcast";

/// Device → gateway topic for a session
pub fn client(session: SessionId) -> String {
    format!("{}/{}/client", TOPIC_ROOT, session)
}

/// Gateway → device topic for a session
pub fn server(session: SessionId) -> String {
    format!("{}/{}/server", TOPIC_ROOT, session)
}
