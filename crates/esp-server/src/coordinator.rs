//! Session/channel coordinator
//!
//! Keeps exactly one started [`RpcChannel`] per listed session.

use dashmap::DashMap;
use esp_core::SessionId;
use esp_rpc::{MethodSet, RpcChannel};
use esp_sessions::{SessionError, SessionRegistry};
use esp_transport::SharedTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

pub struct SessionCoordinator {
    sessions: Arc<SessionRegistry>,
    transport: SharedTransport,
    methods: MethodSet,
    timeout: Duration,
    channels: DashMap<SessionId, Arc<RpcChannel>>,
    reconcile_lock: Mutex<()>,
}

impl SessionCoordinator {
    /// `methods` is installed on every channel on top of the baseline `ping`
    pub fn new(
        sessions: Arc<SessionRegistry>,
        transport: SharedTransport,
        methods: MethodSet,
        timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            transport,
            methods,
            timeout,
            channels: DashMap::new(),
            reconcile_lock: Mutex::new(()),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Create and start a channel for every listed session that lacks one
    ///
    /// Returns how many channels were created. A channel that fails to
    /// start is dropped and retried on the next call.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> usize {
        let _guard = self.reconcile_lock.lock().await;

        let mut created = 0;
        for session in self.sessions.list_sessions().await {
            if self.channels.contains_key(&session) {
                continue;
            }

            let channel = RpcChannel::with_timeout(session, self.transport.clone(), self.timeout);
            self.methods.install(channel.methods());
            if let Err(e) = channel.start().await {
                warn!(session, error = %e, "Failed to start channel");
                continue;
            }

            debug!(session, methods = ?channel.method_names(), "Channel ready");
            self.channels.insert(session, channel);
            created += 1;
        }

        if created > 0 {
            info!(created, total = self.channels.len(), "Reconciled channels");
        }
        created
    }

    pub fn get_channel(&self, session: SessionId) -> Result<Arc<RpcChannel>, SessionError> {
        self.channels
            .get(&session)
            .map(|c| c.clone())
            .ok_or(SessionError::NotFound(session))
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
