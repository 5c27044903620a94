//! Gateway wiring

use crate::coordinator::SessionCoordinator;
use crate::handshake::Handshake;
use crate::methods::{apply_config, gateway_methods, GatewayContext};
use esp_actions::{ActionEngine, ScriptRunner};
use esp_bridge::{BridgeError, ExternalStateSource, StateBridge};
use esp_config::{ConfigError, ConfigManager, GatewaySettings, TemplateManager};
use esp_sessions::{DeviceStateStore, SessionRegistry, Storage, StorageError};
use esp_state_store::{InternalStateStore, StoreError};
use esp_transport::{SharedTransport, TransportError};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors that stop the gateway from starting
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to apply configuration: {0}")]
    Apply(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Every gateway component, wired together
pub struct Gateway {
    settings: GatewaySettings,
    context: Arc<GatewayContext>,
    coordinator: Arc<SessionCoordinator>,
    handshake: Arc<Handshake>,
    bridge: Arc<StateBridge>,
}

impl Gateway {
    /// Load configuration and persisted state and build the components
    ///
    /// Nothing listens until [`Gateway::start`].
    pub async fn new(
        settings: GatewaySettings,
        transport: SharedTransport,
        scripts: Option<Arc<dyn ScriptRunner>>,
    ) -> GatewayResult<Self> {
        let config = Arc::new(ConfigManager::new(&settings.config_file));
        let full = config.get()?;
        let templates = Arc::new(TemplateManager::new(&settings.templates_file));

        let storage = Storage::new(&settings.storage_dir);
        let sessions = Arc::new(SessionRegistry::load(storage.clone()).await?);
        let device_states = Arc::new(DeviceStateStore::new(storage));

        let store = Arc::new(InternalStateStore::open(&settings.state_db)?);
        let bridge = Arc::new(StateBridge::new(store.clone(), full.states())?);

        let mut engine = ActionEngine::new(store.clone()).with_max_depth(settings.action_max_depth);
        if let Some(scripts) = scripts {
            engine = engine.with_script_runner(scripts);
        }

        let context = Arc::new(GatewayContext {
            config,
            templates,
            store,
            engine: Arc::new(engine),
            device_states,
        });
        apply_config(&context, &full)
            .await
            .map_err(|e| GatewayError::Apply(e.to_string()))?;

        let coordinator = Arc::new(SessionCoordinator::new(
            sessions,
            transport.clone(),
            gateway_methods(context.clone()),
            settings.rpc_timeout(),
        ));
        let handshake = Arc::new(Handshake::new(coordinator.clone(), transport));

        Ok(Self {
            settings,
            context,
            coordinator,
            handshake,
            bridge,
        })
    }

    /// Open channels for known sessions, accept handshakes and, given a
    /// source, start mirroring external states
    pub async fn start(&self, source: Option<&dyn ExternalStateSource>) -> GatewayResult<()> {
        let channels = self.coordinator.reconcile().await;
        self.handshake.start().await?;
        if let Some(source) = source {
            self.bridge.start(source).await?;
        }
        info!(channels, "Gateway started");
        Ok(())
    }

    pub fn stop(&self) {
        self.bridge.stop();
        info!("Gateway stopped");
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn context(&self) -> &Arc<GatewayContext> {
        &self.context
    }

    pub fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }

    pub fn handshake(&self) -> &Arc<Handshake> {
        &self.handshake
    }

    pub fn bridge(&self) -> &Arc<StateBridge> {
        &self.bridge
    }
}
