//! RPC methods offered to every device
//!
//! Configuration lookups answer `{"error": message}` instead of failing the
//! call, so a device can show the problem. Everything else reports failures
//! as JSON-RPC errors.

use esp_actions::ActionEngine;
use esp_config::{ConfigManager, FullConfig, TemplateManager};
use esp_core::{coerce, coerce_value, InternalState, StateValue, StoredInternalState};
use esp_rpc::{handler, MethodError, MethodResult, MethodSet, RpcChannel};
use esp_sessions::DeviceStateStore;
use esp_state_store::InternalStateStore;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// Shared services the methods work on
pub struct GatewayContext {
    pub config: Arc<ConfigManager>,
    pub templates: Arc<TemplateManager>,
    pub store: Arc<InternalStateStore>,
    pub engine: Arc<ActionEngine>,
    pub device_states: Arc<DeviceStateStore>,
}

#[derive(Debug, Deserialize)]
struct SetStateParams {
    state: String,
    value: StateValue,
}

#[derive(Debug, Deserialize)]
struct UpdateStateParams {
    component: String,
    state: Value,
}

#[derive(Debug, Deserialize)]
struct CallActionParams {
    action: String,
}

/// Build the method set installed on every channel
pub fn gateway_methods(ctx: Arc<GatewayContext>) -> MethodSet {
    MethodSet::new()
        .with("get_config", bind(&ctx, get_config))
        .with("reload_config", bind(&ctx, reload_config))
        .with("set_state", bind(&ctx, set_state))
        .with("get_states", bind(&ctx, get_states))
        .with("update_state", bind(&ctx, update_state))
        .with("call_action", bind(&ctx, call_action))
        .with("get_templates", bind(&ctx, get_templates))
}

fn bind<F, Fut>(ctx: &Arc<GatewayContext>, f: F) -> esp_rpc::MethodHandler
where
    F: Fn(Arc<GatewayContext>, Value, Arc<RpcChannel>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MethodResult> + Send + 'static,
{
    let ctx = ctx.clone();
    handler(move |params, channel| f(ctx.clone(), params, channel))
}

fn params<T: DeserializeOwned>(method: &str, params: Value) -> Result<T, MethodError> {
    serde_json::from_value(params)
        .map_err(|e| format!("invalid params for {}: {}", method, e).into())
}

fn error_value(e: impl std::fmt::Display) -> Value {
    json!({ "error": e.to_string() })
}

async fn get_config(ctx: Arc<GatewayContext>, _params: Value, _channel: Arc<RpcChannel>) -> MethodResult {
    Ok(ctx.config.as_value().unwrap_or_else(error_value))
}

async fn reload_config(
    ctx: Arc<GatewayContext>,
    _params: Value,
    _channel: Arc<RpcChannel>,
) -> MethodResult {
    let config = match ctx.config.reload() {
        Ok(config) => config,
        Err(e) => return Ok(error_value(e)),
    };

    apply_config(&ctx, &config).await?;
    info!("Configuration reloaded");
    Ok(serde_json::to_value(&*config)?)
}

/// Seed states new to `config` and hand the engine the new graph
pub async fn apply_config(ctx: &GatewayContext, config: &FullConfig) -> Result<(), MethodError> {
    let seeds: Vec<_> = config.states().iter().map(InternalState::to_stored).collect();
    ctx.store.bulk_set_if_absent(&seeds)?;
    ctx.engine
        .load(config.actions().to_vec(), config.states().to_vec())
        .await;
    Ok(())
}

async fn set_state(ctx: Arc<GatewayContext>, raw: Value, channel: Arc<RpcChannel>) -> MethodResult {
    let SetStateParams { state: name, value } = params("set_state", raw)?;
    let config = ctx.config.get()?;
    let state = config
        .state(&name)
        .ok_or_else(|| format!("state '{}' not found", name))?;

    let stored: StoredInternalState = match &value {
        StateValue::Text(raw) => coerce(raw, state)?,
        other => coerce_value(other, state)?,
    };
    ctx.store.set(&stored)?;
    debug!(session = channel.session(), state = %name, value = %stored.value, "State set by device");

    if let Some(callback_id) = state.definition.callback_id() {
        let fired = ctx.engine.fire_callback(callback_id).await?;
        debug!(callback_id, fired, "Fired callback");
    }

    Ok(serde_json::to_value(&stored)?)
}

async fn get_states(ctx: Arc<GatewayContext>, _params: Value, channel: Arc<RpcChannel>) -> MethodResult {
    let states = ctx.device_states.get_states(channel.session()).await?;
    Ok(serde_json::to_value(states)?)
}

async fn update_state(ctx: Arc<GatewayContext>, raw: Value, channel: Arc<RpcChannel>) -> MethodResult {
    let UpdateStateParams { component, state } = params("update_state", raw)?;
    let state = ctx
        .device_states
        .update_component_state(channel.session(), &component, state)
        .await?;
    Ok(state)
}

async fn call_action(ctx: Arc<GatewayContext>, raw: Value, _channel: Arc<RpcChannel>) -> MethodResult {
    let CallActionParams { action } = params("call_action", raw)?;
    ctx.engine.call_action(&action).await?;
    Ok(Value::Null)
}

async fn get_templates(ctx: Arc<GatewayContext>, _params: Value, _channel: Arc<RpcChannel>) -> MethodResult {
    Ok(ctx.templates.as_value().unwrap_or_else(error_value))
}
