//! Configuration for the ESP display gateway
//!
//! Loads `config.yaml` (screens, internal states, actions, modules) and
//! `templates.yaml` with `!include`/`!env_var` support, and checks the
//! cross references between them before handing the result out. Gateway
//! settings come from `gateway.yaml`.

mod error;
pub mod loader;
mod manager;
pub mod model;
mod settings;
pub mod validate;

pub use error::{ConfigError, ConfigResult, TemplateError, TemplateResult};
pub use loader::{load_yaml, YamlLoader};
pub use manager::{ConfigManager, Document, DocumentManager, TemplateManager};
pub use model::{
    Actions, FullConfig, InternalStates, Module, Screen, Template, TemplateConfig, TemplateField,
    TimerModule,
};
pub use settings::{GatewaySettings, SETTINGS_FILE};
