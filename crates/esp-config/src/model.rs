//! Configuration model
//!
//! Mirrors the layout of `config.yaml` and `templates.yaml`. Every section
//! defaults to empty so a partial file still loads; cross references are
//! checked separately by [`crate::validate`].

use esp_actions::Action;
use esp_core::InternalState;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The full gateway configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FullConfig {
    #[serde(default)]
    pub screens: Vec<Screen>,
    #[serde(default)]
    pub internal_states: InternalStates,
    #[serde(default)]
    pub actions: Actions,
    #[serde(default)]
    pub modules: Vec<Module>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InternalStates {
    #[serde(default)]
    pub states: Vec<InternalState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Actions {
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// A screen of a display and the states its template fields show
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screen {
    pub id: String,
    pub template: String,
    /// Template field name to internal state name
    #[serde(default)]
    pub state_bindings: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub id: String,
    pub timer: TimerModule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerModule {
    #[serde(default)]
    pub callback: Option<String>,
    pub time_state: String,
}

impl FullConfig {
    pub fn states(&self) -> &[InternalState] {
        &self.internal_states.states
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions.actions
    }

    pub fn state(&self, name: &str) -> Option<&InternalState> {
        self.states().iter().find(|s| s.name == name)
    }

    pub fn action(&self, id: &str) -> Option<&Action> {
        self.actions().iter().find(|a| a.id == id)
    }

    pub fn screen(&self, id: &str) -> Option<&Screen> {
        self.screens.iter().find(|s| s.id == id)
    }
}

/// Contents of `templates.yaml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateConfig {
    #[serde(default)]
    pub templates: Vec<Template>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<TemplateField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateField {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_to_internal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
}

impl TemplateConfig {
    pub fn template(&self, name: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.name == name)
    }
}
