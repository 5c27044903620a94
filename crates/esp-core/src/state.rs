//! Internal state definitions and stored values

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix marking a `bind` as an external automation-platform entity
pub const EXTERNAL_BIND_PREFIX: &str = "ha:";

/// Typed definition of an internal state, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StateDefinition {
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
        default: f64,
    },
    Boolean {
        default: bool,
    },
    Enum {
        options: Vec<String>,
        default: String,
    },
    Callback {
        callback_id: String,
    },
}

impl StateDefinition {
    /// Name of the `type` discriminator
    pub fn type_name(&self) -> &'static str {
        match self {
            StateDefinition::Number { .. } => "number",
            StateDefinition::Boolean { .. } => "boolean",
            StateDefinition::Enum { .. } => "enum",
            StateDefinition::Callback { .. } => "callback",
        }
    }

    /// Value a freshly seeded state takes
    pub fn default_value(&self) -> StateValue {
        match self {
            StateDefinition::Number { default, .. } => StateValue::Number(*default),
            StateDefinition::Boolean { default } => StateValue::Bool(*default),
            StateDefinition::Enum { default, .. } => StateValue::Text(default.clone()),
            StateDefinition::Callback { .. } => StateValue::empty(),
        }
    }

    /// Callback id for callback-typed states
    pub fn callback_id(&self) -> Option<&str> {
        match self {
            StateDefinition::Callback { callback_id } => Some(callback_id),
            _ => None,
        }
    }
}

/// Value held by a stored internal state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl StateValue {
    /// The empty string value carried by callback states
    pub fn empty() -> Self {
        StateValue::Text(String::new())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, StateValue::Text(s) if s.is_empty())
    }

    /// Numeric view used by comparisons: booleans map to 1/0 and numeric
    /// strings are parsed
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            StateValue::Number(n) => Some(*n),
            StateValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Bool(b) => write!(f, "{}", b),
            StateValue::Number(n) => write!(f, "{}", n),
            StateValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        StateValue::Bool(value)
    }
}

impl From<f64> for StateValue {
    fn from(value: f64) -> Self {
        StateValue::Number(value)
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::Text(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::Text(value)
    }
}

/// A named internal state as declared in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalState {
    pub name: String,
    pub definition: StateDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
}

impl InternalState {
    pub fn new(name: impl Into<String>, definition: StateDefinition) -> Self {
        Self {
            name: name.into(),
            definition,
            bind: None,
        }
    }

    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = Some(bind.into());
        self
    }

    /// External entity id this state mirrors, if it is bound to one
    pub fn external_entity(&self) -> Option<&str> {
        self.bind
            .as_deref()
            .and_then(|b| b.strip_prefix(EXTERNAL_BIND_PREFIX))
    }

    /// Stored form seeded with the definition's default
    pub fn to_stored(&self) -> StoredInternalState {
        self.to_stored_with(self.definition.default_value())
    }

    /// Stored form carrying `value`; callback states always store the empty
    /// string
    pub fn to_stored_with(&self, value: StateValue) -> StoredInternalState {
        let value = match self.definition {
            StateDefinition::Callback { .. } => StateValue::empty(),
            _ => value,
        };
        StoredInternalState {
            name: self.name.clone(),
            definition: self.definition.clone(),
            bind: self.bind.clone(),
            value,
        }
    }
}

/// An internal state together with its current value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredInternalState {
    pub name: String,
    pub definition: StateDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    pub value: StateValue,
}

impl StoredInternalState {
    /// Definition half, without the value
    pub fn internal_state(&self) -> InternalState {
        InternalState {
            name: self.name.clone(),
            definition: self.definition.clone(),
            bind: self.bind.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definition_tagged_by_type() {
        let def: StateDefinition =
            serde_json::from_value(json!({"type": "number", "min": 0, "default": 21.5})).unwrap();
        assert_eq!(
            def,
            StateDefinition::Number {
                min: Some(0.0),
                max: None,
                default: 21.5
            }
        );
        assert_eq!(def.type_name(), "number");

        let def: StateDefinition =
            serde_json::from_value(json!({"type": "callback", "callback_id": "btn"})).unwrap();
        assert_eq!(def.callback_id(), Some("btn"));

        assert!(serde_json::from_value::<StateDefinition>(json!({"type": "color"})).is_err());
    }

    #[test]
    fn test_external_entity_strips_prefix() {
        let state = InternalState::new("lamp", StateDefinition::Boolean { default: false })
            .with_bind("ha:light.kitchen");
        assert_eq!(state.external_entity(), Some("light.kitchen"));

        let unbound = InternalState::new("x", StateDefinition::Boolean { default: false });
        assert_eq!(unbound.external_entity(), None);
    }

    #[test]
    fn test_callback_state_stores_empty_string() {
        let state = InternalState::new(
            "press",
            StateDefinition::Callback {
                callback_id: "cb".into(),
            },
        );
        let stored = state.to_stored_with(StateValue::Number(3.0));
        assert!(stored.value.is_empty());
        assert_eq!(stored.internal_state(), state);
    }

    #[test]
    fn test_value_untagged_serde() {
        let stored = InternalState::new(
            "mode",
            StateDefinition::Enum {
                options: vec!["heat".into(), "cool".into()],
                default: "heat".into(),
            },
        )
        .to_stored();
        let value = serde_json::to_value(&stored).unwrap();
        assert_eq!(value["value"], json!("heat"));
        assert_eq!(value["definition"]["type"], json!("enum"));

        let back: StoredInternalState = serde_json::from_value(value).unwrap();
        assert_eq!(back, stored);
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(StateValue::Bool(true).as_f64(), Some(1.0));
        assert_eq!(StateValue::from(" 4.5 ").as_f64(), Some(4.5));
        assert_eq!(StateValue::from("heat").as_f64(), None);
    }
}
