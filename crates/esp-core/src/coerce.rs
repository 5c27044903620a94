//! Coercion of raw and literal values into typed state values

use crate::state::{InternalState, StateDefinition, StateValue, StoredInternalState};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoercionError {
    #[error("invalid value for state '{state}': '{value}' is not a number")]
    NotANumber { state: String, value: String },

    #[error("invalid value for {kind} state '{state}': {value}")]
    Incompatible {
        state: String,
        kind: &'static str,
        value: String,
    },
}

/// Coerce a raw string (as received from a device or the external platform)
/// into a stored state
///
/// - boolean: `true` iff the lowercased string is `on` or `true`
/// - number: decimal parse, failure is an error
/// - enum: the string unmodified
/// - callback: always the empty string
pub fn coerce(raw: &str, state: &InternalState) -> Result<StoredInternalState, CoercionError> {
    let value = match &state.definition {
        StateDefinition::Boolean { .. } => StateValue::Bool(parse_bool(raw)),
        StateDefinition::Number { .. } => {
            let n = raw
                .trim()
                .parse::<f64>()
                .map_err(|_| CoercionError::NotANumber {
                    state: state.name.clone(),
                    value: raw.to_string(),
                })?;
            StateValue::Number(n)
        }
        StateDefinition::Enum { .. } => StateValue::Text(raw.to_string()),
        StateDefinition::Callback { .. } => StateValue::empty(),
    };
    Ok(state.to_stored_with(value))
}

/// Coerce a literal (already typed) value, such as an `update_state` value
/// from configuration
pub fn coerce_value(
    value: &StateValue,
    state: &InternalState,
) -> Result<StoredInternalState, CoercionError> {
    let coerced = match (&state.definition, value) {
        (StateDefinition::Number { .. }, StateValue::Number(n)) => StateValue::Number(*n),
        (StateDefinition::Number { .. }, StateValue::Text(s)) => return coerce(s, state),
        (StateDefinition::Number { .. }, StateValue::Bool(_)) => {
            return Err(CoercionError::Incompatible {
                state: state.name.clone(),
                kind: "number",
                value: value.to_string(),
            })
        }
        (StateDefinition::Boolean { .. }, StateValue::Bool(b)) => StateValue::Bool(*b),
        (StateDefinition::Boolean { .. }, StateValue::Text(s)) => StateValue::Bool(parse_bool(s)),
        (StateDefinition::Boolean { .. }, StateValue::Number(n)) => StateValue::Bool(*n != 0.0),
        (StateDefinition::Enum { .. }, v) => StateValue::Text(v.to_string()),
        (StateDefinition::Callback { .. }, _) => StateValue::empty(),
    };
    Ok(state.to_stored_with(coerced))
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "on" | "true")
}
