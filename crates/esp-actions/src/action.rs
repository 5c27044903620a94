//! Action types
//!
//! An action carries an id and exactly one populated variant. Variants
//! reference states by name and other actions by id, so the configured
//! actions form a graph that may contain cycles.

use esp_core::StateValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Comparison operator of a `compare` action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl Operator {
    pub fn apply(self, left: f64, right: f64) -> bool {
        match self {
            Operator::Eq => left == right,
            Operator::Ne => left != right,
            Operator::Lt => left < right,
            Operator::Gt => left > right,
            Operator::Le => left <= right,
            Operator::Ge => left >= right,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Lt => "lt",
            Operator::Gt => "gt",
            Operator::Le => "le",
            Operator::Ge => "ge",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Right-hand side of a comparison: a literal number or a state name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Number(f64),
    State(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareAction {
    pub left: String,
    pub operator: Operator,
    pub right: Operand,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_true: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_false: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateStateAction {
    pub target: String,
    pub value: StateValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnCallbackAction {
    pub callback_id: String,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptCall {
    pub script_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Map<String, Value>>,
}

/// An action as declared in configuration
///
/// Deserialization accepts any combination of variants; use
/// [`Action::kind`] to get the single populated one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compare: Option<CompareAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_state: Option<UpdateStateAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_callback: Option<OnCallbackAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_script: Option<ScriptCall>,
}

/// Borrowed view of the populated variant
#[derive(Debug, Clone, Copy)]
pub enum ActionKind<'a> {
    Compare(&'a CompareAction),
    UpdateState(&'a UpdateStateAction),
    OnCallback(&'a OnCallbackAction),
    CallScript(&'a ScriptCall),
}

impl Action {
    fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            compare: None,
            update_state: None,
            on_callback: None,
            call_script: None,
        }
    }

    pub fn compare(id: impl Into<String>, compare: CompareAction) -> Self {
        Self {
            compare: Some(compare),
            ..Self::empty(id)
        }
    }

    pub fn update_state(id: impl Into<String>, target: impl Into<String>, value: StateValue) -> Self {
        Self {
            update_state: Some(UpdateStateAction {
                target: target.into(),
                value,
            }),
            ..Self::empty(id)
        }
    }

    pub fn on_callback(id: impl Into<String>, callback_id: impl Into<String>, actions: Vec<String>) -> Self {
        Self {
            on_callback: Some(OnCallbackAction {
                callback_id: callback_id.into(),
                actions,
            }),
            ..Self::empty(id)
        }
    }

    pub fn call_script(id: impl Into<String>, script_name: impl Into<String>) -> Self {
        Self {
            call_script: Some(ScriptCall {
                script_name: script_name.into(),
                args: None,
            }),
            ..Self::empty(id)
        }
    }

    /// Names of the populated variants, in declaration order
    pub fn variant_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.compare.is_some() {
            names.push("compare");
        }
        if self.update_state.is_some() {
            names.push("update_state");
        }
        if self.on_callback.is_some() {
            names.push("on_callback");
        }
        if self.call_script.is_some() {
            names.push("call_script");
        }
        names
    }

    /// The populated variant, or `None` unless exactly one is set
    pub fn kind(&self) -> Option<ActionKind<'_>> {
        match (
            &self.compare,
            &self.update_state,
            &self.on_callback,
            &self.call_script,
        ) {
            (Some(c), None, None, None) => Some(ActionKind::Compare(c)),
            (None, Some(u), None, None) => Some(ActionKind::UpdateState(u)),
            (None, None, Some(o), None) => Some(ActionKind::OnCallback(o)),
            (None, None, None, Some(s)) => Some(ActionKind::CallScript(s)),
            _ => None,
        }
    }

    /// Ids of actions this one may run
    pub fn referenced_actions(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        if let Some(compare) = &self.compare {
            ids.extend(compare.on_true.as_deref());
            ids.extend(compare.on_false.as_deref());
        }
        if let Some(on_callback) = &self.on_callback {
            ids.extend(on_callback.actions.iter().map(String::as_str));
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compare_deserialize() {
        let action: Action = serde_json::from_value(json!({
            "id": "check",
            "compare": {
                "left": "temp",
                "operator": "gt",
                "right": 21.5,
                "on_true": "heat_on"
            }
        }))
        .unwrap();

        match action.kind() {
            Some(ActionKind::Compare(c)) => {
                assert_eq!(c.operator, Operator::Gt);
                assert_eq!(c.right, Operand::Number(21.5));
                assert_eq!(c.on_true.as_deref(), Some("heat_on"));
                assert_eq!(c.on_false, None);
            }
            other => panic!("expected compare, got {:?}", other),
        }
        assert_eq!(action.referenced_actions(), vec!["heat_on"]);
    }

    #[test]
    fn test_right_operand_string_is_state() {
        let compare: CompareAction = serde_json::from_value(json!({
            "left": "a", "operator": "le", "right": "b"
        }))
        .unwrap();
        assert_eq!(compare.right, Operand::State("b".into()));
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let result = serde_json::from_value::<CompareAction>(json!({
            "left": "a", "operator": "between", "right": 1
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_kind_requires_exactly_one_variant() {
        let none: Action = serde_json::from_value(json!({"id": "empty"})).unwrap();
        assert!(none.kind().is_none());
        assert!(none.variant_names().is_empty());

        let mut two = Action::update_state("x", "temp", StateValue::Number(1.0));
        two.call_script = Some(ScriptCall {
            script_name: "ha:script.x".into(),
            args: None,
        });
        assert!(two.kind().is_none());
        assert_eq!(two.variant_names(), vec!["update_state", "call_script"]);
    }

    #[test]
    fn test_operator_apply() {
        assert!(Operator::Gt.apply(10.0, 5.0));
        assert!(!Operator::Lt.apply(10.0, 5.0));
        assert!(Operator::Le.apply(5.0, 5.0));
        assert!(Operator::Ne.apply(1.0, 0.0));
        assert_eq!(Operator::Ge.to_string(), "ge");
    }
}
