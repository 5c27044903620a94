//! Declarative actions for the ESP display gateway
//!
//! This crate provides the action model (`compare`, `update_state`,
//! `on_callback`, `call_script`) and the [`ActionEngine`] that evaluates an
//! action graph against the internal state store.

pub mod action;
mod engine;

pub use action::{
    Action, ActionKind, CompareAction, OnCallbackAction, Operand, Operator, ScriptCall,
    UpdateStateAction,
};
pub use engine::{
    ActionEngine, ActionError, ActionResult, ScriptError, ScriptRunner, DEFAULT_MAX_DEPTH,
};
