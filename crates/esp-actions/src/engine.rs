//! Action engine
//!
//! Evaluates actions by id against the internal state store. Evaluation is
//! recursive: `compare` branches into `on_true`/`on_false` and `on_callback`
//! runs its listed actions in order. Cyclic graphs are accepted; a depth
//! guard turns runaway recursion into [`ActionError::RecursionLimit`], which
//! aborts the whole evaluation rather than being collected with the other
//! sub-action failures.

use crate::action::{
    Action, ActionKind, CompareAction, OnCallbackAction, Operand, ScriptCall, UpdateStateAction,
};
use async_trait::async_trait;
use esp_core::{coerce_value, CoercionError, InternalState, StateValue, EXTERNAL_BIND_PREFIX};
use esp_state_store::{InternalStateStore, StoreError};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, trace, warn};

/// Default maximum nesting of action calls
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Action engine errors
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Action {0} not found")]
    NotFound(String),

    #[error("state '{0}' not found")]
    StateNotFound(String),

    #[error("value '{value}' of '{operand}' is not numeric")]
    NotNumeric { operand: String, value: String },

    #[error("action '{action}' must have exactly one of compare, update_state, on_callback, call_script")]
    InvalidAction { action: String },

    #[error("script '{0}' is not supported")]
    NotImplemented(String),

    #[error("action '{action}' exceeded the maximum depth of {limit}")]
    RecursionLimit { action: String, limit: usize },

    #[error("{} of the actions run by '{action}' failed: {}", .failures.len(), describe_failures(.failures))]
    SubActionsFailed {
        action: String,
        failures: Vec<(String, ActionError)>,
    },

    #[error("script '{script}' failed: {reason}")]
    Script { script: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Coercion(#[from] CoercionError),
}

fn describe_failures(failures: &[(String, ActionError)]) -> String {
    failures
        .iter()
        .map(|(id, e)| format!("{}: {}", id, e))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for action evaluation
pub type ActionResult<T> = Result<T, ActionError>;

/// Error returned by a script runner
pub type ScriptError = Box<dyn std::error::Error + Send + Sync>;

/// Runs scripts on the external automation platform
///
/// `script` is the name with the `ha:` prefix removed.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run_script(
        &self,
        script: &str,
        args: Option<&Map<String, Value>>,
    ) -> Result<(), ScriptError>;
}

#[derive(Default)]
struct ActionGraph {
    actions: IndexMap<String, Action>,
    states: HashMap<String, InternalState>,
}

type EvalFuture<'a> = Pin<Box<dyn Future<Output = ActionResult<()>> + Send + 'a>>;

/// Interpreter for the configured action graph
pub struct ActionEngine {
    store: Arc<InternalStateStore>,
    graph: RwLock<Arc<ActionGraph>>,
    scripts: Option<Arc<dyn ScriptRunner>>,
    max_depth: usize,
}

impl ActionEngine {
    /// Engine with an empty graph
    pub fn new(store: Arc<InternalStateStore>) -> Self {
        Self {
            store,
            graph: RwLock::new(Arc::new(ActionGraph::default())),
            scripts: None,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_script_runner(mut self, runner: Arc<dyn ScriptRunner>) -> Self {
        self.scripts = Some(runner);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Replace the action graph and the state definitions it refers to
    ///
    /// Evaluations already running finish against the graph they started
    /// with.
    #[instrument(skip_all, fields(actions = actions.len(), states = states.len()))]
    pub async fn load(&self, actions: Vec<Action>, states: Vec<InternalState>) {
        let graph = ActionGraph {
            actions: actions.into_iter().map(|a| (a.id.clone(), a)).collect(),
            states: states.into_iter().map(|s| (s.name.clone(), s)).collect(),
        };
        *self.graph.write().await = Arc::new(graph);
        info!("Loaded action graph");
    }

    pub async fn action_ids(&self) -> Vec<String> {
        self.graph.read().await.actions.keys().cloned().collect()
    }

    pub async fn has_action(&self, id: &str) -> bool {
        self.graph.read().await.actions.contains_key(id)
    }

    /// Evaluate one action and everything it leads to
    #[instrument(skip(self))]
    pub async fn call_action(&self, id: &str) -> ActionResult<()> {
        let graph = self.graph.read().await.clone();
        self.run(&graph, id, 0).await
    }

    /// Run every `on_callback` action listening on `callback_id`, in
    /// configuration order
    ///
    /// Returns how many actions matched. Failures do not stop the remaining
    /// actions and are reported together, except a recursion limit, which
    /// stops immediately.
    #[instrument(skip(self))]
    pub async fn fire_callback(&self, callback_id: &str) -> ActionResult<usize> {
        let graph = self.graph.read().await.clone();
        let matching: Vec<&str> = graph
            .actions
            .values()
            .filter(|a| {
                a.on_callback
                    .as_ref()
                    .is_some_and(|o| o.callback_id == callback_id)
            })
            .map(|a| a.id.as_str())
            .collect();

        if matching.is_empty() {
            debug!(callback_id, "No actions listen on callback");
            return Ok(0);
        }

        let mut failures = Vec::new();
        for id in &matching {
            match self.run(&graph, id, 0).await {
                Ok(()) => {}
                Err(e @ ActionError::RecursionLimit { .. }) => return Err(e),
                Err(e) => {
                    warn!(action = %id, error = %e, "Callback action failed");
                    failures.push((id.to_string(), e));
                }
            }
        }

        if failures.is_empty() {
            Ok(matching.len())
        } else {
            Err(ActionError::SubActionsFailed {
                action: format!("callback {}", callback_id),
                failures,
            })
        }
    }

    fn run<'a>(&'a self, graph: &'a ActionGraph, id: &'a str, depth: usize) -> EvalFuture<'a> {
        Box::pin(async move {
            if depth > self.max_depth {
                warn!(action = id, limit = self.max_depth, "Action recursion limit reached");
                return Err(ActionError::RecursionLimit {
                    action: id.to_string(),
                    limit: self.max_depth,
                });
            }

            let action = graph
                .actions
                .get(id)
                .ok_or_else(|| ActionError::NotFound(id.to_string()))?;
            trace!(action = id, depth, "Running action");

            match action.kind() {
                Some(ActionKind::UpdateState(update)) => self.update_state(graph, update),
                Some(ActionKind::Compare(compare)) => {
                    self.compare(graph, id, compare, depth).await
                }
                Some(ActionKind::OnCallback(on_callback)) => {
                    self.on_callback(graph, id, on_callback, depth).await
                }
                Some(ActionKind::CallScript(call)) => self.call_script(call).await,
                None => Err(ActionError::InvalidAction {
                    action: id.to_string(),
                }),
            }
        })
    }

    fn update_state(&self, graph: &ActionGraph, update: &UpdateStateAction) -> ActionResult<()> {
        let state = graph
            .states
            .get(&update.target)
            .ok_or_else(|| ActionError::StateNotFound(update.target.clone()))?;
        let stored = coerce_value(&update.value, state)?;
        debug!(state = %update.target, value = %stored.value, "Updating state");
        self.store.set(&stored)?;
        Ok(())
    }

    async fn compare(
        &self,
        graph: &ActionGraph,
        id: &str,
        compare: &CompareAction,
        depth: usize,
    ) -> ActionResult<()> {
        let left = self.state_number(&compare.left)?;
        let right = match &compare.right {
            Operand::Number(n) => *n,
            Operand::State(name) => self.state_number(name)?,
        };

        let outcome = compare.operator.apply(left, right);
        debug!(
            action = id,
            left,
            operator = %compare.operator,
            right,
            outcome,
            "Compared"
        );

        let next = if outcome {
            compare.on_true.as_deref()
        } else {
            compare.on_false.as_deref()
        };
        match next {
            Some(next) => self.run(graph, next, depth + 1).await,
            None => Ok(()),
        }
    }

    fn state_number(&self, name: &str) -> ActionResult<f64> {
        let stored = self
            .store
            .get(name)?
            .ok_or_else(|| ActionError::StateNotFound(name.to_string()))?;
        numeric(name, &stored.value)
    }

    async fn on_callback(
        &self,
        graph: &ActionGraph,
        id: &str,
        on_callback: &OnCallbackAction,
        depth: usize,
    ) -> ActionResult<()> {
        let mut failures = Vec::new();
        for next in &on_callback.actions {
            match self.run(graph, next, depth + 1).await {
                Ok(()) => {}
                Err(e @ ActionError::RecursionLimit { .. }) => return Err(e),
                Err(e) => {
                    warn!(action = id, sub_action = %next, error = %e, "Sub-action failed");
                    failures.push((next.clone(), e));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ActionError::SubActionsFailed {
                action: id.to_string(),
                failures,
            })
        }
    }

    async fn call_script(&self, call: &ScriptCall) -> ActionResult<()> {
        let Some(script) = call.script_name.strip_prefix(EXTERNAL_BIND_PREFIX) else {
            return Err(ActionError::NotImplemented(call.script_name.clone()));
        };

        match &self.scripts {
            Some(runner) => {
                debug!(script, "Running external script");
                runner
                    .run_script(script, call.args.as_ref())
                    .await
                    .map_err(|e| ActionError::Script {
                        script: call.script_name.clone(),
                        reason: e.to_string(),
                    })
            }
            None => {
                info!(script, "No script runner configured, skipping script");
                Ok(())
            }
        }
    }
}

fn numeric(operand: &str, value: &StateValue) -> ActionResult<f64> {
    value.as_f64().ok_or_else(|| ActionError::NotNumeric {
        operand: operand.to_string(),
        value: value.to_string(),
    })
}
