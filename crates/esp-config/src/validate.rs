//! Cross-reference validation
//!
//! Every problem is collected so a single load reports all of them.

use crate::model::{FullConfig, TemplateConfig};
use esp_actions::{ActionKind, Operand};
use esp_core::{StateDefinition, EXTERNAL_BIND_PREFIX};
use std::collections::{HashMap, HashSet};

/// Check a configuration, returning every problem found
pub fn validate_config(config: &FullConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    let mut states = HashSet::new();
    let mut binds: HashMap<&str, &str> = HashMap::new();
    for state in config.states() {
        if !states.insert(state.name.as_str()) {
            errors.push(format!("Duplicate internal state name '{}'", state.name));
        }

        if let Some(bind) = &state.bind {
            if !bind.starts_with(EXTERNAL_BIND_PREFIX) {
                errors.push(format!(
                    "State '{}' has bind '{}' which must start with '{}'",
                    state.name, bind, EXTERNAL_BIND_PREFIX
                ));
            } else if let Some(first) = binds.insert(bind.as_str(), state.name.as_str()) {
                errors.push(format!(
                    "Multiple internal states are bound to state {} ('{}' and '{}')",
                    bind, first, state.name
                ));
            }
        }

        check_definition(&state.name, &state.definition, &mut errors);
    }

    let mut actions = HashSet::new();
    for action in config.actions() {
        if !actions.insert(action.id.as_str()) {
            errors.push(format!("Duplicate action id '{}'", action.id));
        }
    }

    for screen in &config.screens {
        for (field, state) in &screen.state_bindings {
            if !states.contains(state.as_str()) {
                errors.push(format!(
                    "Screen '{}' binds field '{}' to unknown internal state '{}'",
                    screen.id, field, state
                ));
            }
        }
    }

    for action in config.actions() {
        let id = &action.id;
        let Some(kind) = action.kind() else {
            let found = action.variant_names();
            errors.push(format!(
                "Action '{}' must have exactly one of compare, update_state, on_callback, call_script (found {})",
                id,
                if found.is_empty() {
                    "none".to_string()
                } else {
                    found.join(", ")
                }
            ));
            continue;
        };

        match kind {
            ActionKind::Compare(compare) => {
                if !states.contains(compare.left.as_str()) {
                    errors.push(format!(
                        "Compare in action '{}' references unknown state '{}'",
                        id, compare.left
                    ));
                }
                if let Operand::State(right) = &compare.right {
                    if !states.contains(right.as_str()) {
                        errors.push(format!(
                            "Compare in action '{}' references unknown state '{}'",
                            id, right
                        ));
                    }
                }
                for next in [&compare.on_true, &compare.on_false].into_iter().flatten() {
                    if !actions.contains(next.as_str()) {
                        errors.push(format!(
                            "Compare in action '{}' references unknown action id '{}'",
                            id, next
                        ));
                    }
                }
            }
            ActionKind::UpdateState(update) => {
                if !states.contains(update.target.as_str()) {
                    errors.push(format!(
                        "UpdateState in action '{}' targets unknown state '{}'",
                        id, update.target
                    ));
                }
            }
            ActionKind::OnCallback(on_callback) => {
                for next in &on_callback.actions {
                    if !actions.contains(next.as_str()) {
                        errors.push(format!(
                            "OnCallback in action '{}' references unknown action id '{}'",
                            id, next
                        ));
                    }
                }
            }
            ActionKind::CallScript(call) => {
                if !call.script_name.starts_with(EXTERNAL_BIND_PREFIX) {
                    errors.push(format!(
                        "CallScript in action '{}' has script_name '{}' which must start with '{}'",
                        id, call.script_name, EXTERNAL_BIND_PREFIX
                    ));
                }
            }
        }
    }

    for module in &config.modules {
        if !states.contains(module.timer.time_state.as_str()) {
            errors.push(format!(
                "Timer module '{}' references unknown time_state '{}'",
                module.id, module.timer.time_state
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_definition(name: &str, definition: &StateDefinition, errors: &mut Vec<String>) {
    match definition {
        StateDefinition::Number { min, max, default } => {
            if let (Some(min), Some(max)) = (min, max) {
                if min > max {
                    errors.push(format!("State '{}' has min {} above max {}", name, min, max));
                }
            }
            if min.is_some_and(|min| *default < min) || max.is_some_and(|max| *default > max) {
                errors.push(format!("State '{}' default {} is out of range", name, default));
            }
        }
        StateDefinition::Enum { options, default } => {
            if !options.contains(default) {
                errors.push(format!(
                    "State '{}' default '{}' is not one of its options",
                    name, default
                ));
            }
        }
        StateDefinition::Boolean { .. } | StateDefinition::Callback { .. } => {}
    }
}

/// Check a template configuration for duplicate names
pub fn validate_templates(config: &TemplateConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    let mut names = HashSet::new();

    for template in &config.templates {
        if !names.insert(template.name.as_str()) {
            errors.push(format!("Duplicate template name '{}'", template.name));
        }
        let mut fields = HashSet::new();
        for field in &template.fields {
            if !fields.insert(field.name.as_str()) {
                errors.push(format!(
                    "Template '{}' declares field '{}' more than once",
                    template.name, field.name
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
