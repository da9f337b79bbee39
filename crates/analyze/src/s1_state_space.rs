//! S1 — State space summary.
//!
//! Counts the declared states and transitions of a blueprint and names its
//! initial and terminal states for the downstream analyses.

use blueprint_interchange::Blueprint;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct S1Result {
    pub blueprint_id: i64,
    pub states: Vec<String>,
    pub state_count: usize,
    /// `None` when no state is flagged initial; records then start in the
    /// first declared state.
    pub initial_state: Option<String>,
    pub terminal_states: Vec<String>,
    pub active_transitions: usize,
    pub inactive_transitions: usize,
    /// Active transitions with no source state.
    pub entry_transitions: usize,
    pub transitions_with_approval: usize,
}

pub fn analyze_state_space(blueprint: &Blueprint) -> S1Result {
    let active = blueprint.transitions.iter().filter(|t| t.is_active);
    S1Result {
        blueprint_id: blueprint.id,
        states: blueprint.states.iter().map(|s| s.name.clone()).collect(),
        state_count: blueprint.states.len(),
        initial_state: blueprint.initial_state().map(|s| s.name.clone()),
        terminal_states: blueprint
            .states
            .iter()
            .filter(|s| s.is_terminal)
            .map(|s| s.name.clone())
            .collect(),
        active_transitions: active.clone().count(),
        inactive_transitions: blueprint.transitions.iter().filter(|t| !t.is_active).count(),
        entry_transitions: active.clone().filter(|t| t.from_state_id.is_none()).count(),
        transitions_with_approval: active.filter(|t| t.requires_approval()).count(),
    }
}
