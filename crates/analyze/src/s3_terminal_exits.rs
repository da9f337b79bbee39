//! S3 — Terminal exits and dead ends.
//!
//! Terminal states are a naming convention: nothing stops a transition
//! from leaving one. This analysis reports active transitions that do, and
//! non-terminal states that records can never leave.

use blueprint_interchange::Blueprint;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct TerminalExit {
    pub transition_id: i64,
    pub transition_name: String,
    pub from_state: String,
    pub to_state: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct S3Result {
    pub terminal_exits: Vec<TerminalExit>,
    /// Non-terminal states with no active outgoing transition.
    pub dead_ends: Vec<String>,
}

pub fn analyze_terminal_exits(blueprint: &Blueprint) -> S3Result {
    let active: Vec<_> = blueprint.transitions.iter().filter(|t| t.is_active).collect();
    let has_entry = active.iter().any(|t| t.from_state_id.is_none());

    let terminal_exits = active
        .iter()
        .filter_map(|t| {
            let from = blueprint.state(t.from_state_id?)?;
            from.is_terminal.then(|| TerminalExit {
                transition_id: t.id,
                transition_name: t.name.clone(),
                from_state: from.name.clone(),
                to_state: blueprint.state_name(t.to_state_id).unwrap_or("?").to_string(),
            })
        })
        .collect();

    let dead_ends = if has_entry {
        Vec::new()
    } else {
        blueprint
            .states
            .iter()
            .filter(|s| !s.is_terminal)
            .filter(|s| !active.iter().any(|t| t.from_state_id == Some(s.id)))
            .map(|s| s.name.clone())
            .collect()
    };

    S3Result {
        terminal_exits,
        dead_ends,
    }
}
