//! S2 — Reachable states.
//!
//! BFS from the state new records start in, following active transitions.
//! Entry transitions reach their target from anywhere, so their targets
//! are always reachable.

use std::collections::{BTreeSet, HashMap, VecDeque};

use blueprint_interchange::Blueprint;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct S2Result {
    pub start_state: Option<String>,
    pub reachable_states: BTreeSet<String>,
    pub unreachable_states: BTreeSet<String>,
}

pub fn analyze_reachability(blueprint: &Blueprint) -> S2Result {
    let Some(start) = blueprint.initial_state().or_else(|| blueprint.states.first()) else {
        return S2Result {
            start_state: None,
            reachable_states: BTreeSet::new(),
            unreachable_states: BTreeSet::new(),
        };
    };

    let mut adjacency: HashMap<i64, Vec<i64>> = HashMap::new();
    let mut visited: BTreeSet<i64> = BTreeSet::new();
    let mut queue = VecDeque::new();
    visited.insert(start.id);
    queue.push_back(start.id);

    for t in blueprint.transitions.iter().filter(|t| t.is_active) {
        match t.from_state_id {
            Some(from) => adjacency.entry(from).or_default().push(t.to_state_id),
            None => {
                if visited.insert(t.to_state_id) {
                    queue.push_back(t.to_state_id);
                }
            }
        }
    }

    while let Some(state) = queue.pop_front() {
        if let Some(next) = adjacency.get(&state) {
            for &to in next {
                if visited.insert(to) {
                    queue.push_back(to);
                }
            }
        }
    }

    let name = |id: i64| blueprint.state_name(id).unwrap_or("?").to_string();
    S2Result {
        start_state: Some(start.name.clone()),
        reachable_states: visited.iter().map(|&id| name(id)).collect(),
        unreachable_states: blueprint
            .states
            .iter()
            .filter(|s| !visited.contains(&s.id))
            .map(|s| s.name.clone())
            .collect(),
    }
}
