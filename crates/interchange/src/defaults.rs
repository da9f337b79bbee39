//! Default transition set for blueprints generated from a field's options.

use crate::types::{State, Transition};

/// Every non-terminal state may move to every other state.
///
/// Transition ids are assigned sequentially from 1 in iteration order;
/// `display_order` follows the same sequence.
pub fn default_transitions(states: &[State]) -> Vec<Transition> {
    let mut transitions = Vec::new();
    for from in states.iter().filter(|s| !s.is_terminal) {
        for to in states.iter().filter(|s| s.id != from.id) {
            let seq = transitions.len() as i64 + 1;
            transitions.push(Transition {
                id: seq,
                from_state_id: Some(from.id),
                to_state_id: to.id,
                name: format!("Move to {}", to.name),
                description: None,
                button_label: None,
                display_order: seq as i32,
                is_active: true,
                conditions: Vec::new(),
                requirements: Vec::new(),
                actions: Vec::new(),
                approval: None,
            });
        }
    }
    transitions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(id: i64, name: &str, terminal: bool) -> State {
        State {
            id,
            name: name.to_string(),
            field_option_value: Some(name.to_lowercase()),
            color: None,
            is_initial: id == 1,
            is_terminal: terminal,
            position: None,
        }
    }

    #[test]
    fn test_terminal_states_have_no_outgoing() {
        let states = vec![
            state(1, "Open", false),
            state(2, "Working", false),
            state(3, "Won", true),
            state(4, "Lost", true),
        ];
        let transitions = default_transitions(&states);

        // 2 non-terminal sources x 3 targets each
        assert_eq!(transitions.len(), 6);
        assert!(transitions
            .iter()
            .all(|t| t.from_state_id != Some(3) && t.from_state_id != Some(4)));
        assert!(transitions.iter().all(|t| t.from_state_id != Some(t.to_state_id)));
        assert_eq!(transitions[0].name, "Move to Working");
        assert_eq!(transitions[5].id, 6);
    }

    #[test]
    fn test_empty_states() {
        assert!(default_transitions(&[]).is_empty());
    }
}
