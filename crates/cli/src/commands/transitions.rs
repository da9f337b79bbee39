use std::path::Path;
use std::process;

use blueprint_engine::{available_transitions, seed_state, TransitionSummary};
use serde::Serialize;

use crate::{load_blueprint, print_json, read_json, report_error, OutputFormat};

#[derive(Serialize)]
struct TransitionsOutput {
    blueprint_id: i64,
    state_id: i64,
    state_name: String,
    transitions: Vec<TransitionSummary>,
}

pub(crate) fn cmd_transitions(
    file: &Path,
    state: Option<i64>,
    data: Option<&Path>,
    output: OutputFormat,
    quiet: bool,
) {
    let blueprint = load_blueprint(file, output, quiet);
    let record_data = match data {
        Some(path) => read_json(path, output, quiet),
        None => serde_json::json!({}),
    };
    if !record_data.is_object() {
        report_error("record data must be a JSON object", output, quiet);
        process::exit(1);
    }

    let current = match state {
        Some(id) => blueprint.state(id),
        None => seed_state(&blueprint, &record_data),
    };
    let Some(current) = current else {
        let msg = match state {
            Some(id) => format!("state {} not found in blueprint {}", id, blueprint.id),
            None => format!("blueprint {} has no states", blueprint.id),
        };
        report_error(&msg, output, quiet);
        process::exit(1);
    };

    let transitions: Vec<TransitionSummary> =
        available_transitions(&blueprint, current.id, &record_data)
            .into_iter()
            .map(|t| TransitionSummary::new(&blueprint, t))
            .collect();

    if quiet {
        return;
    }
    match output {
        OutputFormat::Json => print_json(&TransitionsOutput {
            blueprint_id: blueprint.id,
            state_id: current.id,
            state_name: current.name.clone(),
            transitions,
        }),
        OutputFormat::Text => {
            println!("From '{}' (state {}):", current.name, current.id);
            if !blueprint.is_active {
                println!("  Blueprint is inactive.");
                return;
            }
            if transitions.is_empty() {
                println!("  No transitions available.");
            }
            for t in &transitions {
                let mut flags = Vec::new();
                let blocking = t.requirements.iter().filter(|r| r.is_required).count();
                if blocking > 0 {
                    flags.push(format!("{} requirement(s)", blocking));
                }
                if t.requires_approval {
                    flags.push("approval".to_string());
                }
                let flags = if flags.is_empty() {
                    String::new()
                } else {
                    format!("  [{}]", flags.join(", "))
                };
                println!("  {:>4}  {} -> {}{}", t.id, t.label, t.to_state_name, flags);
            }
        }
    }
}
