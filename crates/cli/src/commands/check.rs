use std::path::Path;
use std::process;

use blueprint_analyze::FindingSeverity;

use crate::{load_blueprint, print_json, report_error, OutputFormat};

pub(crate) fn cmd_check(file: &Path, analysis: Option<&str>, output: OutputFormat, quiet: bool) {
    // Step 1: Load and validate the configuration
    let blueprint = load_blueprint(file, output, quiet);

    // Step 2: Parse analysis selection
    let valid_analyses = ["s1", "s2", "s3", "s4"];
    let selected: Vec<&str> = match analysis {
        None => valid_analyses.to_vec(),
        Some(a) => {
            let selected: Vec<&str> = a.split(',').map(|s| s.trim()).collect();
            for s in &selected {
                if !valid_analyses.contains(s) {
                    let msg = format!(
                        "invalid analysis '{}'. Valid: {}",
                        s,
                        valid_analyses.join(", ")
                    );
                    report_error(&msg, output, quiet);
                    process::exit(1);
                }
            }
            selected
        }
    };

    // Step 3: Run analysis
    let report = blueprint_analyze::analyze_selected(&blueprint, &selected);

    // Step 4: Format output
    if !quiet {
        match output {
            OutputFormat::Json => print_json(&report),
            OutputFormat::Text => {
                let title = format!(
                    "Blueprint Analysis: {} (id {})",
                    report.blueprint_name, report.blueprint_id
                );
                println!("{}", title);
                println!("{}", "=".repeat(title.len()));
                println!();

                if let Some(ref s1) = report.s1_state_space {
                    println!(
                        "  States: {} states, initial '{}', {} terminal",
                        s1.state_count,
                        s1.initial_state.as_deref().unwrap_or("-"),
                        s1.terminal_states.len()
                    );
                    println!(
                        "  Transitions: {} active, {} inactive, {} entry, {} with approval",
                        s1.active_transitions,
                        s1.inactive_transitions,
                        s1.entry_transitions,
                        s1.transitions_with_approval
                    );
                }

                if let Some(ref s2) = report.s2_reachability {
                    if s2.unreachable_states.is_empty() {
                        println!(
                            "  Reachability: all {} states reachable",
                            s2.reachable_states.len()
                        );
                    } else {
                        println!(
                            "  Reachability: WARNING: {} unreachable state(s)",
                            s2.unreachable_states.len()
                        );
                    }
                }

                if let Some(ref s3) = report.s3_terminal_exits {
                    println!(
                        "  Terminal exits: {} transition(s), {} dead end(s)",
                        s3.terminal_exits.len(),
                        s3.dead_ends.len()
                    );
                }

                if let Some(ref s4) = report.s4_sla_coverage {
                    let escalations: usize = s4.slas.iter().map(|s| s.escalations.len()).sum();
                    println!(
                        "  SLAs: {} SLA(s), {} escalation(s), {} uncovered state(s)",
                        s4.slas.len(),
                        escalations,
                        s4.uncovered_states.len()
                    );
                }

                println!();
                println!("Findings:");

                if report.findings.is_empty() {
                    println!("  No findings.");
                }
                for finding in &report.findings {
                    let severity = match finding.severity {
                        FindingSeverity::Warning => "WARNING",
                        FindingSeverity::Info => "INFO",
                    };
                    let context = finding
                        .state
                        .as_ref()
                        .map(|s| format!(" [{}]", s))
                        .unwrap_or_default();
                    println!(
                        "  [{}/{}]{}: {}",
                        finding.analysis, severity, context, finding.message
                    );
                }
            }
        }
    }

    // Step 5: Exit code based on findings
    if report.has_warnings() {
        process::exit(1);
    }
}
