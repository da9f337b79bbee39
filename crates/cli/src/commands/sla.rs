use std::path::Path;
use std::process;

use blueprint_engine::config::parse_timestamp;
use blueprint_engine::SlaStatus;
use blueprint_interchange::EscalationTrigger;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::config::read_engine_config;
use crate::{load_blueprint, print_json, report_error, OutputFormat};

pub(crate) struct SlaOptions<'a> {
    pub file: &'a Path,
    pub state_id: i64,
    pub entered_at: &'a str,
    pub now: Option<&'a str>,
    pub config: Option<&'a Path>,
}

#[derive(Serialize)]
struct EscalationOutput {
    escalation_id: i64,
    trigger: String,
    action_type: String,
    triggered: bool,
}

#[derive(Serialize)]
struct SlaOutput {
    #[serde(flatten)]
    status: SlaStatus,
    #[serde(with = "time::serde::rfc3339")]
    evaluated_at: OffsetDateTime,
    escalations: Vec<EscalationOutput>,
}

fn fail(msg: &str, output: OutputFormat, quiet: bool) -> ! {
    report_error(msg, output, quiet);
    process::exit(1);
}

fn rfc3339(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_else(|_| ts.to_string())
}

fn trigger_label(trigger: &EscalationTrigger) -> String {
    match trigger {
        EscalationTrigger::Approaching { percent } => format!("approaching {}%", percent),
        EscalationTrigger::Breached => "breached".to_string(),
    }
}

pub(crate) fn cmd_sla(opts: SlaOptions<'_>, output: OutputFormat, quiet: bool) {
    let blueprint = load_blueprint(opts.file, output, quiet);
    let config = read_engine_config(opts.config).unwrap_or_else(|e| fail(&e, output, quiet));
    let calendar = config
        .calendar()
        .unwrap_or_else(|e| fail(&e.to_string(), output, quiet));

    let entered_at = parse_timestamp("entered-at", opts.entered_at)
        .unwrap_or_else(|e| fail(&e.to_string(), output, quiet));
    let now = match opts.now {
        Some(s) => parse_timestamp("now", s).unwrap_or_else(|e| fail(&e.to_string(), output, quiet)),
        None => OffsetDateTime::now_utc(),
    };

    let Some(state) = blueprint.state(opts.state_id) else {
        fail(
            &format!("state {} not found in blueprint {}", opts.state_id, blueprint.id),
            output,
            quiet,
        );
    };
    let Some(sla) = blueprint.active_sla_for_state(state.id) else {
        fail(
            &format!("state '{}' has no active SLA", state.name),
            output,
            quiet,
        );
    };

    let status = blueprint_engine::sla::status(sla, entered_at, now, &calendar)
        .unwrap_or_else(|e| fail(&e.to_string(), output, quiet));
    let escalations: Vec<EscalationOutput> = sla
        .ordered_escalations()
        .into_iter()
        .map(|e| EscalationOutput {
            escalation_id: e.id,
            trigger: trigger_label(&e.trigger),
            action_type: e.action_type.clone(),
            triggered: status.triggers(&e.trigger),
        })
        .collect();

    if quiet {
        return;
    }
    match output {
        OutputFormat::Json => print_json(&SlaOutput {
            status,
            evaluated_at: now,
            escalations,
        }),
        OutputFormat::Text => {
            let mut calendar_notes = Vec::new();
            if sla.business_hours_only {
                calendar_notes.push("business hours");
            }
            if sla.exclude_weekends {
                calendar_notes.push("weekdays only");
            }
            let notes = if calendar_notes.is_empty() {
                String::new()
            } else {
                format!(", {}", calendar_notes.join(", "))
            };
            println!(
                "SLA '{}' on '{}' ({}h{})",
                status.sla_name, state.name, status.duration_hours, notes
            );
            println!("  Entered:   {}", rfc3339(status.state_entered_at));
            println!("  Due:       {}", rfc3339(status.due_at));
            println!(
                "  Elapsed:   {}% ({}s counted)",
                status.percent_elapsed, status.elapsed_seconds
            );
            println!("  Remaining: {}s", status.remaining_seconds);
            let label = if status.is_breached {
                "BREACHED"
            } else if status.is_approaching {
                "approaching"
            } else {
                "on track"
            };
            println!("  Status:    {}", label);
            if !escalations.is_empty() {
                println!();
                println!("Escalations:");
                for e in &escalations {
                    println!(
                        "  [{}] {} -> {}",
                        if e.triggered { "x" } else { " " },
                        e.trigger,
                        e.action_type
                    );
                }
            }
        }
    }
}
