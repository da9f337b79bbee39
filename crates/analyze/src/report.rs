//! AnalysisReport — aggregated output from the S1-S4 analyses.
//!
//! The report collects results from each analysis module and extracts
//! notable findings (warnings, info) for summary display.

use crate::s1_state_space::S1Result;
use crate::s2_reachability::S2Result;
use crate::s3_terminal_exits::S3Result;
use crate::s4_sla_coverage::S4Result;
use serde::Serialize;

/// Severity level for an analysis finding.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub enum FindingSeverity {
    Info,
    Warning,
}

/// A notable finding from analysis.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub analysis: String,
    pub severity: FindingSeverity,
    pub message: String,
    /// Name of the state the finding concerns, if any.
    pub state: Option<String>,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub blueprint_id: i64,
    pub blueprint_name: String,
    pub s1_state_space: Option<S1Result>,
    pub s2_reachability: Option<S2Result>,
    pub s3_terminal_exits: Option<S3Result>,
    pub s4_sla_coverage: Option<S4Result>,
    pub analyses_run: Vec<String>,
    pub findings: Vec<Finding>,
}

impl AnalysisReport {
    pub fn new(blueprint_id: i64, blueprint_name: impl Into<String>) -> Self {
        AnalysisReport {
            blueprint_id,
            blueprint_name: blueprint_name.into(),
            s1_state_space: None,
            s2_reachability: None,
            s3_terminal_exits: None,
            s4_sla_coverage: None,
            analyses_run: Vec::new(),
            findings: Vec::new(),
        }
    }

    pub fn has_warnings(&self) -> bool {
        self.findings
            .iter()
            .any(|f| f.severity == FindingSeverity::Warning)
    }

    /// Extract findings from populated analysis results.
    pub fn extract_findings(&mut self) {
        self.findings.clear();

        // S1: Missing initial state
        if let Some(ref s1) = self.s1_state_space {
            if s1.initial_state.is_none() {
                if let Some(first) = s1.states.first() {
                    self.findings.push(Finding {
                        analysis: "s1".to_string(),
                        severity: FindingSeverity::Info,
                        message: format!(
                            "No initial state; records without a matching field value start in '{}'",
                            first
                        ),
                        state: Some(first.clone()),
                        details: None,
                    });
                }
            }
            if s1.active_transitions == 0 {
                self.findings.push(Finding {
                    analysis: "s1".to_string(),
                    severity: FindingSeverity::Warning,
                    message: "Blueprint has no active transitions".to_string(),
                    state: None,
                    details: None,
                });
            }
        }

        // S2: Unreachable states
        if let Some(ref s2) = self.s2_reachability {
            for state in &s2.unreachable_states {
                self.findings.push(Finding {
                    analysis: "s2".to_string(),
                    severity: FindingSeverity::Warning,
                    message: format!(
                        "State '{}' is unreachable from '{}'",
                        state,
                        s2.start_state.as_deref().unwrap_or("?")
                    ),
                    state: Some(state.clone()),
                    details: None,
                });
            }
        }

        // S3: Terminal exits and dead ends
        if let Some(ref s3) = self.s3_terminal_exits {
            for exit in &s3.terminal_exits {
                self.findings.push(Finding {
                    analysis: "s3".to_string(),
                    severity: FindingSeverity::Warning,
                    message: format!(
                        "Transition '{}' leaves terminal state '{}' for '{}'",
                        exit.transition_name, exit.from_state, exit.to_state
                    ),
                    state: Some(exit.from_state.clone()),
                    details: Some(serde_json::json!({
                        "transition_id": exit.transition_id,
                    })),
                });
            }
            for state in &s3.dead_ends {
                self.findings.push(Finding {
                    analysis: "s3".to_string(),
                    severity: FindingSeverity::Warning,
                    message: format!(
                        "Non-terminal state '{}' has no outgoing transitions",
                        state
                    ),
                    state: Some(state.clone()),
                    details: None,
                });
            }
        }

        // S4: SLA coverage
        if let Some(ref s4) = self.s4_sla_coverage {
            let sla_state = |id: i64| {
                s4.slas
                    .iter()
                    .find(|s| s.sla_id == id)
                    .map(|s| (s.name.clone(), s.state.clone()))
                    .unwrap_or_default()
            };
            for &id in &s4.terminal_slas {
                let (name, state) = sla_state(id);
                self.findings.push(Finding {
                    analysis: "s4".to_string(),
                    severity: FindingSeverity::Warning,
                    message: format!(
                        "SLA '{}' is bound to terminal state '{}' and will always breach",
                        name, state
                    ),
                    state: Some(state),
                    details: Some(serde_json::json!({ "sla_id": id })),
                });
            }
            for &id in &s4.inactive_slas {
                let (name, state) = sla_state(id);
                self.findings.push(Finding {
                    analysis: "s4".to_string(),
                    severity: FindingSeverity::Info,
                    message: format!("SLA '{}' on state '{}' is inactive", name, state),
                    state: Some(state),
                    details: Some(serde_json::json!({ "sla_id": id })),
                });
            }
            for m in &s4.misordered_escalations {
                let (name, state) = sla_state(m.sla_id);
                self.findings.push(Finding {
                    analysis: "s4".to_string(),
                    severity: FindingSeverity::Info,
                    message: format!(
                        "SLA '{}': escalation {} is listed after escalation {} but fires earlier",
                        name, m.escalation_id, m.after_escalation_id
                    ),
                    state: Some(state),
                    details: Some(serde_json::json!({
                        "sla_id": m.sla_id,
                        "escalation_id": m.escalation_id,
                        "after_escalation_id": m.after_escalation_id,
                    })),
                });
            }
            if !s4.uncovered_states.is_empty() {
                self.findings.push(Finding {
                    analysis: "s4".to_string(),
                    severity: FindingSeverity::Info,
                    message: format!(
                        "{} non-terminal state(s) without an active SLA: {}",
                        s4.uncovered_states.len(),
                        s4.uncovered_states.join(", ")
                    ),
                    state: None,
                    details: Some(serde_json::json!({
                        "states": s4.uncovered_states,
                    })),
                });
            }
        }

        // Sort findings for deterministic output
        self.findings.sort_by(|a, b| {
            a.analysis
                .cmp(&b.analysis)
                .then_with(|| format!("{:?}", a.severity).cmp(&format!("{:?}", b.severity)))
                .then_with(|| a.message.cmp(&b.message))
        });
    }
}
