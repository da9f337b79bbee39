//! Blueprint static analyzer -- S1-S4 analysis suite with structured output.
//!
//! Each analysis is a separate module producing a serializable result
//! struct. [`analyze`] runs all of them over a parsed blueprint and
//! aggregates the results into an [`AnalysisReport`]. Nothing here touches
//! storage; findings describe the configuration, not live records.

pub mod report;
pub mod s1_state_space;
pub mod s2_reachability;
pub mod s3_terminal_exits;
pub mod s4_sla_coverage;

use blueprint_interchange::{Blueprint, ConfigError};

pub use report::{AnalysisReport, Finding, FindingSeverity};
pub use s1_state_space::S1Result;
pub use s2_reachability::S2Result;
pub use s3_terminal_exits::{S3Result, TerminalExit};
pub use s4_sla_coverage::{MisorderedEscalation, S4Result, SlaSummary};

/// Run the full S1-S4 analysis suite on a blueprint.
pub fn analyze(blueprint: &Blueprint) -> AnalysisReport {
    analyze_selected(blueprint, &["s1", "s2", "s3", "s4"])
}

/// Parse a JSON configuration, then analyze it.
pub fn analyze_config(config: &serde_json::Value) -> Result<AnalysisReport, ConfigError> {
    let blueprint = blueprint_interchange::from_config(config)?;
    Ok(analyze(&blueprint))
}

/// Run selected analyses. Valid names: "s1", "s2", "s3", "s4"; others
/// are ignored.
pub fn analyze_selected(blueprint: &Blueprint, analyses: &[&str]) -> AnalysisReport {
    let mut report = AnalysisReport::new(blueprint.id, blueprint.name.clone());

    if analyses.contains(&"s1") {
        report.s1_state_space = Some(s1_state_space::analyze_state_space(blueprint));
        report.analyses_run.push("s1".to_string());
    }
    if analyses.contains(&"s2") {
        report.s2_reachability = Some(s2_reachability::analyze_reachability(blueprint));
        report.analyses_run.push("s2".to_string());
    }
    if analyses.contains(&"s3") {
        report.s3_terminal_exits = Some(s3_terminal_exits::analyze_terminal_exits(blueprint));
        report.analyses_run.push("s3".to_string());
    }
    if analyses.contains(&"s4") {
        report.s4_sla_coverage = Some(s4_sla_coverage::analyze_sla_coverage(blueprint));
        report.analyses_run.push("s4".to_string());
    }

    report.extract_findings();
    report
}
