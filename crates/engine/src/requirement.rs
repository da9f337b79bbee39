//! Requirement gate: what a user must supply before an execution can move on.

use std::collections::BTreeMap;

use blueprint_interchange::{Requirement, RequirementKind, Transition};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::value::FieldValue;

/// Data collected from the user for a pending execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Values for `mandatory_field` requirements, keyed by field name.
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Ids of uploaded files.
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub note: Option<String>,
    /// Checklist item id to completion flag.
    #[serde(default)]
    pub checklist: BTreeMap<String, bool>,
}

impl Submission {
    pub fn with_note(note: impl Into<String>) -> Self {
        Submission {
            note: Some(note.into()),
            ..Default::default()
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Requirements of a transition that block completion, in display order.
pub fn pending_requirements(transition: &Transition) -> Vec<&Requirement> {
    let mut required: Vec<&Requirement> = transition
        .requirements
        .iter()
        .filter(|r| r.is_required)
        .collect();
    required.sort_by_key(|r| (r.display_order, r.id));
    required
}

/// Every requirement of a transition, advisory ones included, for display.
pub fn display_requirements(transition: &Transition) -> Vec<&Requirement> {
    let mut all: Vec<&Requirement> = transition.requirements.iter().collect();
    all.sort_by_key(|r| (r.display_order, r.id));
    all
}

/// Outcome of checking a submission against a requirement list.
#[derive(Debug, Clone, PartialEq)]
pub struct RequirementCheck<'a> {
    /// Blocking requirements the submission does not satisfy.
    pub missing: Vec<&'a Requirement>,
}

impl RequirementCheck<'_> {
    pub fn is_satisfied(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn missing_ids(&self) -> Vec<i64> {
        self.missing.iter().map(|r| r.id).collect()
    }

    pub fn missing_labels(&self) -> Vec<String> {
        self.missing.iter().map(|r| requirement_label(r)).collect()
    }
}

/// Check a submission. Advisory requirements (`is_required = false`) never
/// block.
pub fn validate_submission<'a>(
    requirements: &'a [Requirement],
    submission: &Submission,
) -> RequirementCheck<'a> {
    let missing = requirements
        .iter()
        .filter(|r| r.is_required && !is_satisfied(r, submission))
        .collect();
    RequirementCheck { missing }
}

fn is_satisfied(requirement: &Requirement, submission: &Submission) -> bool {
    match &requirement.kind {
        RequirementKind::MandatoryField { field } => submission
            .fields
            .get(field)
            .map(|v| !FieldValue::infer(v).is_empty())
            .unwrap_or(false),
        RequirementKind::Attachment => submission.attachments.iter().any(|a| !a.trim().is_empty()),
        RequirementKind::Note => submission
            .note
            .as_deref()
            .is_some_and(|n| !n.trim().is_empty()),
        RequirementKind::Checklist { items } => items
            .iter()
            .all(|item| submission.checklist.get(&item.id).copied().unwrap_or(false)),
    }
}

/// The configured label, or a description derived from the requirement kind.
pub fn requirement_label(requirement: &Requirement) -> String {
    if let Some(label) = &requirement.label {
        return label.clone();
    }
    match &requirement.kind {
        RequirementKind::MandatoryField { field } => format!("field '{}'", field),
        RequirementKind::Attachment => "attachment".to_string(),
        RequirementKind::Note => "note".to_string(),
        RequirementKind::Checklist { .. } => "checklist".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blueprint_interchange::ChecklistItem;
    use serde_json::json;

    fn req(id: i64, kind: RequirementKind, required: bool) -> Requirement {
        Requirement {
            id,
            kind,
            label: None,
            description: None,
            is_required: required,
            display_order: id as i32,
        }
    }

    fn all_kinds() -> Vec<Requirement> {
        vec![
            req(
                1,
                RequirementKind::MandatoryField {
                    field: "close_date".into(),
                },
                true,
            ),
            req(2, RequirementKind::Attachment, true),
            req(3, RequirementKind::Note, true),
            req(
                4,
                RequirementKind::Checklist {
                    items: vec![
                        ChecklistItem {
                            id: "kyc".into(),
                            label: "KYC done".into(),
                        },
                        ChecklistItem {
                            id: "credit".into(),
                            label: "Credit checked".into(),
                        },
                    ],
                },
                true,
            ),
            req(5, RequirementKind::Note, false),
        ]
    }

    #[test]
    fn empty_submission_misses_every_blocking_requirement() {
        let reqs = all_kinds();
        let check = validate_submission(&reqs, &Submission::default());
        assert_eq!(check.missing_ids(), vec![1, 2, 3, 4]);
        assert!(!check.is_satisfied());
    }

    #[test]
    fn complete_submission_passes() {
        let reqs = all_kinds();
        let submission: Submission = serde_json::from_value(json!({
            "fields": {"close_date": "2025-04-01"},
            "attachments": ["file-17"],
            "note": "looks good",
            "checklist": {"kyc": true, "credit": true}
        }))
        .unwrap();
        assert!(validate_submission(&reqs, &submission).is_satisfied());
    }

    #[test]
    fn partial_checklist_and_blank_values_fail() {
        let reqs = all_kinds();
        let submission: Submission = serde_json::from_value(json!({
            "fields": {"close_date": "  "},
            "attachments": ["file-17"],
            "note": "   ",
            "checklist": {"kyc": true, "credit": false}
        }))
        .unwrap();
        let check = validate_submission(&reqs, &submission);
        assert_eq!(check.missing_ids(), vec![1, 3, 4]);
        assert_eq!(
            check.missing_labels(),
            vec!["field 'close_date'", "note", "checklist"]
        );
    }

    #[test]
    fn advisory_requirements_are_displayed_not_enforced() {
        let transition = Transition {
            id: 1,
            from_state_id: Some(1),
            to_state_id: 2,
            name: "Submit".into(),
            description: None,
            button_label: None,
            display_order: 0,
            is_active: true,
            conditions: vec![],
            requirements: vec![req(9, RequirementKind::Note, false)],
            actions: vec![],
            approval: None,
        };
        assert!(pending_requirements(&transition).is_empty());
        assert_eq!(display_requirements(&transition).len(), 1);
        assert!(validate_submission(&transition.requirements, &Submission::default()).is_satisfied());
    }

    #[test]
    fn note_only_submission_deserializes() {
        let submission: Submission = serde_json::from_value(json!({"note": "looks good"})).unwrap();
        assert_eq!(submission, Submission::with_note("looks good"));
    }
}
