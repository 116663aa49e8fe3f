//! Per-step display status for an operation in flight
//!
//! Statuses are recomputed from the definition, the operation pointer and the
//! validated token set every time; nothing here is persisted.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::model::{OperationInstance, Step, WorkflowDefinition};
use super::progress::compute_progress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Current,
    Blocked,
    Waiting,
    Pending,
}

impl StepStatus {
    pub fn symbol(self) -> &'static str {
        match self {
            StepStatus::Completed => "✅",
            StepStatus::Current => "▶️",
            StepStatus::Blocked => "🔒",
            StepStatus::Waiting => "⏳",
            StepStatus::Pending => "⬜",
        }
    }
}

/// A step decorated with its derived status and timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepView {
    #[serde(flatten)]
    pub step: Step,
    pub status: StepStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub progress: f64,
}

/// Position of the current step, `None` when the id matches nothing.
pub fn current_index(steps: &[Step], current_step_id: &str) -> Option<usize> {
    steps.iter().position(|s| s.id == current_step_id)
}

/// Derive the status of every step.
///
/// The token check runs before the role check, so a client step that also
/// requires an unvalidated token shows as blocked.
pub fn derive_statuses(
    steps: &[Step],
    current_step_id: &str,
    validated_tokens: &BTreeSet<String>,
) -> Vec<StepStatus> {
    let current = current_index(steps, current_step_id);

    steps
        .iter()
        .enumerate()
        .map(|(i, step)| match current {
            Some(c) if i < c => StepStatus::Completed,
            Some(c) if i == c => StepStatus::Current,
            _ => {
                if step.requires_token && !validated_tokens.contains(&step.id) {
                    StepStatus::Blocked
                } else if step.is_client_step() {
                    StepStatus::Waiting
                } else {
                    StepStatus::Pending
                }
            }
        })
        .collect()
}

/// Build the full views for an operation at `now`.
pub fn build_step_views(
    workflow: &WorkflowDefinition,
    operation: &OperationInstance,
    now: DateTime<Utc>,
    default_duration: Duration,
) -> Vec<StepView> {
    let statuses = derive_statuses(
        &workflow.steps,
        &operation.current_step,
        &operation.validated_tokens,
    );

    workflow
        .steps
        .iter()
        .zip(statuses)
        .map(|(step, status)| {
            let timing = operation.timing(&step.id);
            let start_time = timing.map(|t| t.started_at);
            let end_time = timing.and_then(|t| t.completed_at);

            let duration_seconds = match (start_time, end_time, status) {
                (Some(start), Some(end), _) => Some((end - start).num_seconds()),
                (Some(start), None, StepStatus::Current) => Some((now - start).num_seconds()),
                _ => None,
            };

            let progress = match status {
                StepStatus::Completed => 100.0,
                StepStatus::Current => {
                    let assumed = step
                        .expected_duration_hours
                        .map(|h| Duration::hours(i64::from(h)))
                        .unwrap_or(default_duration);
                    match start_time {
                        Some(start) => compute_progress(now - start, assumed),
                        None => 0.0,
                    }
                }
                _ => 0.0,
            };

            StepView {
                step: step.clone(),
                status,
                start_time,
                end_time,
                duration_seconds,
                progress,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::model::{AssignedRole, OperationStatus, StepTiming, StepType, WorkflowType};

    fn steps() -> Vec<Step> {
        vec![
            Step::new("a", StepType::Submission).requiring_token(),
            Step::new("b", StepType::ClientConfirmation).assigned_to(AssignedRole::Client),
            Step::new("c", StepType::Approval),
        ]
    }

    #[test]
    fn test_token_then_client_example() {
        let statuses = derive_statuses(&steps(), "a", &BTreeSet::new());
        assert_eq!(
            statuses,
            vec![StepStatus::Current, StepStatus::Waiting, StepStatus::Pending]
        );
    }

    #[test]
    fn test_completed_ignores_gates() {
        let statuses = derive_statuses(&steps(), "c", &BTreeSet::new());
        assert_eq!(
            statuses,
            vec![StepStatus::Completed, StepStatus::Completed, StepStatus::Current]
        );
    }

    #[test]
    fn test_token_precedes_role() {
        let steps = vec![
            Step::new("a", StepType::Submission),
            Step::new("b", StepType::ContractSignature)
                .requiring_token()
                .assigned_to(AssignedRole::Client),
        ];
        let statuses = derive_statuses(&steps, "a", &BTreeSet::new());
        assert_eq!(statuses[1], StepStatus::Blocked);

        let validated: BTreeSet<String> = ["b".to_string()].into();
        let statuses = derive_statuses(&steps, "a", &validated);
        assert_eq!(statuses[1], StepStatus::Waiting);
    }

    #[test]
    fn test_unknown_current_step_is_degenerate() {
        let statuses = derive_statuses(&steps(), "missing", &BTreeSet::new());
        assert!(statuses
            .iter()
            .all(|s| !matches!(s, StepStatus::Completed | StepStatus::Current)));
        assert_eq!(statuses[0], StepStatus::Blocked);
    }

    #[test]
    fn test_views_carry_timing_and_progress() {
        let now = Utc::now();
        let workflow = WorkflowDefinition {
            id: "wf".into(),
            name: "Leasing".into(),
            description: String::new(),
            workflow_type: WorkflowType::Leasing,
            steps: vec![
                Step::new("a", StepType::Submission),
                Step::new("b", StepType::Approval),
                Step::new("c", StepType::Closure),
            ],
            product_ids: vec![],
            active: true,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        let operation = OperationInstance {
            id: "op".into(),
            workflow_id: "wf".into(),
            current_step: "b".into(),
            status: OperationStatus::InProgress,
            validated_tokens: BTreeSet::new(),
            step_history: vec![
                StepTiming {
                    step_id: "a".into(),
                    started_at: now - Duration::days(3),
                    completed_at: Some(now - Duration::days(2)),
                },
                StepTiming {
                    step_id: "b".into(),
                    started_at: now - Duration::hours(12),
                    completed_at: None,
                },
            ],
            version: 1,
            created_at: now,
            updated_at: now,
        };

        let views = build_step_views(&workflow, &operation, now, Duration::days(1));
        assert_eq!(views[0].status, StepStatus::Completed);
        assert_eq!(views[0].progress, 100.0);
        assert_eq!(views[0].duration_seconds, Some(86_400));
        assert_eq!(views[1].status, StepStatus::Current);
        assert!((views[1].progress - 50.0).abs() < 1e-9);
        assert_eq!(views[1].duration_seconds, Some(43_200));
        assert_eq!(views[2].progress, 0.0);
        assert!(views[2].start_time.is_none());
    }
}
