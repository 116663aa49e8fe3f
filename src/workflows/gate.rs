use std::collections::BTreeSet;

use super::model::{AssignedRole, Step};

/// Whether institution staff may act on `step`.
///
/// Client steps are never actionable here since clients act out-of-band.
/// Steps at or before the current index stay actionable for re-display only.
/// The next step opens once every earlier step has its token gate satisfied
/// and none of them is client-assigned; anything further ahead is closed.
pub fn can_proceed(
    step: &Step,
    all_steps: &[Step],
    current_index: Option<usize>,
    validated_tokens: &BTreeSet<String>,
) -> bool {
    if step.assigned_role == Some(AssignedRole::Client) {
        return false;
    }

    let Some(index) = all_steps.iter().position(|s| s.id == step.id) else {
        return false;
    };

    let next_index = match current_index {
        Some(current) if index <= current => return true,
        Some(current) => current + 1,
        None => 0,
    };

    if index != next_index {
        return false;
    }

    all_steps[..index].iter().all(|prior| {
        let token_ok = !prior.requires_token || validated_tokens.contains(&prior.id);
        token_ok && !prior.is_client_step()
    })
}

/// Token gates of every step strictly before `index` are satisfied.
pub fn prior_tokens_satisfied(
    all_steps: &[Step],
    index: usize,
    validated_tokens: &BTreeSet<String>,
) -> bool {
    all_steps
        .iter()
        .take(index)
        .all(|prior| !prior.requires_token || validated_tokens.contains(&prior.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::model::StepType;

    fn tokens(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_client_step_never_proceeds() {
        let steps = vec![
            Step::new("a", StepType::Submission),
            Step::new("b", StepType::ClientConfirmation).assigned_to(AssignedRole::Client),
        ];
        assert!(!can_proceed(&steps[1], &steps, Some(0), &BTreeSet::new()));
        assert!(!can_proceed(&steps[1], &steps, Some(1), &BTreeSet::new()));
    }

    #[test]
    fn test_reached_steps_stay_actionable() {
        let steps = vec![
            Step::new("a", StepType::Submission).requiring_token(),
            Step::new("b", StepType::Approval),
            Step::new("c", StepType::Closure),
        ];
        assert!(can_proceed(&steps[0], &steps, Some(1), &BTreeSet::new()));
        assert!(can_proceed(&steps[1], &steps, Some(1), &BTreeSet::new()));
    }

    #[test]
    fn test_next_step_needs_prior_tokens() {
        let steps = vec![
            Step::new("a", StepType::Submission).requiring_token(),
            Step::new("b", StepType::Approval),
        ];
        assert!(!can_proceed(&steps[1], &steps, Some(0), &BTreeSet::new()));
        assert!(can_proceed(&steps[1], &steps, Some(0), &tokens(&["a"])));
    }

    #[test]
    fn test_prior_client_step_closes_next() {
        let steps = vec![
            Step::new("a", StepType::ClientConfirmation).assigned_to(AssignedRole::Client),
            Step::new("b", StepType::Approval),
        ];
        assert!(!can_proceed(&steps[1], &steps, Some(0), &BTreeSet::new()));
    }

    #[test]
    fn test_no_skip_ahead() {
        let steps = vec![
            Step::new("a", StepType::Submission),
            Step::new("b", StepType::Approval),
            Step::new("c", StepType::Closure),
        ];
        assert!(!can_proceed(&steps[2], &steps, Some(0), &BTreeSet::new()));
    }

    #[test]
    fn test_unknown_current_opens_first_step() {
        let steps = vec![
            Step::new("a", StepType::Submission),
            Step::new("b", StepType::Approval),
        ];
        assert!(can_proceed(&steps[0], &steps, None, &BTreeSet::new()));
        assert!(!can_proceed(&steps[1], &steps, None, &BTreeSet::new()));
    }

    #[test]
    fn test_step_outside_list() {
        let steps = vec![Step::new("a", StepType::Submission)];
        let stray = Step::new("z", StepType::Approval);
        assert!(!can_proceed(&stray, &steps, Some(0), &BTreeSet::new()));
    }

    #[test]
    fn test_prior_tokens_satisfied() {
        let steps = vec![
            Step::new("a", StepType::Submission).requiring_token(),
            Step::new("b", StepType::Approval),
        ];
        assert!(prior_tokens_satisfied(&steps, 0, &BTreeSet::new()));
        assert!(!prior_tokens_satisfied(&steps, 1, &BTreeSet::new()));
        assert!(prior_tokens_satisfied(&steps, 1, &tokens(&["a"])));
    }
}
