use chrono::Utc;
use uuid::Uuid;

use super::model::{Step, StepType, WorkflowDefinition, WorkflowType};
use crate::errors::{Result, WorkflowError};

/// Label given to freshly added steps
pub const NEW_STEP_LABEL: &str = "New step";

/// Draft of a workflow definition being created or edited.
///
/// The draft accepts anything; [`WorkflowBuilder::build`] refuses a blank
/// name, an empty step list and payment settings on a step that moves no
/// money.
#[derive(Debug, Clone)]
pub struct WorkflowBuilder {
    draft: WorkflowDefinition,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>, workflow_type: WorkflowType) -> Self {
        let now = Utc::now();
        Self {
            draft: WorkflowDefinition {
                id: Uuid::new_v4().to_string(),
                name: name.into(),
                description: String::new(),
                workflow_type,
                steps: Vec::new(),
                product_ids: Vec::new(),
                active: true,
                version: 0,
                created_at: now,
                updated_at: now,
            },
        }
    }

    /// Edit an existing definition; its id and version are kept
    pub fn from_existing(definition: WorkflowDefinition) -> Self {
        Self { draft: definition }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.draft.id = id.into();
        self
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.draft.name = name.into();
        self
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> &mut Self {
        self.draft.description = description.into();
        self
    }

    pub fn set_products(&mut self, product_ids: Vec<String>) -> &mut Self {
        self.draft.product_ids = product_ids;
        self
    }

    pub fn set_active(&mut self, active: bool) -> &mut Self {
        self.draft.active = active;
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.draft.steps
    }

    /// Append a blank validation step and hand it back for editing
    pub fn add_step(&mut self) -> &mut Step {
        let mut step = Step::new(Uuid::new_v4().to_string(), StepType::Validation)
            .with_label(NEW_STEP_LABEL);
        step.order = self.draft.steps.len() as u32;
        self.draft.steps.push(step);
        let last = self.draft.steps.len() - 1;
        &mut self.draft.steps[last]
    }

    /// Append a fully described step
    pub fn push_step(&mut self, step: Step) -> &mut Self {
        self.draft.steps.push(step);
        self
    }

    pub fn update_step<F>(&mut self, step_id: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut Step),
    {
        let step = self
            .draft
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| WorkflowError::not_found("step", step_id))?;
        update(step);
        Ok(())
    }

    pub fn remove_step(&mut self, step_id: &str) -> Result<Step> {
        let index = self.index_of(step_id)?;
        Ok(self.draft.steps.remove(index))
    }

    /// Swap the step with its predecessor. Returns false at the top.
    pub fn move_step_up(&mut self, step_id: &str) -> Result<bool> {
        let index = self.index_of(step_id)?;
        if index == 0 {
            return Ok(false);
        }
        self.draft.steps.swap(index - 1, index);
        Ok(true)
    }

    /// Swap the step with its successor. Returns false at the bottom.
    pub fn move_step_down(&mut self, step_id: &str) -> Result<bool> {
        let index = self.index_of(step_id)?;
        if index + 1 >= self.draft.steps.len() {
            return Ok(false);
        }
        self.draft.steps.swap(index, index + 1);
        Ok(true)
    }

    fn index_of(&self, step_id: &str) -> Result<usize> {
        self.draft
            .step_index(step_id)
            .ok_or_else(|| WorkflowError::not_found("step", step_id))
    }

    /// Finish the draft, renumbering step orders from zero
    pub fn build(mut self) -> Result<WorkflowDefinition> {
        if self.draft.name.trim().is_empty() {
            return Err(WorkflowError::Validation("workflow name is required".into()));
        }
        if self.draft.steps.is_empty() {
            return Err(WorkflowError::Validation(
                "workflow needs at least one step".into(),
            ));
        }

        if let Some(step) = self
            .draft
            .steps
            .iter()
            .find(|s| s.payment.is_some() && !s.step_type.is_payment())
        {
            return Err(WorkflowError::Validation(format!(
                "step {} ({}) is not a payment step",
                step.id, step.step_type
            )));
        }

        for (order, step) in self.draft.steps.iter_mut().enumerate() {
            step.order = order as u32;
        }
        self.draft.updated_at = Utc::now();
        Ok(self.draft)
    }
}
