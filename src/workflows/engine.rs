use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use super::gate::{can_proceed, prior_tokens_satisfied};
use super::model::{
    AssignedRole, IssuedToken, OperationInstance, OperationStatus, StepTiming, WorkflowDefinition,
};
use super::status::{build_step_views, current_index, StepView};
use super::token::{
    check_token_length, generate_token, normalize_candidate, TokenValidator, VaultTokenValidator,
};
use crate::errors::{Result, WorkflowError};
use crate::storage::Repositories;
use crate::telemetry::operation_span;

/// Who is acting on a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Institution,
    Client,
}

/// Result of an advance request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The operation moved onto the step. `generated_token` is set when the
    /// step hands out a token.
    Advanced {
        from: String,
        to: String,
        generated_token: Option<String>,
    },
    /// The step needs a validated token first; nothing moved
    TokenRequired { step_id: String, label: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum OperationEventKind {
    Started,
    Advanced { from: String, to: String },
    TokenIssued { step_id: String },
    TokenValidated { step_id: String },
    Completed,
    Cancelled,
}

/// Published after every change to an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationEvent {
    pub operation_id: String,
    #[serde(flatten)]
    pub kind: OperationEventKind,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub default_step_duration: Duration,
    pub token_length: usize,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        check_token_length(self.token_length)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_step_duration: Duration::days(7),
            token_length: 8,
        }
    }
}

/// Runs operations through their workflow definitions
pub struct WorkflowEngine {
    repos: Repositories,
    validator: Arc<dyn TokenValidator>,
    config: EngineConfig,
    events: broadcast::Sender<OperationEvent>,
}

impl WorkflowEngine {
    /// Engine validating tokens against its own vault
    pub fn new(repos: Repositories, config: EngineConfig) -> Self {
        let validator = Arc::new(VaultTokenValidator::new(repos.tokens.clone()));
        Self::with_validator(repos, validator, config)
    }

    pub fn with_validator(
        repos: Repositories,
        validator: Arc<dyn TokenValidator>,
        config: EngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            repos,
            validator,
            config,
            events,
        }
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OperationEvent> {
        self.events.subscribe()
    }

    fn publish(&self, operation_id: &str, kind: OperationEventKind) {
        // No subscribers is fine
        let _ = self.events.send(OperationEvent {
            operation_id: operation_id.to_string(),
            kind,
        });
    }

    async fn load(&self, operation_id: &str) -> Result<(WorkflowDefinition, OperationInstance)> {
        let operation = self.repos.operations.require(operation_id).await?;
        let workflow = self.repos.workflows.require(&operation.workflow_id).await?;
        Ok((workflow, operation))
    }

    /// Start a new operation on the first step of an active workflow
    pub async fn start_operation(
        &self,
        workflow_id: &str,
        operation_id: Option<String>,
    ) -> Result<OperationInstance> {
        let workflow = self.repos.workflows.require(workflow_id).await?;
        if !workflow.active {
            return Err(WorkflowError::Validation(format!(
                "workflow {workflow_id} is not active"
            )));
        }
        let first = workflow.steps.first().ok_or_else(|| {
            WorkflowError::Validation(format!("workflow {workflow_id} has no steps"))
        })?;

        let operation_id = operation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.repos.operations.get(&operation_id).await?.is_some() {
            return Err(WorkflowError::Validation(format!(
                "operation {operation_id} already exists"
            )));
        }

        let now = Utc::now();
        let operation = OperationInstance {
            id: operation_id,
            workflow_id: workflow.id.clone(),
            current_step: first.id.clone(),
            status: OperationStatus::InProgress,
            validated_tokens: BTreeSet::new(),
            step_history: vec![StepTiming {
                step_id: first.id.clone(),
                started_at: now,
                completed_at: None,
            }],
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let saved = self.repos.operations.save(&operation).await?;
        info!(
            operation_id = %saved.id,
            workflow_id = %workflow.id,
            first_step = %first.id,
            "Operation started"
        );
        self.publish(&saved.id, OperationEventKind::Started);
        Ok(saved)
    }

    /// Derived views of every step of an operation, as of now
    pub async fn step_views(&self, operation_id: &str) -> Result<Vec<StepView>> {
        let (workflow, operation) = self.load(operation_id).await?;
        Ok(build_step_views(
            &workflow,
            &operation,
            Utc::now(),
            self.config.default_step_duration,
        ))
    }

    /// Move an operation onto `step_id`.
    pub async fn advance(
        &self,
        operation_id: &str,
        step_id: &str,
        actor: Actor,
    ) -> Result<AdvanceOutcome> {
        self.advance_inner(operation_id, step_id, actor)
            .instrument(operation_span("advance", operation_id, Some(step_id)))
            .await
    }

    async fn advance_inner(
        &self,
        operation_id: &str,
        step_id: &str,
        actor: Actor,
    ) -> Result<AdvanceOutcome> {
        let (workflow, mut operation) = self.load(operation_id).await?;
        if operation.status.is_terminal() {
            return Err(WorkflowError::not_permitted(
                step_id,
                format!("operation is {:?}", operation.status),
            ));
        }

        let index = workflow
            .step_index(step_id)
            .ok_or_else(|| WorkflowError::not_found("step", step_id))?;
        let step = &workflow.steps[index];
        let current = current_index(&workflow.steps, &operation.current_step);

        if matches!(current, Some(c) if index <= c) {
            return Err(WorkflowError::not_permitted(step_id, "step already reached"));
        }

        let allowed = match actor {
            Actor::Institution => {
                can_proceed(step, &workflow.steps, current, &operation.validated_tokens)
            }
            Actor::Client => {
                step.is_client_step()
                    && index == current.map_or(0, |c| c + 1)
                    && prior_tokens_satisfied(&workflow.steps, index, &operation.validated_tokens)
            }
        };
        if !allowed {
            warn!(actor = ?actor, "Advance refused by step gate");
            return Err(WorkflowError::not_permitted(
                step_id,
                match (actor, step.assigned_role) {
                    (Actor::Institution, Some(AssignedRole::Client)) => {
                        "step is handled by the client"
                    }
                    (Actor::Client, role) if role != Some(AssignedRole::Client) => {
                        "step is not assigned to the client"
                    }
                    _ => "earlier steps are not cleared",
                },
            ));
        }

        if step.requires_token && !operation.validated_tokens.contains(&step.id) {
            info!("Token required before advancing");
            return Ok(AdvanceOutcome::TokenRequired {
                step_id: step.id.clone(),
                label: step.label.clone(),
            });
        }

        let now = Utc::now();
        let from = std::mem::replace(&mut operation.current_step, step.id.clone());
        if let Some(timing) = operation
            .step_history
            .iter_mut()
            .rev()
            .find(|t| t.step_id == from && t.completed_at.is_none())
        {
            timing.completed_at = Some(now);
        }
        operation.step_history.push(StepTiming {
            step_id: step.id.clone(),
            started_at: now,
            completed_at: None,
        });

        // Only the advance that wins the operation save writes the vault
        let saved = self.repos.operations.save(&operation).await?;
        info!(from = %from, to = %saved.current_step, version = saved.version, "Operation advanced");

        let generated_token = if step.generates_token {
            Some(self.issue_token(operation_id, &step.id, now).await?)
        } else {
            None
        };

        self.publish(
            operation_id,
            OperationEventKind::Advanced {
                from: from.clone(),
                to: step.id.clone(),
            },
        );
        if generated_token.is_some() {
            self.publish(
                operation_id,
                OperationEventKind::TokenIssued {
                    step_id: step.id.clone(),
                },
            );
        }

        Ok(AdvanceOutcome::Advanced {
            from,
            to: step.id.clone(),
            generated_token,
        })
    }

    /// Store a fresh token for `step_id`, replacing any earlier one
    async fn issue_token(
        &self,
        operation_id: &str,
        step_id: &str,
        now: chrono::DateTime<Utc>,
    ) -> Result<String> {
        let key = IssuedToken::vault_key(operation_id, step_id);
        let version = self
            .repos
            .tokens
            .get(&key)
            .await?
            .map_or(0, |existing| existing.version);
        let issued = IssuedToken {
            operation_id: operation_id.to_string(),
            step_id: step_id.to_string(),
            value: generate_token(self.config.token_length),
            issued_at: now,
            version,
        };
        let stored = self.repos.tokens.save(&issued).await?;
        Ok(stored.value)
    }

    /// Check a typed token for a step and record it when it matches
    pub async fn validate_token(
        &self,
        operation_id: &str,
        step_id: &str,
        candidate: &str,
    ) -> Result<()> {
        self.validate_token_inner(operation_id, step_id, candidate)
            .instrument(operation_span("validate_token", operation_id, Some(step_id)))
            .await
    }

    async fn validate_token_inner(
        &self,
        operation_id: &str,
        step_id: &str,
        candidate: &str,
    ) -> Result<()> {
        let (workflow, mut operation) = self.load(operation_id).await?;
        if operation.status.is_terminal() {
            return Err(WorkflowError::not_permitted(
                step_id,
                format!("operation is {:?}", operation.status),
            ));
        }
        let step = workflow
            .step(step_id)
            .ok_or_else(|| WorkflowError::not_found("step", step_id))?;

        if !step.requires_token {
            return Err(WorkflowError::Validation(format!(
                "step {step_id} does not require a token"
            )));
        }
        if operation.validated_tokens.contains(step_id) {
            return Ok(());
        }

        let Some(candidate) = normalize_candidate(candidate) else {
            return Err(WorkflowError::TokenRejected {
                step_id: step_id.to_string(),
            });
        };

        if !self
            .validator
            .validate(&workflow, &operation, step, &candidate)
            .await?
        {
            warn!("Token rejected");
            return Err(WorkflowError::TokenRejected {
                step_id: step_id.to_string(),
            });
        }

        operation.validated_tokens.insert(step_id.to_string());
        self.repos.operations.save(&operation).await?;
        info!("Token validated");
        self.publish(
            operation_id,
            OperationEventKind::TokenValidated {
                step_id: step_id.to_string(),
            },
        );
        Ok(())
    }

    /// Show again a token generated by a step
    pub async fn issued_token(&self, operation_id: &str, step_id: &str) -> Result<IssuedToken> {
        self.repos
            .tokens
            .require(&IssuedToken::vault_key(operation_id, step_id))
            .await
    }

    /// Close an operation sitting on its last step
    pub async fn complete(&self, operation_id: &str) -> Result<OperationInstance> {
        let (workflow, mut operation) = self.load(operation_id).await?;
        if operation.status.is_terminal() {
            return Err(WorkflowError::not_permitted(
                &operation.current_step,
                format!("operation is {:?}", operation.status),
            ));
        }
        let is_last = workflow
            .steps
            .last()
            .is_some_and(|last| last.id == operation.current_step);
        if !is_last {
            return Err(WorkflowError::not_permitted(
                &operation.current_step,
                "operation is not on its last step",
            ));
        }

        let now = Utc::now();
        close_open_timing(&mut operation, now);
        operation.status = OperationStatus::Completed;

        let saved = self.repos.operations.save(&operation).await?;
        info!(operation_id = %operation_id, "Operation completed");
        self.publish(operation_id, OperationEventKind::Completed);
        Ok(saved)
    }

    pub async fn cancel(&self, operation_id: &str) -> Result<OperationInstance> {
        let mut operation = self.repos.operations.require(operation_id).await?;
        if operation.status.is_terminal() {
            return Err(WorkflowError::not_permitted(
                &operation.current_step,
                format!("operation is {:?}", operation.status),
            ));
        }
        close_open_timing(&mut operation, Utc::now());
        operation.status = OperationStatus::Cancelled;

        let saved = self.repos.operations.save(&operation).await?;
        info!(operation_id = %operation_id, "Operation cancelled");
        self.publish(operation_id, OperationEventKind::Cancelled);
        Ok(saved)
    }
}

fn close_open_timing(operation: &mut OperationInstance, now: chrono::DateTime<Utc>) {
    for timing in operation
        .step_history
        .iter_mut()
        .filter(|t| t.completed_at.is_none())
    {
        timing.completed_at = Some(now);
    }
}
