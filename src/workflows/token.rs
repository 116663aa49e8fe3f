//! Token exchange between dependent steps
//!
//! A step that generates a token hands out a short uppercase code which is
//! communicated out-of-band; a later step that requires a token stays blocked
//! until that code is typed back in. Issued codes are kept in the token vault
//! so they can be shown again.

use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use statig::prelude::*;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

use super::model::{IssuedToken, OperationInstance, Step, WorkflowDefinition};
use crate::errors::{Result, WorkflowError};
use crate::storage::TokenVault;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub const MIN_TOKEN_LENGTH: usize = 4;
pub const MAX_TOKEN_LENGTH: usize = 64;

static TOKEN_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^[A-Z0-9]{{{MIN_TOKEN_LENGTH},{MAX_TOKEN_LENGTH}}}$"))
        .expect("token pattern is valid")
});

/// Reject a configured token length that typed tokens could never match
pub fn check_token_length(length: usize) -> Result<()> {
    if (MIN_TOKEN_LENGTH..=MAX_TOKEN_LENGTH).contains(&length) {
        Ok(())
    } else {
        Err(WorkflowError::Validation(format!(
            "token length must be between {MIN_TOKEN_LENGTH} and {MAX_TOKEN_LENGTH}, got {length}"
        )))
    }
}

/// Synthesize a token of `length` uppercase alphanumeric characters
pub fn generate_token(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| TOKEN_ALPHABET[rng.random_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

/// Trim and upper-case a typed token, rejecting anything outside the alphabet
pub fn normalize_candidate(candidate: &str) -> Option<String> {
    let normalized = candidate.trim().to_ascii_uppercase();
    TOKEN_FORMAT.is_match(&normalized).then_some(normalized)
}

/// Decides whether a candidate token unlocks a step
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(
        &self,
        workflow: &WorkflowDefinition,
        operation: &OperationInstance,
        step: &Step,
        candidate: &str,
    ) -> Result<bool>;
}

/// Validates against the token issued by the nearest earlier generating step
pub struct VaultTokenValidator {
    vault: Arc<TokenVault>,
}

impl VaultTokenValidator {
    pub fn new(vault: Arc<TokenVault>) -> Self {
        Self { vault }
    }
}

#[async_trait]
impl TokenValidator for VaultTokenValidator {
    async fn validate(
        &self,
        workflow: &WorkflowDefinition,
        operation: &OperationInstance,
        step: &Step,
        candidate: &str,
    ) -> Result<bool> {
        let index = workflow
            .step_index(&step.id)
            .ok_or_else(|| WorkflowError::not_found("step", &step.id))?;

        let Some(issuer) = workflow.steps[..index].iter().rev().find(|s| s.generates_token) else {
            debug!(step_id = %step.id, "No earlier step generates a token");
            return Ok(false);
        };

        let key = IssuedToken::vault_key(&operation.id, &issuer.id);
        Ok(match self.vault.get(&key).await? {
            Some(issued) => issued.value == candidate,
            None => false,
        })
    }
}

/// Where the exchange currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangePhase {
    #[default]
    Idle,
    Prompting,
    Validating,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
    /// A step needs a token before it can be advanced
    Request { step_id: String, label: String },
    /// The user typed a candidate
    Submit { candidate: String },
    Accepted,
    Rejected { reason: String },
    /// A step produced a token to hand out
    Generated { step_id: String, token: String },
    Reset,
}

/// Drives one token prompt from request to resolution.
///
/// Failures go back to prompting with an error message and there is no retry
/// limit. Generated tokens skip the prompt and resolve immediately.
#[derive(Debug, Default)]
pub struct TokenExchange {
    phase: ExchangePhase,
    step_id: Option<String>,
    label: Option<String>,
    candidate: Option<String>,
    error: Option<String>,
    displayed_token: Option<String>,
}

impl TokenExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ExchangePhase {
        self.phase
    }

    pub fn step_id(&self) -> Option<&str> {
        self.step_id.as_deref()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn candidate(&self) -> Option<&str> {
        self.candidate.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn displayed_token(&self) -> Option<&str> {
        self.displayed_token.as_deref()
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

#[state_machine(initial = "State::idle()")]
impl TokenExchange {
    #[state]
    fn idle(&mut self, event: &TokenEvent) -> Outcome<State> {
        match event {
            TokenEvent::Request { step_id, label } => {
                self.step_id = Some(step_id.clone());
                self.label = Some(label.clone());
                self.phase = ExchangePhase::Prompting;
                info!(step_id = %step_id, label = %label, "Token requested");
                Transition(State::prompting())
            }
            TokenEvent::Generated { step_id, token } => {
                self.step_id = Some(step_id.clone());
                self.displayed_token = Some(token.clone());
                self.phase = ExchangePhase::Resolved;
                info!(step_id = %step_id, "Token generated");
                Transition(State::resolved())
            }
            _ => Handled,
        }
    }

    #[state]
    fn prompting(&mut self, event: &TokenEvent) -> Outcome<State> {
        match event {
            TokenEvent::Submit { candidate } => {
                self.candidate = Some(candidate.clone());
                self.error = None;
                self.phase = ExchangePhase::Validating;
                Transition(State::validating())
            }
            TokenEvent::Reset => {
                self.clear();
                Transition(State::idle())
            }
            _ => Handled,
        }
    }

    #[state]
    fn validating(&mut self, event: &TokenEvent) -> Outcome<State> {
        match event {
            TokenEvent::Accepted => {
                self.error = None;
                self.phase = ExchangePhase::Resolved;
                info!(step_id = ?self.step_id, "Token accepted");
                Transition(State::resolved())
            }
            TokenEvent::Rejected { reason } => {
                self.candidate = None;
                self.error = Some(reason.clone());
                self.phase = ExchangePhase::Prompting;
                info!(step_id = ?self.step_id, reason = %reason, "Token rejected");
                Transition(State::prompting())
            }
            TokenEvent::Reset => {
                self.clear();
                Transition(State::idle())
            }
            _ => Handled,
        }
    }

    #[state]
    fn resolved(&mut self, event: &TokenEvent) -> Outcome<State> {
        match event {
            TokenEvent::Reset => {
                self.clear();
                Transition(State::idle())
            }
            _ => Handled,
        }
    }
}
