use anyhow::{bail, Result};
use portfolio_workflow::workflows::{
    Actor, AdvanceOutcome, ExchangePhase, StepStatus, TokenEvent, TokenExchange,
};
use portfolio_workflow::{ProgressRefresher, ShutdownCoordinator, WorkflowError};
use statig::prelude::*;
use std::io::{IsTerminal, Write};
use std::time::Duration;

use super::{print_step_views, AppContext};
use crate::cli::OperationCommand;

pub struct OperationCommandRunner<'a> {
    ctx: &'a AppContext,
}

impl<'a> OperationCommandRunner<'a> {
    pub fn new(ctx: &'a AppContext) -> Self {
        Self { ctx }
    }

    pub async fn execute(&self, command: OperationCommand) -> Result<()> {
        match command {
            OperationCommand::Start { workflow_id, id } => {
                let operation = self.ctx.engine.start_operation(&workflow_id, id).await?;
                println!("🚀 Started operation {}", operation.id);
                println!("   📋 Workflow: {}", operation.workflow_id);
                println!("   ▶️  Current step: {}", operation.current_step);
                Ok(())
            }
            OperationCommand::Status { operation_id, json } => {
                self.status(&operation_id, json).await
            }
            OperationCommand::Advance {
                operation_id,
                step_id,
                actor,
                token,
            } => self.advance(&operation_id, &step_id, actor.into(), token).await,
            OperationCommand::Validate {
                operation_id,
                step_id,
                token,
            } => {
                self.ctx
                    .engine
                    .validate_token(&operation_id, &step_id, &token)
                    .await?;
                println!("✅ Token accepted for step {step_id}");
                Ok(())
            }
            OperationCommand::Token {
                operation_id,
                step_id,
            } => {
                let issued = self.ctx.engine.issued_token(&operation_id, &step_id).await?;
                println!("🔑 Token for step {}: {}", issued.step_id, issued.value);
                println!("   🕐 Issued {}", issued.issued_at.format("%Y-%m-%d %H:%M"));
                Ok(())
            }
            OperationCommand::Complete { operation_id } => {
                let operation = self.ctx.engine.complete(&operation_id).await?;
                println!("🏁 Operation {} completed", operation.id);
                Ok(())
            }
            OperationCommand::Cancel { operation_id } => {
                let operation = self.ctx.engine.cancel(&operation_id).await?;
                println!("🛑 Operation {} cancelled on step {}", operation.id, operation.current_step);
                Ok(())
            }
            OperationCommand::Watch {
                operation_id,
                interval,
            } => self.watch(&operation_id, interval).await,
        }
    }

    async fn status(&self, operation_id: &str, json: bool) -> Result<()> {
        let views = self.ctx.engine.step_views(operation_id).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&views)?);
            return Ok(());
        }

        let operation = self.ctx.repositories().operations.require(operation_id).await?;
        println!("📊 OPERATION {} ({:?})", operation.id, operation.status);
        println!("──────────────────────────────");
        print_step_views(&views);

        let blocked = views.iter().filter(|v| v.status == StepStatus::Blocked).count();
        let waiting = views.iter().filter(|v| v.status == StepStatus::Waiting).count();
        if blocked > 0 || waiting > 0 {
            println!();
            println!("   🔒 Blocked on a token: {blocked}");
            println!("   ⏳ Waiting on the client: {waiting}");
        }
        Ok(())
    }

    async fn advance(
        &self,
        operation_id: &str,
        step_id: &str,
        actor: Actor,
        mut preset_token: Option<String>,
    ) -> Result<()> {
        let interactive = std::io::stdin().is_terminal();
        let mut exchange = TokenExchange::new().state_machine();

        loop {
            match self.ctx.engine.advance(operation_id, step_id, actor).await? {
                AdvanceOutcome::Advanced {
                    from,
                    to,
                    generated_token,
                } => {
                    println!("✅ Advanced {from} → {to}");
                    if let Some(token) = generated_token {
                        exchange.handle(&TokenEvent::Reset);
                        exchange.handle(&TokenEvent::Generated {
                            step_id: to.clone(),
                            token,
                        });
                        if let Some(token) = exchange.inner().displayed_token() {
                            println!("🎫 Token issued: {token}");
                            println!("   💡 Pass it on to whoever handles the dependent step");
                            println!("   💡 Show it again with: portfolio-workflow operation token {operation_id} {to}");
                        }
                    }
                    return Ok(());
                }
                AdvanceOutcome::TokenRequired { step_id, label } => {
                    if exchange.inner().phase() == ExchangePhase::Idle {
                        exchange.handle(&TokenEvent::Request {
                            step_id: step_id.clone(),
                            label: label.clone(),
                        });
                        println!("🔒 '{label}' requires a validation token");
                    }

                    let candidate = match preset_token.take() {
                        Some(token) => token,
                        None if interactive => prompt_token(exchange.inner().error()).await?,
                        None => bail!(
                            "step {step_id} requires a token, pass it with --token or run interactively"
                        ),
                    };

                    exchange.handle(&TokenEvent::Submit {
                        candidate: candidate.clone(),
                    });
                    match self
                        .ctx
                        .engine
                        .validate_token(operation_id, &step_id, &candidate)
                        .await
                    {
                        Ok(()) => {
                            exchange.handle(&TokenEvent::Accepted);
                            println!("✅ Token accepted");
                        }
                        Err(e @ WorkflowError::TokenRejected { .. }) => {
                            exchange.handle(&TokenEvent::Rejected {
                                reason: "Invalid token".to_string(),
                            });
                            println!("❌ Invalid token");
                            if !interactive {
                                return Err(e.into());
                            }
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }

    async fn watch(&self, operation_id: &str, interval: Option<u64>) -> Result<()> {
        // Fail fast on an unknown operation
        self.ctx.repositories().operations.require(operation_id).await?;

        let interval = interval
            .map(|secs| Duration::from_secs(secs.max(1)))
            .unwrap_or_else(|| self.ctx.config.refresh_interval());

        let coordinator = ShutdownCoordinator::new();
        coordinator.install_signal_handlers()?;
        let refresher = ProgressRefresher::new(self.ctx.engine.clone(), operation_id, interval);
        let (mut views, handle) = refresher.spawn(coordinator.subscribe());
        let mut shutdown = coordinator.subscribe();

        println!("👀 Watching operation {operation_id} (Ctrl-C to stop)");
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                changed = views.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = views.borrow_and_update().clone();
                    println!();
                    println!("🕐 {}", chrono::Local::now().format("%H:%M:%S"));
                    print_step_views(&snapshot);

                    let operation = self.ctx.repositories().operations.require(operation_id).await?;
                    if operation.status.is_terminal() {
                        println!("🏁 Operation is {:?}", operation.status);
                        coordinator.trigger();
                    }
                }
            }
        }

        handle.await?;
        Ok(())
    }
}

async fn prompt_token(previous_error: Option<&str>) -> Result<String> {
    if let Some(error) = previous_error {
        println!("   ⚠️  {error}, try again");
    }
    print!("🔑 Enter token: ");
    std::io::stdout().flush()?;

    let line = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await??;
    let line = line.trim().to_string();
    if line.is_empty() {
        bail!("no token entered");
    }
    Ok(line)
}
