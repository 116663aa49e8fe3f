use anyhow::{anyhow, bail, Context, Result};
use portfolio_workflow::workflows::model::AttachmentSpec;
use portfolio_workflow::workflows::{
    AssignedRole, Step, StepType, WorkflowBuilder, WorkflowDefinition,
};
use std::path::Path;

use super::AppContext;
use crate::cli::{Direction, WorkflowCommand};

pub struct WorkflowCommandRunner<'a> {
    ctx: &'a AppContext,
}

impl<'a> WorkflowCommandRunner<'a> {
    pub fn new(ctx: &'a AppContext) -> Self {
        Self { ctx }
    }

    pub async fn execute(&self, command: WorkflowCommand) -> Result<()> {
        match command {
            WorkflowCommand::List { json } => self.list(json).await,
            WorkflowCommand::Show { workflow_id, json } => self.show(&workflow_id, json).await,
            WorkflowCommand::Import { file } => self.import(&file).await,
            WorkflowCommand::Create {
                name,
                workflow_type,
                id,
                description,
                products,
                steps,
            } => {
                let mut builder = WorkflowBuilder::new(name, workflow_type);
                if let Some(id) = id {
                    builder = builder.with_id(id);
                }
                if let Some(description) = description {
                    builder.set_description(description);
                }
                builder.set_products(products);
                let currency = &self.ctx.config.currency.base;
                for spec in &steps {
                    let mut parsed = parse_step_spec(spec)?;
                    parsed.fill_default_payment(currency);
                    let step = builder.add_step();
                    let id = std::mem::take(&mut step.id);
                    *step = Step { id, ..parsed };
                }
                let definition = builder.build()?;
                if self.ctx.repositories().workflows.get(&definition.id).await?.is_some() {
                    bail!("workflow {} already exists", definition.id);
                }
                let saved = self.ctx.repositories().workflows.save(&definition).await?;
                println!("✅ Created workflow {} ({} steps)", saved.id, saved.steps.len());
                print_definition(&saved);
                Ok(())
            }
            WorkflowCommand::AddStep {
                workflow_id,
                step_type,
                label,
                requires_token,
                generates_token,
                client,
                expected_hours,
            } => {
                let currency = self.ctx.config.currency.base.clone();
                self.edit(&workflow_id, |builder| {
                    let step = builder.add_step();
                    step.step_type = step_type;
                    step.fill_default_payment(&currency);
                    step.label = label.unwrap_or_else(|| step_type.label().to_string());
                    step.requires_token = requires_token;
                    step.generates_token = generates_token;
                    step.expected_duration_hours = expected_hours;
                    if client {
                        step.assigned_role = Some(AssignedRole::Client);
                    }
                    println!("➕ Added step {} ({})", step.id, step.label);
                    Ok(())
                })
                .await
            }
            WorkflowCommand::Rename { workflow_id, name } => {
                self.edit(&workflow_id, |builder| {
                    builder.set_name(name.as_str());
                    println!("✏️  Renamed {workflow_id} to {name}");
                    Ok(())
                })
                .await
            }
            WorkflowCommand::CheckAttachment {
                workflow_id,
                step_id,
                file,
            } => self.check_attachment(&workflow_id, &step_id, &file).await,
            WorkflowCommand::RemoveStep {
                workflow_id,
                step_id,
            } => {
                self.edit(&workflow_id, |builder| {
                    let removed = builder.remove_step(&step_id)?;
                    println!("➖ Removed step {} ({})", removed.id, removed.label);
                    Ok(())
                })
                .await
            }
            WorkflowCommand::MoveStep {
                workflow_id,
                step_id,
                direction,
            } => {
                self.edit(&workflow_id, |builder| {
                    let moved = match direction {
                        Direction::Up => builder.move_step_up(&step_id)?,
                        Direction::Down => builder.move_step_down(&step_id)?,
                    };
                    if moved {
                        println!("↕️  Moved step {step_id} {direction:?}");
                    } else {
                        println!("⚠️  Step {step_id} is already at the edge");
                    }
                    Ok(())
                })
                .await
            }
            WorkflowCommand::Delete { workflow_id } => {
                let repos = self.ctx.repositories();
                repos.workflows.require(&workflow_id).await?;
                repos.workflows.delete(&workflow_id).await?;
                println!("🗑️  Deleted workflow {workflow_id}");
                Ok(())
            }
        }
    }

    async fn list(&self, json: bool) -> Result<()> {
        let workflows = self.ctx.repositories().workflows.list().await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&workflows)?);
            return Ok(());
        }
        if workflows.is_empty() {
            println!("📋 No workflows defined");
            println!("   💡 Import definitions with: portfolio-workflow workflow import FILE");
            return Ok(());
        }

        println!("📋 WORKFLOWS:");
        println!("─────────────");
        for workflow in &workflows {
            let state = if workflow.active { "🟢" } else { "⚪" };
            println!(
                "{state} {} - {} ({}, {} steps, v{})",
                workflow.id,
                workflow.name,
                workflow.workflow_type,
                workflow.steps.len(),
                workflow.version
            );
        }
        Ok(())
    }

    async fn show(&self, workflow_id: &str, json: bool) -> Result<()> {
        let workflow = self.ctx.repositories().workflows.require(workflow_id).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&workflow)?);
        } else {
            print_definition(&workflow);
        }
        Ok(())
    }

    async fn import(&self, file: &Path) -> Result<()> {
        let content = tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let value: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("{} is not valid JSON", file.display()))?;
        let definitions: Vec<WorkflowDefinition> = if value.is_array() {
            serde_json::from_value(value)?
        } else {
            vec![serde_json::from_value(value)?]
        };

        let repos = self.ctx.repositories();
        for definition in definitions {
            // Imports replace whatever is stored under the same id
            let mut definition = WorkflowBuilder::from_existing(definition)
                .build()
                .context("Invalid workflow definition")?;
            definition.version = repos
                .workflows
                .get(&definition.id)
                .await?
                .map_or(0, |existing| existing.version);
            let saved = repos.workflows.save(&definition).await?;
            println!("📥 Imported {} - {} (v{})", saved.id, saved.name, saved.version);
        }
        Ok(())
    }

    async fn check_attachment(&self, workflow_id: &str, step_id: &str, file: &Path) -> Result<()> {
        let workflow = self.ctx.repositories().workflows.require(workflow_id).await?;
        let step = workflow
            .step(step_id)
            .ok_or_else(|| anyhow!("step {step_id} not found in workflow {workflow_id}"))?;
        let Some(spec) = &step.attachment else {
            bail!("step {step_id} takes no attachment");
        };

        let metadata = tokio::fs::metadata(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let file_name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        if !spec.accepts(&file_name, metadata.len()) {
            bail!(
                "{file_name} ({} bytes) does not match the attachment rules of step {step_id}: {}",
                metadata.len(),
                describe_attachment(spec)
            );
        }
        println!("✅ {file_name} is a valid attachment for {}", step.label);
        Ok(())
    }

    /// Load a workflow into a builder, apply `edit` and save the result
    async fn edit<F>(&self, workflow_id: &str, edit: F) -> Result<()>
    where
        F: FnOnce(&mut WorkflowBuilder) -> Result<()>,
    {
        let repos = self.ctx.repositories();
        let existing = repos.workflows.require(workflow_id).await?;
        let mut builder = WorkflowBuilder::from_existing(existing);
        edit(&mut builder)?;
        let saved = repos.workflows.save(&builder.build()?).await?;
        println!("💾 Saved workflow {} (v{})", saved.id, saved.version);
        Ok(())
    }
}

/// Parse `TYPE[:FLAG,...]`, flags being `requires_token`, `generates_token`
/// and `client`.
pub fn parse_step_spec(spec: &str) -> Result<Step> {
    let (type_part, flags) = match spec.split_once(':') {
        Some((step_type, flags)) => (step_type, Some(flags)),
        None => (spec, None),
    };
    let step_type: StepType = type_part.trim().parse().map_err(|e: String| anyhow!(e))?;
    let mut step = Step::new(String::new(), step_type);

    for flag in flags.into_iter().flat_map(|f| f.split(',')) {
        match flag.trim() {
            "" => {}
            "requires_token" => step.requires_token = true,
            "generates_token" => step.generates_token = true,
            "client" => step.assigned_role = Some(AssignedRole::Client),
            other => bail!("unknown step flag '{other}' in '{spec}'"),
        }
    }
    Ok(step)
}

fn print_definition(workflow: &WorkflowDefinition) {
    println!("📋 {} - {}", workflow.id, workflow.name);
    println!("   🏷️  Type: {}", workflow.workflow_type);
    if !workflow.description.is_empty() {
        println!("   📝 {}", workflow.description);
    }
    if !workflow.product_ids.is_empty() {
        println!("   📦 Products: {}", workflow.product_ids.join(", "));
    }
    println!(
        "   {} {}",
        if workflow.active { "🟢" } else { "⚪" },
        if workflow.active { "Active" } else { "Inactive" }
    );
    println!();
    for step in &workflow.steps {
        let mut flags = Vec::new();
        if step.requires_token {
            flags.push("🔑");
        }
        if step.generates_token {
            flags.push("🎫");
        }
        if step.is_client_step() {
            flags.push("👤");
        }
        println!(
            "   {:>2}. {} [{}] {}",
            step.order + 1,
            step.label,
            step.id,
            flags.join(" ")
        );
        if let Some(payment) = &step.payment {
            println!(
                "       💰 {:?} in {}, {} approver(s), {} day(s) grace{}",
                payment.kind,
                payment.currency,
                payment.approver_count,
                payment.grace_period_days,
                payment
                    .frequency
                    .as_deref()
                    .map(|f| format!(", {f}"))
                    .unwrap_or_default()
            );
        }
        if let Some(attachment) = &step.attachment {
            println!("       📎 {}", describe_attachment(attachment));
        }
    }
}

fn describe_attachment(spec: &AttachmentSpec) -> String {
    let kinds = if spec.allowed_extensions.is_empty() {
        "any file".to_string()
    } else {
        spec.allowed_extensions.join(", ")
    };
    format!(
        "{}{} ({kinds}, up to {} bytes)",
        if spec.required { "required: " } else { "optional: " },
        spec.description,
        spec.max_size_bytes
    )
}
