use anyhow::{Context, Result};
use portfolio_workflow::workflows::{EngineConfig, StepView, WorkflowEngine};
use portfolio_workflow::{PortfolioWorkflowConfig, Repositories};
use std::sync::Arc;

pub mod currency;
pub mod operation;
pub mod repayment;
pub mod workflow;

/// Configuration plus the engine built from it
pub struct AppContext {
    pub config: PortfolioWorkflowConfig,
    pub engine: Arc<WorkflowEngine>,
}

impl AppContext {
    pub fn new(config: PortfolioWorkflowConfig) -> Result<Self> {
        let engine_config = EngineConfig {
            default_step_duration: config.default_step_duration(),
            token_length: config.tokens.length,
        };
        engine_config.validate().context("Invalid engine configuration")?;

        let repos = Repositories::from_config(&config.storage, &config.mode)
            .context("Failed to initialize storage")?;
        let engine = WorkflowEngine::new(repos, engine_config);
        Ok(Self {
            config,
            engine: Arc::new(engine),
        })
    }

    pub fn repositories(&self) -> &Repositories {
        self.engine.repositories()
    }
}

pub fn show_how_to_get_started() -> Result<()> {
    println!("🏦 Portfolio Workflow - credit, leasing and investment operations");
    println!();
    println!("To get started:");
    println!("  📋 portfolio-workflow workflow list       # See available workflows");
    println!("  🚀 portfolio-workflow operation start ID  # Start an operation");
    println!("  📊 portfolio-workflow operation status ID # See where it stands");
    println!("  ⏩ portfolio-workflow operation advance ID STEP");
    println!();
    println!("Portfolio tools:");
    println!("  💱 portfolio-workflow convert 100 EUR XOF");
    println!("  🧾 portfolio-workflow reconcile --schedule s.json --payments p.json");
    println!();
    println!("💡 Import definitions with 'portfolio-workflow workflow import FILE'");
    Ok(())
}

/// Print the derived step table of an operation
pub fn print_step_views(views: &[StepView]) {
    for (index, view) in views.iter().enumerate() {
        let mut flags = Vec::new();
        if view.step.requires_token {
            flags.push("🔑 needs token");
        }
        if view.step.generates_token {
            flags.push("🎫 issues token");
        }
        if view.step.is_client_step() {
            flags.push("👤 client");
        }

        println!(
            "{} {:>2}. {} [{}]",
            view.status.symbol(),
            index + 1,
            view.step.label,
            view.step.id
        );
        if !flags.is_empty() {
            println!("       {}", flags.join("  "));
        }
        if let Some(start) = view.start_time {
            match view.end_time {
                Some(end) => println!(
                    "       🕐 {} → {}",
                    start.format("%Y-%m-%d %H:%M"),
                    end.format("%Y-%m-%d %H:%M")
                ),
                None => println!(
                    "       🕐 started {} · {:.0}% of expected time",
                    start.format("%Y-%m-%d %H:%M"),
                    view.progress
                ),
            }
        }
    }
}
