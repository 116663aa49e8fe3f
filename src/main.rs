use anyhow::Result;
use clap::Parser;
use portfolio_workflow::config::StorageBackend;
use portfolio_workflow::errors::to_exit_code;
use portfolio_workflow::{init_telemetry, PortfolioWorkflowConfig, WorkflowError};

mod cli;

use cli::commands::currency::ConvertCommand;
use cli::commands::operation::OperationCommandRunner;
use cli::commands::repayment::ReconcileCommand;
use cli::commands::workflow::WorkflowCommandRunner;
use cli::commands::{show_how_to_get_started, AppContext};
use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("❌ {e:#}");
        let code = e
            .downcast_ref::<WorkflowError>()
            .map(to_exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    PortfolioWorkflowConfig::load_env_file()?;
    let mut config = PortfolioWorkflowConfig::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.storage.backend = StorageBackend::File;
        config.storage.data_dir = data_dir;
    }
    init_telemetry(&config.observability)?;

    match cli.command {
        None => show_how_to_get_started(),
        Some(Commands::Convert { amount, from, to }) => {
            ConvertCommand::new(amount, from, to).execute(&config.currency)
        }
        Some(Commands::Reconcile {
            schedule,
            payments,
            as_of,
            json,
        }) => {
            ReconcileCommand {
                schedule,
                payments,
                as_of: as_of.unwrap_or_else(|| chrono::Local::now().date_naive()),
                json,
            }
            .execute()
            .await
        }
        Some(Commands::Workflow(command)) => {
            let ctx = AppContext::new(config)?;
            WorkflowCommandRunner::new(&ctx).execute(command).await
        }
        Some(Commands::Operation(command)) => {
            let ctx = AppContext::new(config)?;
            OperationCommandRunner::new(&ctx).execute(command).await
        }
    }
}
