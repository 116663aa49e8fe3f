use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use portfolio_workflow::workflows::{Actor, StepType, WorkflowType};
use std::path::PathBuf;

pub mod commands;

#[derive(Parser)]
#[command(name = "portfolio-workflow")]
#[command(about = "Step-by-step workflows for credit, leasing and investment operations")]
#[command(long_about = "portfolio-workflow runs credit, leasing and investment operations through \
                       ordered workflow steps, with validation tokens gating dependent steps. Get started with \
                       'portfolio-workflow workflow list' to see the available workflows.")]
pub struct Cli {
    /// Configuration file (defaults to ./portfolio-workflow.toml when present)
    #[arg(long, global = true, help = "Path to a TOML configuration file")]
    pub config: Option<PathBuf>,

    /// Override the data directory of the file backend
    #[arg(long, global = true, help = "Directory holding workflows.json, operations.json and tokens.json")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create, edit and inspect workflow definitions
    #[command(subcommand)]
    Workflow(WorkflowCommand),
    /// Run operations through their workflow
    #[command(subcommand)]
    Operation(OperationCommand),
    /// Convert an amount between currencies using the configured rates
    Convert {
        /// Amount to convert
        amount: f64,
        /// Source currency code
        from: String,
        /// Target currency code
        to: String,
    },
    /// Reconcile a repayment schedule with received payments
    Reconcile {
        /// JSON array of installments (number, due_date, amount_due)
        #[arg(long, help = "JSON file with the installment schedule")]
        schedule: PathBuf,
        /// JSON array of payments (date, amount)
        #[arg(long, help = "JSON file with the payments received")]
        payments: PathBuf,
        /// Date the reconciliation is computed for (defaults to today)
        #[arg(long, help = "Reconciliation date, YYYY-MM-DD")]
        as_of: Option<NaiveDate>,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// List workflow definitions
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show one workflow and its steps
    Show {
        workflow_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Import definitions from a JSON file (one object or an array)
    Import { file: PathBuf },
    /// Create a workflow from step specs
    Create {
        #[arg(long, help = "Display name of the workflow")]
        name: String,
        #[arg(long = "type", help = "credit, leasing or investment")]
        workflow_type: WorkflowType,
        #[arg(long, help = "Use this id instead of a generated one")]
        id: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "product", help = "Product id the workflow applies to (repeatable)")]
        products: Vec<String>,
        #[arg(
            long = "step",
            required = true,
            help = "Step as TYPE[:FLAG,...] with flags requires_token, generates_token, client (repeatable)"
        )]
        steps: Vec<String>,
    },
    /// Append a step to a workflow
    AddStep {
        workflow_id: String,
        #[arg(long = "type", help = "Step type, e.g. approval or contract_signature")]
        step_type: StepType,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        requires_token: bool,
        #[arg(long)]
        generates_token: bool,
        #[arg(long, help = "Assign the step to the client")]
        client: bool,
        #[arg(long, help = "Expected duration of the step in hours")]
        expected_hours: Option<u32>,
    },
    /// Change the display name of a workflow
    Rename { workflow_id: String, name: String },
    /// Check a file against the attachment rules of a step
    CheckAttachment {
        workflow_id: String,
        step_id: String,
        file: PathBuf,
    },
    /// Remove a step from a workflow
    RemoveStep { workflow_id: String, step_id: String },
    /// Move a step one position up or down
    MoveStep {
        workflow_id: String,
        step_id: String,
        #[arg(value_enum)]
        direction: Direction,
    },
    /// Delete a workflow definition
    Delete { workflow_id: String },
}

#[derive(Subcommand)]
pub enum OperationCommand {
    /// Start an operation on the first step of a workflow
    Start {
        workflow_id: String,
        #[arg(long, help = "Use this id instead of a generated one")]
        id: Option<String>,
    },
    /// Show the derived status of every step
    Status {
        operation_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Move an operation onto a step
    Advance {
        operation_id: String,
        step_id: String,
        #[arg(long = "as", value_enum, default_value = "institution", help = "Who is acting on the step")]
        actor: ActorArg,
        #[arg(long, help = "Validation token for steps that require one")]
        token: Option<String>,
    },
    /// Validate a token for a step without advancing
    Validate {
        operation_id: String,
        step_id: String,
        token: String,
    },
    /// Show again the token generated by a step
    Token { operation_id: String, step_id: String },
    /// Close an operation sitting on its last step
    Complete { operation_id: String },
    /// Cancel an operation
    Cancel { operation_id: String },
    /// Follow step progress until interrupted
    Watch {
        operation_id: String,
        #[arg(long, help = "Refresh interval in seconds (defaults to progress.refresh_interval_seconds)")]
        interval: Option<u64>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Direction {
    Up,
    Down,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ActorArg {
    Institution,
    Client,
}

impl From<ActorArg> for Actor {
    fn from(actor: ActorArg) -> Self {
        match actor {
            ActorArg::Institution => Actor::Institution,
            ActorArg::Client => Actor::Client,
        }
    }
}
