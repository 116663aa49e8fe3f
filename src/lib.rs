// Portfolio Workflow Library - step orchestration for credit, leasing and investment operations
// This exposes the core components for the CLI and for integration tests

pub mod config;
pub mod errors;
pub mod portfolio;
pub mod shutdown;
pub mod storage;
pub mod telemetry;
pub mod workflows;

// Re-export key types for easy access
pub use config::PortfolioWorkflowConfig;
pub use errors::{Result, WorkflowError};
pub use portfolio::{reconcile, CurrencyConverter, Installment, Payment, RepaymentSummary};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
pub use storage::{Aggregate, Repositories, Repository};
pub use telemetry::{generate_correlation_id, init_telemetry, operation_span};
pub use workflows::{
    Actor, AdvanceOutcome, EngineConfig, OperationInstance, ProgressRefresher, Step, StepStatus,
    StepType, StepView, TokenExchange, WorkflowBuilder, WorkflowDefinition, WorkflowEngine,
    WorkflowType,
};
