// Workflow definitions, operations and the rules that move them forward
// Statuses and gates are pure functions; the engine owns persistence

pub mod builder;
pub mod engine;
pub mod gate;
pub mod model;
pub mod progress;
pub mod status;
pub mod token;

pub use builder::WorkflowBuilder;
pub use engine::{Actor, AdvanceOutcome, EngineConfig, OperationEvent, OperationEventKind, WorkflowEngine};
pub use gate::{can_proceed, prior_tokens_satisfied};
pub use model::{
    AssignedRole, IssuedToken, OperationInstance, OperationStatus, Step, StepType,
    WorkflowDefinition, WorkflowType,
};
pub use progress::{compute_progress, ProgressRefresher};
pub use status::{build_step_views, derive_statuses, StepStatus, StepView};
pub use token::{
    check_token_length, ExchangePhase, TokenEvent, TokenExchange, TokenValidator,
    VaultTokenValidator, MAX_TOKEN_LENGTH, MIN_TOKEN_LENGTH,
};
