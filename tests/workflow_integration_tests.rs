// Integration tests for operations running on the file backend
// Each test gets its own temporary data directory

use portfolio_workflow::storage::{FileRepository, Repository};
use portfolio_workflow::workflows::{
    Actor, AdvanceOutcome, AssignedRole, EngineConfig, OperationEventKind, OperationStatus, Step,
    StepStatus, StepType, WorkflowBuilder, WorkflowDefinition, WorkflowEngine, WorkflowType,
};
use portfolio_workflow::Repositories;
use tempfile::TempDir;

fn leasing_workflow() -> WorkflowDefinition {
    let mut builder =
        WorkflowBuilder::new("Equipment leasing", WorkflowType::Leasing).with_id("lease-std");
    builder
        .push_step(Step::new("request", StepType::Submission))
        .push_step(Step::new("approve", StepType::Approval).generating_token())
        .push_step(
            Step::new("confirm", StepType::ClientConfirmation)
                .assigned_to(AssignedRole::Client)
                .requiring_token(),
        )
        .push_step(Step::new("order", StepType::AssetOrdering))
        .push_step(Step::new("deliver", StepType::AssetDelivery));
    builder.build().unwrap()
}

async fn engine_in(dir: &TempDir) -> WorkflowEngine {
    let repos = Repositories::file(dir.path());
    WorkflowEngine::new(repos, EngineConfig::default())
}

#[tokio::test]
async fn test_leasing_operation_end_to_end() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir).await;
    engine.repositories().workflows.save(&leasing_workflow()).await.unwrap();

    engine.start_operation("lease-std", Some("lease-001".into())).await.unwrap();

    let AdvanceOutcome::Advanced { generated_token: Some(token), .. } =
        engine.advance("lease-001", "approve", Actor::Institution).await.unwrap()
    else {
        panic!("approval should issue a token");
    };

    let views = engine.step_views("lease-001").await.unwrap();
    assert_eq!(views[1].status, StepStatus::Current);
    assert_eq!(views[2].status, StepStatus::Blocked);

    // The client confirms with the token handed out by the approval
    let outcome = engine.advance("lease-001", "confirm", Actor::Client).await.unwrap();
    assert!(matches!(outcome, AdvanceOutcome::TokenRequired { .. }));
    engine.validate_token("lease-001", "confirm", &token).await.unwrap();
    engine.advance("lease-001", "confirm", Actor::Client).await.unwrap();

    // A completed client step still closes the gate for institution staff
    let err = engine
        .advance("lease-001", "order", Actor::Institution)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_PERMITTED");

    let stored = engine.repositories().operations.require("lease-001").await.unwrap();
    assert_eq!(stored.current_step, "confirm");
    assert!(stored.validated_tokens.contains("confirm"));
    assert_eq!(stored.step_history.len(), 3);
}

#[tokio::test]
async fn test_state_survives_a_new_engine() {
    let dir = TempDir::new().unwrap();
    {
        let engine = engine_in(&dir).await;
        engine.repositories().workflows.save(&leasing_workflow()).await.unwrap();
        engine.start_operation("lease-std", Some("lease-002".into())).await.unwrap();
        engine.advance("lease-002", "approve", Actor::Institution).await.unwrap();
    }

    let engine = engine_in(&dir).await;
    let issued = engine.issued_token("lease-002", "approve").await.unwrap();
    assert_eq!(issued.value.len(), 8);

    let views = engine.step_views("lease-002").await.unwrap();
    assert_eq!(views[0].status, StepStatus::Completed);
    assert!(views[0].end_time.is_some());
    assert_eq!(views[0].progress, 100.0);

    let data = FileRepository::<WorkflowDefinition>::new(dir.path()).data_path();
    assert!(data.ends_with("workflows.json"));
    assert!(data.exists());
}

#[tokio::test]
async fn test_stale_copy_is_rejected() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir).await;
    let saved = engine.repositories().workflows.save(&leasing_workflow()).await.unwrap();

    let mut first = saved.clone();
    first.description = "first edit".into();
    engine.repositories().workflows.save(&first).await.unwrap();

    let mut second = saved;
    second.description = "second edit".into();
    let err = engine.repositories().workflows.save(&second).await.unwrap_err();
    assert_eq!(err.code(), "CONFLICT");

    let stored = engine.repositories().workflows.require("lease-std").await.unwrap();
    assert_eq!(stored.description, "first edit");
}

#[tokio::test]
async fn test_cancel_publishes_and_closes_history() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir).await;
    engine.repositories().workflows.save(&leasing_workflow()).await.unwrap();
    let mut events = engine.subscribe();

    engine.start_operation("lease-std", Some("lease-003".into())).await.unwrap();
    let cancelled = engine.cancel("lease-003").await.unwrap();
    assert_eq!(cancelled.status, OperationStatus::Cancelled);
    assert!(cancelled.step_history.iter().all(|t| t.completed_at.is_some()));

    assert_eq!(events.recv().await.unwrap().kind, OperationEventKind::Started);
    assert_eq!(events.recv().await.unwrap().kind, OperationEventKind::Cancelled);
}
