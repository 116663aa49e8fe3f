//! Time based progress of the step in flight
//!
//! Progress is a linear function of the time spent on the current step
//! against its assumed duration. It says nothing about actual task
//! completion.

use chrono::Duration;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::engine::WorkflowEngine;
use super::status::StepView;
use crate::shutdown::ShutdownSignal;

/// Percentage of `assumed` covered by `elapsed`, clamped to `[0, 100]`.
///
/// Negative elapsed time (clock skew) gives 0; a zero or negative assumed
/// duration counts as already elapsed.
pub fn compute_progress(elapsed: Duration, assumed: Duration) -> f64 {
    if elapsed < Duration::zero() {
        return 0.0;
    }
    let assumed_ms = assumed.num_milliseconds();
    if assumed_ms <= 0 {
        return 100.0;
    }
    let ratio = elapsed.num_milliseconds() as f64 / assumed_ms as f64 * 100.0;
    ratio.clamp(0.0, 100.0)
}

const MIN_REFRESH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

/// Keeps the step views of one operation fresh.
///
/// Views are recomputed whenever the engine reports a change to the
/// operation, and on a fixed tick so the time based progress keeps moving.
/// The tick never runs faster than once a second.
pub struct ProgressRefresher {
    engine: Arc<WorkflowEngine>,
    operation_id: String,
    interval: std::time::Duration,
}

impl ProgressRefresher {
    pub fn new(
        engine: Arc<WorkflowEngine>,
        operation_id: impl Into<String>,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            engine,
            operation_id: operation_id.into(),
            interval: interval.max(MIN_REFRESH_INTERVAL),
        }
    }

    /// Spawn the refresher; the returned receiver always holds the latest views
    pub fn spawn(self, shutdown: ShutdownSignal) -> (watch::Receiver<Vec<StepView>>, JoinHandle<()>) {
        let (sender, receiver) = watch::channel(Vec::new());
        let events = self.engine.subscribe();
        let handle = tokio::spawn(self.run(sender, events, shutdown));
        (receiver, handle)
    }

    async fn run(
        self,
        sender: watch::Sender<Vec<StepView>>,
        mut events: broadcast::Receiver<crate::workflows::engine::OperationEvent>,
        mut shutdown: ShutdownSignal,
    ) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            operation_id = %self.operation_id,
            interval_secs = self.interval.as_secs(),
            "Progress refresher started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => self.refresh(&sender).await,
                event = events.recv() => match event {
                    Ok(event) if event.operation_id == self.operation_id => {
                        debug!(kind = ?event.kind, "Operation changed");
                        self.refresh(&sender).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Refresher lagged behind events");
                        self.refresh(&sender).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }

            if sender.is_closed() {
                break;
            }
        }

        info!(operation_id = %self.operation_id, "Progress refresher stopped");
    }

    async fn refresh(&self, sender: &watch::Sender<Vec<StepView>>) {
        match self.engine.step_views(&self.operation_id).await {
            Ok(views) => {
                sender.send_replace(views);
            }
            Err(e) => {
                // Keep the last good views and try again on the next tick
                warn!(operation_id = %self.operation_id, error = %e, "Progress refresh failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownCoordinator;
    use crate::storage::Repositories;
    use crate::workflows::engine::{Actor, EngineConfig};
    use crate::workflows::model::{Step, StepType, WorkflowDefinition, WorkflowType};
    use chrono::Utc;

    #[test]
    fn test_progress_linear() {
        assert_eq!(compute_progress(Duration::hours(0), Duration::hours(10)), 0.0);
        assert!((compute_progress(Duration::hours(5), Duration::hours(10)) - 50.0).abs() < 1e-9);
        assert_eq!(compute_progress(Duration::days(8), Duration::days(7)), 100.0);
    }

    #[test]
    fn test_progress_edge_cases() {
        assert_eq!(compute_progress(Duration::hours(-3), Duration::hours(10)), 0.0);
        assert_eq!(compute_progress(Duration::hours(1), Duration::zero()), 100.0);
        assert_eq!(compute_progress(Duration::zero(), Duration::zero()), 100.0);
        assert_eq!(compute_progress(Duration::hours(-1), Duration::zero()), 0.0);
        assert_eq!(compute_progress(Duration::hours(1), Duration::hours(-2)), 100.0);
    }

    async fn engine() -> Arc<WorkflowEngine> {
        let now = Utc::now();
        let repos = Repositories::in_memory();
        repos
            .workflows
            .save(&WorkflowDefinition {
                id: "invest".into(),
                name: "Fund subscription".into(),
                description: String::new(),
                workflow_type: WorkflowType::Investment,
                steps: vec![
                    Step::new("subscribe", StepType::InvestmentSubscription),
                    Step::new("valuation", StepType::ValuationReview),
                ],
                product_ids: vec![],
                active: true,
                version: 0,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        let engine = Arc::new(WorkflowEngine::new(repos, EngineConfig::default()));
        engine.start_operation("invest", Some("op-1".into())).await.unwrap();
        engine
    }

    #[tokio::test]
    async fn test_refresher_follows_operation_events() {
        let engine = engine().await;
        let coordinator = ShutdownCoordinator::new();
        let refresher =
            ProgressRefresher::new(engine.clone(), "op-1", std::time::Duration::from_secs(3600));
        let (mut views, handle) = refresher.spawn(coordinator.subscribe());

        // First tick fires immediately
        views.changed().await.unwrap();
        assert_eq!(views.borrow().len(), 2);
        assert_eq!(views.borrow()[0].step.id, "subscribe");

        engine.advance("op-1", "valuation", Actor::Institution).await.unwrap();

        let moved = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                views.changed().await.unwrap();
                let current = views
                    .borrow()
                    .iter()
                    .find(|v| v.status == crate::workflows::status::StepStatus::Current)
                    .map(|v| v.step.id.clone());
                if current.as_deref() == Some("valuation") {
                    break;
                }
            }
        })
        .await;
        assert!(moved.is_ok(), "refresher did not pick up the advance");

        coordinator.trigger();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresher_ticks_on_interval() {
        let engine = engine().await;
        let coordinator = ShutdownCoordinator::new();
        let started = tokio::time::Instant::now();
        let refresher = ProgressRefresher::new(engine, "op-1", std::time::Duration::from_secs(30));
        let (mut views, handle) = refresher.spawn(coordinator.subscribe());

        views.changed().await.unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(30));

        views.changed().await.unwrap();
        assert!(started.elapsed() >= std::time::Duration::from_secs(30));
        assert_eq!(views.borrow().len(), 2);

        coordinator.trigger();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_refresher_survives_missing_operation() {
        let engine = engine().await;
        let coordinator = ShutdownCoordinator::new();
        let refresher =
            ProgressRefresher::new(engine, "does-not-exist", std::time::Duration::from_millis(10));
        let (views, handle) = refresher.spawn(coordinator.subscribe());

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(views.borrow().is_empty());
        assert!(!handle.is_finished());

        coordinator.trigger();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_ticks_once_a_second() {
        let engine = engine().await;
        let coordinator = ShutdownCoordinator::new();
        let refresher = ProgressRefresher::new(engine, "op-1", std::time::Duration::ZERO);
        assert_eq!(refresher.interval, MIN_REFRESH_INTERVAL);

        let started = tokio::time::Instant::now();
        let (mut views, handle) = refresher.spawn(coordinator.subscribe());
        views.changed().await.unwrap();
        views.changed().await.unwrap();
        assert!(started.elapsed() >= MIN_REFRESH_INTERVAL);

        coordinator.trigger();
        handle.await.unwrap();
    }
}
