//! ReplicaController - the reconciliation loop for one resource
//!
//! Each pass:
//! 1. compute actions from desired/actual (reconcile)
//! 2. execute them through the actuator
//! 3. keep the ActualState in line with what really happened
//!
//! Passes repeat until the resource is converged, with backoff after passes
//! where the actuator refused something.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::{ControllerSettings, ReconcilerConfig};
use crate::controller::executor::{execute_action, ExecuteResult};
use crate::reconcile::{
    convergence_state, reconcile_with, ConvergenceState, DefaultInstanceFactory, InstanceFactory,
};
use crate::retry::{Backoff, RetryConfig};
use crate::state::{ActualState, DesiredState, Instance};
use crate::{ControllerError, InstanceActuator, ReconcileError};

/// Shortest wait before retrying a resource that failed to converge.
const MIN_RESYNC: Duration = Duration::from_millis(1);

/// Counters for one or more passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub passes: u32,
    pub created: usize,
    pub deleted: usize,
    pub failed: usize,
}

impl PassReport {
    /// Adds the counters of another report.
    pub fn merge(&mut self, other: PassReport) {
        self.passes += other.passes;
        self.created += other.created;
        self.deleted += other.deleted;
        self.failed += other.failed;
    }

    /// True if the actuator refused at least one action.
    pub fn is_partial(&self) -> bool {
        self.failed > 0
    }
}

/// Input for the long-running [`ReplicaController::run`] loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// A new desired state (user `apply`)
    Apply(DesiredState),
    /// An instance died outside of the controller's control
    InstanceFailed(String),
    /// Stop the loop
    Shutdown,
}

/// Drives one DesiredState/ActualState pair toward convergence.
pub struct ReplicaController<A: InstanceActuator> {
    actuator: Arc<A>,
    desired: DesiredState,
    actual: ActualState,
    settings: ControllerSettings,
    backoff: Backoff,
    factory: Box<dyn InstanceFactory + Send>,
}

impl<A: InstanceActuator> ReplicaController<A> {
    /// Creates a controller for `desired`, starting from `actual`.
    ///
    /// Fails with `InvalidDesiredState` if the replica count is negative or
    /// the two states name different resources.
    pub fn new(
        actuator: Arc<A>,
        desired: DesiredState,
        actual: ActualState,
    ) -> Result<Self, ReconcileError> {
        desired.validate()?;
        check_same_resource(&desired, &actual.resource)?;

        Ok(Self {
            actuator,
            desired,
            actual,
            settings: ControllerSettings::default(),
            backoff: Backoff::new(RetryConfig::default()),
            factory: Box::new(DefaultInstanceFactory),
        })
    }

    /// Creates a controller for a resource without live instances.
    pub fn for_resource(actuator: Arc<A>, desired: DesiredState) -> Result<Self, ReconcileError> {
        let actual = ActualState::empty(desired.resource.clone());
        Self::new(actuator, desired, actual)
    }

    /// Applies the controller and retry sections of a config.
    pub fn with_config(mut self, config: &ReconcilerConfig) -> Self {
        self.settings = config.controller.clone();
        self.backoff = Backoff::new(RetryConfig::from(&config.retry));
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.backoff = Backoff::new(retry);
        self
    }

    /// Replaces the id/clock source for new instances.
    pub fn with_factory(mut self, factory: impl InstanceFactory + Send + 'static) -> Self {
        self.factory = Box::new(factory);
        self
    }

    pub fn resource(&self) -> &str {
        &self.desired.resource
    }

    pub fn desired(&self) -> &DesiredState {
        &self.desired
    }

    pub fn actual(&self) -> &ActualState {
        &self.actual
    }

    pub fn into_actual(self) -> ActualState {
        self.actual
    }

    pub fn convergence(&self) -> ConvergenceState {
        // desired is validated on every entry point
        convergence_state(&self.desired, &self.actual).unwrap_or(ConvergenceState::Converging)
    }

    /// Replaces the desired state. Rejected states leave the old one in place.
    pub fn apply(&mut self, desired: DesiredState) -> Result<(), ReconcileError> {
        desired.validate()?;
        check_same_resource(&desired, &self.desired.resource)?;

        info!(
            resource = %desired.resource,
            from = self.desired.replicas,
            to = desired.replicas,
            "desired state applied"
        );
        self.desired = desired;
        Ok(())
    }

    /// Records that an instance died. Returns it if it was known.
    pub fn report_failure(&mut self, instance_id: &str) -> Option<Instance> {
        let removed = self.actual.remove_instance(instance_id);
        match &removed {
            Some(_) => warn!(resource = %self.desired.resource, instance = %instance_id, "instance failed"),
            None => debug!(resource = %self.desired.resource, instance = %instance_id, "failure report for unknown instance"),
        }
        removed
    }

    /// Runs a single pass: reconcile, then execute every action.
    pub async fn reconcile_once(&mut self) -> Result<PassReport, ControllerError> {
        let plan = reconcile_with(&self.desired, &self.actual, self.factory.as_mut())?;
        let mut next = plan.actual;
        let mut report = PassReport {
            passes: 1,
            ..Default::default()
        };

        for action in &plan.actions {
            match execute_action(action, &mut next, self.actuator.as_ref()).await {
                ExecuteResult::Applied if action.is_create() => report.created += 1,
                ExecuteResult::Applied => report.deleted += 1,
                ExecuteResult::Failed(_) => report.failed += 1,
            }
        }

        self.actual = next;

        if !plan.actions.is_empty() {
            info!(
                resource = %self.desired.resource,
                created = report.created,
                deleted = report.deleted,
                failed = report.failed,
                live = self.actual.len(),
                desired = self.desired.replicas,
                "reconcile pass finished"
            );
        }

        Ok(report)
    }

    /// Repeats passes until the resource is converged.
    ///
    /// After a pass with failed actions the loop backs off. It gives up with
    /// `RetriesExhausted` when the retry budget is used up and with
    /// `PassLimit` after `max_passes` passes. A resource that is already
    /// converged returns without running a pass.
    pub async fn run_until_converged(&mut self) -> Result<PassReport, ControllerError> {
        let mut total = PassReport::default();
        if self.convergence() == ConvergenceState::Converged {
            return Ok(total);
        }

        while total.passes < self.settings.max_passes {
            let report = self.reconcile_once().await?;
            total.merge(report);

            if !report.is_partial() {
                self.backoff.reset();
                if self.convergence() == ConvergenceState::Converged {
                    return Ok(total);
                }
                continue;
            }

            match self.backoff.next_delay() {
                Some(delay) => {
                    debug!(
                        resource = %self.desired.resource,
                        attempt = self.backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "partial pass, backing off"
                    );
                    sleep(delay).await;
                }
                None => {
                    return Err(ControllerError::RetriesExhausted {
                        resource: self.desired.resource.clone(),
                        attempts: self.backoff.attempts(),
                    });
                }
            }
        }

        Err(ControllerError::PassLimit {
            resource: self.desired.resource.clone(),
            passes: total.passes,
        })
    }

    /// Long-running loop: converge, then wait for the next event.
    ///
    /// Errors never end the loop. A rejected `Apply` keeps the previous
    /// desired state. When convergence fails the loop waits for the next
    /// event, but at most `max_delay`, then tries again with a fresh retry
    /// budget.
    ///
    /// Returns the final ActualState on `Shutdown` or when all senders are
    /// gone.
    pub async fn run(mut self, mut events: mpsc::Receiver<ControllerEvent>) -> ActualState {
        loop {
            let converged = match self.run_until_converged().await {
                Ok(_) => true,
                Err(e) => {
                    error!(resource = %self.desired.resource, error = %e, "resource did not converge");
                    self.backoff.reset();
                    false
                }
            };

            let event = if converged {
                events.recv().await
            } else {
                let resync = self.backoff.max_delay().max(MIN_RESYNC);
                match timeout(resync, events.recv()).await {
                    Ok(event) => event,
                    Err(_) => continue,
                }
            };

            match event {
                Some(ControllerEvent::Apply(desired)) => {
                    if let Err(e) = self.apply(desired) {
                        warn!(resource = %self.desired.resource, error = %e, "apply rejected");
                    }
                }
                Some(ControllerEvent::InstanceFailed(id)) => {
                    self.report_failure(&id);
                }
                Some(ControllerEvent::Shutdown) | None => {
                    info!(resource = %self.desired.resource, "controller stopped");
                    return self.actual;
                }
            }
        }
    }
}

fn check_same_resource(desired: &DesiredState, resource: &str) -> Result<(), ReconcileError> {
    if desired.resource != resource {
        return Err(ReconcileError::invalid(
            &desired.resource,
            format!("controller manages resource '{}'", resource),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_utils::{at, MockActuator, SequenceFactory};

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    fn controller(
        actuator: &Arc<MockActuator>,
        replicas: i64,
    ) -> ReplicaController<MockActuator> {
        ReplicaController::for_resource(actuator.clone(), DesiredState::new("web", replicas))
            .unwrap()
            .with_factory(SequenceFactory::starting_at(1))
            .with_retry(fast_retry(5))
    }

    #[test]
    fn test_new_rejects_negative_replicas() {
        let actuator = Arc::new(MockActuator::new());
        let result = ReplicaController::for_resource(actuator, DesiredState::new("web", -1));

        assert!(matches!(result, Err(ReconcileError::InvalidDesiredState { .. })));
    }

    #[test]
    fn test_new_rejects_foreign_actual_state() {
        let actuator = Arc::new(MockActuator::new());
        let result = ReplicaController::new(
            actuator,
            DesiredState::new("web", 1),
            ActualState::empty("db"),
        );

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_until_converged_from_empty() {
        let actuator = Arc::new(MockActuator::new());
        let mut controller = controller(&actuator, 3);

        let report = controller.run_until_converged().await.unwrap();

        assert_eq!(report.passes, 1);
        assert_eq!(report.created, 3);
        assert_eq!(controller.actual().len(), 3);
        assert_eq!(actuator.running(), controller.actual().ids());
        assert_eq!(controller.convergence(), ConvergenceState::Converged);
    }

    #[tokio::test]
    async fn test_converged_pass_is_noop() {
        let actuator = Arc::new(MockActuator::new());
        let mut controller = controller(&actuator, 2);
        controller.run_until_converged().await.unwrap();

        let report = controller.reconcile_once().await.unwrap();

        assert_eq!(report, PassReport { passes: 1, ..Default::default() });
        assert_eq!(actuator.created().len(), 2);
    }

    #[tokio::test]
    async fn test_apply_scale_down_removes_oldest() {
        let actuator = Arc::new(MockActuator::new());
        let mut controller = controller(&actuator, 3);
        controller.run_until_converged().await.unwrap();

        controller.apply(DesiredState::new("web", 1)).unwrap();
        let report = controller.run_until_converged().await.unwrap();

        assert_eq!(report.deleted, 2);
        assert_eq!(actuator.deleted(), vec!["web-0".to_string(), "web-1".to_string()]);
        assert_eq!(controller.actual().ids(), vec!["web-2".to_string()]);
    }

    #[tokio::test]
    async fn test_apply_rejects_negative_and_keeps_state() {
        let actuator = Arc::new(MockActuator::new());
        let mut controller = controller(&actuator, 2);

        assert!(controller.apply(DesiredState::new("web", -5)).is_err());
        assert!(controller.apply(DesiredState::new("db", 1)).is_err());
        assert_eq!(controller.desired().replicas, 2);
    }

    #[tokio::test]
    async fn test_failure_report_triggers_replacement() {
        let actuator = Arc::new(MockActuator::new());
        let mut controller = controller(&actuator, 2);
        controller.run_until_converged().await.unwrap();

        actuator.crash("web-0");
        assert!(controller.report_failure("web-0").is_some());
        assert!(controller.report_failure("web-0").is_none());
        assert_eq!(controller.convergence(), ConvergenceState::Converging);

        let report = controller.run_until_converged().await.unwrap();

        assert_eq!(report.created, 1);
        assert_eq!(controller.actual().ids(), vec!["web-1".to_string(), "web-2".to_string()]);
        assert_eq!(actuator.running(), controller.actual().ids());
    }

    #[tokio::test]
    async fn test_partial_failure_recovers_on_next_pass() {
        let actuator = Arc::new(MockActuator::new());
        actuator.fail_next_creates(2);
        let mut controller = controller(&actuator, 3);

        let report = controller.run_until_converged().await.unwrap();

        assert_eq!(report.passes, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(report.created, 3);
        assert_eq!(controller.actual().len(), 3);
    }

    #[tokio::test]
    async fn test_negative_multiplier_still_retries() {
        let actuator = Arc::new(MockActuator::new());
        actuator.fail_next_creates(2);
        let mut controller = controller(&actuator, 2).with_retry(RetryConfig {
            backoff_multiplier: -2.0,
            ..fast_retry(5)
        });

        let report = controller.run_until_converged().await.unwrap();

        assert_eq!(report.failed, 2);
        assert_eq!(controller.actual().len(), 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let actuator = Arc::new(MockActuator::new());
        actuator.break_instance("web-0");
        let mut controller = ReplicaController::for_resource(actuator.clone(), DesiredState::new("web", 1))
            .unwrap()
            .with_factory(BrokenFactory)
            .with_retry(fast_retry(3));

        let err = controller.run_until_converged().await.unwrap_err();

        assert!(matches!(err, ControllerError::RetriesExhausted { attempts: 3, .. }));
        assert!(controller.actual().is_empty());
    }

    #[tokio::test]
    async fn test_pass_limit() {
        let actuator = Arc::new(MockActuator::new());
        actuator.break_instance("web-0");
        let config = ReconcilerConfig::from_toml_str(
            "[controller]\nmax_passes = 2\n[retry]\nmax_attempts = 0\ninitial_delay_ms = 1\nmax_delay_ms = 2",
        )
        .unwrap();
        let mut controller = ReplicaController::for_resource(actuator, DesiredState::new("web", 1))
            .unwrap()
            .with_factory(BrokenFactory)
            .with_config(&config);

        let err = controller.run_until_converged().await.unwrap_err();

        assert!(matches!(err, ControllerError::PassLimit { passes: 2, .. }));
    }

    #[tokio::test]
    async fn test_run_processes_events() {
        let actuator = Arc::new(MockActuator::new());
        let controller = controller(&actuator, 1);
        let (tx, rx) = mpsc::channel(8);

        tx.send(ControllerEvent::Apply(DesiredState::new("web", 3))).await.unwrap();
        tx.send(ControllerEvent::InstanceFailed("web-1".to_string())).await.unwrap();
        tx.send(ControllerEvent::Shutdown).await.unwrap();

        let actual = controller.run(rx).await;

        assert_eq!(actual.len(), 3);
        assert!(!actual.contains("web-1"));
        assert_eq!(actuator.created().len(), 4);
    }

    #[tokio::test]
    async fn test_run_stops_when_senders_dropped() {
        let actuator = Arc::new(MockActuator::new());
        let controller = controller(&actuator, 2);
        let (tx, rx) = mpsc::channel::<ControllerEvent>(1);
        drop(tx);

        let actual = controller.run(rx).await;

        assert_eq!(actual.len(), 2);
    }

    #[tokio::test]
    async fn test_run_survives_invalid_apply() {
        let actuator = Arc::new(MockActuator::new());
        let controller = controller(&actuator, 1);
        let (tx, rx) = mpsc::channel(8);

        tx.send(ControllerEvent::Apply(DesiredState::new("web", -3))).await.unwrap();
        tx.send(ControllerEvent::Apply(DesiredState::new("db", 4))).await.unwrap();
        tx.send(ControllerEvent::Apply(DesiredState::new("web", 2))).await.unwrap();
        tx.send(ControllerEvent::Shutdown).await.unwrap();

        let actual = controller.run(rx).await;

        assert_eq!(actual.len(), 2);
        assert_eq!(actuator.running(), actual.ids());
    }

    #[tokio::test]
    async fn test_run_keeps_tracking_after_actuator_outage() {
        let actuator = Arc::new(MockActuator::new());
        let controller = controller(&actuator, 3).with_retry(fast_retry(2));
        for id in ["web-3", "web-4", "web-5", "web-6", "web-7"] {
            actuator.break_instance(id);
        }
        let (tx, rx) = mpsc::channel(8);

        tx.send(ControllerEvent::Apply(DesiredState::new("web", 5))).await.unwrap();
        tx.send(ControllerEvent::Shutdown).await.unwrap();

        let actual = controller.run(rx).await;

        assert_eq!(actual.ids(), vec!["web-0", "web-1", "web-2"]);
        assert_eq!(actuator.running(), actual.ids());
    }

    #[tokio::test]
    async fn test_converged_resource_needs_no_pass() {
        let actuator = Arc::new(MockActuator::new());
        let mut controller = controller(&actuator, 0);

        let report = controller.run_until_converged().await.unwrap();

        assert_eq!(report, PassReport::default());
        assert!(actuator.created().is_empty());
    }

    #[tokio::test]
    async fn test_existing_instances_are_kept() {
        let actuator = Arc::new(MockActuator::new());
        let actual = ActualState::from_instances("web", vec![Instance::new("old", at(1))]);
        let mut controller = ReplicaController::new(actuator.clone(), DesiredState::new("web", 2), actual)
            .unwrap()
            .with_factory(SequenceFactory::starting_at(10));

        controller.run_until_converged().await.unwrap();

        assert!(controller.actual().contains("old"));
        assert_eq!(actuator.created(), vec!["web-0".to_string()]);
    }

    /// Always proposes the same id, so a broken id stays broken.
    struct BrokenFactory;

    impl InstanceFactory for BrokenFactory {
        fn next_id(&mut self, resource: &str) -> String {
            format!("{}-0", resource)
        }

        fn now(&mut self) -> chrono::DateTime<chrono::Utc> {
            at(1)
        }
    }
}
