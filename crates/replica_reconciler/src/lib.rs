//! Replica reconciler - converge live instances toward a desired replica count
//!
//! The crate follows the operator pattern:
//! 1. observe the actual state
//! 2. compute actions with the pure [`reconcile::reconcile`] function
//! 3. apply them through an [`InstanceActuator`]
//! 4. repeat until converged ([`controller::ReplicaController`])
//!
//! # Modules
//!
//! - [`state`] - DesiredState / ActualState / Instance
//! - [`reconcile`] - the pure reconcile function and its actions
//! - [`controller`] - executor, per-resource controller loop, fleet
//! - [`retry`] - backoff between failed passes
//! - [`config`] - TOML configuration
//! - [`logging`] - tracing subscriber setup

use async_trait::async_trait;
use thiserror::Error;

pub mod config;
pub mod controller;
pub mod logging;
pub mod reconcile;
pub mod retry;
pub mod state;

use state::Instance;

pub use controller::{Fleet, PassReport, ReplicaController};
pub use reconcile::{reconcile, reconcile_with, Action, ConvergenceState, Reconciliation};
pub use state::{ActualState, DesiredState};

/// Errors of the pure reconcile step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("Invalid desired state for '{resource}': {reason}")]
    InvalidDesiredState { resource: String, reason: String },
}

impl ReconcileError {
    pub fn invalid(resource: &str, reason: impl Into<String>) -> Self {
        Self::InvalidDesiredState {
            resource: resource.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors reported by an actuator for a single action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActuatorError {
    #[error("Actuator failed: {0}")]
    Failed(String),

    #[error("Actuator unavailable: {0}")]
    Unavailable(String),
}

/// Errors of the controller loop.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("Giving up on '{resource}' after {attempts} failed pass(es)")]
    RetriesExhausted { resource: String, attempts: u32 },

    #[error("'{resource}' did not converge within {passes} pass(es)")]
    PassLimit { resource: String, passes: u32 },

    #[error("Controller task for '{resource}' failed: {reason}")]
    Join { resource: String, reason: String },
}

// ============================================================================
// InstanceActuator Trait - performs the real-world effect of an action
// ============================================================================

/// Creates and deletes instances outside of this crate (processes,
/// containers, API objects).
///
/// The controller calls it once per action and treats an `Err` as
/// "this action did not happen".
#[async_trait]
pub trait InstanceActuator: Send + Sync {
    /// Starts `instance` for `resource`
    async fn create_instance(&self, resource: &str, instance: &Instance)
        -> Result<(), ActuatorError>;

    /// Stops `instance` of `resource`
    async fn delete_instance(&self, resource: &str, instance: &Instance)
        -> Result<(), ActuatorError>;
}

// ============================================================================
// Test Utilities - exported for integration tests
// ============================================================================

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;
    use std::collections::{BTreeSet, HashSet};
    use std::sync::Mutex;

    use chrono::{DateTime, TimeZone, Utc};

    use crate::reconcile::InstanceFactory;

    /// Timestamp `secs` seconds after the epoch
    pub fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
    }

    /// Deterministic factory: ids `<resource>-0`, `<resource>-1`, ...
    /// and timestamps one second apart.
    #[derive(Debug, Clone)]
    pub struct SequenceFactory {
        next: u64,
        clock: i64,
    }

    impl SequenceFactory {
        pub fn starting_at(secs: i64) -> Self {
            Self { next: 0, clock: secs }
        }
    }

    impl InstanceFactory for SequenceFactory {
        fn next_id(&mut self, resource: &str) -> String {
            let id = format!("{}-{}", resource, self.next);
            self.next += 1;
            id
        }

        fn now(&mut self) -> DateTime<Utc> {
            let now = at(self.clock);
            self.clock += 1;
            now
        }
    }

    /// Mock actuator - records calls and keeps a set of "running" instances.
    #[derive(Default)]
    pub struct MockActuator {
        running: Mutex<BTreeSet<String>>,
        create_calls: Mutex<Vec<String>>,
        delete_calls: Mutex<Vec<String>>,
        failing_creates: Mutex<usize>,
        failing_deletes: Mutex<usize>,
        broken_ids: Mutex<HashSet<String>>,
    }

    impl MockActuator {
        pub fn new() -> Self {
            Self::default()
        }

        /// The next `n` create calls fail
        pub fn fail_next_creates(&self, n: usize) {
            *self.failing_creates.lock().unwrap() = n;
        }

        /// The next `n` delete calls fail
        pub fn fail_next_deletes(&self, n: usize) {
            *self.failing_deletes.lock().unwrap() = n;
        }

        /// Every call for this id fails
        pub fn break_instance(&self, id: &str) {
            self.broken_ids.lock().unwrap().insert(id.to_string());
        }

        /// Simulates a crashed worker: the instance stops running on its own
        pub fn crash(&self, id: &str) -> bool {
            self.running.lock().unwrap().remove(id)
        }

        /// Ids of instances currently running
        pub fn running(&self) -> Vec<String> {
            self.running.lock().unwrap().iter().cloned().collect()
        }

        /// Ids passed to create_instance, in call order
        pub fn created(&self) -> Vec<String> {
            self.create_calls.lock().unwrap().clone()
        }

        /// Ids passed to delete_instance, in call order
        pub fn deleted(&self) -> Vec<String> {
            self.delete_calls.lock().unwrap().clone()
        }

        fn should_fail(&self, counter: &Mutex<usize>, id: &str) -> bool {
            if self.broken_ids.lock().unwrap().contains(id) {
                return true;
            }
            let mut remaining = counter.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return true;
            }
            false
        }
    }

    #[async_trait]
    impl InstanceActuator for MockActuator {
        async fn create_instance(
            &self,
            _resource: &str,
            instance: &Instance,
        ) -> Result<(), ActuatorError> {
            self.create_calls.lock().unwrap().push(instance.id.clone());
            if self.should_fail(&self.failing_creates, &instance.id) {
                return Err(ActuatorError::Failed(format!("create {} refused", instance.id)));
            }
            self.running.lock().unwrap().insert(instance.id.clone());
            Ok(())
        }

        async fn delete_instance(
            &self,
            _resource: &str,
            instance: &Instance,
        ) -> Result<(), ActuatorError> {
            self.delete_calls.lock().unwrap().push(instance.id.clone());
            if self.should_fail(&self.failing_deletes, &instance.id) {
                return Err(ActuatorError::Failed(format!("delete {} refused", instance.id)));
            }
            self.running.lock().unwrap().remove(&instance.id);
            Ok(())
        }
    }
}
