//! Action Executor - runs actions against the actuator
//!
//! `reconcile()` already applied every action to the ActualState it
//! returned. When the actuator refuses an action the executor undoes that
//! part again, so the state keeps matching what really runs.

use tracing::{debug, warn};

use crate::reconcile::Action;
use crate::state::ActualState;
use crate::{ActuatorError, InstanceActuator};

/// Outcome of a single action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteResult {
    /// The actuator performed the action
    Applied,
    /// The actuator refused; the planned change was rolled back
    Failed(ActuatorError),
}

impl ExecuteResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Executes one action and rolls `actual` back if it fails.
pub async fn execute_action<A: InstanceActuator + ?Sized>(
    action: &Action,
    actual: &mut ActualState,
    actuator: &A,
) -> ExecuteResult {
    let resource = actual.resource.clone();

    match action {
        Action::Create { instance } => {
            match actuator.create_instance(&resource, instance).await {
                Ok(()) => {
                    debug!(resource = %resource, instance = %instance.id, "instance created");
                    ExecuteResult::Applied
                }
                Err(e) => {
                    warn!(resource = %resource, instance = %instance.id, error = %e, "create failed");
                    actual.remove_instance(&instance.id);
                    ExecuteResult::Failed(e)
                }
            }
        }

        Action::Delete { instance } => {
            match actuator.delete_instance(&resource, instance).await {
                Ok(()) => {
                    debug!(resource = %resource, instance = %instance.id, "instance deleted");
                    ExecuteResult::Applied
                }
                Err(e) => {
                    warn!(resource = %resource, instance = %instance.id, error = %e, "delete failed");
                    actual.insert(instance.clone());
                    ExecuteResult::Failed(e)
                }
            }
        }
    }
}
