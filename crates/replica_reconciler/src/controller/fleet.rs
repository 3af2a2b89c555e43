//! Fleet - reconciles many resources concurrently
//!
//! Every controller runs on its own tokio task and owns its
//! DesiredState/ActualState pair. Nothing mutable is shared between them.

use tokio::task::JoinSet;
use tracing::{error, info};

use crate::controller::replica_controller::{PassReport, ReplicaController};
use crate::state::ActualState;
use crate::{ControllerError, InstanceActuator};

/// Result for one resource of a fleet run.
#[derive(Debug)]
pub struct FleetOutcome {
    pub resource: String,
    /// Final actual state; `None` if the controller task panicked
    pub actual: Option<ActualState>,
    pub result: Result<PassReport, ControllerError>,
}

impl FleetOutcome {
    pub fn is_converged(&self) -> bool {
        self.result.is_ok()
    }
}

/// A set of independent controllers.
pub struct Fleet<A: InstanceActuator + 'static> {
    controllers: Vec<ReplicaController<A>>,
}

impl<A: InstanceActuator + 'static> Default for Fleet<A> {
    fn default() -> Self {
        Self {
            controllers: Vec::new(),
        }
    }
}

impl<A: InstanceActuator + 'static> Fleet<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, controller: ReplicaController<A>) {
        self.controllers.push(controller);
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Runs every controller until converged (or failed).
    ///
    /// Outcomes are returned in the order the controllers were added.
    pub async fn run(self) -> Vec<FleetOutcome> {
        let resources: Vec<String> = self
            .controllers
            .iter()
            .map(|c| c.resource().to_string())
            .collect();
        info!(resources = resources.len(), "starting fleet");

        let mut tasks = JoinSet::new();
        for (index, mut controller) in self.controllers.into_iter().enumerate() {
            tasks.spawn(async move {
                let result = controller.run_until_converged().await;
                (index, controller.into_actual(), result)
            });
        }

        let mut outcomes: Vec<Option<FleetOutcome>> = resources.iter().map(|_| None).collect();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, actual, result)) => {
                    if let Err(e) = &result {
                        error!(resource = %resources[index], error = %e, "resource did not converge");
                    }
                    outcomes[index] = Some(FleetOutcome {
                        resource: resources[index].clone(),
                        actual: Some(actual),
                        result,
                    });
                }
                Err(e) => error!(error = %e, "controller task failed"),
            }
        }

        // Slots still empty belong to tasks that panicked
        outcomes
            .into_iter()
            .zip(resources)
            .map(|(outcome, resource)| {
                outcome.unwrap_or_else(|| FleetOutcome {
                    result: Err(ControllerError::Join {
                        resource: resource.clone(),
                        reason: "controller task panicked".to_string(),
                    }),
                    resource,
                    actual: None,
                })
            })
            .collect()
    }
}
