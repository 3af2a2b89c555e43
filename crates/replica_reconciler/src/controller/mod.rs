//! Controller Module - the caller side of the reconciliation loop
//!
//! 1. reconcile desired against actual
//! 2. execute the actions through the actuator
//! 3. repeat until converged

pub mod executor;
pub mod fleet;
pub mod replica_controller;

pub use executor::{execute_action, ExecuteResult};
pub use fleet::{Fleet, FleetOutcome};
pub use replica_controller::{ControllerEvent, PassReport, ReplicaController};
