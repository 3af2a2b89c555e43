//! Desired State - what the caller wants to exist
//!
//! The DesiredState is set from outside (a user `apply`) and is never
//! touched by the reconciler itself.

use crate::ReconcileError;

/// The requested replica count for one resource.
///
/// `replicas` is signed so a negative request can be represented and
/// rejected by [`DesiredState::validate`] instead of wrapping around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    /// Resource identifier (e.g. "web")
    pub resource: String,
    /// Target replica count
    pub replicas: i64,
}

impl DesiredState {
    pub fn new(resource: impl Into<String>, replicas: i64) -> Self {
        Self {
            resource: resource.into(),
            replicas,
        }
    }

    /// Checks that the replica count is non-negative.
    pub fn validate(&self) -> Result<(), ReconcileError> {
        if self.replicas < 0 {
            return Err(ReconcileError::invalid(
                &self.resource,
                format!("replica count must be >= 0, got {}", self.replicas),
            ));
        }
        Ok(())
    }

    /// Target replica count as `usize`.
    ///
    /// Fails with `InvalidDesiredState` for negative counts.
    pub fn target(&self) -> Result<usize, ReconcileError> {
        self.validate()?;
        usize::try_from(self.replicas).map_err(|_| {
            ReconcileError::invalid(
                &self.resource,
                format!("replica count {} does not fit this platform", self.replicas),
            )
        })
    }
}
