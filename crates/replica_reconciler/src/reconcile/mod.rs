//! Reconcile Module - pure function for state reconciliation
//!
//! `reconcile()` is a **pure function**:
//! - no side effects (the input ActualState is only borrowed)
//! - deterministic once the instance factory is fixed
//! - testable without an actuator

mod actions;
mod factory;

pub use actions::{Action, ActionList};
pub use factory::{DefaultInstanceFactory, InstanceFactory};

use std::cmp::Ordering;

use crate::state::{ActualState, DesiredState, Instance};
use crate::ReconcileError;

/// Result of one reconcile call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Actions in execution order (creates in creation order, deletes oldest first)
    pub actions: Vec<Action>,
    /// The actual state with all actions applied
    pub actual: ActualState,
}

impl Reconciliation {
    /// True if desired and actual already matched.
    pub fn is_noop(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Whether a resource still needs work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceState {
    /// Instance count equals the desired replica count
    Converged,
    /// Instances have to be created or deleted
    Converging,
}

/// Computes the convergence state of a desired/actual pair.
pub fn convergence_state(
    desired: &DesiredState,
    actual: &ActualState,
) -> Result<ConvergenceState, ReconcileError> {
    let target = desired.target()?;
    if actual.len() == target {
        Ok(ConvergenceState::Converged)
    } else {
        Ok(ConvergenceState::Converging)
    }
}

/// Computes the actions that converge `actual` toward `desired`.
///
/// New instances get a random id and the current time. See
/// [`reconcile_with`] for an injectable id/clock source.
///
/// # Example
///
/// ```
/// use replica_reconciler::reconcile::reconcile;
/// use replica_reconciler::state::{ActualState, DesiredState};
///
/// let desired = DesiredState::new("web", 3);
/// let actual = ActualState::empty("web");
///
/// let result = reconcile(&desired, &actual).unwrap();
/// assert_eq!(result.actions.len(), 3);
/// assert_eq!(result.actual.len(), 3);
/// ```
pub fn reconcile(
    desired: &DesiredState,
    actual: &ActualState,
) -> Result<Reconciliation, ReconcileError> {
    reconcile_with(desired, actual, &mut DefaultInstanceFactory)
}

/// Same as [`reconcile`] but takes ids and timestamps from `factory`.
///
/// Fails with `InvalidDesiredState` for a negative replica count or when
/// desired and actual name different resources. Nothing is planned in that
/// case.
pub fn reconcile_with<F: InstanceFactory + ?Sized>(
    desired: &DesiredState,
    actual: &ActualState,
    factory: &mut F,
) -> Result<Reconciliation, ReconcileError> {
    let target = desired.target()?;

    if desired.resource != actual.resource {
        return Err(ReconcileError::invalid(
            &desired.resource,
            format!("actual state belongs to resource '{}'", actual.resource),
        ));
    }

    let mut next = actual.clone();
    let mut actions = ActionList::new();

    match next.len().cmp(&target) {
        Ordering::Less => {
            let missing = target - next.len();
            plan_creates(&desired.resource, missing, &mut next, factory, &mut actions);
        }
        Ordering::Greater => {
            let surplus = next.len() - target;
            plan_deletes(surplus, &mut next, &mut actions);
        }
        Ordering::Equal => {}
    }

    Ok(Reconciliation {
        actions: actions.into_vec(),
        actual: next,
    })
}

fn plan_creates<F: InstanceFactory + ?Sized>(
    resource: &str,
    count: usize,
    state: &mut ActualState,
    factory: &mut F,
    actions: &mut ActionList,
) {
    for _ in 0..count {
        let id = unique_id(resource, state, factory);
        let instance = Instance::new(id, factory.now());
        state.insert(instance.clone());
        actions.push(Action::Create { instance });
    }
}

fn plan_deletes(count: usize, state: &mut ActualState, actions: &mut ActionList) {
    let victims: Vec<Instance> = state
        .instances_oldest_first()
        .into_iter()
        .take(count)
        .cloned()
        .collect();

    for instance in victims {
        state.remove_instance(&instance.id);
        actions.push(Action::Delete { instance });
    }
}

/// Asks the factory for an id and suffixes it until it is unused.
fn unique_id<F: InstanceFactory + ?Sized>(
    resource: &str,
    state: &ActualState,
    factory: &mut F,
) -> String {
    let base = factory.next_id(resource);
    if !state.contains(&base) {
        return base;
    }

    (1u64..)
        .map(|n| format!("{}-{}", base, n))
        .find(|candidate| !state.contains(candidate))
        .unwrap_or(base)
}
