//! Actual State - which instances are currently alive
//!
//! The ActualState is owned by whoever drives the loop. Only the reconciler
//! (and failure reports coming back from the actuator side) change it.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// One replica of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// Unique, opaque identifier
    pub id: String,
    /// When the reconciler created this instance
    pub created_at: DateTime<Utc>,
}

impl Instance {
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at,
        }
    }

    /// Age ordering used for scale-down: oldest first, ties broken by id.
    pub fn age_order(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// The live instances of one resource.
///
/// Instances are keyed by id, so an id can never appear twice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActualState {
    /// Resource identifier, matches `DesiredState::resource`
    pub resource: String,
    instances: BTreeMap<String, Instance>,
}

impl ActualState {
    /// Creates an empty ActualState for a resource.
    pub fn empty(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            instances: BTreeMap::new(),
        }
    }

    /// Creates an ActualState from observed instances.
    ///
    /// A later instance with an already seen id replaces the earlier one.
    pub fn from_instances(
        resource: impl Into<String>,
        instances: impl IntoIterator<Item = Instance>,
    ) -> Self {
        let mut state = Self::empty(resource);
        for instance in instances {
            state.insert(instance);
        }
        state
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.instances.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Instance> {
        self.instances.get(id)
    }

    /// Iterates instances in id order.
    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    /// Instance ids in ascending order.
    pub fn ids(&self) -> Vec<String> {
        self.instances.keys().cloned().collect()
    }

    /// All instances sorted oldest first (ties by id).
    pub fn instances_oldest_first(&self) -> Vec<&Instance> {
        let mut sorted: Vec<&Instance> = self.instances.values().collect();
        sorted.sort_by(|a, b| a.age_order(b));
        sorted
    }

    /// Adds an instance. Returns the previous one with the same id, if any.
    pub fn insert(&mut self, instance: Instance) -> Option<Instance> {
        self.instances.insert(instance.id.clone(), instance)
    }

    /// Removes an instance, e.g. after a failure report.
    pub fn remove_instance(&mut self, id: &str) -> Option<Instance> {
        self.instances.remove(id)
    }
}
