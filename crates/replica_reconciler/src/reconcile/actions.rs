//! Actions - what the reconciler wants done
//!
//! Actions are the output of `reconcile()` and describe the steps needed to
//! get from the actual state to the desired state.

use crate::state::Instance;

/// One step of convergence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Start a new instance
    Create {
        /// The instance the reconciler planned, with fresh id and timestamp
        instance: Instance,
    },

    /// Stop an existing instance
    Delete {
        /// The instance to remove (oldest first)
        instance: Instance,
    },
}

impl Action {
    /// The instance this action targets.
    pub fn instance(&self) -> &Instance {
        match self {
            Self::Create { instance } | Self::Delete { instance } => instance,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, Self::Create { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete { .. })
    }
}

/// A list of actions with a few helpers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionList {
    actions: Vec<Action>,
}

impl ActionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn into_vec(self) -> Vec<Action> {
        self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn instance(id: &str) -> Instance {
        Instance::new(id, Utc.timestamp_opt(1, 0).unwrap())
    }

    #[test]
    fn test_action_instance() {
        let create = Action::Create { instance: instance("a") };
        let delete = Action::Delete { instance: instance("b") };

        assert_eq!(create.instance().id, "a");
        assert_eq!(delete.instance().id, "b");
        assert!(create.is_create());
        assert!(delete.is_delete());
    }

    #[test]
    fn test_action_list_keeps_order() {
        let mut list = ActionList::new();
        assert!(list.is_empty());

        list.push(Action::Create { instance: instance("a") });
        list.push(Action::Create { instance: instance("b") });
        list.push(Action::Delete { instance: instance("c") });

        assert_eq!(list.len(), 3);
        let ids: Vec<String> = list.into_vec().iter().map(|a| a.instance().id.clone()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
