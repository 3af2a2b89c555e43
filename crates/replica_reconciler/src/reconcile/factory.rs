//! Instance factory - where new ids and creation timestamps come from
//!
//! `reconcile()` uses [`DefaultInstanceFactory`]; tests plug in a
//! deterministic one through `reconcile_with()`.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Source of fresh instance ids and timestamps.
pub trait InstanceFactory {
    /// Proposes an id for a new instance of `resource`.
    fn next_id(&mut self, resource: &str) -> String;

    /// Creation timestamp for a new instance.
    fn now(&mut self) -> DateTime<Utc>;
}

/// Random ids (`<resource>-<uuid>`) and wall clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultInstanceFactory;

impl InstanceFactory for DefaultInstanceFactory {
    fn next_id(&mut self, resource: &str) -> String {
        format!("{}-{}", resource, Uuid::new_v4().simple())
    }

    fn now(&mut self) -> DateTime<Utc> {
        Utc::now()
    }
}
