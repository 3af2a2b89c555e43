//! State Module - data types for the reconciliation loop
//!
//! - **DesiredState**: how many replicas the caller wants
//! - **ActualState**: which instances are alive right now

mod actual;
mod desired;

pub use actual::{ActualState, Instance};
pub use desired::DesiredState;
