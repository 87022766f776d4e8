//! Loan application records as received from the intake workflow.

pub mod model;

pub use model::{ApplicationRecord, Channel, FormData, LifecycleState};
