//! Custom Resource Definitions for Paddock
//!
//! This module contains the RunnerPool CRD consumed by the operator.

mod pool;
mod types;

pub use pool::{RunnerPool, RunnerPoolSpec, RunnerPoolStatus};
pub use types::SecretKeyRef;
