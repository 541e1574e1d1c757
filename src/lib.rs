//! Paddock - Kubernetes operator for self-hosted CI runner pools
//!
//! Paddock keeps a pool of runner pods sized to match the demand declared in
//! a [`crd::RunnerPool`] custom resource, reconciled against the live
//! registration state reported by the runner API and the live pod state in
//! the cluster.
//!
//! # Architecture
//!
//! Watches feed a bounded queue and keep a read-only pod index warm; a single
//! worker drains the queue and runs one reconcile at a time. Each reconcile
//! is a stateless function of the pool spec, the owned pod set and a fresh
//! registration snapshot - nothing is cached between passes.
//!
//! # Modules
//!
//! - [`crd`] - The RunnerPool Custom Resource Definition
//! - [`controller`] - Reconciliation logic and provisioning gateway
//! - [`registration`] - Typed client for the runner registration API
//! - [`credentials`] - Credential resolution from cluster secrets
//! - [`queue`] - Event ingestion, resync and the worker loop
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod controller;
pub mod crd;
pub mod credentials;
pub mod error;
pub mod queue;
pub mod registration;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Capacity of the bounded reconcile queue
///
/// Sized to the expected number of RunnerPool objects. A full queue
/// backpressures the watch producer rather than dropping events.
pub const QUEUE_CAPACITY: usize = 1024;

/// Period between full re-enqueues of all known pools
///
/// The resync is the retry mechanism: a reconcile that failed or observed
/// in-flight pods gets another pass at most this far in the future.
pub const RESYNC_PERIOD: std::time::Duration = std::time::Duration::from_secs(60);

/// Label stamped on every pod provisioned for a pool
pub const POOL_LABEL: &str = "paddock.dev/pool";

/// Field manager name used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "paddock-controller";
