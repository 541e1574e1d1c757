//! Controller implementation for the RunnerPool CRD
//!
//! This module contains the reconciliation logic for RunnerPool resources:
//! observe the registration snapshot and the owned pod set, compare against
//! the declared bounds, and issue create/delete intents.

mod pool;

pub use pool::{
    build_runner_pod, reconcile, sort_by_age, Context, ContextBuilder, KubeClient, KubeClientImpl,
    PodIndex, PodProvisioner, PodProvisionerImpl, ReflectorPodIndex,
};

#[cfg(test)]
pub use pool::{MockKubeClient, MockPodIndex, MockPodProvisioner};
