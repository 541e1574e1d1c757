//! RunnerPool Custom Resource Definition
//!
//! A RunnerPool declares the desired size of a pool of self-hosted CI runner
//! pods for one organization: lower and upper bounds on registered runners,
//! the pod template to provision from, and where to find the API credential.
//! The operator only reads these objects; it never mutates the spec.

use k8s_openapi::api::core::v1::PodSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::SecretKeyRef;

/// Specification for a RunnerPool
///
/// The invariant `minRunners <= maxRunners` is enforced by [`validate`]
/// before every reconcile rather than by admission, so a bad spec surfaces
/// as a logged configuration error and is retried on the next resync.
///
/// [`validate`]: RunnerPoolSpec::validate
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "paddock.dev",
    version = "v1alpha1",
    kind = "RunnerPool",
    plural = "runnerpools",
    shortname = "rpool",
    status = "RunnerPoolStatus",
    namespaced,
    printcolumn = r#"{"name":"Organization","type":"string","jsonPath":".spec.organization"}"#,
    printcolumn = r#"{"name":"Min","type":"integer","jsonPath":".spec.minRunners"}"#,
    printcolumn = r#"{"name":"Max","type":"integer","jsonPath":".spec.maxRunners"}"#,
    printcolumn = r#"{"name":"Registered","type":"integer","jsonPath":".status.registeredRunners"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RunnerPoolSpec {
    /// Organization whose runner registrations this pool serves
    pub organization: String,

    /// Reference to the secret key holding the registration API credential
    pub token_ref: SecretKeyRef,

    /// Minimum number of registered runners to maintain
    pub min_runners: u32,

    /// Maximum number of registered runners to allow
    pub max_runners: u32,

    /// Pod template the provisioner stamps out for each runner
    pub pod_spec: PodSpec,
}

impl RunnerPoolSpec {
    /// Validate the pool specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.min_runners > self.max_runners {
            return Err(crate::Error::validation(format!(
                "minRunners ({}) exceeds maxRunners ({})",
                self.min_runners, self.max_runners
            )));
        }
        if self.organization.is_empty() {
            return Err(crate::Error::validation("organization must not be empty"));
        }
        Ok(())
    }
}

/// Status for a RunnerPool
///
/// Written back after each reconcile so operators can observe the last
/// decision without digging through logs. Counts reflect the state the
/// engine observed, not the state after its side effects landed.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunnerPoolStatus {
    /// Runners the registration service reported for the organization
    #[serde(default)]
    pub registered_runners: u32,

    /// Pods owned by this pool at observation time
    #[serde(default)]
    pub owned_pods: u32,

    /// Human-readable summary of the last reconcile decision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RunnerPoolStatus {
    /// Create a status carrying the observed counts
    pub fn observed(registered_runners: u32, owned_pods: u32) -> Self {
        Self {
            registered_runners,
            owned_pods,
            message: None,
        }
    }

    /// Set the message and return self for chaining
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }
}
