//! Supporting types for the RunnerPool CRD

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a single key inside a namespaced secret
///
/// The referenced value is the API credential used to query runner
/// registrations for the pool's organization. The secret must live in the
/// same namespace as the RunnerPool.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    /// Name of the secret
    pub name: String,

    /// Key within the secret holding the credential
    pub key: String,
}

impl std::fmt::Display for SecretKeyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.name, self.key)
    }
}
