//! Credential resolution from cluster secrets
//!
//! A RunnerPool names its registration API credential indirectly through a
//! `tokenRef` (secret name + key). Resolution is a pluggable capability so
//! tests can substitute a fixed token, and so a missing secret surfaces as a
//! configuration error rather than a crash.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};

#[cfg(test)]
use mockall::automock;

use crate::crd::SecretKeyRef;

/// Error type for credential resolution
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// The referenced secret does not exist
    #[error("secret {namespace}/{name} not found")]
    SecretNotFound {
        /// Namespace the secret was looked up in
        namespace: String,
        /// Name of the missing secret
        name: String,
    },

    /// The secret exists but the referenced key does not
    #[error("key {key} not found in secret {name}")]
    KeyNotFound {
        /// Name of the secret
        name: String,
        /// The missing key
        key: String,
    },

    /// The secret value is not valid UTF-8
    #[error("credential in {name}/{key} is not valid UTF-8")]
    Decode {
        /// Name of the secret
        name: String,
        /// Key whose value failed to decode
        key: String,
    },

    /// Secret lookup failed at the API level
    #[error("secret lookup failed: {0}")]
    Api(String),
}

/// Trait abstracting credential lookup for a pool
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Resolve the credential referenced by `secret_ref` in `namespace`
    async fn resolve(
        &self,
        namespace: &str,
        secret_ref: &SecretKeyRef,
    ) -> Result<String, CredentialError>;
}

/// Resolver reading credentials from Kubernetes secrets
///
/// The API server returns secret data base64-decoded into bytes; the only
/// decoding left here is bytes to UTF-8 text.
pub struct SecretCredentialResolver {
    client: Client,
}

impl SecretCredentialResolver {
    /// Create a resolver using the given Kubernetes client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialResolver for SecretCredentialResolver {
    async fn resolve(
        &self,
        namespace: &str,
        secret_ref: &SecretKeyRef,
    ) -> Result<String, CredentialError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);

        let secret = match secrets.get(&secret_ref.name).await {
            Ok(secret) => secret,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                return Err(CredentialError::SecretNotFound {
                    namespace: namespace.to_string(),
                    name: secret_ref.name.clone(),
                });
            }
            Err(e) => return Err(CredentialError::Api(e.to_string())),
        };

        credential_from_secret(&secret, secret_ref)
    }
}

/// Extract the referenced credential from a fetched secret
fn credential_from_secret(
    secret: &Secret,
    secret_ref: &SecretKeyRef,
) -> Result<String, CredentialError> {
    let value = secret
        .data
        .as_ref()
        .and_then(|data| data.get(&secret_ref.key))
        .ok_or_else(|| CredentialError::KeyNotFound {
            name: secret_ref.name.clone(),
            key: secret_ref.key.clone(),
        })?;

    String::from_utf8(value.0.clone()).map_err(|_| CredentialError::Decode {
        name: secret_ref.name.clone(),
        key: secret_ref.key.clone(),
    })
}
