//! Error types for the Paddock operator

use thiserror::Error;

use crate::credentials::CredentialError;
use crate::registration::RegistrationError;

/// Main error type for Paddock operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error for RunnerPool specs
    #[error("validation error: {0}")]
    Validation(String),

    /// Credential resolution error
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Runner registration API error
    #[error("registration error: {0}")]
    Registration(#[from] RegistrationError),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_carry_their_message() {
        let err = Error::validation("minRunners (5) exceeds maxRunners (2)");
        assert!(err.to_string().contains("validation error"));
        assert!(err.to_string().contains("exceeds maxRunners"));
    }

    #[test]
    fn credential_errors_convert_into_the_crate_error() {
        let err: Error = CredentialError::SecretNotFound {
            name: "gh-token".into(),
            namespace: "ci".into(),
        }
        .into();
        assert!(matches!(err, Error::Credential(_)));
        assert!(err.to_string().contains("gh-token"));
    }

    #[test]
    fn registration_errors_convert_into_the_crate_error() {
        let err: Error = RegistrationError::Auth { status: 401 }.into();
        assert!(matches!(err, Error::Registration(_)));
        assert!(err.to_string().contains("401"));
    }
}
