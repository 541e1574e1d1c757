//! Typed client for the runner registration API
//!
//! The engine asks the registration service for a fresh point-in-time view of
//! the runners registered for an organization on every reconcile. Snapshots
//! are never cached across reconciles: a stale demand signal risks
//! double-provisioning, so the only source of truth is the live response.
//!
//! The client is a pure read with no built-in retries; the queue-driven
//! resync is the retry mechanism.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// Page size requested from the registration API
const PER_PAGE: usize = 100;

/// Default registration API endpoint
const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// Error type for registration API operations
///
/// A zero-runner snapshot is a valid, common state and is never an error.
/// Authentication failures and transport failures are distinct kinds so the
/// caller can tell a bad credential from a flaky network.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    /// Transport-level failure (connection, DNS, timeout)
    #[error("registration request failed: {0}")]
    Http(String),

    /// Credential rejected by the registration service
    #[error("registration auth failed with status {status}")]
    Auth {
        /// HTTP status returned (401 or 403)
        status: u16,
    },

    /// Non-auth error status from the registration service
    #[error("registration API returned status {status}")]
    Api {
        /// HTTP status returned
        status: u16,
    },

    /// Response body could not be decoded
    #[error("invalid registration response: {0}")]
    Decode(String),
}

/// A single registered runner as reported by the registration service
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Runner {
    /// Registration id
    pub id: u64,
    /// Runner name (self-reported at registration)
    pub name: String,
    /// Operating system label
    pub os: String,
    /// Registration status (online, offline, busy, idle, ...)
    pub status: String,
}

impl Runner {
    /// Returns true if the runner is reported online
    pub fn is_online(&self) -> bool {
        self.status == "online"
    }

    /// Returns true if the runner is reported offline
    pub fn is_offline(&self) -> bool {
        self.status == "offline"
    }

    /// Returns true if the runner is currently executing a job
    pub fn is_busy(&self) -> bool {
        self.status == "busy"
    }
}

/// Point-in-time snapshot of runner registrations for one organization
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct RunnerRegistrations {
    /// Total registrations as counted by the service
    pub total_count: u32,
    /// The registered runners, in service order
    pub runners: Vec<Runner>,
}

/// Trait abstracting the registration service read
///
/// This trait allows mocking the registration API in tests while using
/// the real HTTP client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RegistrationClient: Send + Sync {
    /// Fetch the current registration snapshot for an organization
    ///
    /// # Arguments
    ///
    /// * `token` - API credential resolved from the pool's token reference
    /// * `organization` - Organization scope to list runners for
    async fn list_runners(
        &self,
        token: &str,
        organization: &str,
    ) -> Result<RunnerRegistrations, RegistrationError>;
}

/// Registration client backed by the GitHub Actions runner API
pub struct GithubRunnerApi {
    http: reqwest::Client,
    base_url: String,
}

impl GithubRunnerApi {
    /// Create a client against the public API endpoint
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Create a client against a custom endpoint (GitHub Enterprise, tests)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for GithubRunnerApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistrationClient for GithubRunnerApi {
    async fn list_runners(
        &self,
        token: &str,
        organization: &str,
    ) -> Result<RunnerRegistrations, RegistrationError> {
        let url = format!("{}/orgs/{}/actions/runners", self.base_url, organization);
        let mut all = Vec::new();
        let mut total_count = 0;
        let mut page = 1usize;

        loop {
            let response = self
                .http
                .get(&url)
                .query(&[("per_page", PER_PAGE.to_string()), ("page", page.to_string())])
                .header(AUTHORIZATION, format!("token {token}"))
                .header(ACCEPT, "application/vnd.github.v3+json")
                .send()
                .await
                .map_err(|e| RegistrationError::Http(e.to_string()))?;

            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(RegistrationError::Auth {
                    status: status.as_u16(),
                });
            }
            if !status.is_success() {
                return Err(RegistrationError::Api {
                    status: status.as_u16(),
                });
            }

            let body: RunnerRegistrations = response
                .json()
                .await
                .map_err(|e| RegistrationError::Decode(e.to_string()))?;

            total_count = body.total_count;
            let fetched = body.runners.len();
            all.extend(body.runners);

            if fetched < PER_PAGE || all.len() >= total_count as usize {
                break;
            }
            page += 1;
        }

        debug!(
            organization,
            total_count,
            fetched = all.len(),
            "listed runner registrations"
        );

        Ok(RunnerRegistrations {
            total_count,
            runners: all,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn runner_json(id: u64, status: &str) -> serde_json::Value {
        json!({"id": id, "name": format!("runner-{id}"), "os": "linux", "status": status})
    }

    #[tokio::test]
    async fn empty_snapshot_is_a_valid_state_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orgs/acme/actions/runners"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"total_count": 0, "runners": []})),
            )
            .mount(&server)
            .await;

        let api = GithubRunnerApi::with_base_url(server.uri());
        let snapshot = api.list_runners("tok", "acme").await.unwrap();
        assert_eq!(snapshot.total_count, 0);
        assert!(snapshot.runners.is_empty());
    }

    #[tokio::test]
    async fn sends_token_auth_and_json_accept_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orgs/acme/actions/runners"))
            .and(header("authorization", "token s3cret"))
            .and(header("accept", "application/vnd.github.v3+json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 1,
                "runners": [runner_json(7, "online")]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = GithubRunnerApi::with_base_url(server.uri());
        let snapshot = api.list_runners("s3cret", "acme").await.unwrap();
        assert_eq!(snapshot.total_count, 1);
        assert_eq!(snapshot.runners[0].name, "runner-7");
        assert!(snapshot.runners[0].is_online());
    }

    #[tokio::test]
    async fn unauthorized_is_reported_as_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orgs/acme/actions/runners"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let api = GithubRunnerApi::with_base_url(server.uri());
        let err = api.list_runners("bad", "acme").await.unwrap_err();
        assert!(matches!(err, RegistrationError::Auth { status: 401 }));
    }

    #[tokio::test]
    async fn server_error_is_reported_as_api_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orgs/acme/actions/runners"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let api = GithubRunnerApi::with_base_url(server.uri());
        let err = api.list_runners("tok", "acme").await.unwrap_err();
        assert!(matches!(err, RegistrationError::Api { status: 500 }));
    }

    #[tokio::test]
    async fn malformed_body_is_reported_as_decode_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orgs/acme/actions/runners"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let api = GithubRunnerApi::with_base_url(server.uri());
        let err = api.list_runners("tok", "acme").await.unwrap_err();
        assert!(matches!(err, RegistrationError::Decode(_)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_reported_as_http_failure() {
        // Port 1 is never listening
        let api = GithubRunnerApi::with_base_url("http://127.0.0.1:1");
        let err = api.list_runners("tok", "acme").await.unwrap_err();
        assert!(matches!(err, RegistrationError::Http(_)));
    }

    #[tokio::test]
    async fn follows_pagination_until_the_snapshot_is_complete() {
        let server = MockServer::start().await;
        let first_page: Vec<_> = (0..100).map(|i| runner_json(i, "idle")).collect();
        let second_page: Vec<_> = (100..130).map(|i| runner_json(i, "idle")).collect();

        Mock::given(method("GET"))
            .and(path("/orgs/acme/actions/runners"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 130,
                "runners": first_page
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/orgs/acme/actions/runners"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 130,
                "runners": second_page
            })))
            .mount(&server)
            .await;

        let api = GithubRunnerApi::with_base_url(server.uri());
        let snapshot = api.list_runners("tok", "acme").await.unwrap();
        assert_eq!(snapshot.total_count, 130);
        assert_eq!(snapshot.runners.len(), 130);
        assert_eq!(snapshot.runners[129].id, 129);
    }

    #[test]
    fn runner_status_helpers() {
        let runner: Runner =
            serde_json::from_value(runner_json(1, "busy")).unwrap();
        assert!(runner.is_busy());
        assert!(!runner.is_online());
        assert!(!runner.is_offline());
    }
}
