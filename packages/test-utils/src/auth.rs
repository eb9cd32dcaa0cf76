//! Mock channel-authorization endpoint
//!
//! Wraps a [`wiremock::MockServer`] with convenience methods for the
//! grant shapes the authorization wire contract allows, plus denial and
//! malformed-body scenarios.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the mock endpoint listens on
const AUTH_PATH: &str = "/broker/auth";

/// Mock authorization endpoint for subscription tests
///
/// # Example
///
/// ```rust,ignore
/// let auth = MockAuthServer::start().await;
/// auth.mock_grant("key:sig").await;
///
/// // Point BrokerConfig's auth endpoint at auth.url()
/// ```
pub struct MockAuthServer {
    server: MockServer,
}

impl MockAuthServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Full URL of the authorization endpoint
    pub fn url(&self) -> String {
        format!("{}{}", self.server.uri(), AUTH_PATH)
    }

    /// The wrapped server, for tests that need custom matchers
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Grant every request with the given signature
    pub async fn mock_grant(&self, auth: &str) {
        Mock::given(method("POST"))
            .and(path(AUTH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "auth": auth })))
            .mount(&self.server)
            .await;
    }

    /// Grant only the next `n` requests; later requests fall through to
    /// whatever is mounted after this
    pub async fn mock_grant_times(&self, auth: &str, n: u64) {
        Mock::given(method("POST"))
            .and(path(AUTH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "auth": auth })))
            .up_to_n_times(n)
            .mount(&self.server)
            .await;
    }

    /// Grant with presence member info attached
    pub async fn mock_presence_grant(&self, auth: &str, channel_data: &str) {
        Mock::given(method("POST"))
            .and(path(AUTH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "auth": auth,
                "channel_data": channel_data,
            })))
            .mount(&self.server)
            .await;
    }

    /// Grant wrapped in the `{code, data}` response envelope
    pub async fn mock_enveloped_grant(&self, auth: &str) {
        Mock::given(method("POST"))
            .and(path(AUTH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": { "auth": auth },
            })))
            .mount(&self.server)
            .await;
    }

    /// Deny every request with the given status
    pub async fn mock_denied(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path(AUTH_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Deny only the next `n` requests
    pub async fn mock_denied_times(&self, status: u16, n: u64) {
        Mock::given(method("POST"))
            .and(path(AUTH_PATH))
            .respond_with(ResponseTemplate::new(status))
            .up_to_n_times(n)
            .mount(&self.server)
            .await;
    }

    /// Answer 2xx with a body that carries no auth signature
    pub async fn mock_malformed(&self) {
        Mock::given(method("POST"))
            .and(path(AUTH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0 })))
            .mount(&self.server)
            .await;
    }

    /// Grant after a delay, for timeout tests
    pub async fn mock_delayed_grant(&self, auth: &str, delay: Duration) {
        Mock::given(method("POST"))
            .and(path(AUTH_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "auth": auth }))
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }
}
