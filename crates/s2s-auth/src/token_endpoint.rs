//! Client-credentials token exchange against the identity provider.
//!
//! One POST per call, no retries. Retry policy belongs to the caller, and the
//! broker's policy is to have none: the next call that observes a stale cache
//! triggers the next attempt.
//!
//! # Security
//!
//! The client secret crosses this boundary exactly once per request, inside
//! the form body. Rejection bodies are logged at `trace` level only and are
//! never part of an error message.

use crate::config::S2sClientConfig;
use crate::error::TokenError;
use crate::secret::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

/// Connection timeout for the HTTP client.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Form parameters of the client-credentials grant, captured once from
/// validated configuration.
#[derive(Clone)]
struct TokenRequestParams {
    client_id: String,
    client_secret: SecretString,
    scope: Option<String>,
}

/// OAuth 2.0 token response from the identity provider.
#[derive(Deserialize)]
pub struct TokenResponse {
    /// The bearer token value.
    pub access_token: SecretString,

    /// Token lifetime in seconds, relative to the moment of issue.
    pub expires_in: u64,

    #[allow(dead_code)]
    #[serde(default)]
    token_type: Option<String>,

    #[allow(dead_code)]
    #[serde(default)]
    scope: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish()
    }
}

/// HTTP client for the token endpoint. Cheap to clone.
#[derive(Clone)]
pub struct TokenEndpointClient {
    http: reqwest::Client,
    endpoint: String,
    params: TokenRequestParams,
}

impl TokenEndpointClient {
    /// Build a client from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn new(config: &S2sClientConfig) -> Result<Self, TokenError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TokenError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: config.token_endpoint.clone(),
            params: TokenRequestParams {
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
                scope: config.scope.clone(),
            },
        })
    }

    /// Perform one client-credentials exchange.
    ///
    /// # Errors
    ///
    /// - `TokenError::Http` - transport failure or request timeout
    /// - `TokenError::Endpoint` - any non-success status
    /// - `TokenError::Decode` - success status with an undecodable or empty
    ///   token body
    #[instrument(skip_all)]
    pub async fn fetch_token(&self) -> Result<TokenResponse, TokenError> {
        debug!(
            target: "s2s_auth.token_endpoint",
            client_id = %self.params.client_id,
            url = %self.endpoint,
            "Requesting token"
        );

        // scope is sent only when configured; an absent field and an absent
        // scope mean the same thing to the provider
        let mut form_body = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.params.client_id.as_str()),
            ("client_secret", self.params.client_secret.expose_secret()),
        ];
        if let Some(scope) = &self.params.scope {
            form_body.push(("scope", scope.as_str()));
        }

        let response = self
            .http
            .post(&self.endpoint)
            .form(&form_body)
            .send()
            .await
            .map_err(|e| {
                debug!(target: "s2s_auth.token_endpoint", error = %e, "HTTP request failed");
                TokenError::Http(e.to_string())
            })?;

        let status = response.status();

        if status.is_success() {
            let token_response: TokenResponse = response.json().await.map_err(|e| {
                warn!(
                    target: "s2s_auth.token_endpoint",
                    error = %e,
                    "Failed to parse token response"
                );
                TokenError::Decode(e.to_string())
            })?;

            if token_response.access_token.expose_secret().is_empty() {
                return Err(TokenError::Decode(
                    "Token response contained an empty access_token".to_string(),
                ));
            }

            debug!(
                target: "s2s_auth.token_endpoint",
                expires_in_secs = token_response.expires_in,
                "Token acquired successfully"
            );

            Ok(token_response)
        } else {
            // Read the body for diagnostics, but only log it at trace level
            // to avoid leaking sensitive information in production logs
            let body = response.text().await.unwrap_or_else(|e| {
                trace!(
                    target: "s2s_auth.token_endpoint",
                    error = %e,
                    "Failed to read error response body"
                );
                "<failed to read body>".to_string()
            });
            warn!(
                target: "s2s_auth.token_endpoint",
                status = %status,
                "Token endpoint rejected the request"
            );
            trace!(
                target: "s2s_auth.token_endpoint",
                body = %body,
                "Token endpoint rejection body"
            );
            Err(TokenError::Endpoint {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN_PATH: &str = "/realms/platform/protocol/openid-connect/token";

    fn test_config(base_url: &str) -> S2sClientConfig {
        S2sClientConfig::new(
            format!("{base_url}{TOKEN_PATH}"),
            "test-client".to_string(),
            SecretString::from("test-secret"),
        )
    }

    fn token_body(token: &str, expires_in: u64) -> serde_json::Value {
        serde_json::json!({
            "access_token": token,
            "token_type": "Bearer",
            "expires_in": expires_in
        })
    }

    #[tokio::test]
    async fn test_fetch_token_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(header(
                "content-type",
                "application/x-www-form-urlencoded",
            ))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=test-client"))
            .and(body_string_contains("client_secret=test-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("abc", 3600)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = TokenEndpointClient::new(&test_config(&mock_server.uri())).unwrap();
        let response = client.fetch_token().await.expect("fetch should succeed");

        assert_eq!(response.access_token.expose_secret(), "abc");
        assert_eq!(response.expires_in, 3600);
    }

    #[tokio::test]
    async fn test_fetch_token_sends_scope_when_configured() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("scope=orders%3Awrite"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("abc", 3600)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let config = test_config(&mock_server.uri()).with_scope("orders:write".to_string());
        let client = TokenEndpointClient::new(&config).unwrap();

        client.fetch_token().await.expect("fetch should succeed");
    }

    #[tokio::test]
    async fn test_fetch_token_omits_scope_when_absent() {
        let mock_server = MockServer::start().await;

        // A request carrying any scope field must not be observed
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("scope"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("abc", 3600)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = TokenEndpointClient::new(&test_config(&mock_server.uri())).unwrap();
        client.fetch_token().await.expect("fetch should succeed");
    }

    #[tokio::test]
    async fn test_fetch_token_401_is_endpoint_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(
                ResponseTemplate::new(401).set_body_string(r#"{"error": "invalid_client"}"#),
            )
            .mount(&mock_server)
            .await;

        let client = TokenEndpointClient::new(&test_config(&mock_server.uri())).unwrap();
        let err = client.fetch_token().await.expect_err("fetch should fail");

        assert!(matches!(
            &err,
            TokenError::Endpoint { status: 401, body } if body.contains("invalid_client")
        ));
        // The body stays out of the displayed message
        assert!(!err.to_string().contains("invalid_client"));
    }

    #[tokio::test]
    async fn test_fetch_token_503_is_endpoint_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let client = TokenEndpointClient::new(&test_config(&mock_server.uri())).unwrap();
        let err = client.fetch_token().await.expect_err("fetch should fail");

        assert!(matches!(err, TokenError::Endpoint { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_fetch_token_invalid_json_is_decode_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("not valid json at all"))
            .mount(&mock_server)
            .await;

        let client = TokenEndpointClient::new(&test_config(&mock_server.uri())).unwrap();
        let err = client.fetch_token().await.expect_err("fetch should fail");

        assert!(matches!(err, TokenError::Decode(_)));
    }

    #[tokio::test]
    async fn test_fetch_token_missing_access_token_is_decode_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .mount(&mock_server)
            .await;

        let client = TokenEndpointClient::new(&test_config(&mock_server.uri())).unwrap();
        let err = client.fetch_token().await.expect_err("fetch should fail");

        assert!(matches!(err, TokenError::Decode(_)));
    }

    #[tokio::test]
    async fn test_fetch_token_empty_access_token_is_decode_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("", 3600)))
            .mount(&mock_server)
            .await;

        let client = TokenEndpointClient::new(&test_config(&mock_server.uri())).unwrap();
        let err = client.fetch_token().await.expect_err("fetch should fail");

        assert!(matches!(err, TokenError::Decode(_)));
    }

    #[tokio::test]
    async fn test_fetch_token_missing_token_type_tolerated() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "abc",
                "expires_in": 120
            })))
            .mount(&mock_server)
            .await;

        let client = TokenEndpointClient::new(&test_config(&mock_server.uri())).unwrap();
        let response = client.fetch_token().await.expect("fetch should succeed");

        assert_eq!(response.access_token.expose_secret(), "abc");
    }

    #[tokio::test]
    async fn test_fetch_token_timeout_is_http_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_body("slow", 3600))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&mock_server)
            .await;

        let config = test_config(&mock_server.uri()).with_http_timeout(Duration::from_millis(100));
        let client = TokenEndpointClient::new(&config).unwrap();
        let err = client.fetch_token().await.expect_err("fetch should fail");

        assert!(matches!(err, TokenError::Http(_)));
    }

    #[test]
    fn test_token_response_debug_redacts_token() {
        let response = TokenResponse {
            access_token: SecretString::from("super-secret-access-token"),
            expires_in: 3600,
            token_type: Some("Bearer".to_string()),
            scope: None,
        };

        let debug_str = format!("{response:?}");
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("super-secret-access-token"));
        assert!(debug_str.contains("3600"));
    }
}
