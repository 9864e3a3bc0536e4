//! Outbound request interception.
//!
//! An [`S2sClient`] wraps a `reqwest::Client` with an ordered list of
//! transforms applied to each request before dispatch. The one transform
//! shipped here is [`AuthHeaderInterceptor`], which attaches the broker's
//! bearer token; the trait seam lets services add their own (correlation
//! headers, API version pins) without a middleware framework.
//!
//! A request whose interception fails is never sent.

use crate::broker::TokenBroker;
use crate::error::TokenError;
use crate::secret::ExposeSecret;
use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Boxed error type for interceptor implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from the intercepted send path.
#[derive(Error, Debug)]
pub enum SendError {
    /// An interceptor refused the request; it was not sent.
    #[error("Request interception failed: {0}")]
    Intercept(#[source] BoxError),

    /// Transport-level failure after interception.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// A transform applied to an outbound request before it is dispatched.
#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    /// Inspect or modify the request.
    ///
    /// # Errors
    ///
    /// Returning an error aborts the send; the request is never dispatched.
    async fn intercept(&self, request: &mut reqwest::Request) -> Result<(), BoxError>;
}

/// Attaches `Authorization: Bearer <token>` obtained from a [`TokenBroker`].
///
/// The header is overwritten, never appended: after this interceptor runs,
/// exactly one authorization header is present regardless of what the
/// request carried before.
#[derive(Clone)]
pub struct AuthHeaderInterceptor {
    broker: TokenBroker,
}

impl AuthHeaderInterceptor {
    /// Create an interceptor backed by `broker`.
    #[must_use]
    pub fn new(broker: TokenBroker) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl RequestInterceptor for AuthHeaderInterceptor {
    async fn intercept(&self, request: &mut reqwest::Request) -> Result<(), BoxError> {
        let token = self.broker.get_token().await?;

        let mut value =
            HeaderValue::from_str(&format!("Bearer {}", token.token().expose_secret()))
                .map_err(|_| TokenError::Decode("Token is not a valid header value".to_string()))?;
        value.set_sensitive(true);

        // insert() drops every previous value for the name, so exactly one
        // authorization header leaves this interceptor
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }
}

/// HTTP client wrapper that runs interceptors before dispatch.
#[derive(Clone)]
pub struct S2sClient {
    http: reqwest::Client,
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
}

impl S2sClient {
    /// Wrap an existing `reqwest` client. No interceptors are installed.
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            interceptors: Vec::new(),
        }
    }

    /// Append an interceptor. Interceptors run in the order they were added.
    #[must_use]
    pub fn with_interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Append the bearer-auth interceptor for `broker`.
    #[must_use]
    pub fn with_bearer_auth(self, broker: TokenBroker) -> Self {
        self.with_interceptor(Arc::new(AuthHeaderInterceptor::new(broker)))
    }

    /// The underlying client, for building requests.
    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Run every interceptor on `request`, then dispatch it.
    ///
    /// # Errors
    ///
    /// - `SendError::Intercept` - an interceptor refused; the request was
    ///   never sent
    /// - `SendError::Transport` - connection-level failure during dispatch
    pub async fn execute(
        &self,
        mut request: reqwest::Request,
    ) -> Result<reqwest::Response, SendError> {
        for interceptor in &self.interceptors {
            if let Err(e) = interceptor.intercept(&mut request).await {
                warn!(
                    target: "s2s_auth.interceptor",
                    error = %e,
                    "Aborting request before dispatch"
                );
                return Err(SendError::Intercept(e));
            }
        }

        let response = self.http.execute(request).await?;
        Ok(response)
    }
}

impl std::fmt::Debug for S2sClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S2sClient")
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}
