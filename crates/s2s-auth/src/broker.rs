//! Cached service-token broker with single-flight refresh.
//!
//! # Features
//!
//! - Lock-free reads: the current token is an immutable snapshot behind an
//!   atomically swapped reference
//! - Single-flight refresh: callers that observe a stale cache while a
//!   refresh is in flight join that refresh and share its outcome
//! - Detached refresh: the refresh runs on its own task, so a waiter that
//!   times out or is dropped never cancels a refresh other callers share
//! - No retry, no backoff: a failed refresh is reported to every waiter of
//!   that episode and the cache keeps its previous state; the next call that
//!   observes staleness starts the next attempt
//!
//! Requires a Tokio runtime (the refresh task is spawned).
//!
//! # Example
//!
//! ```rust,ignore
//! use s2s_auth::broker::TokenBroker;
//! use s2s_auth::config::S2sClientConfig;
//! use s2s_auth::secret::{ExposeSecret, SecretString};
//!
//! let config = S2sClientConfig::new_secure(
//!     "https://idp.example.com/realms/platform/protocol/openid-connect/token".to_string(),
//!     "orders-service".to_string(),
//!     SecretString::from("secret"),
//! )?;
//!
//! let broker = TokenBroker::new(&config)?;
//! let token = broker.get_token().await?;
//! let header = format!("Bearer {}", token.token().expose_secret());
//! ```
//!
//! # Security
//!
//! - Token values are `SecretString`s and never logged
//! - Refresh lifecycle events are logged without values
//!
//! Known sharp edge: with no backoff, a provider outage means every call
//! that observes staleness issues one probe request. Callers that need
//! smoothing must rate-limit their own retries.

use crate::config::S2sClientConfig;
use crate::error::TokenError;
use crate::secret::SecretString;
use crate::token_endpoint::{TokenEndpointClient, TokenResponse};
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, trace, warn};

/// Outcome of one refresh episode, shared by all of its waiters.
type RefreshOutcome = Result<Arc<AccessToken>, TokenError>;

/// Watch side of an in-flight refresh episode. Holds `None` until the
/// episode resolves.
type RefreshWatch = watch::Receiver<Option<RefreshOutcome>>;

// =============================================================================
// Access Token
// =============================================================================

/// An acquired bearer token and its absolute expiry.
///
/// Snapshots are immutable; the broker replaces the whole value on refresh
/// and never mutates one in place.
#[derive(Clone)]
pub struct AccessToken {
    token: SecretString,
    expires_at: i64,
}

impl AccessToken {
    fn from_response(response: TokenResponse, now: i64) -> Self {
        #[allow(clippy::cast_possible_wrap)]
        let expires_at = now + response.expires_in as i64;
        Self {
            token: response.access_token,
            expires_at,
        }
    }

    /// The token value.
    #[must_use]
    pub fn token(&self) -> &SecretString {
        &self.token
    }

    /// Expiry as a Unix timestamp in seconds.
    #[must_use]
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// Whether the token is still usable at `now`, i.e. not yet within
    /// `threshold_secs` of its expiry.
    #[must_use]
    pub fn is_fresh_at(&self, now: i64, threshold_secs: i64) -> bool {
        now < self.expires_at - threshold_secs
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// =============================================================================
// Token Broker
// =============================================================================

struct Inner {
    endpoint: TokenEndpointClient,
    client_id: String,
    refresh_threshold_secs: i64,
    /// Current token snapshot; `None` until the first successful refresh.
    current: ArcSwapOption<AccessToken>,
    /// In-flight refresh episode, if any. Held only to inspect or install
    /// an episode, never across network I/O.
    inflight: Mutex<Option<RefreshWatch>>,
}

/// Broker for service tokens. Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct TokenBroker {
    inner: Arc<Inner>,
}

impl TokenBroker {
    /// Build a broker from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn new(config: &S2sClientConfig) -> Result<Self, TokenError> {
        let endpoint = TokenEndpointClient::new(config)?;
        #[allow(clippy::cast_possible_wrap)]
        let refresh_threshold_secs = config.refresh_threshold.as_secs() as i64;
        Ok(Self {
            inner: Arc::new(Inner {
                endpoint,
                client_id: config.client_id.clone(),
                refresh_threshold_secs,
                current: ArcSwapOption::empty(),
                inflight: Mutex::new(None),
            }),
        })
    }

    /// Get a usable token, refreshing if necessary.
    ///
    /// A fresh cached token is returned without taking any lock. Otherwise
    /// the caller joins the in-flight refresh episode, starting one if none
    /// exists, and receives that episode's outcome: the same token or the
    /// same error as every other waiter.
    ///
    /// The wait is unbounded; use [`TokenBroker::get_token_with_timeout`] to
    /// bound it. Dropping the returned future abandons only this caller's
    /// wait, never the refresh itself.
    ///
    /// # Errors
    ///
    /// - `TokenError::Endpoint` - identity provider rejected the refresh
    /// - `TokenError::Decode` - refresh response could not be decoded
    /// - `TokenError::Http` - transport failure during the refresh
    /// - `TokenError::ChannelClosed` - refresh task stopped without reporting
    pub async fn get_token(&self) -> Result<Arc<AccessToken>, TokenError> {
        let now = chrono::Utc::now().timestamp();
        if let Some(token) = self.fresh_snapshot(now) {
            trace!(target: "s2s_auth.broker", "Returning cached token");
            return Ok(token);
        }

        let mut rx = {
            let mut slot = self.inner.inflight.lock().await;

            // Re-check under the lock: an episode that just finished may
            // have published a fresh snapshot while we were waiting.
            let now = chrono::Utc::now().timestamp();
            if let Some(token) = self.fresh_snapshot(now) {
                return Ok(token);
            }

            match slot.as_ref() {
                Some(rx) => rx.clone(),
                None => {
                    let rx = self.spawn_refresh();
                    *slot = Some(rx.clone());
                    rx
                }
            }
        };

        loop {
            let outcome = rx.borrow_and_update().clone();
            if let Some(outcome) = outcome {
                return outcome;
            }
            if rx.changed().await.is_err() {
                // The refresh task was dropped without reporting (its runtime
                // shut down). It can no longer clear the slot itself, so do
                // it here or every later call would join the dead episode.
                self.clear_dead_episode(&rx).await;
                return Err(TokenError::ChannelClosed);
            }
        }
    }

    /// Remove `rx`'s episode from the in-flight slot, unless a newer episode
    /// has already replaced it.
    async fn clear_dead_episode(&self, rx: &RefreshWatch) {
        let mut slot = self.inner.inflight.lock().await;
        if slot.as_ref().is_some_and(|current| current.same_channel(rx)) {
            warn!(
                target: "s2s_auth.broker",
                client_id = %self.inner.client_id,
                "Refresh task stopped without reporting; clearing its episode"
            );
            *slot = None;
        }
    }

    /// Get a usable token, waiting at most `wait`.
    ///
    /// The deadline bounds only this caller. A refresh shared with other
    /// waiters keeps running after this caller gives up, and its result is
    /// still published to the cache.
    ///
    /// # Errors
    ///
    /// As [`TokenBroker::get_token`], plus `TokenError::DeadlineExceeded`
    /// when `wait` elapses first.
    pub async fn get_token_with_timeout(
        &self,
        wait: Duration,
    ) -> Result<Arc<AccessToken>, TokenError> {
        tokio::time::timeout(wait, self.get_token())
            .await
            .map_err(|_| TokenError::DeadlineExceeded)?
    }

    /// The currently cached token, regardless of freshness.
    ///
    /// `None` until the first successful refresh. A failed refresh never
    /// alters this value.
    #[must_use]
    pub fn cached_token(&self) -> Option<Arc<AccessToken>> {
        self.inner.current.load_full()
    }

    fn fresh_snapshot(&self, now: i64) -> Option<Arc<AccessToken>> {
        self.inner
            .current
            .load_full()
            .filter(|token| token.is_fresh_at(now, self.inner.refresh_threshold_secs))
    }

    /// Start a refresh episode on a detached task and return its watch.
    ///
    /// Must be called with the `inflight` lock held so only one episode can
    /// be installed at a time.
    fn spawn_refresh(&self) -> RefreshWatch {
        let (tx, rx) = watch::channel(None);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = refresh_once(&inner).await;

            // Clear the slot before broadcasting so a caller arriving after
            // this episode starts a new one instead of reading a finished
            // episode's error.
            {
                let mut slot = inner.inflight.lock().await;
                *slot = None;
            }

            // All waiters may have given up already; the snapshot is
            // published either way.
            let _ = tx.send(Some(outcome));
        });
        rx
    }
}

impl std::fmt::Debug for TokenBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBroker")
            .field("client_id", &self.inner.client_id)
            .field("refresh_threshold_secs", &self.inner.refresh_threshold_secs)
            .finish()
    }
}

/// Perform exactly one refresh and publish the snapshot on success.
///
/// A failure leaves the cached snapshot untouched.
#[instrument(skip_all)]
async fn refresh_once(inner: &Inner) -> RefreshOutcome {
    debug!(
        target: "s2s_auth.broker",
        client_id = %inner.client_id,
        "Refreshing service token"
    );

    match inner.endpoint.fetch_token().await {
        Ok(response) => {
            let now = chrono::Utc::now().timestamp();
            let token = Arc::new(AccessToken::from_response(response, now));
            let initial = inner.current.load().is_none();
            inner.current.store(Some(Arc::clone(&token)));

            if initial {
                info!(
                    target: "s2s_auth.broker",
                    client_id = %inner.client_id,
                    expires_at = token.expires_at(),
                    "Initial service token acquired"
                );
            } else {
                debug!(
                    target: "s2s_auth.broker",
                    client_id = %inner.client_id,
                    expires_at = token.expires_at(),
                    "Service token refreshed"
                );
            }

            Ok(token)
        }
        Err(e) => {
            warn!(
                target: "s2s_auth.broker",
                client_id = %inner.client_id,
                error = %e,
                "Service token refresh failed"
            );
            Err(e)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
