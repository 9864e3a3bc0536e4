//! Inbound bearer validation contract.
//!
//! This crate issues tokens for outbound calls; verifying them on the
//! receiving side is the receiver's job. This module pins down what that
//! verification must enforce so both sides agree: issuer, audience, token
//! lifetime, and a signature checked against keys discovered at the
//! identity provider's metadata URL, plus the claim names identity is mapped
//! from. It deliberately contains no JWT machinery; receiving services bring
//! their own and implement [`BearerValidator`] against this contract.

use crate::config::IdentityProviderConfig;
use async_trait::async_trait;
use thiserror::Error;

/// Claim carrying the authenticated username.
pub const USERNAME_CLAIM: &str = "preferred_username";

/// Claim carrying the role list.
pub const ROLES_CLAIM: &str = "roles";

/// What a receiving service must enforce for inbound bearer tokens.
///
/// Every field is a mandatory check: a validator that skips the issuer,
/// audience, lifetime, or signature comparison does not implement this
/// contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerValidationSpec {
    /// Exact issuer expected in the token.
    pub issuer: String,

    /// Audience the token must be scoped to.
    pub audience: String,

    /// Discovery document URL to obtain signing keys from.
    pub metadata_url: String,

    /// Whether key discovery must happen over HTTPS.
    pub require_https_metadata: bool,

    /// Claim the username is read from.
    pub username_claim: &'static str,

    /// Claim the role list is read from.
    pub roles_claim: &'static str,
}

impl BearerValidationSpec {
    /// Derive the validation spec from identity-provider configuration.
    #[must_use]
    pub fn from_config(config: &IdentityProviderConfig) -> Self {
        Self {
            issuer: config.issuer(),
            audience: config.audience.clone(),
            metadata_url: config.metadata_url(),
            require_https_metadata: config.require_https_metadata,
            username_claim: USERNAME_CLAIM,
            roles_claim: ROLES_CLAIM,
        }
    }
}

/// Identity mapped out of a validated token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPrincipal {
    /// Value of the username claim.
    pub username: String,

    /// Values of the roles claim.
    pub roles: Vec<String>,
}

/// Validation failures, kept deliberately coarse.
///
/// Receivers should not tell callers which check failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Token rejected (bad signature, issuer, audience, or lifetime).
    #[error("Invalid bearer token")]
    InvalidToken,

    /// Token accepted but a claim the contract requires is absent.
    #[error("Missing required claim: {0}")]
    MissingClaim(&'static str),
}

/// Interface a receiving service implements to enforce
/// [`BearerValidationSpec`].
#[async_trait]
pub trait BearerValidator: Send + Sync {
    /// Validate a raw bearer token and map its identity claims.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` when any mandatory check fails or an
    /// identity claim is missing.
    async fn validate(&self, token: &str) -> Result<ValidatedPrincipal, ValidationError>;
}

/// Extract the token from an `Authorization` header value.
///
/// Returns `None` unless the value uses the `Bearer` scheme.
#[must_use]
pub fn bearer_from_header(value: &str) -> Option<&str> {
    value.strip_prefix("Bearer ")
}
