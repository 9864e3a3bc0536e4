//! Service-to-service authentication: OAuth 2.0 client-credentials token
//! brokering, outbound bearer-header interception, and the inbound
//! validation contract shared by receiving services.

#![warn(clippy::pedantic)]

/// Module for token error types
pub mod error;

/// Module for identity-provider and client-credential configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for the client-credentials token exchange
pub mod token_endpoint;

/// Module for the cached token broker with single-flight refresh
pub mod broker;

/// Module for the outbound request interceptor pipeline
pub mod interceptor;

/// Module for the inbound bearer validation contract
pub mod validation;
