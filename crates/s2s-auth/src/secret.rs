//! Secret types for protecting credentials from accidental logging.
//!
//! Re-exports from the [`secrecy`] crate so dependents do not need a direct
//! `secrecy` dependency. The client secret and every acquired access token in
//! this crate are held as [`SecretString`]: `Debug` output is redacted, the
//! value is zeroized on drop, and reading it requires an explicit
//! [`ExposeSecret::expose_secret`] call at the point of use (the form body of
//! the token request and the `Authorization` header value).

pub use secrecy::{ExposeSecret, SecretString};
