//! RusTalk Core - HTTP/SIP Digest Access Authentication
//!
//! Server-side RFC 2617 / RFC 7616 Digest Authentication: challenge
//! issuance, response verification, and replay defense via a bounded
//! nonce/nonce-count table.

pub mod auth;
pub mod config;

pub use config::Config;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::auth::{AuthManager, AuthOutcome, Credential, HashAlgorithm, LegacyOutcome};
    pub use crate::config::{AuthConfig, Config};
}
