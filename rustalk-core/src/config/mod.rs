//! Configuration management: JSON load/save for the digest-auth tunables.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main configuration structure. The teacher's `Config` carried `server`/
/// `sip`/`transport`/`database`/`teams` sections for the rest of the PBX;
/// none of that ambient surface belongs to a digest-auth-only crate, so
/// `auth` is the only section left.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub auth: AuthConfig,
}

/// Digest authentication tunables (RFC 2617 / RFC 7616).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub realm: String,
    /// `"MD5"` or `"SHA-256"`; parsed with `auth::HashAlgorithm::parse`.
    pub algorithm: String,
    /// Slot count of the nonce/nc replay table; `0` disables replay
    /// defense entirely (every request treated as stale).
    pub nonce_nc_table_size: usize,
    pub nonce_timeout_secs: u64,
    /// RFC 7616 requires case-insensitive `qop` matching; keep this `false`
    /// to stay bug-for-bug compatible with callers written against the
    /// legacy case-sensitive comparison.
    pub case_insensitive_qop: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            realm: "rustalk.local".to_string(),
            algorithm: "SHA-256".to_string(),
            nonce_nc_table_size: 4096,
            nonce_timeout_secs: 60,
            case_insensitive_qop: false,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth: AuthConfig::default(),
        }
    }
}
