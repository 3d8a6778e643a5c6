//! SIP/HTTP Digest Authentication (RFC 2617, RFC 7616).
//!
//! Implements server-side challenge emission and request verification for
//! REGISTER/INVITE authentication. The pipeline is split across six
//! submodules — [`hash`] (algorithm façade), [`nonce`] (codec + replay
//! table), [`unquote`] (RFC 7230 quoted-string parsing), [`digest`]
//! (HA1/HA2/response), [`verifier`] (the ordered verification gate) and
//! [`challenge`] (WWW-Authenticate emission) — and tied together here by
//! [`AuthManager`].

pub mod challenge;
pub mod digest;
pub mod hash;
pub mod nonce;
pub mod unquote;
pub mod verifier;

use std::time::{SystemTime, UNIX_EPOCH};

pub use digest::Credential;
pub use hash::HashAlgorithm;
pub use nonce::NonceNcTable;
pub use verifier::{AuthOutcome, LegacyOutcome, RawParam, RequestParams, RequestVerifier, VerificationContext, VerifierConfig};

/// Milliseconds since the Unix epoch, truncated to the nonce's 48-bit
/// field. Centralized here so tests are the only other place `SystemTime`
/// is touched in this module.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
        & nonce::TS_MASK
}

/// Split a SIP Request-URI of the form `sip:host;param=value;param2=value2`
/// into its bare URI and a `(key, value)` argument list, mirroring how the
/// HTTP path handles a `?`-delimited query string (§4.6 step 12). SIP has
/// no query string, so Request-URI parameters stand in for GET arguments.
pub fn sip_uri_and_args(raw: &str) -> (&str, Vec<(String, String)>) {
    let mut parts = raw.split(';');
    let uri = parts.next().unwrap_or(raw);
    let args = parts
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (p.to_string(), String::new()),
        })
        .collect();
    (uri, args)
}

/// Ties the nonce replay table, realm, seed and preferred algorithm
/// together behind the two operations a caller actually needs: mint a
/// challenge, verify a request.
pub struct AuthManager {
    realm: String,
    seed: Vec<u8>,
    algo: HashAlgorithm,
    table: NonceNcTable,
    nonce_timeout_secs: u64,
    verifier_config: VerifierConfig,
}

impl AuthManager {
    pub fn new(realm: impl Into<String>, seed: Vec<u8>, algo: HashAlgorithm, nonce_table_size: usize, nonce_timeout_secs: u64) -> Self {
        Self {
            realm: realm.into(),
            seed,
            algo,
            table: NonceNcTable::new(nonce_table_size),
            nonce_timeout_secs,
            verifier_config: VerifierConfig::default(),
        }
    }

    pub fn with_verifier_config(mut self, config: VerifierConfig) -> Self {
        self.verifier_config = config;
        self
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Mint and reserve a new challenge for `(method, uri)`, returning the
    /// `WWW-Authenticate` header value. `None` if the replay table has no
    /// capacity (`nonce_table_size == 0`) or a transient collision storm
    /// exhausts the retry budget.
    pub fn challenge(&self, method: &str, uri: &str, opaque: &str, stale: bool) -> Option<String> {
        challenge::emit_challenge(&self.table, &self.seed, &self.realm, opaque, stale, self.algo, method, uri, now_ms())
    }

    /// Verify one request's Authorization parameters against this realm.
    pub fn verify(
        &self,
        params: Option<&RequestParams>,
        ctx: &VerificationContext,
        username: &str,
        credential: Credential,
        unescape: impl Fn(&str) -> String,
    ) -> AuthOutcome {
        let verifier = RequestVerifier::new(&self.table, &self.seed, self.verifier_config);
        verifier.verify(
            params,
            ctx,
            &self.realm,
            username,
            credential,
            self.algo,
            self.nonce_timeout_secs,
            now_ms(),
            unescape,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sip_uri_and_args_splits_on_semicolon() {
        let (uri, args) = sip_uri_and_args("sip:example.com;transport=tcp;lr");
        assert_eq!(uri, "sip:example.com");
        assert_eq!(
            args,
            vec![
                ("transport".to_string(), "tcp".to_string()),
                ("lr".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn sip_uri_and_args_with_no_params() {
        let (uri, args) = sip_uri_and_args("sip:example.com");
        assert_eq!(uri, "sip:example.com");
        assert!(args.is_empty());
    }

    #[test]
    fn manager_challenge_then_verify_round_trips() {
        let manager = AuthManager::new("rustalk.local", b"daemon-seed".to_vec(), HashAlgorithm::Sha256, 64, 60);
        let method = "REGISTER";
        let uri = "sip:rustalk.local";

        let header = manager.challenge(method, uri, "op", false).expect("capacity available");
        let nonce_start = header.find("nonce=\"").unwrap() + "nonce=\"".len();
        let nonce = &header[nonce_start..header[nonce_start..].find('"').unwrap() + nonce_start];

        let username = "alice";
        let password = "secret123";
        let ha1 = digest::compute_ha1(HashAlgorithm::Sha256, username, manager.realm(), Credential::Password(password));
        let ha2 = digest::compute_ha2(HashAlgorithm::Sha256, method, uri.as_bytes());
        let response = digest::compute_response(
            HashAlgorithm::Sha256,
            &ha1,
            nonce,
            Some(b"00000001"),
            Some(b"xyz789"),
            Some(b"auth"),
            &ha2,
        );

        let params = RequestParams {
            username: Some(RawParam::new(username.as_bytes(), false)),
            realm: Some(RawParam::new(manager.realm().as_bytes(), false)),
            nonce: Some(RawParam::new(nonce.as_bytes(), false)),
            cnonce: Some(RawParam::new(b"xyz789", false)),
            qop: Some(RawParam::new(b"auth", false)),
            nc: Some(RawParam::new(b"00000001", false)),
            uri: Some(RawParam::new(uri.as_bytes(), false)),
            response: Some(RawParam::new(response.as_bytes(), false)),
            algorithm: None,
        };
        let get_args: Vec<(String, String)> = Vec::new();
        let ctx = VerificationContext {
            method,
            url: uri,
            get_arguments: &get_args,
        };

        let outcome = manager.verify(Some(&params), &ctx, username, Credential::Password(password), |s| s.to_string());
        assert_eq!(outcome, AuthOutcome::Ok);
        assert_eq!(outcome.legacy(), LegacyOutcome::Yes);
    }

    #[test]
    fn manager_replay_of_same_nc_is_invalid_nonce_legacy() {
        let manager = AuthManager::new("r", b"seed".to_vec(), HashAlgorithm::Md5, 8, 60);
        let method = "GET";
        let uri = "/x";
        let header = manager.challenge(method, uri, "op", false).unwrap();
        let nonce_start = header.find("nonce=\"").unwrap() + "nonce=\"".len();
        let nonce = &header[nonce_start..header[nonce_start..].find('"').unwrap() + nonce_start];

        let username = "u";
        let password = "p";
        let ha1 = digest::compute_ha1(HashAlgorithm::Md5, username, "r", Credential::Password(password));
        let ha2 = digest::compute_ha2(HashAlgorithm::Md5, method, uri.as_bytes());
        let response = digest::compute_response(HashAlgorithm::Md5, &ha1, nonce, Some(b"00000001"), Some(b"cn"), Some(b"auth"), &ha2);

        let params = RequestParams {
            username: Some(RawParam::new(username.as_bytes(), false)),
            realm: Some(RawParam::new(b"r", false)),
            nonce: Some(RawParam::new(nonce.as_bytes(), false)),
            cnonce: Some(RawParam::new(b"cn", false)),
            qop: Some(RawParam::new(b"auth", false)),
            nc: Some(RawParam::new(b"00000001", false)),
            uri: Some(RawParam::new(uri.as_bytes(), false)),
            response: Some(RawParam::new(response.as_bytes(), false)),
            algorithm: None,
        };
        let get_args: Vec<(String, String)> = Vec::new();
        let ctx = VerificationContext {
            method,
            url: uri,
            get_arguments: &get_args,
        };

        let first = manager.verify(Some(&params), &ctx, username, Credential::Password(password), |s| s.to_string());
        assert_eq!(first, AuthOutcome::Ok);
        let second = manager.verify(Some(&params), &ctx, username, Credential::Password(password), |s| s.to_string());
        assert_eq!(second.legacy(), LegacyOutcome::InvalidNonce);
    }
}
