//! H(A1)/H(A2)/response computation per RFC 2617 §3.2.2 / RFC 7616 §3.4.

use super::hash::{hex_encode, HashAlgorithm, HashEngine};

/// How the server holds a user's credential.
pub enum Credential<'a> {
    /// Cleartext password; H(A1) is computed from it directly.
    Password(&'a str),
    /// Pre-computed `H(username:realm:password)`, stored binary. Just
    /// hex-encoded — no further hashing occurs on the verification path
    /// even for `-sess` algorithms (§9: the session variants are detected
    /// and rejected upstream in `RequestVerifier`, never silently computed
    /// here).
    PreHashed(&'a [u8]),
}

/// Compute H(A1) for the given credential form.
pub fn compute_ha1(algo: HashAlgorithm, username: &str, realm: &str, credential: Credential) -> String {
    match credential {
        Credential::Password(password) => {
            let mut h = HashEngine::new(algo);
            h.update(username.as_bytes());
            h.update(b":");
            h.update(realm.as_bytes());
            h.update(b":");
            h.update(password.as_bytes());
            h.finalize_hex()
        }
        Credential::PreHashed(bytes) => hex_encode(bytes),
    }
}

/// Compute H(A2) = H(method ":" uri). Only `qop=auth` and empty qop are
/// supported by this path; `auth-int` is rejected upstream.
pub fn compute_ha2(algo: HashAlgorithm, method: &str, uri: &[u8]) -> String {
    let mut h = HashEngine::new(algo);
    h.update(method.as_bytes());
    h.update(b":");
    h.update(uri);
    h.finalize_hex()
}

/// Compute the final `response` value. When `qop`/`nc`/`cnonce` are all
/// `Some`, uses the qop-extended form; otherwise the legacy RFC 2069 form.
pub fn compute_response(
    algo: HashAlgorithm,
    ha1: &str,
    nonce: &str,
    nc: Option<&[u8]>,
    cnonce: Option<&[u8]>,
    qop: Option<&[u8]>,
    ha2: &str,
) -> String {
    let mut h = HashEngine::new(algo);
    h.update(ha1.as_bytes());
    h.update(b":");
    h.update(nonce.as_bytes());
    h.update(b":");
    if let (Some(nc), Some(cnonce), Some(qop)) = (nc, cnonce, qop) {
        h.update(nc);
        h.update(b":");
        h.update(cnonce);
        h.update(b":");
        h.update(qop);
        h.update(b":");
    }
    h.update(ha2.as_bytes());
    h.finalize_hex()
}
