//! Uniform façade over the digest algorithms used by HTTP/SIP Digest
//! Authentication: MD5 (RFC 2617) and SHA-256 (RFC 7616).

use sha2::Digest as ShaDigest;
use sha2::Sha256;

/// Digest algorithm tag. `AUTO` from the wire is resolved to `Sha256` at
/// parse time rather than carried as a third variant, since nothing
/// downstream needs to distinguish "explicitly SHA-256" from "auto".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Md5,
    Sha256,
}

impl HashAlgorithm {
    /// Output size of this algorithm's digest, in bytes.
    pub const fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha256 => 32,
        }
    }

    /// Nonce wire length: `2*D` hex chars of `H(A_nonce)` plus 12 hex chars
    /// of embedded timestamp.
    pub const fn nonce_len(self) -> usize {
        2 * self.digest_len() + 12
    }

    /// Wire token as printed in `algorithm=`.
    pub const fn as_str(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Sha256 => "SHA-256",
        }
    }

    /// Parse an `algorithm=` token. `None` input is `AUTO`, resolved to
    /// SHA-256. Returns `None` (unrecognized) for anything else, including
    /// `-sess` variants — callers must reject those explicitly rather than
    /// silently falling back to the non-session form (see `RequestVerifier`).
    pub fn parse(token: Option<&str>) -> Option<Self> {
        match token {
            None => Some(HashAlgorithm::Sha256),
            Some(t) if t.eq_ignore_ascii_case("MD5") => Some(HashAlgorithm::Md5),
            Some(t) if t.eq_ignore_ascii_case("SHA-256") || t.eq_ignore_ascii_case("SHA256") => {
                Some(HashAlgorithm::Sha256)
            }
            _ => None,
        }
    }

    /// Whether `token` names a `-sess` algorithm variant.
    pub fn is_session_variant(token: &str) -> bool {
        token.eq_ignore_ascii_case("MD5-sess") || token.eq_ignore_ascii_case("SHA-256-sess")
    }
}

/// One-shot streaming hash context. Tagged by variant rather than dispatched
/// through a vtable, keeping allocation and indirection off the verification
/// path (see DESIGN.md).
pub enum HashEngine {
    Md5(md5::Context),
    Sha256(Sha256),
}

impl HashEngine {
    pub fn new(algo: HashAlgorithm) -> Self {
        match algo {
            HashAlgorithm::Md5 => HashEngine::Md5(md5::Context::new()),
            HashAlgorithm::Sha256 => HashEngine::Sha256(Sha256::new()),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            HashEngine::Md5(ctx) => ctx.consume(bytes),
            HashEngine::Sha256(h) => ShaDigest::update(h, bytes),
        }
    }

    /// Consume the engine, producing the lowercase hex digest directly.
    pub fn finalize_hex(self) -> String {
        match self {
            HashEngine::Md5(ctx) => hex_encode(&ctx.compute().0),
            HashEngine::Sha256(h) => hex_encode(&ShaDigest::finalize(h)),
        }
    }
}

/// Lowercase hex encode, no separators.
pub fn hex_encode(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(DIGITS[(b >> 4) as usize] as char);
        out.push(DIGITS[(b & 0x0f) as usize] as char);
    }
    out
}

/// Parse a hex string (no `0x` prefix) into a `u64`. Used for the nonce's
/// embedded timestamp and the client's `nc` parameter.
pub fn hex_to_u64(s: &str) -> Option<u64> {
    if s.is_empty() || s.len() > 16 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(s, 16).ok()
}
