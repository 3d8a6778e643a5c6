//! The request verification state machine: pulls parsed Authorization
//! parameters, validates each field in a fixed order, consults the
//! `NonceNcTable`, recomputes the expected response, and classifies the
//! outcome.

use subtle::ConstantTimeEq;
use tracing::warn;

use super::digest::{self, Credential};
use super::hash::{hex_to_u64, HashAlgorithm};
use super::nonce::{self, NonceNcTable, TS_MASK};
use super::unquote::{UnquoteOutcome, Unquoter};

/// One Authorization parameter as handed to us by the header parser: the
/// raw bytes (delimiting quotes already stripped) and whether it was a
/// quoted-string token.
#[derive(Debug, Clone, Copy)]
pub struct RawParam<'a> {
    pub bytes: &'a [u8],
    pub quoted: bool,
}

impl<'a> RawParam<'a> {
    pub fn new(bytes: &'a [u8], quoted: bool) -> Self {
        Self { bytes, quoted }
    }
}

/// The full set of Authorization parameters, as extracted by the upstream
/// header parser. Every field is optional — absence is a normal outcome
/// the verifier classifies, not a parse error.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestParams<'a> {
    pub username: Option<RawParam<'a>>,
    pub realm: Option<RawParam<'a>>,
    pub nonce: Option<RawParam<'a>>,
    pub cnonce: Option<RawParam<'a>>,
    pub qop: Option<RawParam<'a>>,
    pub nc: Option<RawParam<'a>>,
    pub uri: Option<RawParam<'a>>,
    pub response: Option<RawParam<'a>>,
    pub algorithm: Option<RawParam<'a>>,
}

/// Everything the verifier needs about the request itself, independent of
/// the Authorization header: the method, the canonical (already
/// URL-unescaped) request URI, and any `GET` query arguments the
/// connection layer parsed out for cross-validation against the header's
/// `uri` parameter.
#[derive(Debug, Clone, Copy)]
pub struct VerificationContext<'a> {
    pub method: &'a str,
    pub url: &'a str,
    pub get_arguments: &'a [(String, String)],
}

/// Classified verification result (§7). No partial side effects besides
/// the intentional one documented on `NonceStale`/`Ok`: the nonce-nc
/// advance happens before the URI cross-check, so a captured-but-replayed
/// request can never retry under a different URI (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Ok,
    WrongHeader,
    WrongUsername,
    WrongRealm,
    NonceStale,
    NonceWrong,
    WrongUri,
    ResponseWrong,
    InternalError,
}

impl AuthOutcome {
    pub fn is_ok(self) -> bool {
        matches!(self, AuthOutcome::Ok)
    }

    /// Collapse the full taxonomy to the legacy 3-value entry point (§7).
    pub fn legacy(self) -> LegacyOutcome {
        match self {
            AuthOutcome::Ok => LegacyOutcome::Yes,
            AuthOutcome::NonceStale | AuthOutcome::NonceWrong => LegacyOutcome::InvalidNonce,
            _ => LegacyOutcome::No,
        }
    }
}

/// Legacy collapsed outcome for callers that only need a coarse decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyOutcome {
    Yes,
    No,
    InvalidNonce,
}

/// Behavior knobs that diverge from strict RFC 7616 reading to stay
/// bug-for-bug compatible with the legacy daemon this is ported from.
/// See SPEC_FULL.md / DESIGN.md for the rationale.
#[derive(Debug, Clone, Copy)]
pub struct VerifierConfig {
    /// RFC 7616 requires `qop` to be matched case-insensitively; the
    /// legacy daemon compares case-sensitively. Default `false` preserves
    /// today's wire behavior.
    pub case_insensitive_qop: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            case_insensitive_qop: false,
        }
    }
}

const MAX_CNONCE_LEN: usize = 128;
const MAX_QOP_LEN: usize = 14;
const MAX_NC_LEN: usize = 19;
const MAX_RESPONSE_LEN: usize = 255;

/// A quoted value that overran `ParamUnquoter`'s hard cap, or whose heap
/// scratch failed to grow, is a resource/parameter-size failure rather than
/// a credential mismatch (§4.4/§7) — every unquote call site must consult
/// this before treating the (otherwise silently emptied) output as the
/// param's value.
fn oversized(outcome: UnquoteOutcome) -> Option<AuthOutcome> {
    match outcome {
        UnquoteOutcome::TooLarge | UnquoteOutcome::OutOfMem => Some(AuthOutcome::InternalError),
        _ => None,
    }
}

/// Orchestrates one verification call against a shared `NonceNcTable`.
pub struct RequestVerifier<'t> {
    table: &'t NonceNcTable,
    seed: &'t [u8],
    config: VerifierConfig,
}

impl<'t> RequestVerifier<'t> {
    pub fn new(table: &'t NonceNcTable, seed: &'t [u8], config: VerifierConfig) -> Self {
        Self { table, seed, config }
    }

    /// Run the ordered gate of §4.6 against `params`. `unescape` is the
    /// daemon-provided URL-unescape callback applied to the header's `uri`
    /// parameter before the query-string portion is split off.
    #[allow(clippy::too_many_arguments)]
    pub fn verify(
        &self,
        params: Option<&RequestParams>,
        ctx: &VerificationContext,
        realm: &str,
        username: &str,
        credential: Credential,
        algo: HashAlgorithm,
        nonce_timeout_secs: u64,
        now_ms: u64,
        unescape: impl Fn(&str) -> String,
    ) -> AuthOutcome {
        let params = match params {
            Some(p) => p,
            None => return AuthOutcome::WrongHeader,
        };

        let mut unq = Unquoter::new();

        // Reject -sess algorithm variants outright rather than silently
        // verifying against the non-session H(A1) (§9).
        if let Some(algo_param) = params.algorithm {
            let (outcome, algo_bytes) = unq.unquote(Some(algo_param.bytes), algo_param.quoted);
            if let Some(err) = oversized(outcome) {
                return err;
            }
            if let Ok(algo_str) = std::str::from_utf8(algo_bytes) {
                if HashAlgorithm::is_session_variant(algo_str) {
                    return AuthOutcome::WrongHeader;
                }
            }
        }

        // Step 2: username
        let (outcome, got) = unq.unquote(params.username.map(|p| p.bytes), params.username.map(|p| p.quoted).unwrap_or(false));
        if let Some(err) = oversized(outcome) {
            return err;
        }
        if got != username.as_bytes() {
            return AuthOutcome::WrongUsername;
        }

        // Step 3: realm
        let (outcome, got) = unq.unquote(params.realm.map(|p| p.bytes), params.realm.map(|p| p.quoted).unwrap_or(false));
        if let Some(err) = oversized(outcome) {
            return err;
        }
        if got != realm.as_bytes() {
            return AuthOutcome::WrongRealm;
        }

        // Step 4: nonce present, non-empty, correct length class
        let (outcome, nonce_bytes) = unq.unquote(params.nonce.map(|p| p.bytes), params.nonce.map(|p| p.quoted).unwrap_or(false));
        if let Some(err) = oversized(outcome) {
            return err;
        }
        if nonce_bytes.is_empty() {
            return AuthOutcome::NonceWrong;
        }
        let nonce_str = match std::str::from_utf8(nonce_bytes) {
            Ok(s) => s,
            Err(_) => return AuthOutcome::NonceWrong,
        };
        if nonce_str.len() != HashAlgorithm::Md5.nonce_len() && nonce_str.len() != HashAlgorithm::Sha256.nonce_len() {
            return AuthOutcome::NonceWrong;
        }
        let ts = match nonce::extract_timestamp(nonce_str) {
            Some(t) => t,
            None => return AuthOutcome::NonceWrong,
        };

        // Step 5: not expired
        let age = nonce::ts_diff(now_ms & TS_MASK, ts);
        let timeout_ms = nonce_timeout_secs.saturating_mul(1000);
        if age > timeout_ms as i64 {
            return AuthOutcome::NonceStale;
        }

        // Step 6: nonce must be one we issued for this exact context
        let expected_nonce = nonce::generate_nonce(ts, ctx.method, self.seed, ctx.url.as_bytes(), realm.as_bytes(), algo);
        if expected_nonce != nonce_str {
            warn!(method = ctx.method, uri = ctx.url, "nonce not reproducible from request context");
            return AuthOutcome::NonceWrong;
        }
        // `nonce_str` no longer borrows `unq`'s scratch from here on — it's
        // an owned String via `expected_nonce`'s sibling comparison above,
        // but we still need the original bytes, so keep an owned copy.
        let nonce_owned = nonce_str.to_string();

        // Step 7: bounded extraction of cnonce/qop/nc/response
        let (outcome, b) = unq.unquote(params.cnonce.map(|p| p.bytes), params.cnonce.map(|p| p.quoted).unwrap_or(false));
        if let Some(err) = oversized(outcome) {
            return err;
        }
        if b.len() > MAX_CNONCE_LEN {
            return AuthOutcome::InternalError;
        }
        let cnonce = b.to_vec();

        let (outcome, b) = unq.unquote(params.qop.map(|p| p.bytes), params.qop.map(|p| p.quoted).unwrap_or(false));
        if let Some(err) = oversized(outcome) {
            return err;
        }
        if b.len() > MAX_QOP_LEN {
            return AuthOutcome::InternalError;
        }
        let qop = b.to_vec();

        let (outcome, b) = unq.unquote(params.nc.map(|p| p.bytes), params.nc.map(|p| p.quoted).unwrap_or(false));
        if let Some(err) = oversized(outcome) {
            return err;
        }
        if b.len() > MAX_NC_LEN {
            return AuthOutcome::InternalError;
        }
        let nc_raw = b.to_vec();

        let (outcome, b) = unq.unquote(params.response.map(|p| p.bytes), params.response.map(|p| p.quoted).unwrap_or(false));
        if let Some(err) = oversized(outcome) {
            return err;
        }
        if b.len() > MAX_RESPONSE_LEN {
            return AuthOutcome::InternalError;
        }
        let response_client = b.to_vec();

        // Step 8: qop must be "auth" or empty (auth-int unsupported)
        let qop_str = match std::str::from_utf8(&qop) {
            Ok(s) => s,
            Err(_) => return AuthOutcome::WrongHeader,
        };
        let qop_matches_auth = if self.config.case_insensitive_qop {
            qop_str.eq_ignore_ascii_case("auth")
        } else {
            qop_str == "auth"
        };
        if !qop_str.is_empty() && !qop_matches_auth {
            return AuthOutcome::WrongHeader;
        }

        // Step 9: nc parses as hex u64 > 0
        let nc_str = match std::str::from_utf8(&nc_raw) {
            Ok(s) => s,
            Err(_) => return AuthOutcome::WrongHeader,
        };
        let nc_val = match hex_to_u64(nc_str) {
            Some(v) if v > 0 => v,
            _ => return AuthOutcome::WrongHeader,
        };

        // Step 10: replay defense. Committed before the URI check below —
        // intentional, see AuthOutcome docs and §4.6.
        match self.table.check(&nonce_owned, ts, nc_val) {
            nonce::CheckOutcome::Stale => return AuthOutcome::NonceStale,
            nonce::CheckOutcome::Wrong => return AuthOutcome::NonceWrong,
            nonce::CheckOutcome::Ok => {}
        }

        // Step 11: uri must match the connection's URL once unescaped and
        // stripped of its query suffix.
        let (outcome, uri_bytes) = unq.unquote(params.uri.map(|p| p.bytes), params.uri.map(|p| p.quoted).unwrap_or(false));
        if let Some(err) = oversized(outcome) {
            return err;
        }
        if uri_bytes.is_empty() {
            return AuthOutcome::WrongUri;
        }
        let uri_raw = uri_bytes.to_vec();
        let uri_raw_str = match std::str::from_utf8(&uri_raw) {
            Ok(s) => s,
            Err(_) => return AuthOutcome::WrongUri,
        };
        let uri_unescaped = unescape(uri_raw_str);
        let (uri_path, query) = match uri_unescaped.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (uri_unescaped.as_str(), None),
        };
        if uri_path != ctx.url {
            return AuthOutcome::WrongUri;
        }

        // Step 12: every key=value pair after '?' must match a GET argument
        // on the connection, with matching counts in both directions.
        if let Some(q) = query {
            let mut count = 0usize;
            for pair in q.split('&').filter(|p| !p.is_empty()) {
                let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                count += 1;
                let matched = ctx.get_arguments.iter().any(|(gk, gv)| gk == k && gv == v);
                if !matched {
                    return AuthOutcome::WrongUri;
                }
            }
            if count != ctx.get_arguments.len() {
                return AuthOutcome::WrongUri;
            }
        } else if !ctx.get_arguments.is_empty() {
            return AuthOutcome::WrongUri;
        }

        // Step 13: recompute the expected response and compare in constant time.
        let ha1 = digest::compute_ha1(algo, username, realm, credential);
        let ha2 = digest::compute_ha2(algo, ctx.method, &uri_raw);

        let has_qop = !qop_str.is_empty();
        let expected = digest::compute_response(
            algo,
            &ha1,
            &nonce_owned,
            has_qop.then_some(nc_raw.as_slice()),
            has_qop.then_some(cnonce.as_slice()),
            has_qop.then_some(qop.as_slice()),
            &ha2,
        );

        if expected.as_bytes().ct_eq(&response_client).unwrap_u8() == 1 {
            AuthOutcome::Ok
        } else {
            AuthOutcome::ResponseWrong
        }
    }
}
