//! Nonce lifecycle: the composite-nonce codec and the bounded nonce/nc
//! replay-defense table.
//!
//! A nonce is `hex(H(ts ‖ ":" ‖ method ‖ ":" ‖ seed ‖ ":" ‖ uri ‖ ":" ‖ realm))
//! ‖ hex(ts)`, binding the challenge to the request context and embedding
//! its own expiry so staleness can be checked without a table lookup.

use std::sync::Mutex;

use tracing::{debug, warn};

use super::hash::{hex_to_u64, HashAlgorithm, HashEngine};

/// 48-bit timestamp mask; a millisecond counter at this width wraps roughly
/// every 8,900 years.
pub const TS_MASK: u64 = (1u64 << 48) - 1;
/// Minimum age before an unused slot may be reclaimed by a different nonce.
pub const REUSE_TIMEOUT_MS: i64 = 30_000;
/// Max backward jitter applied to the retry timestamp on admission refusal.
pub const JUMPBACK_MAX_MS: u64 = 127;
/// `nc` values at or above this are rejected pre-emptively as stale.
pub const MAX_NC_NEAR_OVERFLOW: u64 = u64::MAX - 64;

fn ts_hex(ts_ms: u64) -> String {
    format!("{:012x}", ts_ms & TS_MASK)
}

/// Generate a composite nonce for `(timestamp, method, seed, uri, realm)`
/// under the given algorithm. Deterministic: identical inputs always yield
/// a byte-identical nonce (P4).
pub fn generate_nonce(
    ts_ms: u64,
    method: &str,
    seed: &[u8],
    uri: &[u8],
    realm: &[u8],
    algo: HashAlgorithm,
) -> String {
    let ts = ts_ms & TS_MASK;
    let ts_be48 = ts.to_be_bytes();
    let mut h = HashEngine::new(algo);
    h.update(&ts_be48[2..]); // low 48 bits, big-endian
    h.update(b":");
    h.update(method.as_bytes());
    h.update(b":");
    h.update(seed);
    h.update(b":");
    h.update(uri);
    h.update(b":");
    h.update(realm);
    let mut nonce = h.finalize_hex();
    nonce.push_str(&ts_hex(ts));
    nonce
}

/// Extract the embedded 48-bit millisecond timestamp from a nonce's
/// trailing 12 hex chars. Fails unless the nonce is exactly the MD5- or
/// SHA-256-class length and those chars are valid hex.
pub fn extract_timestamp(nonce: &str) -> Option<u64> {
    let valid_len =
        nonce.len() == HashAlgorithm::Md5.nonce_len() || nonce.len() == HashAlgorithm::Sha256.nonce_len();
    if !valid_len {
        return None;
    }
    hex_to_u64(&nonce[nonce.len() - 12..])
}

/// Wrap-aware signed difference `a - b`, modulo 2^48.
pub fn ts_diff(a: u64, b: u64) -> i64 {
    let diff = a.wrapping_sub(b) & TS_MASK;
    if diff >= (1u64 << 47) {
        diff as i64 - (1i64 << 48)
    } else {
        diff as i64
    }
}

/// Non-cryptographic 32-bit rotate-xor rolling hash. Only used to bucket
/// nonces into table slots — correctness never depends on its quality.
fn fast_hash(bytes: &[u8]) -> u32 {
    let mut h: u32 = 0x9e37_79b9;
    for &b in bytes {
        h = h.rotate_left(5) ^ (b as u32);
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

/// Outcome of checking a `(nonce, nc)` pair against the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Ok,
    Stale,
    Wrong,
}

#[derive(Debug, Clone)]
struct Slot {
    /// Empty string means the slot is free.
    nonce: String,
    nc: u64,
    /// Bit *i* set means nc value `nc - 1 - i` has already been consumed.
    nmask: u64,
}

impl Slot {
    fn empty() -> Self {
        Self {
            nonce: String::new(),
            nc: 0,
            nmask: 0,
        }
    }
}

/// Fixed-size array of nonce-nc slots guarded by a single coarse mutex
/// (§5: admission and verification are both O(1), so a per-slot lock buys
/// nothing but complexity). Indexing is `fast_hash(nonce) mod N`; `N = 0`
/// disables the feature entirely.
pub struct NonceNcTable {
    slots: Mutex<Vec<Slot>>,
    size: usize,
}

impl NonceNcTable {
    pub fn new(size: usize) -> Self {
        Self {
            slots: Mutex::new((0..size).map(|_| Slot::empty()).collect()),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn slot_index(&self, nonce: &str) -> usize {
        (fast_hash(nonce.as_bytes()) as usize) % self.size
    }

    /// Reserve `new_nonce` for a freshly issued challenge. Refuses rather
    /// than evicting a slot that is either mid-flight with the same value,
    /// or unused and still within `REUSE_TIMEOUT_MS`.
    pub fn try_reserve(&self, new_nonce: &str, now_ms: u64) -> bool {
        if self.size == 0 {
            return false;
        }
        let idx = self.slot_index(new_nonce);
        let mut slots = self.slots.lock().expect("nonce table mutex poisoned");
        let slot = &mut slots[idx];

        if slot.nonce.is_empty() {
            slot.nonce = new_nonce.to_string();
            slot.nc = 0;
            slot.nmask = 0;
            debug!(slot = idx, "admitted nonce into empty slot");
            return true;
        }
        if slot.nonce == new_nonce {
            debug!(slot = idx, "refused reservation: nonce already in flight");
            return false;
        }
        if slot.nc == 0 {
            if let Some(ts) = extract_timestamp(&slot.nonce) {
                if ts_diff(now_ms & TS_MASK, ts).abs() < REUSE_TIMEOUT_MS {
                    debug!(slot = idx, "refused reservation: slot still fresh and unused");
                    return false;
                }
            }
        }
        debug!(slot = idx, "evicted stale slot for new nonce");
        slot.nonce = new_nonce.to_string();
        slot.nc = 0;
        slot.nmask = 0;
        true
    }

    /// Verify a `(nonce, nc)` pair, advancing replay-defense state in place
    /// on success. Exactly one verification of a given `(nonce, nc)` ever
    /// returns `Ok` across all concurrent callers (P2), since the whole
    /// check-and-advance happens under the single table mutex.
    pub fn check(&self, nonce: &str, nonce_ts: u64, nc: u64) -> CheckOutcome {
        if self.size == 0 {
            return CheckOutcome::Stale;
        }
        if nc >= MAX_NC_NEAR_OVERFLOW {
            return CheckOutcome::Stale;
        }

        let idx = self.slot_index(nonce);
        let mut slots = self.slots.lock().expect("nonce table mutex poisoned");
        let slot = &mut slots[idx];

        if slot.nonce != nonce {
            if slot.nonce.is_empty() {
                warn!(slot = idx, "nonce not found in an empty slot, treating as forged");
                return CheckOutcome::Wrong;
            }
            let slot_ts = match extract_timestamp(&slot.nonce) {
                Some(t) => t,
                None => return CheckOutcome::Stale,
            };
            let diff = ts_diff(nonce_ts, slot_ts);
            return if diff > 0 {
                if diff < REUSE_TIMEOUT_MS {
                    CheckOutcome::Stale
                } else {
                    warn!(slot = idx, "nonce absent from its slot well past reuse window");
                    CheckOutcome::Wrong
                }
            } else if diff < 0 {
                CheckOutcome::Stale
            } else {
                warn!(slot = idx, "nonce timestamp matches slot but content differs");
                CheckOutcome::Wrong
            };
        }

        if nc > slot.nc {
            let jump = nc - slot.nc;
            if jump >= 64 {
                slot.nmask = 0;
            } else {
                slot.nmask = (slot.nmask << jump) | (1u64 << (jump - 1));
            }
            slot.nc = nc;
            CheckOutcome::Ok
        } else if nc == slot.nc {
            CheckOutcome::Stale
        } else {
            let back = slot.nc - nc;
            if back <= 64 {
                let bit = back - 1;
                if (slot.nmask >> bit) & 1 == 0 {
                    slot.nmask |= 1u64 << bit;
                    CheckOutcome::Ok
                } else {
                    CheckOutcome::Stale
                }
            } else {
                CheckOutcome::Stale
            }
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// P4: identical `(timestamp, method, seed, uri, realm, algo)` inputs
        /// always yield a byte-identical nonce.
        #[test]
        fn generate_nonce_is_deterministic_for_any_input(
            ts in any::<u64>(),
            method in "[A-Z]{3,10}",
            seed in prop::collection::vec(any::<u8>(), 0..32),
            uri in "/[a-z/]{0,32}",
            realm in "[a-z.]{1,32}",
        ) {
            let a = generate_nonce(ts, &method, &seed, uri.as_bytes(), realm.as_bytes(), HashAlgorithm::Md5);
            let b = generate_nonce(ts, &method, &seed, uri.as_bytes(), realm.as_bytes(), HashAlgorithm::Md5);
            prop_assert_eq!(a, b);
        }

        /// The trailing 12 hex chars always round-trip the masked 48-bit
        /// timestamp, regardless of the other inputs.
        #[test]
        fn extract_timestamp_roundtrips_for_any_input(
            ts in any::<u64>(),
            method in "[A-Z]{3,10}",
            uri in "/[a-z/]{0,32}",
            realm in "[a-z.]{1,32}",
        ) {
            let nonce = generate_nonce(ts, &method, b"seed", uri.as_bytes(), realm.as_bytes(), HashAlgorithm::Sha256);
            prop_assert_eq!(extract_timestamp(&nonce), Some(ts & TS_MASK));
        }
    }
}
