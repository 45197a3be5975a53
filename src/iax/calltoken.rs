//! Call-token anti-spoofing (§4.8).
//!
//! Literal port of `engine.cpp`'s `buildSecretDigest`/`buildAddrSecret`/
//! `addrSecretAge`/`checkCallToken`: an MD5 digest of `host || secret ||
//! port || t`, carried as `hexdigest.t`, whose age is recomputed and
//! bounds-checked on receipt.

use crate::errors::CallTokenError;
use md5::{Digest, Md5};
use rand::Rng;
use std::net::SocketAddr;

fn secret_digest(host: &str, port: u16, secret: &str, t: u64) -> String {
    let mut hasher = Md5::new();
    hasher.update(host.as_bytes());
    hasher.update(secret.as_bytes());
    hasher.update(port.to_string().as_bytes());
    hasher.update(t.to_string().as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Build a time-signed secret for `addr`, using the engine's current time
/// in seconds.
pub fn build_addr_secret(secret: &str, addr: SocketAddr, now_secs: u64) -> String {
    let digest = secret_digest(&addr.ip().to_string(), addr.port(), secret, now_secs);
    format!("{digest}.{now_secs}")
}

/// Recompute the digest embedded in `buf` and return its age in seconds,
/// or `-1` if the digest doesn't match or the format is malformed.
pub fn addr_secret_age(buf: &str, secret: &str, addr: SocketAddr, now_secs: u64) -> i64 {
    let Some((digest, t_str)) = buf.split_once('.') else {
        return -1;
    };
    let Ok(t) = t_str.parse::<u64>() else {
        return -1;
    };
    let expected = secret_digest(&addr.ip().to_string(), addr.port(), secret, t);
    if expected != digest {
        return -1;
    }
    now_secs as i64 - t as i64
}

/// Synthesize a secret at engine construction when none is configured
/// (`Random::random() ^ Time::now()`, three 32-bit chunks concatenated).
pub fn synthesize_secret() -> String {
    let mut rng = rand::thread_rng();
    let mut s = String::new();
    for _ in 0..3 {
        let chunk: u32 = rng.gen();
        s.push_str(&chunk.to_string());
    }
    s
}

/// Outcome of [`check_call_token`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTokenOutcome {
    /// The frame is cleared to proceed (token absent because checking is
    /// disabled, or token present and valid).
    Accepted,
    /// The peer sent an empty CALLTOKEN; reply with the minted secret
    /// using local call number `IAX2_CALLTOKEN_CALLNO`.
    Mint(String),
    /// No further action: either the frame was silently dropped, or (when
    /// `reject_missing` is set) a `Reject` full-frame was already queued
    /// by the caller using `IAX2_CALLTOKEN_REJ_CALLNO`.
    Rejected(Option<CallTokenError>),
}

/// Mirrors `IAXEngine::checkCallToken`.
pub fn check_call_token(
    enabled: bool,
    reject_missing: bool,
    max_age_secs: u64,
    token: Option<&[u8]>,
    secret: &str,
    addr: SocketAddr,
    now_secs: u64,
) -> CallTokenOutcome {
    if !enabled {
        return CallTokenOutcome::Accepted;
    }
    match token {
        None => {
            if reject_missing {
                CallTokenOutcome::Rejected(Some(CallTokenError::Missing))
            } else {
                CallTokenOutcome::Rejected(None)
            }
        }
        Some(data) if data.is_empty() => {
            CallTokenOutcome::Mint(build_addr_secret(secret, addr, now_secs))
        }
        Some(data) => {
            let Ok(text) = std::str::from_utf8(data) else {
                return CallTokenOutcome::Rejected(Some(CallTokenError::DigestMismatch));
            };
            let age = addr_secret_age(text, secret, addr, now_secs);
            if age >= 0 && age as u64 <= max_age_secs {
                CallTokenOutcome::Accepted
            } else if age < 0 {
                CallTokenOutcome::Rejected(Some(CallTokenError::DigestMismatch))
            } else {
                CallTokenOutcome::Rejected(Some(CallTokenError::Expired))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "203.0.113.7:4569".parse().unwrap()
    }

    #[test]
    fn fresh_secret_has_age_zero_or_one() {
        let secret = build_addr_secret("sekret", addr(), 1_000);
        let age = addr_secret_age(&secret, "sekret", addr(), 1_000);
        assert!(age == 0);
        let age = addr_secret_age(&secret, "sekret", addr(), 1_001);
        assert!(age == 1);
    }

    #[test]
    fn expired_secret_past_max_age_is_invalid() {
        let secret = build_addr_secret("sekret", addr(), 1_000);
        let age = addr_secret_age(&secret, "sekret", addr(), 1_011);
        assert_eq!(age, 11);
        assert!(age as u64 > 10);
    }

    #[test]
    fn tampered_digest_is_rejected() {
        let secret = build_addr_secret("sekret", addr(), 1_000);
        let age = addr_secret_age(&secret, "other-secret", addr(), 1_000);
        assert_eq!(age, -1);
    }

    #[test]
    fn empty_token_requests_a_mint() {
        let outcome = check_call_token(true, true, 10, Some(b""), "sekret", addr(), 1_000);
        assert!(matches!(outcome, CallTokenOutcome::Mint(_)));
    }

    #[test]
    fn missing_token_is_rejected_when_reject_missing_is_set() {
        let outcome = check_call_token(true, true, 10, None, "sekret", addr(), 1_000);
        assert!(matches!(
            outcome,
            CallTokenOutcome::Rejected(Some(CallTokenError::Missing))
        ));
    }

    #[test]
    fn valid_token_round_trips_through_check() {
        let minted = build_addr_secret("sekret", addr(), 1_000);
        let outcome = check_call_token(
            true,
            true,
            10,
            Some(minted.as_bytes()),
            "sekret",
            addr(),
            1_005,
        );
        assert_eq!(outcome, CallTokenOutcome::Accepted);
    }

    #[test]
    fn disabled_checking_always_accepts() {
        let outcome = check_call_token(false, true, 10, None, "sekret", addr(), 1_000);
        assert_eq!(outcome, CallTokenOutcome::Accepted);
    }
}
