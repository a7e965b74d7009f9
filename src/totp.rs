/// Time-based one-time password generation (RFC 6238 over RFC 4226).
///
/// Everything here is a pure function of its inputs. A secret that cannot be
/// decoded produces an all-zero code of the requested width instead of an
/// error, because the display layer always renders a fixed-width string.
/// Callers that need to reject bad input use [`is_valid_secret`] first.
use std::collections::HashMap;
use std::fmt;

use data_encoding::{Encoding, BASE32_NOPAD};
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Sha256, Sha512};

pub const DEFAULT_PERIOD: u64 = 30;
pub const DEFAULT_DIGITS: u32 = 6;
pub const MIN_SECRET_LEN: usize = 16;

/// HMAC algorithm for an entry.
///
/// Unrecognized names survive a decode/encode round trip untouched so that
/// bundles written by older clients are never rewritten lossily.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Algorithm {
    #[default]
    Sha1,
    Sha256,
    Sha512,
    Md5,
    Unknown(String),
}

impl Algorithm {
    pub fn as_str(&self) -> &str {
        match self {
            Algorithm::Sha1 => "SHA1",
            Algorithm::Sha256 => "SHA256",
            Algorithm::Sha512 => "SHA512",
            Algorithm::Md5 => "MD5",
            Algorithm::Unknown(name) => name,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Algorithm::Unknown(_))
    }
}

impl From<String> for Algorithm {
    fn from(value: String) -> Self {
        match value.to_ascii_uppercase().replace('-', "").as_str() {
            "SHA1" => Algorithm::Sha1,
            "SHA256" => Algorithm::Sha256,
            "SHA512" => Algorithm::Sha512,
            "MD5" => Algorithm::Md5,
            _ => Algorithm::Unknown(value),
        }
    }
}

impl From<&str> for Algorithm {
    fn from(value: &str) -> Self {
        Algorithm::from(value.to_string())
    }
}

impl From<Algorithm> for String {
    fn from(value: Algorithm) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Digit counts accepted for new entries.
pub fn is_supported_digits(digits: u32) -> bool {
    digits == 6 || digits == 8
}

/// Strip whitespace and uppercase a user-supplied secret.
pub fn normalize_secret(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Base32 format check: at least 16 characters of `[A-Z2-7]`, optionally
/// followed by `=` padding, after normalization.
pub fn is_valid_secret(input: &str) -> bool {
    let normalized = normalize_secret(input);
    if normalized.len() < MIN_SECRET_LEN {
        return false;
    }

    let body = normalized.trim_end_matches('=');
    !body.is_empty()
        && body
            .chars()
            .all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c))
}

/// Base32 alphabet that tolerates non-zero trailing bits, which hand-typed
/// secrets frequently have.
fn lenient_base32() -> Option<Encoding> {
    let mut format = BASE32_NOPAD.specification();
    format.check_trailing_bits = false;
    format.encoding().ok()
}

/// Decode a base32 secret into raw key bytes. A partial final quantum that
/// cannot hold a whole byte (1, 3 or 6 characters past a multiple of 8) is
/// dropped along with its leftover bits.
pub fn decode_secret(secret: &str) -> Option<Vec<u8>> {
    let normalized = normalize_secret(secret);
    let mut body = normalized.trim_end_matches('=');
    if matches!(body.len() % 8, 1 | 3 | 6) {
        body = &body[..body.len() - 1];
    }
    if body.is_empty() {
        return None;
    }
    lenient_base32()?.decode(body.as_bytes()).ok()
}

/// Encode raw key bytes as unpadded base32.
pub fn encode_secret(bytes: &[u8]) -> String {
    BASE32_NOPAD.encode(bytes)
}

fn mac<M: Mac + KeyInit>(key: &[u8], message: &[u8]) -> Option<Vec<u8>> {
    let mut mac = <M as Mac>::new_from_slice(key).ok()?;
    mac.update(message);
    Some(mac.finalize().into_bytes().to_vec())
}

fn hmac_counter(algorithm: &Algorithm, key: &[u8], counter: u64) -> Option<Vec<u8>> {
    let message = counter.to_be_bytes();
    match algorithm {
        Algorithm::Sha1 => mac::<Hmac<Sha1>>(key, &message),
        Algorithm::Sha256 => mac::<Hmac<Sha256>>(key, &message),
        Algorithm::Sha512 => mac::<Hmac<Sha512>>(key, &message),
        Algorithm::Md5 => mac::<Hmac<Md5>>(key, &message),
        Algorithm::Unknown(_) => None,
    }
}

fn sentinel(digits: u32) -> String {
    "0".repeat(digits as usize)
}

/// HOTP value for an explicit counter.
pub fn hotp(key: &[u8], algorithm: &Algorithm, digits: u32, counter: u64) -> Option<String> {
    if !(1..=9).contains(&digits) {
        return None;
    }

    let digest = hmac_counter(algorithm, key, counter)?;
    let last = *digest.last()?;
    // MD5 digests are 16 bytes; keep the 4-byte window inside the digest.
    let offset = ((last & 0x0f) as usize).min(digest.len().checked_sub(4)?);

    let binary = (u32::from(digest[offset] & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);

    let code = binary % 10u32.pow(digits);
    Some(format!("{:0width$}", code, width = digits as usize))
}

/// TOTP code for `secret` at unix time `at_unix`.
pub fn generate(secret: &str, algorithm: &Algorithm, digits: u32, period: u64, at_unix: u64) -> String {
    if period == 0 {
        return sentinel(digits);
    }

    decode_secret(secret)
        .and_then(|key| hotp(&key, algorithm, digits, at_unix / period))
        .unwrap_or_else(|| sentinel(digits))
}

/// Seconds until the current code expires, in `1..=period`.
pub fn time_remaining(period: u64, at_unix: u64) -> u64 {
    if period == 0 {
        return 0;
    }
    period - (at_unix % period)
}

/// Current unix time in seconds.
pub fn now_unix() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

/// Tracks the last rendered time step per period so codes are recomputed
/// only when a new step begins.
#[derive(Debug, Default)]
pub struct CodeTicker {
    last_step: HashMap<u64, u64>,
}

impl CodeTicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True on the first poll and whenever any of `periods` has rolled over
    /// into a new step since the previous poll.
    pub fn due<I>(&mut self, periods: I, at_unix: u64) -> bool
    where
        I: IntoIterator<Item = u64>,
    {
        let mut due = false;
        for period in periods.into_iter().filter(|p| *p > 0) {
            let step = at_unix / period;
            if self.last_step.insert(period, step) != Some(step) {
                due = true;
            }
        }
        due
    }

    pub fn reset(&mut self) {
        self.last_step.clear();
    }
}
