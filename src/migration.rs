/// Authenticator interchange formats.
///
/// - `otpauth-migration://offline?data=…`: the bulk export of Google
///   Authenticator. `data` is a percent-encoded base64 protobuf
///   `MigrationPayload`.
/// - `otpauth://totp/Issuer:account?secret=…`: a single-entry QR payload.
///
/// Decoded records become [`EntryCandidate`]s, which the vault validates and
/// encrypts exactly like a manually entered secret.
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, NO_PAD, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use percent_encoding::percent_decode_str;
use prost::Message;
use url::Url;

use crate::error::{Result, VaultError};
use crate::totp::{self, Algorithm, DEFAULT_DIGITS, DEFAULT_PERIOD};

pub const MIGRATION_SCHEME: &str = "otpauth-migration";
pub const OTPAUTH_SCHEME: &str = "otpauth";

const LENIENT_STANDARD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    NO_PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);
const LENIENT_URL_SAFE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    NO_PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Clone, PartialEq, Message)]
struct MigrationPayload {
    #[prost(message, repeated, tag = "1")]
    otp_parameters: Vec<OtpParameters>,
    #[prost(int32, tag = "2")]
    version: i32,
    #[prost(int32, tag = "3")]
    batch_size: i32,
    #[prost(int32, tag = "4")]
    batch_index: i32,
    #[prost(int32, tag = "5")]
    batch_id: i32,
}

#[derive(Clone, PartialEq, Message)]
struct OtpParameters {
    #[prost(bytes = "vec", tag = "1")]
    secret: Vec<u8>,
    #[prost(string, tag = "2")]
    name: String,
    #[prost(string, tag = "3")]
    issuer: String,
    #[prost(int32, tag = "4")]
    algorithm: i32,
    #[prost(int32, tag = "5")]
    digits: i32,
    #[prost(int32, tag = "6")]
    otp_type: i32,
    #[prost(int64, tag = "7")]
    counter: i64,
}

/// Kind of one-time password in a migration record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpKind {
    Unspecified,
    Hotp,
    Totp,
}

impl OtpKind {
    fn from_wire(value: i32) -> Self {
        match value {
            1 => OtpKind::Hotp,
            2 => OtpKind::Totp,
            _ => OtpKind::Unspecified,
        }
    }

    fn to_wire(self) -> i32 {
        match self {
            OtpKind::Unspecified => 0,
            OtpKind::Hotp => 1,
            OtpKind::Totp => 2,
        }
    }

    /// Unspecified records are treated as TOTP, the authenticator default.
    pub fn is_time_based(self) -> bool {
        !matches!(self, OtpKind::Hotp)
    }
}

/// One decoded interchange record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub secret: Vec<u8>,
    pub name: String,
    pub issuer: String,
    pub algorithm: Algorithm,
    pub digits: u32,
    pub kind: OtpKind,
    pub counter: i64,
}

fn algorithm_from_wire(value: i32) -> Algorithm {
    match value {
        2 => Algorithm::Sha256,
        3 => Algorithm::Sha512,
        4 => Algorithm::Md5,
        _ => Algorithm::Sha1,
    }
}

fn algorithm_to_wire(algorithm: &Algorithm) -> i32 {
    match algorithm {
        Algorithm::Sha1 => 1,
        Algorithm::Sha256 => 2,
        Algorithm::Sha512 => 3,
        Algorithm::Md5 => 4,
        Algorithm::Unknown(_) => 0,
    }
}

impl From<OtpParameters> for MigrationRecord {
    fn from(p: OtpParameters) -> Self {
        Self {
            secret: p.secret,
            name: p.name,
            issuer: p.issuer,
            algorithm: algorithm_from_wire(p.algorithm),
            digits: if p.digits == 2 { 8 } else { DEFAULT_DIGITS },
            kind: OtpKind::from_wire(p.otp_type),
            counter: p.counter,
        }
    }
}

impl From<&MigrationRecord> for OtpParameters {
    fn from(r: &MigrationRecord) -> Self {
        Self {
            secret: r.secret.clone(),
            name: r.name.clone(),
            issuer: r.issuer.clone(),
            algorithm: algorithm_to_wire(&r.algorithm),
            digits: if r.digits == 8 { 2 } else { 1 },
            otp_type: r.kind.to_wire(),
            counter: r.counter,
        }
    }
}

/// A plaintext entry ready for validation and encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryCandidate {
    pub issuer: Option<String>,
    pub account_name: String,
    /// Base32 secret.
    pub secret: String,
    pub algorithm: Algorithm,
    pub digits: u32,
    pub period: u64,
}

impl EntryCandidate {
    /// Display label, `issuer:account` when an issuer is known.
    pub fn label(&self) -> String {
        match &self.issuer {
            Some(issuer) if !self.account_name.is_empty() => {
                format!("{issuer}:{}", self.account_name)
            }
            Some(issuer) => issuer.clone(),
            None => self.account_name.clone(),
        }
    }

    /// Split `name` on the first `:` into issuer and account. An explicit
    /// record issuer wins over the prefix.
    pub fn from_record(record: &MigrationRecord) -> Self {
        let (issuer, account_name) = split_label(&record.name, &record.issuer);
        Self {
            issuer,
            account_name,
            secret: totp::encode_secret(&record.secret),
            algorithm: record.algorithm.clone(),
            digits: record.digits,
            period: DEFAULT_PERIOD,
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn split_label(name: &str, explicit_issuer: &str) -> (Option<String>, String) {
    match name.split_once(':') {
        Some((prefix, account)) => (
            non_empty(explicit_issuer).or_else(|| non_empty(prefix)),
            account.trim().to_string(),
        ),
        None => (non_empty(explicit_issuer), name.trim().to_string()),
    }
}

fn migration_error(msg: impl Into<String>) -> VaultError {
    VaultError::Migration(msg.into())
}

/// Decode an `otpauth-migration://offline?data=…` URI.
pub fn decode_migration_uri(uri: &str) -> Result<Vec<MigrationRecord>> {
    let url = Url::parse(uri.trim()).map_err(|e| migration_error(format!("bad URI: {e}")))?;
    if url.scheme() != MIGRATION_SCHEME {
        return Err(migration_error(format!(
            "expected {MIGRATION_SCHEME}:// scheme, got {}",
            url.scheme()
        )));
    }

    let data = url
        .query_pairs()
        .find(|(key, _)| key == "data")
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| migration_error("missing data parameter"))?;

    // Form decoding turns a literal '+' into a space.
    let data = data.replace(' ', "+");

    let bytes = LENIENT_STANDARD
        .decode(&data)
        .or_else(|_| LENIENT_URL_SAFE.decode(&data))
        .map_err(|e| migration_error(format!("data is not base64: {e}")))?;

    let payload = MigrationPayload::decode(bytes.as_slice())
        .map_err(|e| migration_error(format!("payload decode failed: {e}")))?;

    Ok(payload
        .otp_parameters
        .into_iter()
        .map(MigrationRecord::from)
        .collect())
}

/// Encode records as an `otpauth-migration://` URI (single batch).
pub fn encode_migration_uri(records: &[MigrationRecord]) -> String {
    let payload = MigrationPayload {
        otp_parameters: records.iter().map(OtpParameters::from).collect(),
        version: 1,
        batch_size: 1,
        batch_index: 0,
        batch_id: 0,
    };

    let data = STANDARD.encode(payload.encode_to_vec());
    let encoded: String = url::form_urlencoded::byte_serialize(data.as_bytes()).collect();
    format!("{MIGRATION_SCHEME}://offline?data={encoded}")
}

/// Parse a single `otpauth://totp/…` URI.
pub fn parse_otpauth_uri(uri: &str) -> Result<EntryCandidate> {
    let url = Url::parse(uri.trim()).map_err(|e| migration_error(format!("bad URI: {e}")))?;
    if url.scheme() != OTPAUTH_SCHEME {
        return Err(migration_error(format!(
            "expected {OTPAUTH_SCHEME}:// scheme, got {}",
            url.scheme()
        )));
    }
    match url.host_str() {
        Some(kind) if kind.eq_ignore_ascii_case("totp") => {}
        Some(kind) => return Err(migration_error(format!("unsupported OTP type {kind}"))),
        None => return Err(migration_error("missing OTP type")),
    }

    let label = percent_decode_str(url.path().trim_start_matches('/'))
        .decode_utf8()
        .map_err(|e| migration_error(format!("label is not UTF-8: {e}")))?
        .into_owned();

    let mut secret = None;
    let mut issuer = String::new();
    let mut algorithm = Algorithm::Sha1;
    let mut digits = DEFAULT_DIGITS;
    let mut period = DEFAULT_PERIOD;

    for (key, value) in url.query_pairs() {
        match &*key {
            "secret" => secret = Some(value.replace(' ', "")),
            "issuer" => issuer = value.into_owned(),
            "algorithm" => algorithm = Algorithm::from(&*value),
            "digits" => {
                digits = value
                    .parse()
                    .map_err(|_| migration_error(format!("bad digits {value}")))?
            }
            "period" => {
                period = value
                    .parse()
                    .map_err(|_| migration_error(format!("bad period {value}")))?
            }
            _ => {}
        }
    }

    let secret = secret.ok_or_else(|| migration_error("missing secret parameter"))?;
    let (issuer, account_name) = split_label(&label, &issuer);

    Ok(EntryCandidate {
        issuer,
        account_name,
        secret,
        algorithm,
        digits,
        period,
    })
}
