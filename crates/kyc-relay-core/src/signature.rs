//! Webhook signature validation.
//!
//! The provider signs every webhook body with a shared secret and sends the
//! result in a header. Two formats are accepted:
//!
//! | Header value | Algorithm | Encoding |
//! |--------------|-----------|----------|
//! | `sha256=<hex>` (prefix case-insensitive) | HMAC-SHA256 | hex |
//! | anything else | HMAC-SHA1 (legacy) | base64 |
//!
//! Signatures are always computed over the exact bytes received. Parsing and
//! re-serializing the JSON first produces false negatives.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

const SHA256_PREFIX: &str = "sha256=";

// ============================================================================
// Secret
// ============================================================================

/// Shared webhook signing secret. Redacted in `Debug`, zeroized on drop.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct WebhookSecret {
    value: String,
}

impl WebhookSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// An unset secret disables signature checks
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn expose(&self) -> &[u8] {
        self.value.as_bytes()
    }
}

impl std::fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSecret")
            .field("value", &"<REDACTED>")
            .field("is_empty", &self.is_empty())
            .finish()
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Algorithm selected from the header format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    HmacSha256,
    LegacyHmacSha1,
}

/// Why a signature was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureRejection {
    MissingHeader,
    /// `sha256=` prefix followed by something that is not hex
    InvalidEncoding,
    Mismatch(SignatureScheme),
}

impl SignatureRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingHeader => "missing_header",
            Self::InvalidEncoding => "invalid_encoding",
            Self::Mismatch(_) => "mismatch",
        }
    }
}

/// Detailed result of a signature check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    Verified(SignatureScheme),
    /// No secret configured; the body was accepted without verification
    Unsigned,
    Rejected(SignatureRejection),
}

impl SignatureCheck {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Verified(_) | Self::Unsigned)
    }
}

/// Check `signature_header` against `raw_body`.
///
/// An empty secret accepts every request and logs a warning.
pub fn check(
    secret: &WebhookSecret,
    raw_body: &[u8],
    signature_header: Option<&str>,
) -> SignatureCheck {
    if secret.is_empty() {
        warn!("Webhook signing secret is not configured; accepting request without signature verification");
        return SignatureCheck::Unsigned;
    }

    let header = match signature_header {
        Some(header) if !header.is_empty() => header,
        _ => return SignatureCheck::Rejected(SignatureRejection::MissingHeader),
    };

    match strip_sha256_prefix(header) {
        Some(hex_digest) => check_sha256(secret, raw_body, hex_digest),
        None => check_legacy_sha1(secret, raw_body, header),
    }
}

/// Whether `signature_header` is a valid signature of `raw_body` under `secret`
pub fn validate(secret: &WebhookSecret, raw_body: &[u8], signature_header: Option<&str>) -> bool {
    check(secret, raw_body, signature_header).is_accepted()
}

fn strip_sha256_prefix(header: &str) -> Option<&str> {
    let prefix = header.get(..SHA256_PREFIX.len())?;
    if prefix.eq_ignore_ascii_case(SHA256_PREFIX) {
        header.get(SHA256_PREFIX.len()..)
    } else {
        None
    }
}

fn check_sha256(secret: &WebhookSecret, raw_body: &[u8], hex_digest: &str) -> SignatureCheck {
    let Ok(expected) = hex::decode(hex_digest) else {
        return SignatureCheck::Rejected(SignatureRejection::InvalidEncoding);
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.expose()) else {
        return SignatureCheck::Rejected(SignatureRejection::Mismatch(SignatureScheme::HmacSha256));
    };
    mac.update(raw_body);

    match mac.verify_slice(&expected) {
        Ok(()) => SignatureCheck::Verified(SignatureScheme::HmacSha256),
        Err(_) => {
            SignatureCheck::Rejected(SignatureRejection::Mismatch(SignatureScheme::HmacSha256))
        }
    }
}

fn check_legacy_sha1(secret: &WebhookSecret, raw_body: &[u8], header: &str) -> SignatureCheck {
    let Ok(expected) = sign_legacy(secret, raw_body) else {
        return SignatureCheck::Rejected(SignatureRejection::Mismatch(
            SignatureScheme::LegacyHmacSha1,
        ));
    };

    if bool::from(expected.as_bytes().ct_eq(header.as_bytes())) {
        SignatureCheck::Verified(SignatureScheme::LegacyHmacSha1)
    } else {
        SignatureCheck::Rejected(SignatureRejection::Mismatch(SignatureScheme::LegacyHmacSha1))
    }
}

// ============================================================================
// Signing
// ============================================================================

/// Compute a `sha256=<hex>` signature header value for `raw_body`
pub fn sign_sha256(secret: &WebhookSecret, raw_body: &[u8]) -> Result<String, InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret.expose())?;
    mac.update(raw_body);
    Ok(format!(
        "{}{}",
        SHA256_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Compute a legacy base64 HMAC-SHA1 signature header value for `raw_body`
pub fn sign_legacy(secret: &WebhookSecret, raw_body: &[u8]) -> Result<String, InvalidLength> {
    let mut mac = HmacSha1::new_from_slice(secret.expose())?;
    mac.update(raw_body);
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}
