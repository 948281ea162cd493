//! HMAC-SHA256 payload signing and endpoint secret generation.
//!
//! Signatures have the form `sha256=<lowercase hex>` and are computed over the
//! exact payload bytes with the endpoint's hex secret as the HMAC key. The
//! same payload and secret always yield the same signature, so every retry of
//! a delivery carries an identical header.

use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, TryRngCore};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Prefix identifying the signature scheme.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Default header carrying the signature.
pub const DEFAULT_SIGNATURE_HEADER: &str = "X-HomeChef-Signature";

/// Number of random bytes in an endpoint secret.
pub const SECRET_BYTES: usize = 32;

/// Signing and secret generation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    /// The HMAC key could not be initialised.
    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    /// The operating system RNG failed. Endpoints cannot be minted.
    #[error("secure random number generator unavailable: {0}")]
    RngUnavailable(String),
}

/// Signs `payload` with `secret`, returning `sha256=<hex>`.
///
/// # Errors
///
/// Returns `SigningError::InvalidKey` if the MAC rejects the key.
pub fn sign(payload: &[u8], secret: &str) -> Result<String, SigningError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
    mac.update(payload);
    Ok(format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes())))
}

/// Verifies a `sha256=<hex>` signature in constant time.
///
/// Malformed signatures (wrong prefix, bad hex, wrong length) never verify.
pub fn verify(signature: &str, payload: &[u8], secret: &str) -> bool {
    let Some(hex_digest) = signature.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Generates a fresh endpoint secret: 32 bytes from the OS RNG, hex encoded.
///
/// # Errors
///
/// Returns `SigningError::RngUnavailable` when the OS RNG fails. There is no
/// fallback to a weaker generator.
pub fn generate_secret() -> Result<String, SigningError> {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.try_fill_bytes(&mut bytes).map_err(|e| SigningError::RngUnavailable(e.to_string()))?;
    Ok(hex::encode(bytes))
}
