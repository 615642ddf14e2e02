use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `body` keyed with `secret`.
pub fn sign_body(secret: &str, body: &[u8]) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a body signature in constant time.
///
/// Accepts the bare hex digest or the `sha256=<hex>` form, case-insensitive.
pub fn verify_body_signature(
    secret: &str,
    body: &[u8],
    signature: &str,
) -> Result<bool, anyhow::Error> {
    let expected = sign_body(secret, body)?;

    let provided = signature.trim();
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
    let provided = provided.to_ascii_lowercase();

    let expected_bytes = expected.as_bytes();
    let provided_bytes = provided.as_bytes();

    if expected_bytes.len() != provided_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(provided_bytes).into())
}

/// Compare a presented shared token with the configured one in constant time.
pub fn tokens_match(expected: &str, provided: &str) -> bool {
    let expected = expected.as_bytes();
    let provided = provided.trim().as_bytes();
    if expected.is_empty() || expected.len() != provided.len() {
        return false;
    }
    expected.ct_eq(provided).into()
}
