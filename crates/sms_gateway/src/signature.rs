//! Status callback signature verification using HMAC-SHA1.
//!
//! The provider signs every callback with the account auth token. The signed
//! payload is the exact callback URL followed by every form parameter, sorted
//! by name, with each name immediately followed by its value. The base64
//! encoded digest is sent in the `X-Twilio-Signature` header.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Header carrying the callback signature.
pub const SIGNATURE_HEADER: &str = "X-Twilio-Signature";

fn signed_payload(url: &str, params: &[(String, String)]) -> Vec<u8> {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();

    let mut payload = url.as_bytes().to_vec();
    for (name, value) in sorted {
        payload.extend_from_slice(name.as_bytes());
        payload.extend_from_slice(value.as_bytes());
    }
    payload
}

/// Computes the raw HMAC-SHA1 digest for a callback.
pub fn compute_signature(
    url: &str,
    params: &[(String, String)],
    secret: &[u8],
) -> Result<Vec<u8>, InvalidLength> {
    let mut mac = HmacSha1::new_from_slice(secret)?;
    mac.update(&signed_payload(url, params));
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Formats a digest as a header value.
pub fn format_signature_header(signature: &[u8]) -> String {
    STANDARD.encode(signature)
}

/// Verifies a callback signature header.
///
/// Returns `false` for malformed headers instead of failing. The comparison
/// is constant time.
pub fn verify_signature(
    url: &str,
    params: &[(String, String)],
    signature_header: &str,
    secret: &[u8],
) -> bool {
    let expected = match STANDARD.decode(signature_header.trim()) {
        Ok(sig) => sig,
        Err(_) => return false,
    };

    let mut mac = match HmacSha1::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(&signed_payload(url, params));

    mac.verify_slice(&expected).is_ok()
}
