//! Request signing for webhook deliveries.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Agent-Signature";

/// Canonical encoding of a payload: compact JSON with object keys sorted.
///
/// `serde_json::Value` objects are backed by a `BTreeMap`, so converting
/// through `Value` sorts keys at every nesting level.
pub fn canonical_json<T: serde::Serialize>(payload: &T) -> serde_json::Result<String> {
    let value = serde_json::to_value(payload)?;
    serde_json::to_string(&value)
}

/// Header value `sha256=<hex hmac>` over `body`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("hmac key of any length is valid"),
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a received signature header against `body`.
pub fn verify(secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(hex_sig) = header_value.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
