//! Webhook signature verification
//!
//! Payloads are authenticated with an HMAC-SHA256 of the raw request
//! body. The header value may carry an optional `sha256=` prefix.
//! Verification goes through `Mac::verify_slice`, which compares in
//! constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::WebhookError;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex signature for a body. Used by tests and outbound
/// webhook calls.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a signature header against the raw body.
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> Result<(), WebhookError> {
    let hex_signature = header.strip_prefix("sha256=").unwrap_or(header);
    let provided = hex::decode(hex_signature)
        .map_err(|_| WebhookError::InvalidSignature("signature is not valid hex".into()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| WebhookError::InvalidSignature("signature mismatch".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let body = br#"{"workflow_name": "echo"}"#;
        let signature = sign("secret", body);
        assert!(verify_signature("secret", body, &signature).is_ok());
    }

    #[test]
    fn test_sha256_prefix_accepted() {
        let body = b"payload";
        let signature = format!("sha256={}", sign("secret", body));
        assert!(verify_signature("secret", body, &signature).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = b"payload";
        let signature = sign("secret", body);
        let err = verify_signature("other", body, &signature).unwrap_err();
        assert!(matches!(err, WebhookError::InvalidSignature(_)));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let signature = sign("secret", b"original");
        assert!(verify_signature("secret", b"tampered", &signature).is_err());
    }

    #[test]
    fn test_non_hex_signature_rejected() {
        let err = verify_signature("secret", b"x", "not-hex!").unwrap_err();
        assert!(matches!(err, WebhookError::InvalidSignature(_)));
    }
}
