//! HMAC-SHA256 signatures for principal assertions forwarded by the auth
//! gateway.

use ring::hmac;

/// Signs `payload` and returns the lowercase hex signature.
pub fn sign(payload: &str, key: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hex::encode(hmac::sign(&key, payload.as_bytes()).as_ref())
}

/// Verifies a hex signature in constant time.
pub fn verify(payload: &str, signature: &str, key: &[u8]) -> bool {
    let Ok(tag) = hex::decode(signature.trim()) else {
        return false;
    };
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::verify(&key, payload.as_bytes(), &tag).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_produces_hex() {
        let signature = sign("payload", b"key");
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_verify_accepts_own_signature() {
        let signature = sign("id:user", b"shared-secret");
        assert!(verify("id:user", &signature, b"shared-secret"));
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let signature = sign("id:user", b"shared-secret");
        assert!(!verify("id:admin", &signature, b"shared-secret"));
        assert!(!verify("id:user", &signature, b"other-secret"));
        assert!(!verify("id:user", "not-hex", b"shared-secret"));
    }
}
