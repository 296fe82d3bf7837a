use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::BrokerError;

type HmacSha256 = Hmac<Sha256>;

/// Lifetime of a signed OAuth `state` value, in seconds.
pub const STATE_MAX_AGE_SECS: i64 = 600;

fn new_hmac(key: &[u8]) -> Result<HmacSha256, BrokerError> {
    <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| BrokerError::Crypto(format!("HMAC init failed: {e}")))
}

/// AES-256-GCM for stored tokens, HMAC-SHA256 for the OAuth `state` parameter.
#[derive(Clone)]
pub struct CryptoEngine {
    cipher: Aes256Gcm,
    hmac_key: Vec<u8>,
}

impl CryptoEngine {
    /// Create a new CryptoEngine from base64-encoded keys.
    pub fn new(master_key_b64: &str, hmac_secret_b64: &str) -> Result<Self, BrokerError> {
        let master_key = base64::engine::general_purpose::STANDARD
            .decode(master_key_b64)
            .map_err(|e| BrokerError::Crypto(format!("Invalid MASTER_KEY base64: {e}")))?;

        if master_key.len() != 32 {
            return Err(BrokerError::Crypto(format!(
                "MASTER_KEY must be 32 bytes, got {}",
                master_key.len()
            )));
        }

        let hmac_key = base64::engine::general_purpose::STANDARD
            .decode(hmac_secret_b64)
            .map_err(|e| BrokerError::Crypto(format!("Invalid HMAC_SECRET base64: {e}")))?;

        let cipher = Aes256Gcm::new_from_slice(&master_key)
            .map_err(|e| BrokerError::Crypto(format!("Failed to init AES cipher: {e}")))?;

        Ok(Self { cipher, hmac_key })
    }

    /// Returns base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, BrokerError> {
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| BrokerError::Crypto(format!("Encryption failed: {e}")))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
    }

    pub fn decrypt(&self, encrypted_b64: &str) -> Result<String, BrokerError> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encrypted_b64)
            .map_err(|e| BrokerError::Crypto(format!("Invalid base64: {e}")))?;

        if combined.len() < 12 {
            return Err(BrokerError::Crypto("Ciphertext too short".into()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| BrokerError::Crypto(format!("Decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| BrokerError::Crypto(format!("Invalid UTF-8 after decrypt: {e}")))
    }

    /// Signed `state` for the authorize redirect, carrying the issue time.
    pub fn issue_state(&self, now: i64) -> Result<String, BrokerError> {
        let mut nonce = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut nonce);
        let payload = format!(
            "{now}:{}",
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(nonce)
        );
        self.sign(&payload)
    }

    /// Checks the signature and the age of a `state` produced by [`issue_state`].
    ///
    /// [`issue_state`]: CryptoEngine::issue_state
    pub fn verify_state(&self, signed: &str, now: i64) -> Result<(), BrokerError> {
        let payload = self.verify(signed)?;
        let issued: i64 = payload
            .split(':')
            .next()
            .and_then(|ts| ts.parse().ok())
            .ok_or_else(|| BrokerError::BadRequest("malformed state parameter".into()))?;

        if now - issued > STATE_MAX_AGE_SECS || issued > now {
            return Err(BrokerError::BadRequest("OAuth session expired".into()));
        }
        Ok(())
    }

    /// base64(hmac || payload)
    fn sign(&self, payload: &str) -> Result<String, BrokerError> {
        let mut mac = new_hmac(&self.hmac_key)?;
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();

        let mut combined = signature.to_vec();
        combined.extend_from_slice(payload.as_bytes());

        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&combined))
    }

    fn verify(&self, signed: &str) -> Result<String, BrokerError> {
        let invalid = || BrokerError::BadRequest("invalid state parameter".into());

        let combined = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signed)
            .map_err(|_| invalid())?;

        if combined.len() < 32 {
            return Err(invalid());
        }

        let (signature, payload_bytes) = combined.split_at(32);

        let mut mac = new_hmac(&self.hmac_key)?;
        mac.update(payload_bytes);
        mac.verify_slice(signature).map_err(|_| invalid())?;

        String::from_utf8(payload_bytes.to_vec()).map_err(|_| invalid())
    }
}

#[cfg(test)]
pub(crate) fn test_engine() -> CryptoEngine {
    let key = base64::engine::general_purpose::STANDARD.encode([0x42u8; 32]);
    let hmac = base64::engine::general_purpose::STANDARD.encode([0x43u8; 32]);
    CryptoEngine::new(&key, &hmac).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let engine = test_engine();
        let token = "eyJhbGciOiJIUzI1NiJ9.location-token";
        let encrypted = engine.encrypt(token).unwrap();
        assert_ne!(encrypted, token);
        assert_eq!(engine.decrypt(&encrypted).unwrap(), token);
    }

    #[test]
    fn test_rejects_short_master_key() {
        let key = base64::engine::general_purpose::STANDARD.encode([1u8; 16]);
        let hmac = base64::engine::general_purpose::STANDARD.encode([2u8; 32]);
        assert!(CryptoEngine::new(&key, &hmac).is_err());
    }

    #[test]
    fn test_state_accepted_within_window() {
        let engine = test_engine();
        let state = engine.issue_state(1_700_000_000).unwrap();
        assert!(engine.verify_state(&state, 1_700_000_300).is_ok());
    }

    #[test]
    fn test_state_expires() {
        let engine = test_engine();
        let state = engine.issue_state(1_700_000_000).unwrap();
        assert!(engine
            .verify_state(&state, 1_700_000_000 + STATE_MAX_AGE_SECS + 1)
            .is_err());
    }

    #[test]
    fn test_state_tamper_detection() {
        let engine = test_engine();
        let state = engine.issue_state(1_700_000_000).unwrap();
        let tampered = format!("{state}X");
        assert!(engine.verify_state(&tampered, 1_700_000_001).is_err());
    }
}
