//! Secret encryption for provider API keys.
//!
//! [`SecretCipher`] derives a 256-bit key from the operator-supplied
//! `APP_SECRET_KEY` (SHA-256) and wraps plaintext secrets with
//! ChaCha20-Poly1305. Tokens are `base64(nonce || ciphertext)`, so each
//! encryption of the same value produces a different token.
//!
//! [`ApiKey`] keeps a decrypted key usable in memory while making accidental
//! logging harmless: both `Debug` and `Display` render `***`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use sha2::{Digest, Sha256};

use crate::error::CoreError;

/// Length of the ChaCha20-Poly1305 nonce prefixed to each token.
const NONCE_LEN: usize = 12;

/// Encrypts and decrypts sensitive strings using a derived key.
pub struct SecretCipher {
    cipher: ChaCha20Poly1305,
}

impl SecretCipher {
    /// Build a cipher from the operator secret.
    ///
    /// Fails with [`CoreError::Config`] when the secret is empty.
    pub fn new(secret: &str) -> Result<Self, CoreError> {
        if secret.is_empty() {
            return Err(CoreError::Config(
                "APP_SECRET_KEY is required for encryption".into(),
            ));
        }
        let digest = Sha256::digest(secret.as_bytes());
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&digest));
        Ok(Self { cipher })
    }

    /// Encrypt a plain string into a base64 token.
    pub fn encrypt(&self, value: &str) -> String {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        // Encryption with a valid key and nonce cannot fail for in-memory data.
        let ciphertext = self
            .cipher
            .encrypt(&nonce, value.as_bytes())
            .unwrap_or_default();
        let mut token = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&ciphertext);
        BASE64.encode(token)
    }

    /// Decrypt a previously encrypted token.
    ///
    /// Any tampering or key mismatch is a hard [`CoreError::Config`] error:
    /// a stored secret that no longer decrypts must surface to the operator.
    pub fn decrypt(&self, token: &str) -> Result<String, CoreError> {
        let raw = BASE64
            .decode(token)
            .map_err(|_| CoreError::Config("Failed to decrypt provider secret".into()))?;
        if raw.len() <= NONCE_LEN {
            return Err(CoreError::Config("Failed to decrypt provider secret".into()));
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CoreError::Config("Failed to decrypt provider secret".into()))?;
        String::from_utf8(plaintext)
            .map_err(|_| CoreError::Config("Failed to decrypt provider secret".into()))
    }
}

// ---------------------------------------------------------------------------
// ApiKey
// ---------------------------------------------------------------------------

/// A decrypted provider API key.
///
/// The wrapper exists so the plaintext never reaches a log sink through
/// formatting: `{:?}` and `{}` both print `***`. Call
/// [`expose`](ApiKey::expose) at the single point the key is placed into an
/// outbound request.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The plaintext key, for building provider auth headers only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("***")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("***")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let cipher = SecretCipher::new("unit-test-secret").unwrap();
        let token = cipher.encrypt("sk-abc123");
        assert_ne!(token, "sk-abc123");
        assert_eq!(cipher.decrypt(&token).unwrap(), "sk-abc123");
    }

    #[test]
    fn tokens_are_nondeterministic() {
        let cipher = SecretCipher::new("unit-test-secret").unwrap();
        assert_ne!(cipher.encrypt("same"), cipher.encrypt("same"));
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let token = SecretCipher::new("key-one").unwrap().encrypt("value");
        let other = SecretCipher::new("key-two").unwrap();
        assert!(matches!(other.decrypt(&token), Err(CoreError::Config(_))));
    }

    #[test]
    fn tampered_token_fails_decryption() {
        let cipher = SecretCipher::new("unit-test-secret").unwrap();
        assert!(cipher.decrypt("not-base64!!!").is_err());
        assert!(cipher.decrypt("").is_err());
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(matches!(SecretCipher::new(""), Err(CoreError::Config(_))));
    }

    #[test]
    fn api_key_formatting_is_redacted() {
        let key = ApiKey::new("sk-super-secret");
        assert_eq!(format!("{key}"), "***");
        assert_eq!(format!("{key:?}"), "***");
        assert_eq!(key.expose(), "sk-super-secret");
    }
}
