//! Encryption of secure channel settings.
//!
//! Secure fields are sealed per organization: the org key is derived from
//! the master key, and the field name is bound in as associated data so a
//! ciphertext cannot be moved to another org or another field.

#[allow(deprecated)] // upstream generic-array 0.x deprecation
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use base64::Engine;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::models::{
    LiveChannelSecureConfig, SealedSecureConfig, REMOTE_WRITE_PASSWORD, REMOTE_WRITE_USER,
};

/// Nonce size for XChaCha20-Poly1305.
const NONCE_LEN: usize = 24;

/// Poly1305 tag size.
const TAG_LEN: usize = 16;

/// Errors from sealing or opening secure values.
#[derive(Debug, Error)]
pub enum SecretsError {
    /// Encryption or decryption failed (tampered data, wrong key).
    #[error("cipher error: {0}")]
    Cipher(String),

    /// Master key has the wrong size or encoding.
    #[error("invalid master key: {0}")]
    InvalidKey(String),

    /// Stored ciphertext is not valid base64.
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Decrypted value is not UTF-8.
    #[error("decrypted value is not utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Per-organization encryption of secure values.
pub trait SecretsService: Send + Sync {
    /// Encrypt `plaintext` for `field` of a config owned by `org_id`.
    fn encrypt(&self, org_id: i64, field: &str, plaintext: &[u8]) -> Result<Vec<u8>, SecretsError>;

    /// Decrypt a blob produced by [`encrypt`](Self::encrypt) with the same
    /// org and field.
    fn decrypt(&self, org_id: i64, field: &str, ciphertext: &[u8]) -> Result<Vec<u8>, SecretsError>;
}

/// XChaCha20-Poly1305 secrets service.
///
/// Blob layout: `[nonce: 24 bytes][ciphertext + tag]`.
pub struct XChaChaSecrets {
    master: Zeroizing<[u8; 32]>,
}

impl XChaChaSecrets {
    /// Create a service from a raw master key.
    #[must_use]
    pub fn new(master: [u8; 32]) -> Self {
        Self {
            master: Zeroizing::new(master),
        }
    }

    /// Create a service from a base64-encoded 32-byte master key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not valid base64 or not 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, SecretsError> {
        let raw = Zeroizing::new(base64::engine::general_purpose::STANDARD.decode(encoded.trim())?);
        let master: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| SecretsError::InvalidKey(format!("expected 32 bytes, got {}", raw.len())))?;
        Ok(Self::new(master))
    }

    /// Create a service with a random master key.
    ///
    /// Values sealed with it cannot be opened after a restart.
    #[must_use]
    pub fn generate() -> Self {
        let mut master = [0u8; 32];
        rand::rng().fill_bytes(&mut master);
        Self::new(master)
    }

    fn org_key(&self, org_id: i64) -> Zeroizing<[u8; 32]> {
        let mut hasher = Sha256::new();
        hasher.update(self.master.as_slice());
        hasher.update(b"live-channel-secure");
        hasher.update(org_id.to_be_bytes());
        Zeroizing::new(hasher.finalize().into())
    }
}

fn aad(org_id: i64, field: &str) -> Vec<u8> {
    format!("org:{org_id}:{field}").into_bytes()
}

impl SecretsService for XChaChaSecrets {
    #[allow(deprecated)]
    fn encrypt(&self, org_id: i64, field: &str, plaintext: &[u8]) -> Result<Vec<u8>, SecretsError> {
        let key = self.org_key(org_id);
        let cipher = XChaCha20Poly1305::new((&*key).into());

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let aad = aad(org_id, field);
        let ciphertext = cipher
            .encrypt(nonce, Payload {
                msg: plaintext,
                aad: &aad,
            })
            .map_err(|e| SecretsError::Cipher(e.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    #[allow(deprecated)]
    fn decrypt(&self, org_id: i64, field: &str, ciphertext: &[u8]) -> Result<Vec<u8>, SecretsError> {
        if ciphertext.len() < NONCE_LEN + TAG_LEN {
            return Err(SecretsError::Cipher("ciphertext too short".to_string()));
        }

        let (nonce_bytes, ct) = ciphertext.split_at(NONCE_LEN);
        let nonce = XNonce::from_slice(nonce_bytes);
        let key = self.org_key(org_id);
        let cipher = XChaCha20Poly1305::new((&*key).into());

        let aad = aad(org_id, field);
        cipher
            .decrypt(nonce, Payload { msg: ct, aad: &aad })
            .map_err(|e| SecretsError::Cipher(e.to_string()))
    }
}

fn seal_field(
    secrets: &dyn SecretsService,
    org_id: i64,
    field: &str,
    value: &str,
) -> Result<String, SecretsError> {
    let blob = secrets.encrypt(org_id, field, value.as_bytes())?;
    Ok(base64::engine::general_purpose::STANDARD.encode(blob))
}

fn open_field(
    secrets: &dyn SecretsService,
    org_id: i64,
    sealed: &SealedSecureConfig,
    field: &str,
) -> Result<Option<String>, SecretsError> {
    let Some(encoded) = sealed.get(field) else {
        return Ok(None);
    };
    let blob = base64::engine::general_purpose::STANDARD.decode(encoded)?;
    let plain = secrets.decrypt(org_id, field, &blob)?;
    Ok(Some(String::from_utf8(plain)?))
}

/// Encrypt every set field of `secure` into `sealed`, keeping fields that
/// `secure` leaves unset.
///
/// # Errors
///
/// Returns an error if encryption fails.
pub fn seal(
    secrets: &dyn SecretsService,
    org_id: i64,
    secure: &LiveChannelSecureConfig,
    sealed: &mut SealedSecureConfig,
) -> Result<(), SecretsError> {
    if let Some(user) = &secure.remote_write_user {
        sealed.insert(REMOTE_WRITE_USER, seal_field(secrets, org_id, REMOTE_WRITE_USER, user)?);
    }
    if let Some(password) = &secure.remote_write_password {
        sealed.insert(
            REMOTE_WRITE_PASSWORD,
            seal_field(secrets, org_id, REMOTE_WRITE_PASSWORD, password.expose_secret())?,
        );
    }
    Ok(())
}

/// Decrypt sealed settings back to plaintext.
///
/// # Errors
///
/// Returns an error if a field cannot be decoded or decrypted.
pub fn open(
    secrets: &dyn SecretsService,
    org_id: i64,
    sealed: &SealedSecureConfig,
) -> Result<LiveChannelSecureConfig, SecretsError> {
    Ok(LiveChannelSecureConfig {
        remote_write_user: open_field(secrets, org_id, sealed, REMOTE_WRITE_USER)?,
        remote_write_password: open_field(secrets, org_id, sealed, REMOTE_WRITE_PASSWORD)?
            .map(Secret::new),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> XChaChaSecrets {
        XChaChaSecrets::new([0x42u8; 32])
    }

    #[test]
    fn test_decrypt_inverts_encrypt() {
        let secrets = service();
        for value in ["", "svc-user", "p@ss w0rd ✓", &"x".repeat(10_000)] {
            let blob = secrets.encrypt(1, REMOTE_WRITE_USER, value.as_bytes()).unwrap();
            let plain = secrets.decrypt(1, REMOTE_WRITE_USER, &blob).unwrap();
            assert_eq!(plain, value.as_bytes());
        }
    }

    #[test]
    fn test_ciphertext_is_bound_to_org_and_field() {
        let secrets = service();
        let blob = secrets.encrypt(1, REMOTE_WRITE_PASSWORD, b"secret").unwrap();

        assert!(secrets.decrypt(2, REMOTE_WRITE_PASSWORD, &blob).is_err());
        assert!(secrets.decrypt(1, REMOTE_WRITE_USER, &blob).is_err());
    }

    #[test]
    fn test_wrong_master_key_fails() {
        let blob = service().encrypt(1, REMOTE_WRITE_USER, b"secret").unwrap();
        let other = XChaChaSecrets::new([0x43u8; 32]);
        assert!(other.decrypt(1, REMOTE_WRITE_USER, &blob).is_err());
    }

    #[test]
    fn test_too_short_ciphertext_fails() {
        assert!(service()
            .decrypt(1, REMOTE_WRITE_USER, &[0u8; NONCE_LEN + TAG_LEN - 1])
            .is_err());
    }

    #[test]
    fn test_from_base64_requires_32_bytes() {
        let key = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        assert!(XChaChaSecrets::from_base64(&key).is_ok());

        let short = base64::engine::general_purpose::STANDARD.encode([7u8; 16]);
        assert!(matches!(
            XChaChaSecrets::from_base64(&short),
            Err(SecretsError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_open_inverts_seal() {
        let secrets = service();
        let mut sealed = SealedSecureConfig::default();
        let secure = LiveChannelSecureConfig {
            remote_write_user: Some("writer".to_string()),
            remote_write_password: Some(Secret::new("token-123".to_string())),
        };

        seal(&secrets, 5, &secure, &mut sealed).unwrap();
        assert_ne!(sealed.get(REMOTE_WRITE_USER), Some("writer"));

        let opened = open(&secrets, 5, &sealed).unwrap();
        assert_eq!(opened.remote_write_user.as_deref(), Some("writer"));
        assert_eq!(
            opened.remote_write_password.as_ref().map(|p| p.expose_secret().as_str()),
            Some("token-123")
        );
    }

    #[test]
    fn test_seal_keeps_unset_fields() {
        let secrets = service();
        let mut sealed = SealedSecureConfig::default();
        seal(
            &secrets,
            5,
            &LiveChannelSecureConfig {
                remote_write_user: Some("writer".to_string()),
                remote_write_password: Some(Secret::new("old".to_string())),
            },
            &mut sealed,
        )
        .unwrap();

        seal(
            &secrets,
            5,
            &LiveChannelSecureConfig {
                remote_write_user: None,
                remote_write_password: Some(Secret::new("new".to_string())),
            },
            &mut sealed,
        )
        .unwrap();

        let opened = open(&secrets, 5, &sealed).unwrap();
        assert_eq!(opened.remote_write_user.as_deref(), Some("writer"));
        assert_eq!(
            opened.remote_write_password.as_ref().map(|p| p.expose_secret().as_str()),
            Some("new")
        );
    }
}
