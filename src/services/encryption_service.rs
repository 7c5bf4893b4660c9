use crate::error::{AppError, Result};
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Decrypts one `nonce(12) || ciphertext || tag(16)` frame with AES-256-GCM.
///
/// No associated data is authenticated. Nothing is returned unless the tag verifies.
pub fn decrypt_chunk(key: &[u8], frame: &[u8]) -> Result<Vec<u8>> {
    if key.len() != KEY_LEN {
        return Err(AppError::Crypto(format!(
            "Invalid key length {}, expected {} bytes for AES-256",
            key.len(),
            KEY_LEN
        )));
    }
    if frame.len() < NONCE_LEN + TAG_LEN {
        return Err(AppError::Crypto("Encrypted data is too short".to_string()));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| AppError::Crypto(format!("Invalid key: {}", e)))?;
    let (nonce, ciphertext_with_tag) = frame.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext_with_tag)
        .map_err(|_| AppError::Crypto("Authentication tag mismatch".to_string()))
}

/// Per-connection AES keys.
#[derive(Clone, Default)]
pub struct EncryptionService {
    keys: Arc<RwLock<HashMap<String, [u8; KEY_LEN]>>>,
}

impl EncryptionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_key_base64(&self, connection_id: &str, key_base64: &str) -> Result<()> {
        let bytes = BASE64
            .decode(key_base64.trim())
            .map_err(|e| AppError::Crypto(format!("Invalid base64 key: {}", e)))?;
        self.set_key(connection_id, &bytes)
    }

    pub fn set_key(&self, connection_id: &str, key: &[u8]) -> Result<()> {
        let key: [u8; KEY_LEN] = key.try_into().map_err(|_| {
            AppError::Crypto(format!(
                "Invalid key length {}, expected {} bytes for AES-256",
                key.len(),
                KEY_LEN
            ))
        })?;
        self.write_keys().insert(connection_id.to_string(), key);
        tracing::debug!("Encryption key registered for {}", connection_id);
        Ok(())
    }

    #[cfg(test)]
    pub fn has_key(&self, connection_id: &str) -> bool {
        self.read_keys().contains_key(connection_id)
    }

    pub fn decrypt(&self, connection_id: &str, frame: &[u8]) -> Result<Vec<u8>> {
        let key = self
            .read_keys()
            .get(connection_id)
            .copied()
            .ok_or_else(|| AppError::Crypto("Encryption key not found for connection".to_string()))?;
        decrypt_chunk(&key, frame)
    }

    pub fn remove_key(&self, connection_id: &str) {
        self.write_keys().remove(connection_id);
    }

    fn read_keys(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, [u8; KEY_LEN]>> {
        self.keys.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_keys(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, [u8; KEY_LEN]>> {
        self.keys.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Reference sealer producing the wire frame layout.
    pub(crate) fn seal(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Vec<u8> {
        let cipher = Aes256Gcm::new_from_slice(key).unwrap();
        let sealed = cipher.encrypt(Nonce::from_slice(nonce), plaintext).unwrap();
        let mut frame = nonce.to_vec();
        frame.extend_from_slice(&sealed);
        frame
    }

    #[test]
    fn round_trips_sealed_frames() {
        let key = [7u8; KEY_LEN];
        let cases: [&[u8]; 4] = [b"", b"a", b"hello chunk", &[0xAB; 4096]];
        for (i, plaintext) in cases.iter().enumerate() {
            let nonce = [i as u8; NONCE_LEN];
            let frame = seal(&key, &nonce, plaintext);
            assert_eq!(decrypt_chunk(&key, &frame).unwrap(), *plaintext);
        }
    }

    #[test]
    fn any_flipped_bit_is_rejected() {
        let key = [3u8; KEY_LEN];
        let frame = seal(&key, b"unique_nonce", b"payload bytes");
        for index in NONCE_LEN..frame.len() {
            for bit in [0x01u8, 0x80] {
                let mut tampered = frame.clone();
                tampered[index] ^= bit;
                assert!(matches!(
                    decrypt_chunk(&key, &tampered),
                    Err(AppError::Crypto(_))
                ));
            }
        }
    }

    #[test]
    fn rejects_short_frames_and_bad_keys() {
        let key = [1u8; KEY_LEN];
        assert!(matches!(decrypt_chunk(&key, &[0u8; 27]), Err(AppError::Crypto(_))));
        let frame = seal(&key, &[0u8; NONCE_LEN], b"x");
        assert!(matches!(decrypt_chunk(&key[..16], &frame), Err(AppError::Crypto(_))));
        assert!(matches!(decrypt_chunk(&[2u8; KEY_LEN], &frame), Err(AppError::Crypto(_))));
    }

    #[test]
    fn service_requires_a_key_per_connection() {
        let service = EncryptionService::new();
        let key = [9u8; KEY_LEN];
        let frame = seal(&key, &[5u8; NONCE_LEN], b"data");
        assert!(service.decrypt("conn", &frame).is_err());

        service.set_key_base64("conn", &BASE64.encode(key)).unwrap();
        assert_eq!(service.decrypt("conn", &frame).unwrap(), b"data");
        assert!(service.decrypt("other", &frame).is_err());

        service.remove_key("conn");
        assert!(!service.has_key("conn"));
    }

    #[test]
    fn rejects_keys_of_wrong_length() {
        let service = EncryptionService::new();
        assert!(service.set_key_base64("conn", &BASE64.encode([0u8; 16])).is_err());
        assert!(service.set_key_base64("conn", "not base64!").is_err());
        assert!(!service.has_key("conn"));
    }
}
