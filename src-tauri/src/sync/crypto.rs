// Optional end-to-end encryption of the sync payload.
// AES-256-GCM with a PBKDF2-SHA256 derived key; the same passphrase entered
// on every device decrypts the remote payload.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

use super::SyncError;

/// Prefix marking an encrypted payload so download can detect it.
const ENVELOPE_TAG: &str = "BGENC1:";

const SALT_LENGTH: usize = 16;
const NONCE_LENGTH: usize = 12;
const KEY_LENGTH: usize = 32;
const PBKDF2_ITERATIONS: u32 = 210_000;

/// Encrypt a payload with a passphrase.
/// Envelope: `BGENC1:` + base64(salt (16) + nonce (12) + ciphertext).
pub fn encrypt_payload(plaintext: &str, passphrase: &str) -> Result<String, SyncError> {
    let mut salt = [0u8; SALT_LENGTH];
    OsRng.fill_bytes(&mut salt);

    let key = derive_key(passphrase, &salt);

    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| SyncError::Payload(format!("cipher creation failed: {}", e)))?;

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| SyncError::Payload(format!("encryption failed: {}", e)))?;

    let mut combined = Vec::with_capacity(SALT_LENGTH + NONCE_LENGTH + ciphertext.len());
    combined.extend_from_slice(&salt);
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    use base64::Engine;
    Ok(format!(
        "{}{}",
        ENVELOPE_TAG,
        base64::engine::general_purpose::STANDARD.encode(&combined)
    ))
}

/// Decrypt an envelope produced by `encrypt_payload`.
pub fn decrypt_payload(envelope: &str, passphrase: &str) -> Result<String, SyncError> {
    let encoded = envelope
        .strip_prefix(ENVELOPE_TAG)
        .ok_or_else(|| SyncError::Payload("payload is not encrypted".to_string()))?;

    use base64::Engine;
    let combined = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| SyncError::Payload(format!("base64 decode failed: {}", e)))?;

    if combined.len() < SALT_LENGTH + NONCE_LENGTH {
        return Err(SyncError::Payload("encrypted payload too short".to_string()));
    }

    let salt = &combined[..SALT_LENGTH];
    let nonce_bytes = &combined[SALT_LENGTH..SALT_LENGTH + NONCE_LENGTH];
    let ciphertext = &combined[SALT_LENGTH + NONCE_LENGTH..];

    let key = derive_key(passphrase, salt);

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| SyncError::Payload(format!("cipher creation failed: {}", e)))?;

    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| SyncError::Payload("decryption failed: wrong passphrase or corrupted data".to_string()))?;

    String::from_utf8(plaintext).map_err(|e| SyncError::Payload(format!("utf-8 decode failed: {}", e)))
}

/// True when the string carries the encryption envelope tag.
pub fn is_encrypted(payload: &str) -> bool {
    payload.starts_with(ENVELOPE_TAG)
}

fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; KEY_LENGTH] {
    let mut key = [0u8; KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}
