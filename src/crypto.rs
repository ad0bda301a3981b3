// Snapshot field encryption
// Passphrase AES compatible with the AList web client (crypto-js):
// OpenSSL EVP_BytesToKey (MD5) + AES-256-CBC/PKCS#7 in "Salted__" framing,
// base64-encoded, then base64-encoded once more for transport.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use md5::{Digest, Md5};
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::snapshot::FieldValue;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// OpenSSL "Salted__" prefix
const SALTED_PREFIX: &[u8] = b"Salted__";
const BLOCK_SIZE: usize = 16;

/// Plain value encrypted into the snapshot marker
pub const SENTINEL: &str = "encrypted";

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Ciphertext is not valid UTF-8 text")]
    Utf8,
    #[error("Missing OpenSSL Salted__ prefix")]
    MissingSaltPrefix,
    #[error("Ciphertext not aligned to block size")]
    Misaligned,
    #[error("AES-CBC encryption failed: {0}")]
    Encrypt(String),
    #[error("AES-CBC decryption failed: {0}")]
    Decrypt(String),
    #[error("Decrypted value is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Encrypted field must be a string")]
    NotText,
}

/// Derive AES-256 key and IV from passphrase + salt using 3 rounds of MD5
/// (OpenSSL EVP_BytesToKey, one iteration)
fn openssl_key_iv(secret: &[u8], salt: &[u8]) -> ([u8; 32], [u8; 16]) {
    let mut digests: Vec<Vec<u8>> = Vec::with_capacity(3);
    for i in 0..3 {
        let mut hasher = Md5::new();
        if i > 0 {
            hasher.update(&digests[i - 1]);
        }
        hasher.update(secret);
        hasher.update(salt);
        digests.push(hasher.finalize().to_vec());
    }

    let mut key = [0u8; 32];
    key[..16].copy_from_slice(&digests[0]);
    key[16..].copy_from_slice(&digests[1]);
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&digests[2]);
    (key, iv)
}

/// Encrypt plaintext to base64("Salted__" || salt || ciphertext)
fn seal_text(plaintext: &str, passphrase: &str) -> Result<String, CryptoError> {
    let mut salt = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut salt);
    let (key, iv) = openssl_key_iv(passphrase.as_bytes(), &salt);

    let encryptor = Aes256CbcEnc::new_from_slices(&key, &iv)
        .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

    let padding_len = BLOCK_SIZE - (plaintext.len() % BLOCK_SIZE);
    let mut buf = vec![0u8; plaintext.len() + padding_len];
    buf[..plaintext.len()].copy_from_slice(plaintext.as_bytes());
    let sealed = encryptor
        .encrypt_padded_mut::<Pkcs7>(&mut buf, plaintext.len())
        .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

    let mut framed = Vec::with_capacity(SALTED_PREFIX.len() + salt.len() + sealed.len());
    framed.extend_from_slice(SALTED_PREFIX);
    framed.extend_from_slice(&salt);
    framed.extend_from_slice(sealed);
    Ok(BASE64.encode(framed))
}

/// Decrypt base64("Salted__" || salt || ciphertext) back to text
fn open_text(sealed_b64: &str, passphrase: &str) -> Result<String, CryptoError> {
    let framed = BASE64.decode(sealed_b64.trim())?;
    if framed.len() < 16 || &framed[..8] != SALTED_PREFIX {
        return Err(CryptoError::MissingSaltPrefix);
    }
    let salt = &framed[8..16];
    let ciphertext = &framed[16..];
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::Misaligned);
    }

    let (key, iv) = openssl_key_iv(passphrase.as_bytes(), salt);
    let decryptor = Aes256CbcDec::new_from_slices(&key, &iv)
        .map_err(|e| CryptoError::Decrypt(e.to_string()))?;

    let mut buf = ciphertext.to_vec();
    let plain = decryptor
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|e| CryptoError::Decrypt(e.to_string()))?;

    String::from_utf8(plain.to_vec()).map_err(|_| CryptoError::Utf8)
}

/// Undo the outer transport base64 layer
fn unwrap_transport(value: &FieldValue) -> Result<String, CryptoError> {
    let FieldValue::Text(outer) = value else {
        return Err(CryptoError::NotText);
    };
    let inner = BASE64.decode(outer.trim())?;
    String::from_utf8(inner).map_err(|_| CryptoError::Utf8)
}

/// Encrypt a single field value. An empty passphrase leaves the value untouched.
pub fn encrypt_value(value: &FieldValue, passphrase: &str) -> Result<FieldValue, CryptoError> {
    if passphrase.is_empty() {
        return Ok(value.clone());
    }
    let json = serde_json::to_string(value)?;
    let inner = seal_text(&json, passphrase)?;
    Ok(FieldValue::Text(BASE64.encode(inner.as_bytes())))
}

/// Decrypt a field to its raw plaintext (the JSON text that was encrypted)
pub fn decrypt_raw(value: &FieldValue, passphrase: &str) -> Result<String, CryptoError> {
    let inner = unwrap_transport(value)?;
    open_text(&inner, passphrase)
}

/// Decrypt a field back to its structured value. When the snapshot is not
/// encrypted the value is returned as-is.
pub fn decrypt_value(
    value: &FieldValue,
    passphrase: &str,
    encrypted: bool,
) -> Result<FieldValue, CryptoError> {
    if !encrypted {
        return Ok(value.clone());
    }
    let text = decrypt_raw(value, passphrase)?;
    Ok(serde_json::from_str(&text)?)
}

/// Build the snapshot marker for a passphrase; `None` when not encrypting.
pub fn make_marker(passphrase: &str) -> Result<Option<String>, CryptoError> {
    if passphrase.is_empty() {
        return Ok(None);
    }
    match encrypt_value(&FieldValue::Text(SENTINEL.to_string()), passphrase)? {
        FieldValue::Text(marker) => Ok(Some(marker)),
        _ => Err(CryptoError::NotText),
    }
}

/// Check a snapshot marker against a passphrase.
/// The raw plaintext must equal the quoted sentinel `"encrypted"`.
pub fn verify_marker(marker: &str, passphrase: &str) -> bool {
    let expected = format!("\"{SENTINEL}\"");
    match decrypt_raw(&FieldValue::Text(marker.to_string()), passphrase) {
        Ok(plain) => plain.as_bytes().ct_eq(expected.as_bytes()).into(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // Produced by crypto-js (OpenSSL-compatible) with passphrase "hunter2"
    const MARKER_HUNTER2: &str =
        "VTJGc2RHVmtYMThCQWdNRUJRWUhDRElKVjl6ZXkvYlNndlFKRDFTbjFFaz0=";
    const ALICE_HUNTER2: &str =
        "VTJGc2RHVmtYMThSSWpORVZXWjNpRGFZTTRBcEJUaEROZEw0ZU9WWlVzZz0=";

    #[test]
    fn test_empty_passphrase_is_passthrough() {
        let value = FieldValue::from(json!(42));
        assert_eq!(encrypt_value(&value, "").unwrap(), value);
        assert_eq!(make_marker("").unwrap(), None);
    }

    #[test]
    fn test_roundtrip_preserves_value_types() {
        for raw in [json!("alice"), json!(7), json!(true), json!(null), json!([1, 2]), json!({"path": "/", "permission": 3})] {
            let value = FieldValue::from(raw);
            let sealed = encrypt_value(&value, "p@ss").unwrap();
            assert!(matches!(sealed, FieldValue::Text(_)));
            assert_ne!(sealed, value);
            assert_eq!(decrypt_value(&sealed, "p@ss", true).unwrap(), value);
        }
    }

    #[test]
    fn test_decrypt_unencrypted_is_passthrough() {
        let value = FieldValue::Text("plain".into());
        assert_eq!(decrypt_value(&value, "anything", false).unwrap(), value);
    }

    #[test]
    fn test_marker_verification() {
        let marker = make_marker("secret").unwrap().unwrap();
        assert!(verify_marker(&marker, "secret"));
        assert!(!verify_marker(&marker, "Secret"));
        assert!(!verify_marker(&marker, ""));
        assert!(!verify_marker("not-base64!", "secret"));
    }

    #[test]
    fn test_reads_crypto_js_output() {
        assert!(verify_marker(MARKER_HUNTER2, "hunter2"));
        assert!(!verify_marker(MARKER_HUNTER2, "hunter3"));

        let alice = FieldValue::Text(ALICE_HUNTER2.into());
        assert_eq!(decrypt_raw(&alice, "hunter2").unwrap(), "\"alice\"");
        assert_eq!(
            decrypt_value(&alice, "hunter2", true).unwrap(),
            FieldValue::Text("alice".into())
        );
    }

    #[test]
    fn test_output_uses_salted_framing() {
        let sealed = encrypt_value(&FieldValue::Text("x".into()), "k").unwrap();
        let inner = unwrap_transport(&sealed).unwrap();
        // base64("Salted__") prefix
        assert!(inner.starts_with("U2FsdGVkX1"));
    }

    #[test]
    fn test_non_text_field_cannot_be_decrypted() {
        let err = decrypt_value(&FieldValue::from(json!(3)), "k", true).unwrap_err();
        assert!(matches!(err, CryptoError::NotText));
    }
}
