//! AES-CBC payload cipher with PKCS#7 padding
//!
//! Every call to [`encrypt`] draws a fresh 16-byte IV from the OS RNG. The
//! scheme carries no authentication tag, so a wrong key or tampered ciphertext
//! is only detected through padding validation (or later, when the recovered
//! bytes fail to parse).

use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

/// CBC initialization vector size (one AES block).
pub const IV_SIZE: usize = 16;

/// Key size for AES-256, the size issued by default.
pub const AES256_KEY_SIZE: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("Key must not be empty")]
    EmptyKey,
    #[error("Ciphertext must not be empty")]
    EmptyCiphertext,
    #[error("Invalid key length: {0} bytes (expected 16, 24 or 32)")]
    InvalidKeyLength(usize),
    #[error("Invalid IV length: {0} bytes (expected {IV_SIZE})")]
    InvalidIvLength(usize),
    #[error("Ciphertext length {0} is not a multiple of the block size")]
    MisalignedCiphertext(usize),
    #[error("Padding check failed")]
    Padding,
}

/// Encrypt `plaintext` under `key` with a freshly generated IV.
///
/// Returns the IV alongside the ciphertext; the caller must store both.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<([u8; IV_SIZE], Vec<u8>), CipherError> {
    if key.is_empty() {
        return Err(CipherError::EmptyKey);
    }

    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = match key.len() {
        16 => cbc::Encryptor::<Aes128>::new_from_slices(key, &iv)
            .map_err(|_| CipherError::InvalidKeyLength(key.len()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        24 => cbc::Encryptor::<Aes192>::new_from_slices(key, &iv)
            .map_err(|_| CipherError::InvalidKeyLength(key.len()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        32 => cbc::Encryptor::<Aes256>::new_from_slices(key, &iv)
            .map_err(|_| CipherError::InvalidKeyLength(key.len()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        other => return Err(CipherError::InvalidKeyLength(other)),
    };

    Ok((iv, ciphertext))
}

/// Decrypt `ciphertext` produced by [`encrypt`] with the same key and IV.
pub fn decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
    if key.is_empty() {
        return Err(CipherError::EmptyKey);
    }
    if ciphertext.is_empty() {
        return Err(CipherError::EmptyCiphertext);
    }
    if iv.len() != IV_SIZE {
        return Err(CipherError::InvalidIvLength(iv.len()));
    }
    if ciphertext.len() % IV_SIZE != 0 {
        return Err(CipherError::MisalignedCiphertext(ciphertext.len()));
    }

    let result = match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(|_| CipherError::InvalidKeyLength(key.len()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(|_| CipherError::InvalidKeyLength(key.len()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        32 => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(|_| CipherError::InvalidKeyLength(key.len()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        other => return Err(CipherError::InvalidKeyLength(other)),
    };

    result.map_err(|_| CipherError::Padding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn random_key(len: usize) -> Vec<u8> {
        let mut key = vec![0u8; len];
        OsRng.fill_bytes(&mut key);
        key
    }

    #[test]
    fn test_round_trip() -> Result<(), CipherError> {
        let key = random_key(AES256_KEY_SIZE);
        let data = br#"{"a":1,"b":"attendance"}"#;

        let (iv, ciphertext) = encrypt(&key, data)?;
        assert_ne!(ciphertext.as_slice(), data.as_slice());
        assert_eq!(ciphertext.len() % IV_SIZE, 0);

        let decrypted = decrypt(&key, &iv, &ciphertext)?;
        assert_eq!(decrypted, data);
        Ok(())
    }

    #[test]
    fn test_round_trip_all_key_sizes() -> Result<(), CipherError> {
        for len in [16, 24, 32] {
            let key = random_key(len);
            let (iv, ciphertext) = encrypt(&key, b"sized")?;
            assert_eq!(decrypt(&key, &iv, &ciphertext)?, b"sized");
        }
        Ok(())
    }

    #[test]
    fn test_empty_plaintext_pads_to_one_block() -> Result<(), CipherError> {
        let key = random_key(AES256_KEY_SIZE);
        let (iv, ciphertext) = encrypt(&key, b"")?;
        assert_eq!(ciphertext.len(), IV_SIZE);
        assert!(decrypt(&key, &iv, &ciphertext)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_iv_unique_per_call() -> Result<(), CipherError> {
        let key = random_key(AES256_KEY_SIZE);
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let (iv, _) = encrypt(&key, b"same plaintext")?;
            assert!(seen.insert(iv), "IV reused");
        }
        assert_eq!(seen.len(), 1000);
        Ok(())
    }

    #[test]
    fn test_wrong_key_fails_or_garbles() -> Result<(), CipherError> {
        let key = random_key(AES256_KEY_SIZE);
        let other = random_key(AES256_KEY_SIZE);
        let data = b"payload that must not survive a wrong key";
        let (iv, ciphertext) = encrypt(&key, data)?;

        // Without a MAC a wrong key can occasionally yield valid padding.
        match decrypt(&other, &iv, &ciphertext) {
            Err(CipherError::Padding) => {}
            Ok(garbled) => assert_ne!(garbled, data),
            Err(e) => panic!("unexpected error: {e}"),
        }
        Ok(())
    }

    #[test]
    fn test_invalid_inputs() {
        let key = random_key(AES256_KEY_SIZE);
        assert_eq!(encrypt(&[], b"x"), Err(CipherError::EmptyKey));
        assert_eq!(
            encrypt(&[0u8; 20], b"x"),
            Err(CipherError::InvalidKeyLength(20))
        );
        assert_eq!(
            decrypt(&key, &[0u8; IV_SIZE], &[]),
            Err(CipherError::EmptyCiphertext)
        );
        assert_eq!(
            decrypt(&key, &[0u8; 8], &[0u8; 16]),
            Err(CipherError::InvalidIvLength(8))
        );
        assert_eq!(
            decrypt(&key, &[0u8; IV_SIZE], &[0u8; 15]),
            Err(CipherError::MisalignedCiphertext(15))
        );
    }
}
