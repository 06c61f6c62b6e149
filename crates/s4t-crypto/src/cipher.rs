//! Symmetric encryption and RSA key wrapping.
//!
//! The one-time key is 32 ASCII alphanumeric characters used directly as an
//! AES-256 key. That alphabet costs entropy (about 190 bits instead of 256)
//! but matches what deployed boards generate and accept.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use aes::Aes256;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Length of the one-time symmetric key in bytes.
pub const SYMMETRIC_KEY_LEN: usize = 32;

/// AES block size, also the CBC IV length.
pub const BLOCK_LEN: usize = 16;

type Aes256EcbEnc = ecb::Encryptor<Aes256>;
type Aes256EcbDec = ecb::Decryptor<Aes256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// One-time AES-256 key, zeroized on drop.
pub struct SymmetricKey(Zeroizing<Vec<u8>>);

impl SymmetricKey {
    /// Draw a fresh key of 32 alphanumeric characters.
    pub fn generate() -> Self {
        let bytes: Vec<u8> = OsRng
            .sample_iter(&Alphanumeric)
            .take(SYMMETRIC_KEY_LEN)
            .collect();
        Self(Zeroizing::new(bytes))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(bytes);
        if bytes.len() != SYMMETRIC_KEY_LEN {
            return Err(CryptoError::DecryptionFailure(format!(
                "symmetric key must be {SYMMETRIC_KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Encrypt the symmetric key to the recipient (RSA PKCS#1 v1.5).
pub fn wrap_key(key: &SymmetricKey, recipient: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
    recipient
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, key.as_bytes())
        .map_err(|e| CryptoError::EncryptionFailure(format!("key wrap: {e}")))
}

/// Recover the symmetric key with our private key.
pub fn unwrap_key(wrapped: &[u8], private_key: &RsaPrivateKey) -> Result<SymmetricKey, CryptoError> {
    let bytes = private_key
        .decrypt(Pkcs1v15Encrypt, wrapped)
        .map_err(|e| CryptoError::DecryptionFailure(format!("key unwrap: {e}")))?;
    SymmetricKey::from_bytes(bytes)
}

/// AES-256-ECB with PKCS#7 padding. No IV: equal plaintext blocks under the
/// same key give equal ciphertext blocks, which a fresh key per message hides.
pub fn encrypt_ecb(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256EcbEnc::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::EncryptionFailure(e.to_string()))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

pub fn decrypt_ecb(key: &SymmetricKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
        return Err(CryptoError::DecryptionFailure(format!(
            "ciphertext length {} is not a positive multiple of {BLOCK_LEN}",
            ciphertext.len()
        )));
    }
    let cipher = Aes256EcbDec::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::DecryptionFailure(e.to_string()))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailure("bad padding".into()))
}

/// AES-256-CBC with a random IV, returned as `iv || ciphertext`.
pub fn encrypt_cbc(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut iv = [0u8; BLOCK_LEN];
    OsRng.fill_bytes(&mut iv);

    let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), &iv)
        .map_err(|e| CryptoError::EncryptionFailure(e.to_string()))?;

    let mut out = Vec::with_capacity(BLOCK_LEN + plaintext.len() + BLOCK_LEN);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext));
    Ok(out)
}

pub fn decrypt_cbc(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < 2 * BLOCK_LEN || data.len() % BLOCK_LEN != 0 {
        return Err(CryptoError::DecryptionFailure(format!(
            "ciphertext length {} too short or unaligned",
            data.len()
        )));
    }
    let (iv, ciphertext) = data.split_at(BLOCK_LEN);
    let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), iv)
        .map_err(|e| CryptoError::DecryptionFailure(e.to_string()))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailure("bad padding".into()))
}
