//! Integrity tags over a sealed plaintext.
//!
//! The legacy tag is textbook RSA applied to the ASCII hex SHA-256 digest:
//! `tag = int(hex_digest) ^ d mod n`, written as minimal big-endian bytes.
//! There is no padding, so the tag is deterministic and malleable under
//! multiplication; it is kept only so deployed boards keep verifying.
//! [`sign_pss`] / [`verify_pss`] are the replacement used by the hardened mode.

use rand::rngs::OsRng;
use rsa::pss::{BlindedSigningKey, Signature, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use s4t_common::helpers::constant_time_eq;
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// Lowercase hex SHA-256 of `plaintext` (64 ASCII characters).
pub fn digest_hex(plaintext: &[u8]) -> String {
    hex::encode(Sha256::digest(plaintext))
}

/// Raw modular-exponentiation tag over the plaintext digest.
pub fn raw_tag(plaintext: &[u8], private_key: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError> {
    let digest = digest_hex(plaintext);
    let m = BigUint::from_bytes_be(digest.as_bytes());

    if &m >= private_key.n() {
        return Err(CryptoError::EncryptionFailure(
            "RSA modulus too small for the digest".into(),
        ));
    }

    Ok(m.modpow(private_key.d(), private_key.n()).to_bytes_be())
}

/// Recover the digest bytes carried by a raw tag.
pub fn recover_digest(tag: &[u8], public_key: &RsaPublicKey) -> Vec<u8> {
    BigUint::from_bytes_be(tag)
        .modpow(public_key.e(), public_key.n())
        .to_bytes_be()
}

/// Check a raw tag against the plaintext it claims to cover.
pub fn verify_raw(
    tag: &[u8],
    plaintext: &[u8],
    public_key: &RsaPublicKey,
) -> Result<(), CryptoError> {
    if tag.is_empty() {
        return Err(CryptoError::IntegrityViolation("empty tag".into()));
    }

    let recovered = recover_digest(tag, public_key);
    let computed = digest_hex(plaintext);

    if constant_time_eq(&recovered, computed.as_bytes()) {
        Ok(())
    } else {
        Err(CryptoError::IntegrityViolation("hash mismatch".into()))
    }
}

/// RSA-PSS (SHA-256) signature over the plaintext.
pub fn sign_pss(plaintext: &[u8], private_key: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError> {
    let signing_key = BlindedSigningKey::<Sha256>::new(private_key.clone());
    let signature = signing_key
        .try_sign_with_rng(&mut OsRng, plaintext)
        .map_err(|e| CryptoError::EncryptionFailure(format!("pss sign: {e}")))?;
    Ok(signature.to_vec())
}

pub fn verify_pss(
    tag: &[u8],
    plaintext: &[u8],
    public_key: &RsaPublicKey,
) -> Result<(), CryptoError> {
    let signature = Signature::try_from(tag)
        .map_err(|e| CryptoError::IntegrityViolation(format!("bad signature encoding: {e}")))?;
    VerifyingKey::<Sha256>::new(public_key.clone())
        .verify(plaintext, &signature)
        .map_err(|_| CryptoError::IntegrityViolation("signature mismatch".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> (RsaPrivateKey, RsaPublicKey) {
        let private_key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let public_key = private_key.to_public_key();
        (private_key, public_key)
    }

    #[test]
    fn test_digest_hex_known_vector() {
        assert_eq!(
            digest_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_raw_tag_recovers_digest() {
        let (private_key, public_key) = keypair();
        let plaintext = br#"{"0":"7","1":"Board_2"}"#;

        let tag = raw_tag(plaintext, &private_key).unwrap();
        assert_eq!(recover_digest(&tag, &public_key), digest_hex(plaintext).as_bytes());
        assert!(verify_raw(&tag, plaintext, &public_key).is_ok());
    }

    #[test]
    fn test_raw_tag_is_deterministic() {
        let (private_key, _) = keypair();
        let a = raw_tag(b"reading", &private_key).unwrap();
        let b = raw_tag(b"reading", &private_key).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_raw_tag_rejects_other_plaintext_and_key() {
        let (private_key, public_key) = keypair();
        let (_, other_public) = keypair();
        let tag = raw_tag(b"reading", &private_key).unwrap();

        assert!(matches!(
            verify_raw(&tag, b"other reading", &public_key),
            Err(CryptoError::IntegrityViolation(_))
        ));
        assert!(matches!(
            verify_raw(&tag, b"reading", &other_public),
            Err(CryptoError::IntegrityViolation(_))
        ));
        assert!(matches!(
            verify_raw(&[], b"reading", &public_key),
            Err(CryptoError::IntegrityViolation(_))
        ));
    }

    #[test]
    fn test_pss_sign_verify() {
        let (private_key, public_key) = keypair();
        let sig = sign_pss(b"reading", &private_key).unwrap();

        assert!(verify_pss(&sig, b"reading", &public_key).is_ok());
        assert!(matches!(
            verify_pss(&sig, b"tampered", &public_key),
            Err(CryptoError::IntegrityViolation(_))
        ));
    }

    #[test]
    fn test_pss_is_randomized() {
        let (private_key, _) = keypair();
        let a = sign_pss(b"reading", &private_key).unwrap();
        let b = sign_pss(b"reading", &private_key).unwrap();
        assert_ne!(a, b);
    }
}
