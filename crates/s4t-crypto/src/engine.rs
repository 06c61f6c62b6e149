//! Seal and open readings.
//!
//! # Trust boundary
//!
//! On open, the key used to verify the tag is chosen by the origin name
//! found inside the decrypted, not yet verified plaintext. A sender who can
//! produce a valid tag under any key in the store can therefore claim that
//! key's identity. Nothing at this layer pins the origin to the transport
//! session.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use s4t_common::Reading;
use tracing::{debug, error};

use crate::cipher::{self, SymmetricKey};
use crate::envelope::{Envelope, Token};
use crate::error::CryptoError;
use crate::integrity;
use crate::keystore::{Identity, KeyStore};

/// Which cipher mode and tag primitive an engine uses.
///
/// Both peers must agree; the envelope does not say which mode made it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolMode {
    /// AES-256-ECB and the raw `hash^d mod n` tag. Interoperates with
    /// deployed boards.
    #[default]
    Legacy,
    /// AES-256-CBC with a random IV and an RSA-PSS/SHA-256 signature.
    Hardened,
}

impl fmt::Display for ProtocolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolMode::Legacy => f.write_str("legacy"),
            ProtocolMode::Hardened => f.write_str("hardened"),
        }
    }
}

impl FromStr for ProtocolMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "legacy" => Ok(ProtocolMode::Legacy),
            "hardened" => Ok(ProtocolMode::Hardened),
            other => Err(format!("unknown protocol mode: {other}")),
        }
    }
}

/// Hybrid encryption engine bound to a key store.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct CryptoEngine {
    keystore: Arc<KeyStore>,
    mode: ProtocolMode,
}

impl CryptoEngine {
    pub fn new(keystore: Arc<KeyStore>) -> Self {
        Self::with_mode(keystore, ProtocolMode::Legacy)
    }

    pub fn with_mode(keystore: Arc<KeyStore>, mode: ProtocolMode) -> Self {
        Self { keystore, mode }
    }

    pub fn mode(&self) -> ProtocolMode {
        self.mode
    }

    pub fn keystore(&self) -> &Arc<KeyStore> {
        &self.keystore
    }

    /// Encrypt `reading` for `recipient` and tag it with `sender`'s key.
    ///
    /// The reading's origin must be the sender: it is what the receiver uses
    /// to pick the verification key.
    pub fn seal(
        &self,
        reading: &Reading,
        sender: &Identity,
        recipient: &str,
    ) -> Result<Token, CryptoError> {
        if reading.origin != sender.name() {
            return Err(CryptoError::EncryptionFailure(format!(
                "reading origin {} does not match sender {}",
                reading.origin,
                sender.name()
            )));
        }

        let recipient_key = self.keystore.load_public(recipient)?;
        let plaintext = reading.to_plaintext();

        let key = SymmetricKey::generate();
        let ciphertext = match self.mode {
            ProtocolMode::Legacy => cipher::encrypt_ecb(&key, plaintext.as_bytes())?,
            ProtocolMode::Hardened => cipher::encrypt_cbc(&key, plaintext.as_bytes())?,
        };
        let wrapped_key = cipher::wrap_key(&key, &recipient_key)?;
        let tag = match self.mode {
            ProtocolMode::Legacy => integrity::raw_tag(plaintext.as_bytes(), sender.private_key())?,
            ProtocolMode::Hardened => {
                integrity::sign_pss(plaintext.as_bytes(), sender.private_key())?
            }
        };

        debug!(
            sender = sender.name(),
            recipient,
            mode = %self.mode,
            "sealed reading"
        );

        Ok(Envelope {
            wrapped_key,
            ciphertext,
            tag,
        }
        .encode())
    }

    /// Decrypt a token addressed to `receiver` and verify its tag.
    ///
    /// A sender whose public key cannot be found fails as
    /// [`CryptoError::IntegrityViolation`]: the message cannot be
    /// authenticated.
    pub fn open(&self, token: &str, receiver: &Identity) -> Result<Reading, CryptoError> {
        let envelope = Envelope::decode(token)?;

        let key = cipher::unwrap_key(&envelope.wrapped_key, receiver.private_key())?;
        let plaintext = match self.mode {
            ProtocolMode::Legacy => cipher::decrypt_ecb(&key, &envelope.ciphertext)?,
            ProtocolMode::Hardened => cipher::decrypt_cbc(&key, &envelope.ciphertext)?,
        };

        let text = std::str::from_utf8(&plaintext)
            .map_err(|_| CryptoError::DecryptionFailure("plaintext is not UTF-8".into()))?;
        let reading = Reading::from_plaintext(text)
            .map_err(|e| CryptoError::DecryptionFailure(e.to_string()))?;

        let sender_key = match self.keystore.load_public(&reading.origin) {
            Ok(key) => key,
            Err(CryptoError::KeyNotFound(detail)) => {
                let err = CryptoError::IntegrityViolation(format!(
                    "unknown sender {:?}: {detail}",
                    reading.origin
                ));
                error!(receiver = receiver.name(), "{err}");
                return Err(err);
            }
            Err(e) => return Err(e),
        };

        let verified = match self.mode {
            ProtocolMode::Legacy => integrity::verify_raw(&envelope.tag, &plaintext, &sender_key),
            ProtocolMode::Hardened => {
                integrity::verify_pss(&envelope.tag, &plaintext, &sender_key)
            }
        };

        if let Err(e) = verified {
            error!(
                receiver = receiver.name(),
                claimed_sender = %reading.origin,
                "message integrity compromised: {e}"
            );
            return Err(e);
        }

        debug!(
            receiver = receiver.name(),
            sender = %reading.origin,
            "opened reading"
        );
        Ok(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: CryptoEngine,
        board: Identity,
        gateway: Identity,
    }

    fn fixture(mode: ProtocolMode) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(KeyStore::new(dir.path()));

        let board = Identity::generate("Board_2", 1024).unwrap();
        let gateway = Identity::generate("Board_1", 1024).unwrap();
        store.save_identity(&board).unwrap();
        store.save_identity(&gateway).unwrap();

        Fixture {
            _dir: dir,
            engine: CryptoEngine::with_mode(store, mode),
            board,
            gateway,
        }
    }

    #[test]
    fn test_seal_open_legacy() {
        let f = fixture(ProtocolMode::Legacy);
        let reading = Reading::new(7.0, "Board_2");

        let token = f.engine.seal(&reading, &f.board, "Board_1").unwrap();
        assert_eq!(f.engine.open(token.as_str(), &f.gateway).unwrap(), reading);
    }

    #[test]
    fn test_seal_open_hardened() {
        let f = fixture(ProtocolMode::Hardened);
        let reading = Reading::new(123.0, "Board_2");

        let token = f.engine.seal(&reading, &f.board, "Board_1").unwrap();
        assert_eq!(f.engine.open(token.as_str(), &f.gateway).unwrap(), reading);
    }

    #[test]
    fn test_modes_do_not_interoperate() {
        let f = fixture(ProtocolMode::Hardened);
        let legacy = CryptoEngine::new(f.engine.keystore().clone());
        let token = f
            .engine
            .seal(&Reading::new(1.0, "Board_2"), &f.board, "Board_1")
            .unwrap();

        assert!(legacy.open(token.as_str(), &f.gateway).is_err());
    }

    #[test]
    fn test_seal_rejects_foreign_origin() {
        let f = fixture(ProtocolMode::Legacy);
        let spoofed = Reading::new(7.0, "Board_1");

        assert!(matches!(
            f.engine.seal(&spoofed, &f.board, "Board_1"),
            Err(CryptoError::EncryptionFailure(_))
        ));
    }

    #[test]
    fn test_seal_to_unknown_recipient() {
        let f = fixture(ProtocolMode::Legacy);
        assert!(matches!(
            f.engine
                .seal(&Reading::new(7.0, "Board_2"), &f.board, "Board_404"),
            Err(CryptoError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_protocol_mode_parse() {
        assert_eq!("legacy".parse::<ProtocolMode>().unwrap(), ProtocolMode::Legacy);
        assert_eq!("HARDENED".parse::<ProtocolMode>().unwrap(), ProtocolMode::Hardened);
        assert!("rot13".parse::<ProtocolMode>().is_err());
    }
}
