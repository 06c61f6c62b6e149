//! Cryptographic core for S4T secure messaging.
//!
//! This crate provides:
//! - A key store resolving RSA identities from a certificate directory
//! - The three-part envelope and its double base64 token encoding
//! - The hybrid engine that seals readings for a peer and opens them again
//!
//! # Design
//!
//! A sealed reading carries a fresh AES-256 key wrapped under the recipient's
//! RSA key (PKCS#1 v1.5), the reading encrypted under that key, and an
//! integrity tag made with the sender's private key. The receiver picks the
//! verification key by the origin name found inside the decrypted reading.
//!
//! Two modes share the same wire shape:
//! - [`ProtocolMode::Legacy`]: AES-ECB and a raw `hash^d mod n` tag, bit-compatible
//!   with deployed boards
//! - [`ProtocolMode::Hardened`]: AES-CBC with a random IV and an RSA-PSS signature

#![forbid(unsafe_code)]

pub mod cipher;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod integrity;
pub mod keystore;

pub use engine::{CryptoEngine, ProtocolMode};
pub use envelope::{Envelope, Token};
pub use error::CryptoError;
pub use keystore::{Identity, KeyStore, DEFAULT_CERT_DIR};
