//! RSA identities and the certificate directory they are loaded from.
//!
//! Keys live in one directory, named after the identity:
//!
//! ```text
//! {cert_dir}/{name}.key.pem   private key (PKCS#1 or PKCS#8 PEM)
//! {cert_dir}/{name}.pub.pem   public key (SPKI or PKCS#1 PEM)
//! ```
//!
//! The local private key is loaded once at startup. Peer public keys are
//! loaded on first use and cached; the cache is shared between concurrent
//! verifications.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use s4t_common::helpers::is_valid_identity_name;
use tracing::debug;

use crate::error::CryptoError;

/// Where node certificates are provisioned on a board.
pub const DEFAULT_CERT_DIR: &str = "/etc/ssl/iotronic/node_certs";

/// A named participant holding its own RSA private key.
///
/// The private key never leaves this value; `Debug` prints the name only.
pub struct Identity {
    name: String,
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl Identity {
    /// Wrap an already-loaded private key.
    pub fn new(name: impl Into<String>, private_key: RsaPrivateKey) -> Self {
        let public_key = private_key.to_public_key();
        Self {
            name: name.into(),
            private_key,
            public_key,
        }
    }

    /// Generate a fresh RSA keypair using the OS CSPRNG.
    pub fn generate(name: impl Into<String>, bits: usize) -> Result<Self, CryptoError> {
        let name = name.into();
        if !is_valid_identity_name(&name) {
            return Err(CryptoError::KeyNotFound(format!(
                "invalid identity name {name:?}"
            )));
        }
        let private_key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| CryptoError::EncryptionFailure(format!("key generation: {e}")))?;
        Ok(Self::new(name, private_key))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Resolves identities and peer public keys from a certificate directory.
pub struct KeyStore {
    dir: PathBuf,
    public_keys: RwLock<HashMap<String, Arc<RsaPublicKey>>>,
}

impl KeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            public_keys: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn private_key_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.key.pem"))
    }

    pub fn public_key_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.pub.pem"))
    }

    /// Load the private key for `name`.
    pub fn load_private(&self, name: &str) -> Result<RsaPrivateKey, CryptoError> {
        let pem = self.read_pem(name, &self.private_key_path(name))?;

        RsaPrivateKey::from_pkcs1_pem(&pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(&pem))
            .map_err(|e| CryptoError::KeyMalformed(format!("private key of {name}: {e}")))
    }

    /// Load the local identity (private key plus derived public key).
    pub fn load_identity(&self, name: &str) -> Result<Identity, CryptoError> {
        let private_key = self.load_private(name)?;
        debug!(identity = name, "loaded private key");
        Ok(Identity::new(name, private_key))
    }

    /// Load the public key of peer `name`, reading the file on first use.
    pub fn load_public(&self, name: &str) -> Result<Arc<RsaPublicKey>, CryptoError> {
        if let Some(key) = self.cached_public(name) {
            return Ok(key);
        }

        let pem = self.read_pem(name, &self.public_key_path(name))?;
        let key = RsaPublicKey::from_public_key_pem(&pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(&pem))
            .map_err(|e| CryptoError::KeyMalformed(format!("public key of {name}: {e}")))?;

        debug!(peer = name, "loaded public key");
        Ok(self.insert_public(name, key))
    }

    /// Pin a peer public key without touching the filesystem.
    ///
    /// Returns the cached entry, which is the existing one if another
    /// verification populated it first.
    pub fn insert_public(&self, name: &str, key: RsaPublicKey) -> Arc<RsaPublicKey> {
        let mut keys = self
            .public_keys
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        keys.entry(name.to_string())
            .or_insert_with(|| Arc::new(key))
            .clone()
    }

    /// Write an identity's key pair into the directory.
    ///
    /// Private key is saved with restricted permissions (0600 on Unix).
    pub fn save_identity(&self, identity: &Identity) -> Result<(), CryptoError> {
        let name = identity.name();
        let private_pem = identity
            .private_key()
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyMalformed(format!("encode private key: {e}")))?;
        let public_pem = identity
            .public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyMalformed(format!("encode public key: {e}")))?;

        let io_err = |e: io::Error| CryptoError::KeyNotFound(format!("{name}: {e}"));

        fs::create_dir_all(&self.dir).map_err(io_err)?;

        let private_path = self.private_key_path(name);
        fs::write(&private_path, private_pem.as_bytes()).map_err(io_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&private_path).map_err(io_err)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&private_path, perms).map_err(io_err)?;
        }

        fs::write(self.public_key_path(name), public_pem).map_err(io_err)?;

        Ok(())
    }

    fn cached_public(&self, name: &str) -> Option<Arc<RsaPublicKey>> {
        let keys = self
            .public_keys
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        keys.get(name).cloned()
    }

    fn read_pem(&self, name: &str, path: &Path) -> Result<String, CryptoError> {
        if !is_valid_identity_name(name) {
            return Err(CryptoError::KeyNotFound(format!(
                "invalid identity name {name:?}"
            )));
        }

        match fs::read_to_string(path) {
            Ok(pem) => Ok(pem),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CryptoError::KeyNotFound(
                path.display().to_string(),
            )),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => Err(CryptoError::KeyMalformed(
                format!("{}: {e}", path.display()),
            )),
            Err(e) => Err(CryptoError::KeyNotFound(format!("{}: {e}", path.display()))),
        }
    }
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore").field("dir", &self.dir).finish()
    }
}
