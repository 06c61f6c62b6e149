//! TLS policy for `wss://` router URLs.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_tungstenite::Connector;
use tracing::warn;

use crate::error::WampError;

/// How the router's certificate is checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsPolicy {
    /// Verify against the platform trust store.
    #[default]
    Verify,
    /// Verify against the CA certificates in a PEM file only.
    CustomCa(PathBuf),
    /// Accept any certificate. For lab routers with self-signed certs.
    Insecure,
}

impl fmt::Display for TlsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsPolicy::Verify => f.write_str("verify"),
            TlsPolicy::CustomCa(path) => write!(f, "ca:{}", path.display()),
            TlsPolicy::Insecure => f.write_str("insecure"),
        }
    }
}

/// Parses `verify`, `insecure` or `ca:<path>`.
impl FromStr for TlsPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verify" => Ok(TlsPolicy::Verify),
            "insecure" => Ok(TlsPolicy::Insecure),
            _ => match s.strip_prefix("ca:") {
                Some(path) if !path.is_empty() => Ok(TlsPolicy::CustomCa(PathBuf::from(path))),
                _ => Err(format!(
                    "invalid TLS policy {s:?} (expected verify, insecure or ca:<path>)"
                )),
            },
        }
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Build the connector for `policy`. `None` means the library default,
/// which verifies against the platform roots.
pub(crate) fn connector(policy: &TlsPolicy) -> Result<Option<Connector>, WampError> {
    // Another crate in the process may have pulled in a second provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    match policy {
        TlsPolicy::Verify => Ok(None),
        TlsPolicy::CustomCa(path) => {
            let mut roots = RootCertStore::empty();
            let certs = CertificateDer::pem_file_iter(path)
                .map_err(|e| WampError::Tls(format!("{}: {e}", path.display())))?;
            for cert in certs {
                let cert = cert.map_err(|e| WampError::Tls(format!("{}: {e}", path.display())))?;
                roots
                    .add(cert)
                    .map_err(|e| WampError::Tls(format!("{}: {e}", path.display())))?;
            }
            if roots.is_empty() {
                return Err(WampError::Tls(format!(
                    "{}: no certificates found",
                    path.display()
                )));
            }

            let config = ClientConfig::builder_with_provider(provider())
                .with_safe_default_protocol_versions()
                .map_err(|e| WampError::Tls(e.to_string()))?
                .with_root_certificates(roots)
                .with_no_client_auth();
            Ok(Some(Connector::Rustls(Arc::new(config))))
        }
        TlsPolicy::Insecure => {
            warn!("TLS certificate verification is disabled for the router connection");
            let provider = provider();
            let config = ClientConfig::builder_with_provider(provider.clone())
                .with_safe_default_protocol_versions()
                .map_err(|e| WampError::Tls(e.to_string()))?
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
                .with_no_client_auth();
            Ok(Some(Connector::Rustls(Arc::new(config))))
        }
    }
}

/// Skips chain and hostname checks but still checks handshake signatures,
/// so the session is at least bound to the presented key.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
