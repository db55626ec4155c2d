//! TLS configuration for the repair queue endpoint: both sides present a
//! certificate (mutual TLS) and verify the peer's chain against a
//! configured CA; node-level authorization on top of that is handled by
//! [`crate::auth`] once the handshake succeeds.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::error::{Error, Result};

/// A certificate chain plus its private key, loaded from PEM files.
pub struct Identity {
    pub certs: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl Identity {
    /// Load a leaf certificate (plus any intermediates, same file) and its
    /// private key from two PEM files.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Identity> {
        let cert_file = std::fs::File::open(cert_path)?;
        let mut cert_reader = BufReader::new(cert_file);
        let certs = rustls_pemfile::certs(&mut cert_reader)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let key_file = std::fs::File::open(key_path)?;
        let mut key_reader = BufReader::new(key_file);
        let key = rustls_pemfile::private_key(&mut key_reader)?
            .ok_or_else(|| Error::Corrupt(format!("no private key found in {key_path:?}")))?;

        Ok(Identity { certs, key })
    }
}

/// Install `ring` as the process-wide default crypto provider. `rustls`
/// 0.22 requires one to be installed before any `ServerConfig`/`ClientConfig`
/// is built; safe to call more than once (later calls are no-ops).
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Build a server-side TLS acceptor that requires the peer to present a
/// certificate signed by `trusted_cas`.
pub fn server_acceptor(identity: Identity, trusted_cas: RootCertStore) -> Result<TlsAcceptor> {
    install_crypto_provider();
    let verifier = WebPkiClientVerifier::builder(Arc::new(trusted_cas))
        .build()
        .map_err(|e| Error::Corrupt(format!("invalid client verifier config: {e}")))?;

    let config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(identity.certs, identity.key)
        .map_err(Error::Tls)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Build a client-side TLS connector that presents `identity` and trusts
/// `trusted_cas` for the server's certificate.
pub fn client_connector(identity: Identity, trusted_cas: RootCertStore) -> Result<TlsConnector> {
    install_crypto_provider();
    let config = ClientConfig::builder()
        .with_root_certificates(trusted_cas)
        .with_client_auth_cert(identity.certs, identity.key)
        .map_err(Error::Tls)?;

    Ok(TlsConnector::from(Arc::new(config)))
}
