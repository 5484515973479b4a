//! Inbound TLS for the wss upgrade path.
//!
//! Certificate and key are always supplied by configuration; there is no
//! built-in or self-signed fallback.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};
use tokio_rustls::TlsAcceptor;
use tracing::info;

use crate::config::TlsFiles;
use crate::error::RelayError;

/// Build a TLS acceptor from PEM certificate chain and private key files.
pub fn load_acceptor(files: &TlsFiles) -> Result<TlsAcceptor, RelayError> {
    let certs = load_certs(&files.cert_path)?;
    let key = load_private_key(&files.key_path)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| RelayError::TlsConfig(format!("unsupported protocol versions: {e}")))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| RelayError::TlsConfig(format!("certificate rejected: {e}")))?;

    info!(
        cert = %files.cert_path.display(),
        "TLS enabled for wss upgrades"
    );

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, RelayError> {
    let file = File::open(path).map_err(|e| {
        RelayError::TlsConfig(format!("failed to open certificate {}: {e}", path.display()))
    })?;
    let mut reader = BufReader::new(file);

    let certs = certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            RelayError::TlsConfig(format!("failed to parse certificate {}: {e}", path.display()))
        })?;

    if certs.is_empty() {
        return Err(RelayError::TlsConfig(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, RelayError> {
    let file = File::open(path).map_err(|e| {
        RelayError::TlsConfig(format!("failed to open private key {}: {e}", path.display()))
    })?;
    let mut reader = BufReader::new(file);

    private_key(&mut reader)
        .map_err(|e| {
            RelayError::TlsConfig(format!("failed to parse private key {}: {e}", path.display()))
        })?
        .ok_or_else(|| {
            RelayError::TlsConfig(format!("no private key found in {}", path.display()))
        })
}
