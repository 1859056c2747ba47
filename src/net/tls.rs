//! TLS termination for https listeners.
//!
//! # Responsibilities
//! - Load certificate chains and private keys from PEM cert sources
//! - Build the rustls server configuration
//!
//! # Design Decisions
//! - rustls only, no OpenSSL dependency
//! - Certificates are loaded at startup; a bad cert source is fatal

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use crate::config::CertSource;

/// Build a rustls server config from a PEM cert source.
pub fn server_config(source: &CertSource) -> Result<Arc<rustls::ServerConfig>, String> {
    let certs = load_certs(&source.cert_path)?;
    let key = load_private_key(&source.key_path)?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| format!("invalid certificate or key: {}", e))?;

    Ok(Arc::new(config))
}

fn load_certs(path: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, String> {
    let file = File::open(path).map_err(|e| format!("cannot open {}: {}", path, e))?;
    let certs: Result<Vec<_>, _> = rustls_pemfile::certs(&mut BufReader::new(file)).collect();
    let certs = certs.map_err(|e| format!("cannot parse certificates in {}: {}", path, e))?;
    if certs.is_empty() {
        return Err(format!("no certificates found in {}", path));
    }
    Ok(certs)
}

fn load_private_key(path: &str) -> Result<rustls::pki_types::PrivateKeyDer<'static>, String> {
    let file = File::open(path).map_err(|e| format!("cannot open {}: {}", path, e))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| format!("cannot parse private key in {}: {}", path, e))?
        .ok_or_else(|| format!("no private key found in {}", path))
}
