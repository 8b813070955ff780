//! TLS context construction: loads a cert/key pair and builds a
//! `TlsAcceptor` to wrap each accepted `TcpStream` before the websocket
//! upgrade.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig as RustlsServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::error::{ServerError, ServerResult};

/// Loads a PEM certificate chain and private key and builds a `TlsAcceptor`
/// ready to wrap accepted TCP streams.
pub fn build_acceptor(cert_path: &Path, key_path: &Path) -> ServerResult<TlsAcceptor> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let config = RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(ServerError::Tls)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> ServerResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(ServerError::Io)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(ServerError::Io)
}

fn load_key(path: &Path) -> ServerResult<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(ServerError::Io)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(ServerError::Io)?
        .ok_or_else(|| {
            ServerError::CertLoad(format!("no private key found in {}", path.display()))
        })
}
