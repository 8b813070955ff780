//! Client-side TLS configuration with hostname checking disabled, an
//! intentional compromise for self-signed single-host deployments. Rather
//! than a no-op "trust everything" verifier, the presented leaf certificate
//! is pinned against the certificate at `PSYNC_CERT_PATH` when one is
//! configured, so the connection is still bound to a specific server
//! identity; absent a configured cert, any chain is accepted.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStructure, SignatureScheme};

use crate::error::{ClientError, ClientResult};

#[derive(Debug)]
struct PinnedCertVerifier {
    pinned: Option<CertificateDer<'static>>,
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match &self.pinned {
            Some(pinned) if pinned.as_ref() != end_entity.as_ref() => Err(
                rustls::Error::General("server certificate does not match PSYNC_CERT_PATH".to_string()),
            ),
            _ => Ok(ServerCertVerified::assertion()),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStructure,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStructure,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Builds a `ClientConfig` that pins the server's certificate (if
/// `cert_path` is configured and readable) and never checks the hostname.
pub fn build_client_config(cert_path: Option<&Path>) -> ClientResult<ClientConfig> {
    let pinned = match cert_path {
        Some(path) if path.exists() => Some(load_cert(path)?),
        _ => None,
    };

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = Arc::new(PinnedCertVerifier { pinned, provider });

    let mut config = ClientConfig::builder()
        .with_root_certificates(rustls::RootCertStore::empty())
        .with_no_client_auth();
    config.dangerous().set_certificate_verifier(verifier);

    Ok(config)
}

fn load_cert(path: &Path) -> ClientResult<CertificateDer<'static>> {
    let file = File::open(path).map_err(ClientError::Io)?;
    let mut reader = BufReader::new(file);
    let mut certs = rustls_pemfile::certs(&mut reader);
    certs
        .next()
        .transpose()
        .map_err(ClientError::Io)?
        .ok_or_else(|| ClientError::Tls(rustls::Error::General(format!("no certificate found in {}", path.display()))))
}
