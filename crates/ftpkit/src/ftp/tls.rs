//! TLS helpers for Explicit and Implicit FTPS (RFC 4217).
//!
//! - Builds a `rustls::ClientConfig` from the platform root store, with
//!   optional self-signed cert acceptance.
//! - Provides [`connect`] for wrapping any byte stream, used for the control
//!   channel (implicit at dial time, explicit after `AUTH TLS`) and for every
//!   data channel.

use std::fmt;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::BoxedStream;

/// Client-side TLS settings shared by the control and data channels.
#[derive(Clone)]
pub struct TlsConfig {
    client_config: Arc<rustls::ClientConfig>,
    /// SNI / verification name; defaults to the dialed host.
    server_name: Option<String>,
}

impl TlsConfig {
    pub fn new(client_config: Arc<rustls::ClientConfig>) -> Self {
        Self {
            client_config,
            server_name: None,
        }
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    pub fn client_config(&self) -> &Arc<rustls::ClientConfig> {
        &self.client_config
    }

    /// Build a config trusting the platform's native roots.
    pub fn native_roots(accept_invalid_certs: bool) -> FtpResult<Self> {
        let mut root_store = rustls::RootCertStore::empty();
        let loaded = rustls_native_certs::load_native_certs();
        for err in &loaded.errors {
            log::debug!("[ftp] skipping native certificate source: {}", err);
        }
        let (added, ignored) = root_store.add_parsable_certificates(loaded.certs);
        log::debug!("[ftp] loaded {} native root certificates ({} ignored)", added, ignored);

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| FtpError::internal_with("failed to build TLS config", e))?
            .with_root_certificates(root_store)
            .with_no_client_auth();

        if accept_invalid_certs {
            log::warn!("[ftp] TLS certificate verification is disabled");
            config
                .dangerous()
                .set_certificate_verifier(Arc::new(NoCertVerifier));
        }

        Ok(Self::new(Arc::new(config)))
    }
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

/// Run the client handshake over `stream`.
///
/// `host` is used as the server name unless the config overrides it.
pub async fn connect(stream: BoxedStream, tls: &TlsConfig, host: &str) -> FtpResult<BoxedStream> {
    let name = tls.server_name.as_deref().unwrap_or(host);
    let server_name = ServerName::try_from(name.to_string()).map_err(|e| {
        FtpError::invalid_argument(format!("invalid TLS server name '{}': {}", name, e))
    })?;

    let connector = TlsConnector::from(Arc::clone(&tls.client_config));
    let stream = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| FtpError::internal_with(format!("TLS handshake with {} failed", name), e))?;
    Ok(Box::new(stream))
}

// ─── NoCertVerifier (for self-signed certs) ─────────────────────────

#[derive(Debug)]
struct NoCertVerifier;

impl rustls::client::danger::ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
