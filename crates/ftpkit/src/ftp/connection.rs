//! TCP + TLS transport: establishes control and data connections.
//!
//! Handles plain-TCP connect, implicit-FTPS wrapping, and the
//! timeout/cancellation policy for every dial.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::ftp::client::FtpSession;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::BoxedStream;
use crate::ftp::tls::{self, TlsConfig};
use crate::ftp::types::{FtpConnectionConfig, FtpSecurityMode};

/// Opens byte streams to `host:port` addresses.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: &str, cancel: Option<&CancellationToken>) -> FtpResult<BoxedStream>;

    /// Dial, then run the TLS handshake against `server_name`.
    async fn dial_tls(
        &self,
        addr: &str,
        tls: &TlsConfig,
        server_name: &str,
        cancel: Option<&CancellationToken>,
    ) -> FtpResult<BoxedStream> {
        let stream = self.dial(addr, cancel).await?;
        tls::connect(stream, tls, server_name).await
    }
}

/// The default dialer: `TcpStream::connect` bounded by a timeout.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    /// Zero means no deadline.
    timeout: Duration,
}

impl TcpDialer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn connect(&self, addr: &str) -> FtpResult<TcpStream> {
        let connect = TcpStream::connect(addr);
        let tcp = if self.timeout.is_zero() {
            connect.await
        } else {
            timeout(self.timeout, connect).await.map_err(|_| {
                FtpError::internal(format!(
                    "connect to {} timed out after {:?}",
                    addr, self.timeout
                ))
            })?
        };
        let tcp =
            tcp.map_err(|e| FtpError::internal_with(format!("connect to {} failed", addr), e))?;
        tcp.set_nodelay(true).ok();
        Ok(tcp)
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: &str, cancel: Option<&CancellationToken>) -> FtpResult<BoxedStream> {
        let tcp = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Err(FtpError::internal(format!("dial {} cancelled", addr)));
                }
                res = self.connect(addr) => res?,
            },
            None => self.connect(addr).await?,
        };
        log::debug!("[ftp] connected to {}", addr);
        Ok(Box::new(tcp))
    }
}

/// Establish a logged-in session from a connection config.
///
/// Dials (wrapping in TLS for implicit FTPS), reads the banner, upgrades
/// with `AUTH TLS` for explicit FTPS, then logs in.
pub async fn connect(config: &FtpConnectionConfig) -> FtpResult<FtpSession> {
    let options = config.session_options()?;
    let dialer: Arc<dyn Dialer> = Arc::new(TcpDialer::new(options.dial_timeout));
    connect_with(config, dialer).await
}

/// [`connect`] over a caller-supplied dialer.
pub async fn connect_with(
    config: &FtpConnectionConfig,
    dialer: Arc<dyn Dialer>,
) -> FtpResult<FtpSession> {
    let options = config.session_options()?;
    let addr = config.address();

    let stream = match (config.security, options.tls.as_ref()) {
        (FtpSecurityMode::Implicit, Some(tls)) => {
            dialer.dial_tls(&addr, tls, &config.host, None).await?
        }
        _ => dialer.dial(&addr, None).await?,
    };

    let mut session = FtpSession::with_dialer(stream, options, dialer)?;
    session.ready().await?;
    if config.security == FtpSecurityMode::Explicit {
        session.enable_explicit_tls_mode().await?;
    }
    if let Err(e) = session.login(&config.username, &config.password).await {
        if let Err(stop_err) = session.stop().await {
            log::debug!("{} stop after failed login: {}", session.log_prefix(), stop_err);
        }
        return Err(e);
    }
    Ok(session)
}
