//! Data-channel management for FTP transfers.
//!
//! Supports two passive modes (RFC 959 + RFC 2428):
//! - **PASV**: server opens a port, client connects to the returned address
//! - **EPSV**: extended passive, client connects to the control host
//!
//! The sequence for every transfer is fixed: `PRET` (if supported),
//! `EPSV`/`PASV`, dial, `REST` (if resuming), the transfer command, then
//! after the caller is done, the `226` confirmation. The data socket is
//! TLS-wrapped whenever the session has a TLS configuration (PROT P).

use std::net::{Ipv4Addr, SocketAddrV4};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use lazy_static::lazy_static;
use regex::Regex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_util::sync::CancellationToken;

use crate::ftp::client::FtpSession;
use crate::ftp::error::{FtpError, FtpResult, MultiError};
use crate::ftp::protocol::BoxedStream;
use crate::ftp::tee::TeeStream;
use crate::ftp::types::reply::*;

lazy_static! {
    static ref PASV_ADDR: Regex =
        Regex::new(r"\((\d+),(\d+),(\d+),(\d+),(\d+),(\d+)\)").unwrap();
    static ref EPSV_PORT: Regex = Regex::new(r"\(\|\|\|(\d+)\|\)").unwrap();
}

// ─── PASV ────────────────────────────────────────────────────────────

/// Parse the text of a 227 reply.
///
/// Format: `Entering Passive Mode (h1,h2,h3,h4,p1,p2)`
pub fn parse_pasv(message: &str) -> FtpResult<SocketAddrV4> {
    let text = message.trim();
    if !text.to_ascii_lowercase().starts_with("entering passive mode") {
        return Err(FtpError::internal(format!("cannot parse PASV reply '{}'", text)));
    }
    let caps = PASV_ADDR
        .captures(text)
        .ok_or_else(|| FtpError::internal(format!("cannot parse PASV reply '{}'", text)))?;

    let mut nums = [0u8; 6];
    for (i, n) in nums.iter_mut().enumerate() {
        *n = caps[i + 1].parse::<u8>().map_err(|e| {
            FtpError::internal_with(format!("PASV field '{}' out of range", &caps[i + 1]), e)
        })?;
    }

    let ip = Ipv4Addr::new(nums[0], nums[1], nums[2], nums[3]);
    let port = u16::from(nums[4]) * 256 + u16::from(nums[5]);
    Ok(SocketAddrV4::new(ip, port))
}

// ─── EPSV ────────────────────────────────────────────────────────────

/// Parse the port out of a 229 reply.
///
/// Format: `Entering Extended Passive Mode (|||port|)`
pub fn parse_epsv(message: &str) -> FtpResult<u16> {
    let text = message.trim();
    if !text
        .to_ascii_lowercase()
        .starts_with("entering extended passive mode")
    {
        return Err(FtpError::internal(format!("cannot parse EPSV reply '{}'", text)));
    }
    let caps = EPSV_PORT
        .captures(text)
        .ok_or_else(|| FtpError::internal(format!("cannot parse EPSV reply '{}'", text)))?;
    match caps[1].parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(FtpError::internal(format!("EPSV port '{}' out of range", &caps[1]))),
    }
}

/// `host:port`, bracketing IPv6 literals.
pub(crate) fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

// ─── Data transfer handle ────────────────────────────────────────────

/// An open data connection, borrowed from its session until
/// [`finish`](DataTransfer::finish) confirms the server's `226`.
///
/// Reads and writes go straight to the (possibly TLS, possibly teed) data
/// socket. Dropping the handle without finishing leaves the `226` unread,
/// which desynchronizes the control channel.
pub struct DataTransfer<'a> {
    session: &'a mut FtpSession,
    stream: TeeStream<BoxedStream>,
    verb: String,
}

impl<'a> DataTransfer<'a> {
    /// Close the data socket and confirm the transfer.
    pub async fn finish(self) -> FtpResult<()> {
        let operation = format!("{} failed", self.verb);
        self.finish_with(operation, Vec::new()).await
    }

    /// Like [`finish`](Self::finish), folding in errors the caller already
    /// collected while moving data. Everything is reported as one error.
    pub async fn finish_with(
        self,
        operation: impl Into<String>,
        errors: Vec<FtpError>,
    ) -> FtpResult<()> {
        let DataTransfer {
            session,
            mut stream,
            ..
        } = self;
        let mut errors = MultiError::new(errors);

        if let Err(e) = stream.shutdown().await {
            errors.push(FtpError::internal_with("failed to close data connection", e));
        }
        drop(stream);

        let deadline = session.options.shutdown_timeout;
        match session.codec() {
            Ok(codec) => match codec.read_response_within(deadline).await {
                Ok(resp) if resp.code == CLOSING_DATA => {}
                Ok(resp) => errors.push(FtpError::from_reply(resp.code, &resp.message())),
                Err(e) => errors.push(e),
            },
            Err(e) => errors.push(e),
        }

        errors.into_result(operation)
    }
}

impl AsyncRead for DataTransfer<'_> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for DataTransfer<'_> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

// ─── Lifecycle ───────────────────────────────────────────────────────

impl FtpSession {
    /// Negotiate a data connection and start `command` on it.
    ///
    /// `offset > 0` sends `REST <offset>` first. `cancel` only covers the
    /// dial. On success the server has answered 125/150 and the returned
    /// handle must be [`finish`](DataTransfer::finish)ed.
    pub async fn open_transfer(
        &mut self,
        command: &str,
        offset: u64,
        cancel: Option<&CancellationToken>,
    ) -> FtpResult<DataTransfer<'_>> {
        if self.features.pret {
            self.codec()?
                .expect(&format!("PRET {}", command), COMMAND_OK)
                .await?;
        }

        let addr = self.passive_address().await?;
        log::debug!("{} opening data connection to {}", self.log_prefix(), addr);
        let dialer = Arc::clone(&self.dialer);
        let raw = match self.options.tls.as_ref() {
            Some(tls) => {
                dialer
                    .dial_tls(&addr, tls, &self.options.host, cancel)
                    .await?
            }
            None => dialer.dial(&addr, cancel).await?,
        };
        let verb = command
            .split_whitespace()
            .next()
            .unwrap_or(command)
            .to_string();

        if offset > 0 {
            let res = self
                .codec()?
                .expect(&format!("REST {}", offset), PENDING)
                .await;
            if let Err(e) = res {
                return Err(close_after_failure(raw, e, &verb).await);
            }
        }

        let started = match self.codec()?.execute(command).await {
            Ok(resp) if resp.code == ALREADY_OPEN || resp.code == ABOUT_TO_SEND => Ok(()),
            Ok(resp) => Err(FtpError::from_reply(resp.code, &resp.message())),
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            return Err(close_after_failure(raw, e, &verb).await);
        }

        let stream = TeeStream::new(raw, self.options.verbose.clone());
        Ok(DataTransfer {
            session: self,
            stream,
            verb,
        })
    }

    /// `EPSV` when enabled and advertised, otherwise `PASV`.
    async fn passive_address(&mut self) -> FtpResult<String> {
        let use_epsv = !self.options.disable_epsv && self.features.epsv;
        let host = self.options.host.clone();
        let codec = self.codec()?;
        if use_epsv {
            let resp = codec.expect("EPSV", EXTENDED_PASSIVE_MODE).await?;
            let port = parse_epsv(&resp.message())?;
            Ok(join_host_port(&host, port))
        } else {
            let resp = codec.expect("PASV", PASSIVE_MODE).await?;
            Ok(parse_pasv(&resp.message())?.to_string())
        }
    }
}

/// Close a data socket that will never be used; a close failure is
/// reported alongside the original error.
async fn close_after_failure(mut raw: BoxedStream, err: FtpError, verb: &str) -> FtpError {
    match raw.shutdown().await {
        Ok(()) => err,
        Err(close) => FtpError::aggregate(
            format!("{} failed", verb),
            vec![err, FtpError::internal_with("failed to close data connection", close)],
        ),
    }
}
