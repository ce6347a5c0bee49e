//! Low-level FTP command/response codec (RFC 959 §4).
//!
//! Handles:
//! - Sending FTP commands terminated with `\r\n`
//! - Reading single-line and multi-line replies
//! - Parsing the 3-digit reply code
//!
//! At most one command is outstanding at a time: every exchange is one
//! written line followed by exactly one reply.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::tee::{TeeStream, VerboseSink};
use crate::ftp::types::FtpResponse;

/// Anything the client can speak FTP over: TCP, TLS, or a test double.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

pub type BoxedStream = Box<dyn ByteStream>;

/// The FTP command/response codec over the control connection.
pub struct FtpCodec {
    stream: BufStream<TeeStream<BoxedStream>>,
    log_prefix: String,
}

impl FtpCodec {
    pub fn new(stream: BoxedStream, verbose: Option<VerboseSink>) -> Self {
        Self {
            stream: BufStream::new(TeeStream::new(stream, verbose)),
            log_prefix: "[ftp]".into(),
        }
    }

    pub fn with_log_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_prefix = prefix.into();
        self
    }

    /// Give back the raw transport, without the verbose tee.
    pub fn into_inner(self) -> BoxedStream {
        self.stream.into_inner().into_inner()
    }

    /// The verbose sink this codec tees into, if any.
    pub fn verbose(&self) -> Option<&VerboseSink> {
        self.stream.get_ref().sink()
    }

    /// Send a raw FTP command; the CRLF is appended here.
    pub async fn send_command(&mut self, cmd: &str) -> FtpResult<()> {
        let line = format!("{}\r\n", cmd);
        self.stream
            .write_all(line.as_bytes())
            .await
            .map_err(|e| FtpError::internal_with("failed to send command", e))?;
        self.stream
            .flush()
            .await
            .map_err(|e| FtpError::internal_with("failed to send command", e))?;
        log::trace!("{} >>> {}", self.log_prefix, mask_command(cmd));
        Ok(())
    }

    /// Read a single line from the control channel, without CRLF.
    async fn read_line(&mut self) -> FtpResult<String> {
        let mut buf = String::new();
        let n = self
            .stream
            .read_line(&mut buf)
            .await
            .map_err(|e| FtpError::internal_with("failed to read reply", e))?;
        if n == 0 {
            return Err(FtpError::internal("server closed the control connection"));
        }
        Ok(buf.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Read a complete FTP response (possibly multi-line).
    ///
    /// Multi-line responses look like:
    /// ```text
    /// 220-Welcome to my FTP server
    /// 220-This is line 2
    /// 220 End of greeting
    /// ```
    pub async fn read_response(&mut self) -> FtpResult<FtpResponse> {
        let first = self.read_line().await?;
        let code = parse_code(&first)?;
        let mut lines = vec![first];

        // "NNN-" means more lines follow until "NNN " is seen.
        if lines[0].as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{} ", code);
            let bare = code.to_string();
            loop {
                let next = self.read_line().await?;
                let done = next.starts_with(&terminator) || next == bare;
                lines.push(next);
                if done {
                    break;
                }
            }
        }

        let resp = FtpResponse { code, lines };
        log::trace!(
            "{} <<< {}",
            self.log_prefix,
            resp.lines.last().map(String::as_str).unwrap_or_default()
        );
        Ok(resp)
    }

    /// Read one reply, failing if it does not arrive within `deadline`.
    /// A zero deadline waits indefinitely.
    pub async fn read_response_within(&mut self, deadline: Duration) -> FtpResult<FtpResponse> {
        if deadline.is_zero() {
            return self.read_response().await;
        }
        tokio::time::timeout(deadline, self.read_response())
            .await
            .map_err(|_| FtpError::internal(format!("no reply within {:?}", deadline)))?
    }

    /// Read one reply and require `code`.
    pub async fn read_expect(&mut self, code: u16) -> FtpResult<FtpResponse> {
        let resp = self.read_response().await?;
        check_code(resp, code)
    }

    /// Send a command and return whatever the server replies ("no check").
    pub async fn execute(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        self.send_command(cmd).await?;
        self.read_response().await
    }

    /// Send a command and require the exact reply `code`.
    pub async fn expect(&mut self, cmd: &str, code: u16) -> FtpResult<FtpResponse> {
        let resp = self.execute(cmd).await?;
        check_code(resp, code)
    }
}

/// Turn a reply with the wrong code into an internal error carrying the
/// server's message.
pub(crate) fn check_code(resp: FtpResponse, code: u16) -> FtpResult<FtpResponse> {
    if resp.code == code {
        Ok(resp)
    } else {
        Err(FtpError::from_reply(resp.code, &resp.message()))
    }
}

/// Parse the 3-digit reply code from the start of a line.
fn parse_code(line: &str) -> FtpResult<u16> {
    let digits = line
        .get(..3)
        .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| FtpError::internal(format!("malformed reply: '{}'", line)))?;
    match line.as_bytes().get(3) {
        None | Some(b' ') | Some(b'-') => {}
        Some(_) => return Err(FtpError::internal(format!("malformed reply: '{}'", line))),
    }
    digits
        .parse::<u16>()
        .map_err(|e| FtpError::internal_with(format!("malformed reply: '{}'", line), e))
}

/// Keep credentials out of the trace log.
fn mask_command(cmd: &str) -> &str {
    if cmd
        .as_bytes()
        .get(..5)
        .is_some_and(|verb| verb.eq_ignore_ascii_case(b"PASS "))
    {
        "PASS ****"
    } else {
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn codec(mock: tokio_test::io::Mock) -> FtpCodec {
        FtpCodec::new(Box::new(mock), None)
    }

    #[tokio::test]
    async fn single_line_reply() {
        let mut c = codec(Builder::new().write(b"NOOP\r\n").read(b"200 NOOP ok.\r\n").build());
        let resp = c.expect("NOOP", 200).await.unwrap();
        assert_eq!(resp.code, 200);
        assert_eq!(resp.message(), "NOOP ok.");
    }

    #[tokio::test]
    async fn multi_line_reply() {
        let mut c = codec(
            Builder::new()
                .read(b"220-Welcome\r\n220-second line\r\n")
                .read(b"220 ready\r\n")
                .build(),
        );
        let resp = c.read_expect(220).await.unwrap();
        assert_eq!(resp.lines.len(), 3);
        assert_eq!(resp.message(), "Welcome\nsecond line\nready");
    }

    #[tokio::test]
    async fn unexpected_code_carries_server_message() {
        let mut c = codec(
            Builder::new()
                .write(b"DELE /nope\r\n")
                .read(b"550 No such file or directory\r\n")
                .build(),
        );
        let err = c.expect("DELE /nope", 250).await.unwrap_err();
        assert_eq!(err.code, Some(550));
        assert_eq!(err.message, "No such file or directory");
    }

    #[tokio::test]
    async fn execute_accepts_any_code() {
        let mut c = codec(
            Builder::new()
                .write(b"CWD /x\r\n")
                .read(b"550 missing\r\n")
                .build(),
        );
        let resp = c.execute("CWD /x").await.unwrap();
        assert_eq!(resp.code, 550);
    }

    #[tokio::test]
    async fn closed_connection_is_an_error() {
        let mut c = codec(Builder::new().build());
        assert!(c.read_response().await.is_err());
    }

    #[test]
    fn parses_reply_codes() {
        assert_eq!(parse_code("226 Transfer complete").unwrap(), 226);
        assert_eq!(parse_code("211-Features:").unwrap(), 211);
        assert_eq!(parse_code("200").unwrap(), 200);
        assert!(parse_code("2x0 nope").is_err());
        assert!(parse_code("20").is_err());
        assert!(parse_code("2000 too long").is_err());
    }

    #[test]
    fn masks_password() {
        assert_eq!(mask_command("PASS hunter2"), "PASS ****");
        assert_eq!(mask_command("USER bob"), "USER bob");
        assert_eq!(mask_command("pass x"), "PASS ****");
        assert_eq!(mask_command("PASS"), "PASS");
    }

    #[test]
    fn masking_handles_multibyte_arguments() {
        assert_eq!(mask_command("CWD é"), "CWD é");
        assert_eq!(mask_command("RMD éé"), "RMD éé");
        assert_eq!(mask_command("PASS é"), "PASS ****");
    }

    #[tokio::test]
    async fn traced_command_with_multibyte_path() {
        log::set_max_level(log::LevelFilter::Trace);
        let mut c = codec(
            Builder::new()
                .write("CWD é\r\n".as_bytes())
                .read(b"250 ok\r\n")
                .build(),
        );
        c.expect("CWD é", 250).await.unwrap();
    }
}
