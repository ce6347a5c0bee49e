//! Stateful FTP session: owns the control connection and issues commands.
//!
//! Lifecycle: dial → `ready()` → optional `enable_explicit_tls_mode()` →
//! `login()` (USER/PASS, FEAT, TYPE I, OPTS UTF8, PBSZ/PROT) → operations →
//! `stop()`.
//!
//! Listing and file transfers live in `directory.rs` and `file_ops.rs`; the
//! data-connection lifecycle they share lives in `transfer.rs`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Offset, Utc};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::ftp::connection::{Dialer, TcpDialer};
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::parser::{self, ParseContext};
use crate::ftp::protocol::{BoxedStream, FtpCodec};
use crate::ftp::tls;
use crate::ftp::types::reply::*;
use crate::ftp::types::{FtpResponse, ServerFeatures, ServerStatus, SessionOptions};

/// One FTP control connection and its negotiated state.
///
/// Commands are strictly sequential: every method takes `&mut self`, so at
/// most one command is ever outstanding.
pub struct FtpSession {
    id: String,
    log_prefix: String,
    /// `None` once the session is closed.
    pub(crate) codec: Option<FtpCodec>,
    pub(crate) options: SessionOptions,
    pub(crate) features: ServerFeatures,
    pub(crate) dialer: Arc<dyn Dialer>,
}

impl FtpSession {
    /// Wrap an already-dialed control stream. Data connections use a
    /// [`TcpDialer`] with the configured dial timeout.
    pub fn new(stream: BoxedStream, options: SessionOptions) -> FtpResult<Self> {
        let dialer = Arc::new(TcpDialer::new(options.dial_timeout));
        Self::with_dialer(stream, options, dialer)
    }

    pub fn with_dialer(
        stream: BoxedStream,
        options: SessionOptions,
        dialer: Arc<dyn Dialer>,
    ) -> FtpResult<Self> {
        options.validate()?;
        let id = Uuid::new_v4().to_string();
        let log_prefix = format!("[ftp:{}]", id);
        let codec = FtpCodec::new(stream, options.verbose.clone()).with_log_prefix(&log_prefix);
        Ok(Self {
            id,
            log_prefix,
            codec: Some(codec),
            options,
            features: ServerFeatures::default(),
            dialer,
        })
    }

    // ─── Accessors ───────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.options.host
    }

    /// Features advertised at the last login; empty before it.
    pub fn features(&self) -> &ServerFeatures {
        &self.features
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn is_closed(&self) -> bool {
        self.codec.is_none()
    }

    pub(crate) fn log_prefix(&self) -> &str {
        &self.log_prefix
    }

    pub(crate) fn codec(&mut self) -> FtpResult<&mut FtpCodec> {
        self.codec
            .as_mut()
            .ok_or_else(|| FtpError::internal("session is closed"))
    }

    // ─── Handshake ───────────────────────────────────────────────

    /// Read the server banner (220). Failure closes the session.
    pub async fn ready(&mut self) -> FtpResult<()> {
        let res = match self.codec() {
            Ok(codec) => codec.read_expect(SERVICE_READY).await.map(|_| ()),
            Err(e) => Err(e),
        };
        self.stop_on_error(res).await
    }

    /// `AUTH TLS`, then swap the control transport for a TLS stream.
    /// Failure closes the session.
    pub async fn enable_explicit_tls_mode(&mut self) -> FtpResult<()> {
        let res = self.upgrade_control_channel().await;
        self.stop_on_error(res).await
    }

    async fn upgrade_control_channel(&mut self) -> FtpResult<()> {
        let tls = self
            .options
            .tls
            .clone()
            .ok_or_else(|| FtpError::invalid_argument("no TLS configuration set"))?;
        self.codec()?.expect("AUTH TLS", AUTH_OK).await?;

        let codec = self.codec.take().ok_or_else(|| FtpError::internal("session is closed"))?;
        let verbose = codec.verbose().cloned();
        let stream = tls::connect(codec.into_inner(), &tls, &self.options.host).await?;
        self.codec = Some(FtpCodec::new(stream, verbose).with_log_prefix(&self.log_prefix));
        log::debug!("{} control channel upgraded to TLS", self.log_prefix);
        Ok(())
    }

    /// Authenticate and negotiate features.
    pub async fn login(&mut self, user: &str, password: &str) -> FtpResult<()> {
        require_arg(user, "user")?;
        let codec = self.codec()?;

        let resp = codec.execute(&format!("USER {}", user)).await?;
        match resp.code {
            LOGGED_IN => {}
            NEED_PASSWORD => {
                codec.expect(&format!("PASS {}", password), LOGGED_IN).await?;
            }
            code => return Err(FtpError::from_reply(code, &resp.message())),
        }

        let feat = codec.execute("FEAT").await?;
        let features = if feat.code == SYSTEM_STATUS {
            parse_features(&feat)
        } else {
            log::debug!("{} FEAT not supported ({})", self.log_prefix, feat.code);
            ServerFeatures::default()
        };
        self.features = features;

        let codec = self.codec()?;
        codec.expect("TYPE I", COMMAND_OK).await?;

        if self.features.utf8 && !self.options.disable_utf8 {
            let codec = self.codec()?;
            let resp = codec.execute("OPTS UTF8 ON").await?;
            match resp.code {
                COMMAND_OK => {}
                NOT_IMPLEMENTED_SUPERFLUOUS | BAD_ARGUMENTS | NOT_IMPLEMENTED_PARAMETER => {
                    log::debug!("{} server ignored OPTS UTF8 ON ({})", self.log_prefix, resp.code);
                }
                code => return Err(FtpError::from_reply(code, &resp.message())),
            }
        }

        if self.options.tls.is_some() {
            let codec = self.codec()?;
            codec.expect("PBSZ 0", COMMAND_OK).await?;
            codec.expect("PROT P", COMMAND_OK).await?;
        }

        log::debug!("{} logged in as {}", self.log_prefix, user);
        Ok(())
    }

    /// `QUIT`, then close the control socket. Closing a closed session is a
    /// no-op. A close failure wins over a `QUIT` failure.
    pub async fn stop(&mut self) -> FtpResult<()> {
        let Some(mut codec) = self.codec.take() else {
            return Ok(());
        };
        let quit = codec.expect("QUIT", CLOSING_CONTROL).await.map(|_| ());
        let mut stream = codec.into_inner();
        let close = stream
            .shutdown()
            .await
            .map_err(|e| FtpError::internal_with("failed to close control connection", e));
        log::debug!("{} session closed", self.log_prefix);
        close.and(quit)
    }

    async fn stop_on_error<T>(&mut self, res: FtpResult<T>) -> FtpResult<T> {
        if res.is_err() {
            if let Err(e) = self.stop().await {
                log::debug!("{} stop after failure: {}", self.log_prefix, e);
            }
        }
        res
    }

    // ─── Simple commands ─────────────────────────────────────────

    /// `STAT` + `SYST`.
    pub async fn status(&mut self) -> FtpResult<ServerStatus> {
        let codec = self.codec()?;
        let stat = codec.expect("STAT", SYSTEM_STATUS).await?;
        let syst = codec.expect("SYST", SYSTEM_NAME).await?;
        Ok(parse_status(&stat, &syst))
    }

    /// `SIZE <path>` in bytes.
    pub async fn size(&mut self, path: &str) -> FtpResult<u64> {
        require_arg(path, "path")?;
        let resp = self.codec()?.expect(&format!("SIZE {}", path), FILE_STATUS).await?;
        let text = resp.message();
        let text = text.trim();
        text.parse::<u64>().map_err(|e| {
            FtpError::internal_with(format!("cannot parse SIZE reply '{}'", text), e)
        })
    }

    /// `CWD <path>`; a missing directory is
    /// [`FtpErrorKind::NotFound`](crate::ftp::error::FtpErrorKind::NotFound).
    pub async fn cd(&mut self, path: &str) -> FtpResult<()> {
        require_arg(path, "path")?;
        let resp = self.codec()?.execute(&format!("CWD {}", path)).await?;
        match resp.code {
            ACTION_OK => Ok(()),
            FILE_UNAVAILABLE => {
                Err(FtpError::not_found(resp.message().trim()).with_code(resp.code))
            }
            code => Err(FtpError::from_reply(code, &resp.message())),
        }
    }

    /// Current working directory from the quoted `257` reply.
    pub async fn pwd(&mut self) -> FtpResult<String> {
        let resp = self.codec()?.expect("PWD", PATH_CREATED).await?;
        parse_quoted_path(&resp.message())
    }

    pub async fn noop(&mut self) -> FtpResult<()> {
        self.codec()?.expect("NOOP", COMMAND_OK).await.map(|_| ())
    }

    /// `MDTM <path>`. Requires the `MDTM` feature.
    pub async fn modified_time(&mut self, path: &str) -> FtpResult<DateTime<Utc>> {
        require_arg(path, "path")?;
        if !self.features.mdtm {
            return Err(FtpError::invalid_argument("server does not support MDTM"));
        }
        let resp = self.codec()?.expect(&format!("MDTM {}", path), FILE_STATUS).await?;
        let ctx = ParseContext::new(Utc.fix());
        let time = parser::parse_mlsd_time(resp.message().trim(), &ctx)?;
        Ok(time.with_timezone(&Utc))
    }

    /// `MFMT <time> <path>`. Requires the `MFMT` feature.
    pub async fn set_modified_time(&mut self, path: &str, time: DateTime<Utc>) -> FtpResult<()> {
        require_arg(path, "path")?;
        if !self.features.mfmt {
            return Err(FtpError::invalid_argument("server does not support MFMT"));
        }
        let cmd = format!("MFMT {} {}", time.format("%Y%m%d%H%M%S"), path);
        self.codec()?.expect(&cmd, FILE_STATUS).await.map(|_| ())
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────

/// Blank required strings are caller errors.
pub(crate) fn require_arg(value: &str, name: &str) -> FtpResult<()> {
    if value.trim().is_empty() {
        Err(FtpError::invalid_argument(format!("{} must not be empty", name)))
    } else {
        Ok(())
    }
}

/// Build the feature snapshot from a `211` FEAT reply.
pub(crate) fn parse_features(resp: &FtpResponse) -> ServerFeatures {
    let mut raw = HashMap::new();
    for line in resp.message().lines() {
        let lower = line.to_ascii_lowercase();
        if lower.contains("features") || lower.contains("end") {
            continue;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (name, desc) = line.split_once(' ').unwrap_or((line, ""));
        raw.insert(name.to_ascii_uppercase(), desc.trim().to_string());
    }

    let has = |name: &str| raw.contains_key(name);
    ServerFeatures {
        mlst: has("MLST"),
        pret: has("PRET"),
        epsv: has("EPSV"),
        utf8: has("UTF8"),
        mdtm: has("MDTM"),
        mfmt: has("MFMT"),
        auth_tls: raw
            .get("AUTH")
            .map(|v| v.split(';').any(|m| m.trim().eq_ignore_ascii_case("TLS")))
            .unwrap_or(false),
        raw,
    }
}

/// Heuristic parse of free-form `STAT` text plus the `SYST` token.
fn parse_status(stat: &FtpResponse, syst: &FtpResponse) -> ServerStatus {
    let raw_status = stat.message();
    let mut status = ServerStatus {
        system: syst.message().split_whitespace().next().map(str::to_string),
        ..Default::default()
    };
    for line in raw_status.lines() {
        let line = line.trim();
        let lower = line.to_ascii_lowercase();
        if let Some(pos) = lower.find("connected to") {
            let rest = line[pos + "connected to".len()..].trim().trim_end_matches('.');
            if !rest.is_empty() {
                status.connected_to = Some(rest.to_string());
            }
        }
        if let Some(pos) = lower.find("logged in") {
            status.logged_in = true;
            let rest = line[pos + "logged in".len()..].trim();
            if let Some(user) = rest.strip_prefix("as ").or_else(|| rest.strip_prefix("AS ")) {
                let user = user.split_whitespace().next().unwrap_or_default();
                if !user.is_empty() {
                    status.logged_in_as = Some(user.to_string());
                }
            }
        }
    }
    status.raw_status = raw_status;
    status
}

/// `"/some/path" is current directory` → `/some/path`. Doubled quotes
/// inside the path are unescaped.
fn parse_quoted_path(text: &str) -> FtpResult<String> {
    let start = text
        .find('"')
        .ok_or_else(|| FtpError::internal(format!("cannot parse PWD reply '{}'", text)))?;
    let mut path = String::new();
    let mut chars = text[start + 1..].chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
                path.push('"');
                continue;
            }
            return Ok(path);
        }
        path.push(c);
    }
    Err(FtpError::internal(format!("cannot parse PWD reply '{}'", text)))
}
