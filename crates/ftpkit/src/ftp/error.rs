//! FTP error taxonomy.
//!
//! Every failure surfaced by the crate is an [`FtpError`] tagged with one of
//! four [`FtpErrorKind`]s. Failures that carry an underlying cause (an I/O
//! error, a TLS handshake error, or a [`MultiError`] collected during a data
//! transfer) expose it through [`FtpError::cause`] and
//! [`std::error::Error::source`].

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Shared, thread-safe error cause.
pub type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// Categorised FTP error.
#[derive(Debug, Clone)]
pub struct FtpError {
    pub kind: FtpErrorKind,
    pub message: String,
    /// FTP reply code that triggered the error, if any.
    pub code: Option<u16>,
    source: Option<Cause>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtpErrorKind {
    /// Protocol or transport failure.
    Internal,
    /// Precondition violation on caller-controlled input.
    InvalidArgument,
    /// The target does not exist on the server.
    NotFound,
    /// A wire value this client does not recognise.
    Unknown,
}

pub type FtpResult<T> = Result<T, FtpError>;

// ── Construction helpers ─────────────────────────────────────────────

impl FtpError {
    pub fn new(kind: FtpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach an underlying cause. Invalid-argument errors never carry one.
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        if self.kind != FtpErrorKind::InvalidArgument {
            self.source = Some(Arc::new(cause));
        }
        self
    }

    // ── Convenience constructors ─────────────────────────────────

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Internal, msg)
    }

    pub fn internal_with<E>(msg: impl Into<String>, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::internal(msg).with_cause(cause)
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::InvalidArgument, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::NotFound, msg)
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Unknown, msg)
    }

    /// An unexpected reply: internal error carrying the server's message.
    pub fn from_reply(code: u16, text: &str) -> Self {
        Self::internal(text.trim()).with_code(code)
    }

    /// Wrap everything collected during one operation into a single
    /// internal error whose cause is the ordered [`MultiError`].
    pub fn aggregate(operation: impl Into<String>, errors: Vec<FtpError>) -> Self {
        Self::internal_with(operation, MultiError::new(errors))
    }

    // ── Accessors ────────────────────────────────────────────────

    /// The wrapped cause, if any.
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == FtpErrorKind::NotFound
    }

    pub fn is_invalid_argument(&self) -> bool {
        self.kind == FtpErrorKind::InvalidArgument
    }
}

impl fmt::Display for FtpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Internal => "internal error",
            Self::InvalidArgument => "invalid argument",
            Self::NotFound => "not found",
            Self::Unknown => "unknown value",
        };
        f.write_str(name)
    }
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({}): {}", self.kind, code, self.message)?,
            None => write!(f, "{}: {}", self.kind, self.message)?,
        }
        if let Some(ref cause) = self.source {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl StdError for FtpError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for FtpError {
    fn from(e: std::io::Error) -> Self {
        Self::internal_with("I/O failure", e)
    }
}

// ─── MultiError ──────────────────────────────────────────────────────

/// Ordered list of errors collected from one multi-step sequence.
#[derive(Debug, Clone, Default)]
pub struct MultiError {
    errors: Vec<FtpError>,
}

impl MultiError {
    pub fn new(errors: Vec<FtpError>) -> Self {
        Self { errors }
    }

    pub fn push(&mut self, err: FtpError) {
        self.errors.push(err);
    }

    pub fn errors(&self) -> &[FtpError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok(())` when nothing was collected, otherwise one aggregated error.
    pub fn into_result(self, operation: impl Into<String>) -> FtpResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(FtpError::aggregate(operation, self.errors))
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.len() == 1 {
            return write!(f, "1 error occurred: {}", self.errors[0]);
        }
        write!(f, "{} errors occurred:", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n\t* {}", err)?;
        }
        Ok(())
    }
}

impl StdError for MultiError {}
