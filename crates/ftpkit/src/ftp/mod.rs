//! # FTP/FTPS client
//!
//! Implementation of the client side of RFC 959 with extensions:
//! - **RFC 2228 / 4217**: AUTH TLS / FTPS (Explicit & Implicit)
//! - **RFC 3659**: MLSD, SIZE, MDTM, REST
//! - **RFC 2389**: FEAT negotiation
//! - **RFC 2428**: EPSV
//!
//! Architecture:
//! - `types`: data structures, reply codes, config
//! - `error`: error kinds and multi-error aggregation
//! - `tee`: verbose byte tee for control and data streams
//! - `protocol`: low-level command/response codec
//! - `tls`: rustls configuration and handshakes
//! - `connection`: dialers and `connect()`
//! - `client`: the session: handshake, login, simple commands
//! - `transfer`: PASV/EPSV and the data-connection lifecycle
//! - `parser`: Unix/DOS/hosted/MLSD entry parsing
//! - `directory`: list, mkdir, rename, remove, is_dir
//! - `file_ops`: upload, download

pub mod types;
pub mod error;
pub mod tee;
pub mod protocol;
pub mod tls;
pub mod connection;
pub mod client;
pub mod transfer;
pub mod parser;
pub mod directory;
pub mod file_ops;

// Re-exports for lib.rs consumers
pub use client::FtpSession;
pub use connection::{connect, connect_with, Dialer, TcpDialer};
pub use error::{FtpError, FtpErrorKind, FtpResult, MultiError};
pub use parser::{parse_entry, parse_entry_at, ParseContext};
pub use protocol::{BoxedStream, ByteStream, FtpCodec};
pub use tee::{TeeStream, VerboseSink};
pub use tls::TlsConfig;
pub use transfer::{parse_epsv, parse_pasv, DataTransfer};
pub use types::*;
