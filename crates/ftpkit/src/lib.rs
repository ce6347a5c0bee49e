//! # ftpkit
//!
//! FTP/FTPS client core: control-channel sequencing, passive data
//! connections, explicit/implicit TLS, and LIST/MLSD entry parsing.

pub mod ftp;

pub use ftp::*;
