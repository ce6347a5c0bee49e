//! File transfers: upload (STOR) and download (RETR).
//!
//! Copy failures never short-circuit the data lifecycle: the data socket is
//! still closed and the `226` still read, and every failure comes back
//! inside one aggregated error.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::ftp::client::{require_arg, FtpSession};
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::{DownloadOptions, UploadOptions};

impl FtpSession {
    // ─── UPLOAD (STOR) ───────────────────────────────────────────

    /// Stream `opts.reader` to `opts.path`. Returns the bytes sent.
    pub async fn upload(&mut self, opts: UploadOptions<'_>) -> FtpResult<u64> {
        require_arg(&opts.path, "path")?;
        let UploadOptions {
            path,
            reader,
            offset,
            cancel,
        } = opts;

        let mut transfer = self
            .open_transfer(&format!("STOR {}", path), offset, cancel.as_ref())
            .await?;

        let mut errors = Vec::new();
        let sent = match tokio::io::copy(reader, &mut transfer).await {
            Ok(n) => n,
            Err(e) => {
                errors.push(FtpError::internal_with("failed to send file data", e));
                0
            }
        };

        transfer
            .finish_with(format!("upload of {} failed", path), errors)
            .await?;
        log::debug!("{} uploaded {} bytes to {}", self.log_prefix(), sent, path);
        Ok(sent)
    }

    // ─── DOWNLOAD (RETR) ─────────────────────────────────────────

    /// Download a whole file into memory.
    pub async fn download(&mut self, path: &str) -> FtpResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.download_with(DownloadOptions::new(path), &mut buf).await?;
        Ok(buf)
    }

    /// Stream a file into `writer`, starting at `opts.offset`. Returns the
    /// bytes received.
    pub async fn download_with<W>(
        &mut self,
        opts: DownloadOptions,
        writer: &mut W,
    ) -> FtpResult<u64>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        require_arg(&opts.path, "path")?;
        let mut transfer = self
            .open_transfer(&format!("RETR {}", opts.path), opts.offset, opts.cancel.as_ref())
            .await?;

        let mut errors = Vec::new();
        let received = match tokio::io::copy(&mut transfer, &mut *writer).await {
            Ok(n) => n,
            Err(e) => {
                errors.push(FtpError::internal_with("failed to receive file data", e));
                0
            }
        };
        if let Err(e) = writer.flush().await {
            errors.push(FtpError::internal_with("failed to flush downloaded data", e));
        }

        transfer
            .finish_with(format!("download of {} failed", opts.path), errors)
            .await?;
        log::debug!("{} downloaded {} bytes from {}", self.log_prefix(), received, opts.path);
        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftp::types::SessionOptions;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn blank_path_is_invalid() {
        let mut s =
            FtpSession::new(Box::new(Builder::new().build()), SessionOptions::new("h")).unwrap();
        assert!(s.download("").await.unwrap_err().is_invalid_argument());

        let mut reader: &[u8] = b"data";
        let err = s.upload(UploadOptions::new("", &mut reader)).await.unwrap_err();
        assert!(err.is_invalid_argument());
    }
}
