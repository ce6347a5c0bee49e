//! Directory operations: list, mkdir, rename, remove, is_dir.

use tokio::io::AsyncReadExt;

use crate::ftp::client::{require_arg, FtpSession};
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::parser::{self, ParseContext};
use crate::ftp::protocol::FtpCodec;
use crate::ftp::types::reply::*;
use crate::ftp::types::{Entry, ListOptions};

impl FtpSession {
    // ─── LIST / MLSD ─────────────────────────────────────────────

    /// List a directory: `MLSD` when the server supports machine listings,
    /// otherwise `LIST -a` (show_all) or `LIST`.
    ///
    /// Any line that fails to parse fails the whole listing.
    pub async fn list(&mut self, opts: ListOptions) -> FtpResult<Vec<Entry>> {
        let verb = if self.features.mlst {
            "MLSD"
        } else if opts.show_all {
            "LIST -a"
        } else {
            "LIST"
        };
        let command = if opts.path.is_empty() {
            verb.to_string()
        } else {
            format!("{} {}", verb, opts.path)
        };
        let ctx = ParseContext::new(self.options.location);

        let mut transfer = self.open_transfer(&command, 0, opts.cancel.as_ref()).await?;
        let mut errors = Vec::new();
        let mut body = Vec::new();
        if let Err(e) = transfer.read_to_end(&mut body).await {
            errors.push(FtpError::internal_with("failed to read listing", e));
        }

        let mut entries = Vec::new();
        if errors.is_empty() {
            for raw in body.split(|&b| b == b'\n') {
                match parse_listing_line(raw, &ctx) {
                    Ok(Some(entry)) => entries.push(entry),
                    Ok(None) => {}
                    Err(e) => {
                        errors.push(e);
                        break;
                    }
                }
            }
        }

        transfer.finish_with("list failed", errors).await?;
        Ok(entries)
    }

    /// Whether `path` is a directory, decided from its parent's listing.
    pub async fn is_dir(&mut self, path: &str) -> FtpResult<bool> {
        require_arg(path, "path")?;
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            return Ok(true);
        }
        let (parent, base) = match trimmed.rsplit_once('/') {
            Some(("", base)) => ("/", base),
            Some((parent, base)) => (parent, base),
            None => ("", trimmed),
        };

        let entries = self.list(ListOptions::new(parent).show_all(true)).await?;
        entries
            .iter()
            .find(|e| e.name == base)
            .map(Entry::is_dir)
            .ok_or_else(|| FtpError::not_found(format!("{} not found", path)))
    }

    // ─── MKD ─────────────────────────────────────────────────────

    /// Create `path` and any missing parents.
    ///
    /// Each segment, root to leaf, is probed with `CWD`; a 550 reply is
    /// answered with `MKD`. The working directory is reset to `/` at the end,
    /// also after a failed segment. Relative paths are taken from the root.
    pub async fn mkdir(&mut self, path: &str) -> FtpResult<()> {
        require_arg(path, "path")?;
        let codec = self.codec()?;

        let created = create_segments(codec, path).await;
        let restored = codec.expect("CWD /", ACTION_OK).await.map(|_| ());
        match (created, restored) {
            (Ok(()), restored) => restored,
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(restore)) => Err(FtpError::aggregate(
                format!("mkdir {} failed", path),
                vec![e, restore],
            )),
        }
    }

    // ─── RNFR / RNTO ─────────────────────────────────────────────

    /// Two-phase rename; `RNTO` is only sent once `RNFR` is accepted.
    pub async fn rename(&mut self, from: &str, to: &str) -> FtpResult<()> {
        require_arg(from, "source path")?;
        require_arg(to, "destination path")?;
        let codec = self.codec()?;
        codec.expect(&format!("RNFR {}", from), PENDING).await?;
        codec.expect(&format!("RNTO {}", to), ACTION_OK).await?;
        Ok(())
    }

    // ─── DELE / RMD ──────────────────────────────────────────────

    pub async fn remove_file(&mut self, path: &str) -> FtpResult<()> {
        require_arg(path, "path")?;
        self.codec()?
            .expect(&format!("DELE {}", path), ACTION_OK)
            .await?;
        Ok(())
    }

    /// Remove an empty directory.
    pub async fn remove_dir(&mut self, path: &str) -> FtpResult<()> {
        require_arg(path, "path")?;
        self.codec()?
            .expect(&format!("RMD {}", path), ACTION_OK)
            .await?;
        Ok(())
    }
}

async fn create_segments(codec: &mut FtpCodec, path: &str) -> FtpResult<()> {
    let mut current = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);

        let resp = codec.execute(&format!("CWD {}", current)).await?;
        match resp.code {
            ACTION_OK => {}
            FILE_UNAVAILABLE => {
                codec.expect(&format!("MKD {}", current), PATH_CREATED).await?;
            }
            code => return Err(FtpError::from_reply(code, &resp.message())),
        }
    }
    Ok(())
}

/// One raw listing line. Blank and `total` lines yield `None`. Names that
/// are not UTF-8 fail the line rather than being rewritten, since a lossy
/// name could not be sent back in a later command.
fn parse_listing_line(raw: &[u8], ctx: &ParseContext) -> FtpResult<Option<Entry>> {
    let line = std::str::from_utf8(raw)
        .map_err(|e| FtpError::internal_with("listing line is not valid UTF-8", e))?
        .trim();
    if line.is_empty() || is_total_line(line) {
        return Ok(None);
    }
    parser::parse_entry_at(line, ctx).map(Some)
}

/// The `total <blocks>` header some `ls`-backed servers emit.
fn is_total_line(line: &str) -> bool {
    line.strip_prefix("total ")
        .map(|n| n.trim().bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}
