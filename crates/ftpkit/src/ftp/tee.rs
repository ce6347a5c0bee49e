//! Verbose tee. Copies every byte read or written on a stream to a
//! diagnostic sink. Used for both the control and the data channel.

use std::fmt;
use std::io::Write;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Shared diagnostic writer. Clones write to the same sink.
#[derive(Clone)]
pub struct VerboseSink {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl VerboseSink {
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }

    /// Best effort: a failing sink must never break the transfer it observes.
    fn record(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if let Ok(mut w) = self.inner.lock() {
            if let Err(e) = w.write_all(bytes).and_then(|_| w.flush()) {
                log::trace!("verbose sink write failed: {}", e);
            }
        }
    }
}

impl fmt::Debug for VerboseSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VerboseSink")
    }
}

/// Stream wrapper that mirrors traffic into an optional [`VerboseSink`].
/// With no sink it is a plain pass-through.
pub struct TeeStream<S> {
    inner: S,
    sink: Option<VerboseSink>,
}

impl<S> TeeStream<S> {
    pub fn new(inner: S, sink: Option<VerboseSink>) -> Self {
        Self { inner, sink }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    pub fn sink(&self) -> Option<&VerboseSink> {
        self.sink.as_ref()
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TeeStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let res = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let (Poll::Ready(Ok(())), Some(sink)) = (&res, &this.sink) {
            sink.record(&buf.filled()[before..]);
        }
        res
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TeeStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let res = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let (Poll::Ready(Ok(n)), Some(sink)) = (&res, &this.sink) {
            sink.record(&buf[..*n]);
        }
        res
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
