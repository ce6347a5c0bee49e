//! Scripted transports shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Write;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use ftpkit::{BoxedStream, Dialer, FtpError, FtpResult, FtpSession, SessionOptions};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_test::io::Mock;
use tokio_util::sync::CancellationToken;

pub const HOST: &str = "ftp.example.com";

/// Hands out pre-built data streams in order and records every address.
#[derive(Default)]
pub struct ScriptedDialer {
    streams: Mutex<VecDeque<BoxedStream>>,
    dialed: Mutex<Vec<String>>,
}

impl ScriptedDialer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, stream: impl AsyncRead + AsyncWrite + Unpin + Send + 'static) {
        self.streams.lock().unwrap().push_back(Box::new(stream));
    }

    pub fn dialed(&self) -> Vec<String> {
        self.dialed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dialer for ScriptedDialer {
    async fn dial(
        &self,
        addr: &str,
        _cancel: Option<&CancellationToken>,
    ) -> FtpResult<BoxedStream> {
        self.dialed.lock().unwrap().push(addr.to_string());
        self.streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| FtpError::internal(format!("unexpected dial to {}", addr)))
    }
}

/// Mock wrapper that remembers whether it was shut down.
pub struct Tracked {
    inner: Mock,
    closed: Arc<AtomicBool>,
}

impl Tracked {
    pub fn new(inner: Mock) -> (Self, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        (
            Self {
                inner,
                closed: Arc::clone(&closed),
            },
            closed,
        )
    }
}

impl AsyncRead for Tracked {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for Tracked {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.closed.store(true, Ordering::SeqCst);
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// In-memory verbose sink.
#[derive(Clone, Default)]
pub struct Capture(pub Arc<Mutex<Vec<u8>>>);

impl Capture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn session(control: Mock, dialer: &Arc<ScriptedDialer>) -> FtpSession {
    session_with(control, dialer, SessionOptions::new(HOST))
}

pub fn session_with(
    control: Mock,
    dialer: &Arc<ScriptedDialer>,
    options: SessionOptions,
) -> FtpSession {
    let dialer: Arc<dyn Dialer> = dialer.clone();
    FtpSession::with_dialer(Box::new(control), options, dialer).unwrap()
}
