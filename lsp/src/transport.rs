//! Duplex stream transport over a child's stdout (read) and stdin (write).
//!
//! The transport owns the two pipe endpoints and nothing else. Closing it
//! releases the pipes; it never signals or waits on the process, which stays
//! the supervisor's job (see [`crate::process`]).
//!
//! Both halves share one fault slot. The first irrecoverable I/O error on
//! either half is recorded there, and every later read or write on either
//! half fails with that stored error without touching the stream again.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

#[derive(Debug, Clone)]
struct Fault {
    kind: io::ErrorKind,
    message: String,
}

#[derive(Debug, Default, Clone)]
struct FaultSlot(Arc<Mutex<Option<Fault>>>);

impl FaultSlot {
    fn get(&self) -> Option<Fault> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, err: &io::Error) {
        if matches!(
            err.kind(),
            io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
        ) {
            return;
        }
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(Fault {
                kind: err.kind(),
                message: err.to_string(),
            });
        }
    }

    fn short_circuit(&self, action: &str) -> Option<io::Error> {
        self.get()
            .map(|fault| io::Error::new(fault.kind, format!("cannot {action}: {}", fault.message)))
    }
}

fn closed_error(action: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        format!("cannot {action}: transport closed"),
    )
}

/// Input and output pipes of one analyzer process, composed into one channel.
pub struct DuplexTransport<R, W> {
    reader: TransportReader<R>,
    writer: TransportWriter<W>,
}

impl<R, W> DuplexTransport<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// `reader` is the process output, `writer` the process input.
    pub fn new(reader: R, writer: W) -> Self {
        let fault = FaultSlot::default();
        Self {
            reader: TransportReader {
                inner: Some(reader),
                fault: fault.clone(),
            },
            writer: TransportWriter {
                inner: Some(writer),
                fault,
            },
        }
    }

    /// Split into halves that can be driven from separate tasks.
    ///
    /// The halves keep sharing the fault slot.
    pub fn into_split(self) -> (TransportReader<R>, TransportWriter<W>) {
        (self.reader, self.writer)
    }

    /// Release both pipes. The process is left alone.
    pub async fn close(&mut self) -> io::Result<()> {
        self.reader.close();
        self.writer.close().await
    }
}

/// Read half of a [`DuplexTransport`].
pub struct TransportReader<R> {
    inner: Option<R>,
    fault: FaultSlot,
}

impl<R> TransportReader<R> {
    /// Drop the output pipe.
    pub fn close(&mut self) {
        self.inner = None;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for TransportReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(err) = self.fault.short_circuit("read") {
            return Poll::Ready(Err(err));
        }
        let this = &mut *self;
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(Err(closed_error("read")));
        };
        match Pin::new(inner).poll_read(cx, buf) {
            Poll::Ready(Err(err)) => {
                this.fault.record(&err);
                Poll::Ready(Err(err))
            }
            other => other,
        }
    }
}

/// Write half of a [`DuplexTransport`].
pub struct TransportWriter<W> {
    inner: Option<W>,
    fault: FaultSlot,
}

impl<W: AsyncWrite + Unpin> TransportWriter<W> {
    /// Flush and drop the input pipe, which the peer observes as EOF.
    ///
    /// Idempotent. A failing shutdown still releases the pipe.
    pub async fn close(&mut self) -> io::Result<()> {
        match self.inner.take() {
            Some(mut inner) => inner.shutdown().await,
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

impl<W: AsyncWrite + Unpin> TransportWriter<W> {
    fn poll_with(
        self: Pin<&mut Self>,
        action: &str,
        op: impl FnOnce(Pin<&mut W>) -> Poll<io::Result<usize>>,
    ) -> Poll<io::Result<usize>> {
        if let Some(err) = self.fault.short_circuit(action) {
            return Poll::Ready(Err(err));
        }
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(Err(closed_error(action)));
        };
        match op(Pin::new(inner)) {
            Poll::Ready(Err(err)) => {
                this.fault.record(&err);
                Poll::Ready(Err(err))
            }
            other => other,
        }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for TransportWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.poll_with("write", |inner| inner.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_with("flush", |inner| inner.poll_flush(cx).map_ok(|()| 0))
            .map_ok(|_| ())
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.inner.as_mut() {
            Some(inner) => Pin::new(inner).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, duplex};

    /// A writer that fails every write with `BrokenPipe` and counts attempts.
    struct BrokenPipe {
        attempts: Arc<Mutex<usize>>,
    }

    impl AsyncWrite for BrokenPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            *self.attempts.lock().unwrap() += 1;
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe gone")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn read_and_write_forward_to_streams() {
        let (peer_out, our_in) = duplex(64);
        let (our_out, mut peer_in) = duplex(64);
        let (mut reader, mut writer) = DuplexTransport::new(our_in, our_out).into_split();

        writer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        peer_in.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        let mut peer_out = peer_out;
        peer_out.write_all(b"pong").await.unwrap();
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn write_failure_is_sticky_across_halves() {
        let attempts = Arc::new(Mutex::new(0));
        let (_peer, our_in) = duplex(64);
        let writer = BrokenPipe {
            attempts: attempts.clone(),
        };
        let (mut reader, mut writer) = DuplexTransport::new(our_in, writer).into_split();

        let first = writer.write_all(b"x").await.unwrap_err();
        assert_eq!(first.kind(), io::ErrorKind::BrokenPipe);

        let second = writer.write_all(b"y").await.unwrap_err();
        assert_eq!(second.kind(), io::ErrorKind::BrokenPipe);
        assert!(second.to_string().contains("cannot write"));
        assert_eq!(*attempts.lock().unwrap(), 1, "stream touched after fault");

        let mut buf = [0u8; 1];
        let read_err = reader.read(&mut buf).await.unwrap_err();
        assert!(read_err.to_string().contains("cannot read"));
    }

    #[tokio::test]
    async fn close_releases_pipes_and_peer_sees_eof() {
        let (_peer_out, our_in) = duplex(64);
        let (our_out, mut peer_in) = duplex(64);
        let mut transport = DuplexTransport::new(our_in, our_out);

        transport.close().await.unwrap();
        // Second close is a no-op.
        transport.close().await.unwrap();

        let mut buf = Vec::new();
        let n = peer_in.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0);

        let (mut reader, mut writer) = transport.into_split();
        assert!(reader.is_closed());
        assert!(writer.is_closed());
        let err = writer.write_all(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        let err = reader.read(&mut [0u8; 1]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
