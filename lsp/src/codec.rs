//! JSON-RPC framing codec for the analyzer's stdio channel.
//!
//! Messages travel as `Content-Length: N\r\n\r\n{json}` over the child's
//! stdin/stdout. [`FrameReader`] and [`FrameWriter`] do the async reading and
//! writing of framed messages; neither knows anything about ids or methods.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Largest body accepted from the analyzer (4 MiB).
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error while {action}: {source}")]
    Io {
        action: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("unexpected EOF while reading headers")]
    TruncatedHeaders,
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("invalid Content-Length value {0:?}")]
    InvalidContentLength(String),
    #[error("Content-Length {0} exceeds maximum {MAX_FRAME_BYTES}")]
    Oversized(usize),
    #[error("frame body is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("serializing frame: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl FrameError {
    /// Whether the stream is still aligned on a frame boundary.
    ///
    /// A body that fails to parse has already been consumed in full, so the
    /// next read starts at the next header. Everything else leaves the stream
    /// in an unknown position.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidJson(_))
    }

    fn io(action: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| Self::Io { action, source }
    }
}

/// Pulls framed messages off the analyzer's stdout.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// `Ok(None)` means the peer closed its end between frames.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>, FrameError> {
        let Some(content_length) = self.read_headers().await? else {
            return Ok(None);
        };

        if content_length > MAX_FRAME_BYTES {
            return Err(FrameError::Oversized(content_length));
        }

        let mut body = vec![0u8; content_length];
        self.reader
            .read_exact(&mut body)
            .await
            .map_err(FrameError::io("reading frame body"))?;

        let value = serde_json::from_slice(&body).map_err(FrameError::InvalidJson)?;
        Ok(Some(value))
    }

    async fn read_headers(&mut self) -> Result<Option<usize>, FrameError> {
        let mut content_length = None;
        let mut line = String::new();
        let mut started = false;

        loop {
            line.clear();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(FrameError::io("reading header line"))?;
            match (n, started) {
                (0, false) => return Ok(None),
                (0, true) => return Err(FrameError::TruncatedHeaders),
                _ => started = true,
            }

            let header = line.trim();
            if header.is_empty() {
                break;
            }
            // jdtls also sends Content-Type; only the length matters here.
            let Some((name, value)) = header.split_once(':') else {
                continue;
            };
            if name.trim().eq_ignore_ascii_case("content-length") {
                let value = value.trim();
                content_length = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| FrameError::InvalidContentLength(value.to_owned()))?,
                );
            }
        }

        match content_length {
            Some(len) => Ok(Some(len)),
            None => Err(FrameError::MissingContentLength),
        }
    }
}

/// Frames outgoing messages onto the analyzer's stdin.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, message: &serde_json::Value) -> Result<(), FrameError> {
        let body = serde_json::to_string(message).map_err(FrameError::Serialize)?;
        self.write_raw(body.as_bytes()).await
    }

    /// Write an already-serialized body. The body is framed but not validated.
    pub async fn write_raw(&mut self, body: &[u8]) -> Result<(), FrameError> {
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        self.writer
            .write_all(header.as_bytes())
            .await
            .map_err(FrameError::io("writing frame header"))?;
        self.writer
            .write_all(body)
            .await
            .map_err(FrameError::io("writing frame body"))?;
        self.writer
            .flush()
            .await
            .map_err(FrameError::io("flushing frame"))
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }
}
