//! Downstream consumers for passthrough responses
//!
//! When the backend answers with a mimetype the client does not decode, the
//! body is copied chunk by chunk into a [`ResponseSink`]. The sink is first
//! told the content type and length so it can announce them to its own
//! consumer, typically as HTTP response headers.

use async_trait::async_trait;
use http::HeaderValue;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Receiver of a streamed response
#[async_trait]
pub trait ResponseSink: Send {
    /// Called once before any body bytes
    async fn announce(&mut self, content_type: &str, content_length: u64) -> std::io::Result<()>;

    /// Called for each chunk, in order
    async fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<()>;

    /// Called after the last chunk
    async fn finish(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Writes an HTTP header block followed by the raw body
///
/// # Example
///
/// ```
/// use palava_client::sink::{HttpSink, ResponseSink};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> std::io::Result<()> {
/// let mut sink = HttpSink::new(Vec::new());
/// sink.announce("image/png", 3).await?;
/// sink.write_chunk(b"abc").await?;
/// sink.finish().await?;
/// assert_eq!(
///     sink.into_inner(),
///     b"Content-Type: image/png\r\nContent-Length: 3\r\n\r\nabc"
/// );
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct HttpSink<W> {
    writer: W,
}

impl<W> HttpSink<W> {
    /// Wrap a writer
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> ResponseSink for HttpSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn announce(&mut self, content_type: &str, content_length: u64) -> std::io::Result<()> {
        if let Err(e) = HeaderValue::from_str(content_type) {
            return Err(std::io::Error::new(
                ErrorKind::InvalidData,
                format!("content type {content_type:?} is not a valid header value: {e}"),
            ));
        }
        let headers =
            format!("Content-Type: {content_type}\r\nContent-Length: {content_length}\r\n\r\n");
        self.writer.write_all(headers.as_bytes()).await
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(chunk).await
    }

    async fn finish(&mut self) -> std::io::Result<()> {
        self.writer.flush().await
    }
}

/// Writes only the body; the announcement is logged
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: W,
}

impl<W> WriterSink<W> {
    /// Wrap a writer
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W> ResponseSink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn announce(&mut self, content_type: &str, content_length: u64) -> std::io::Result<()> {
        debug!("Streaming {content_length} bytes of {content_type}");
        Ok(())
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(chunk).await
    }

    async fn finish(&mut self) -> std::io::Result<()> {
        self.writer.flush().await
    }
}

/// Drops streamed bodies; installed when the caller provides no sink
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

#[async_trait]
impl ResponseSink for DiscardSink {
    async fn announce(&mut self, content_type: &str, content_length: u64) -> std::io::Result<()> {
        warn!("No response sink configured, discarding {content_length} bytes of {content_type}");
        Ok(())
    }

    async fn write_chunk(&mut self, _chunk: &[u8]) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Captured {
    content_type: Option<String>,
    content_length: Option<u64>,
    body: Vec<u8>,
    finished: bool,
}

/// Captures a streamed response in memory
///
/// Clones share the same buffer, so a handle kept by the caller observes what
/// the client forwarded.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    inner: Arc<Mutex<Captured>>,
}

impl MemorySink {
    /// Empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Announced content type
    #[must_use]
    pub fn content_type(&self) -> Option<String> {
        self.inner.lock().content_type.clone()
    }

    /// Announced content length
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.inner.lock().content_length
    }

    /// Bytes received so far
    #[must_use]
    pub fn body(&self) -> Vec<u8> {
        self.inner.lock().body.clone()
    }

    /// Whether the transfer completed
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }
}

#[async_trait]
impl ResponseSink for MemorySink {
    async fn announce(&mut self, content_type: &str, content_length: u64) -> std::io::Result<()> {
        let mut inner = self.inner.lock();
        inner.content_type = Some(content_type.to_string());
        inner.content_length = Some(content_length);
        inner.body.clear();
        inner.finished = false;
        Ok(())
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.inner.lock().body.extend_from_slice(chunk);
        Ok(())
    }

    async fn finish(&mut self) -> std::io::Result<()> {
        self.inner.lock().finished = true;
        Ok(())
    }
}
