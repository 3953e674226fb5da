//! Response header state machine and body dispatch
//!
//! Responses start with a header of the form
//!
//! ```text
//! <mimetype>://(<content length>)?
//! ```
//!
//! which is parsed one byte at a time by [`HeaderParser`]. After the header,
//! the body is either buffered ([`read_body`]) when the mimetype is known, or
//! forwarded to a [`ResponseSink`] ([`forward_body`]) without being held in
//! memory.

use crate::error::{Error, Result};
use crate::mimetype::{self, Mimetype};
use crate::request::SEND_BUFFER_SIZE;
use crate::sink::ResponseSink;
use bytes::Bytes;
use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

/// Upper bound for the mimetype and length tokens
pub const MAX_TOKEN_LEN: usize = 1024;

/// Parsed response header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Content type token
    pub mimetype: String,
    /// Number of body bytes following the header
    pub content_length: u64,
}

impl ResponseHeader {
    /// Known mimetype, `None` for passthrough content
    #[must_use]
    pub fn known_mimetype(&self) -> Option<Mimetype> {
        Mimetype::from_token(&self.mimetype)
    }

    /// Whether the body is read into memory
    #[must_use]
    pub fn is_buffered(&self) -> bool {
        mimetype::is_buffered(&self.mimetype)
    }
}

/// Response body after dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Body of a buffered mimetype
    Buffered(Bytes),
    /// Body forwarded to the sink
    Streamed,
}

/// A received response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Header as parsed
    pub header: ResponseHeader,
    /// Body or streamed marker
    pub body: ResponseBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Mimetype,
    FirstSlash,
    SecondSlash,
    OpenParen,
    Length,
    Question,
}

/// Byte-at-a-time response header parser
///
/// # Example
///
/// ```
/// use palava_client::response::HeaderParser;
///
/// let mut parser = HeaderParser::new();
/// let mut header = None;
/// for byte in b"text/plain://(5)?" {
///     header = parser.feed(*byte).unwrap();
/// }
/// let header = header.unwrap();
/// assert_eq!(header.mimetype, "text/plain");
/// assert_eq!(header.content_length, 5);
/// ```
#[derive(Debug, Clone)]
pub struct HeaderParser {
    state: State,
    mimetype: Vec<u8>,
    length: Vec<u8>,
}

impl Default for HeaderParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderParser {
    /// Parser positioned before the first header byte
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Mimetype,
            mimetype: Vec::new(),
            length: Vec::new(),
        }
    }

    /// Feed one byte; returns the header once the closing `?` is seen
    pub fn feed(&mut self, byte: u8) -> Result<Option<ResponseHeader>> {
        match self.state {
            State::Mimetype => {
                if byte == b':' {
                    self.state = State::FirstSlash;
                } else {
                    push_bounded(&mut self.mimetype, byte)?;
                }
            }
            State::FirstSlash => {
                expect(byte, b'/', "'/'")?;
                self.state = State::SecondSlash;
            }
            State::SecondSlash => {
                expect(byte, b'/', "'/'")?;
                self.state = State::OpenParen;
            }
            State::OpenParen => {
                expect(byte, b'(', "'('")?;
                self.state = State::Length;
            }
            State::Length => {
                if byte == b')' {
                    self.state = State::Question;
                } else {
                    push_bounded(&mut self.length, byte)?;
                }
            }
            State::Question => {
                expect(byte, b'?', "'?'")?;
                let header = ResponseHeader {
                    mimetype: String::from_utf8_lossy(&self.mimetype).into_owned(),
                    content_length: parse_length(&self.length),
                };
                *self = Self::new();
                return Ok(Some(header));
            }
        }
        Ok(None)
    }
}

fn expect(byte: u8, wanted: u8, expected: &'static str) -> Result<()> {
    if byte == wanted {
        Ok(())
    } else {
        Err(Error::Protocol {
            expected,
            found: char::from(byte),
        })
    }
}

fn push_bounded(token: &mut Vec<u8>, byte: u8) -> Result<()> {
    if token.len() >= MAX_TOKEN_LEN {
        return Err(Error::Protocol {
            expected: "a shorter header token",
            found: char::from(byte),
        });
    }
    token.push(byte);
    Ok(())
}

/// Integer coercion of the length token: leading digits, otherwise 0
fn parse_length(token: &[u8]) -> u64 {
    let start = token
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(token.len());
    let digits: &[u8] = &token[start..];
    let end = digits
        .iter()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());

    std::str::from_utf8(&digits[..end])
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

async fn with_timeout<T, F>(read_timeout: Duration, context: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(read_timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Error::lost(context, e)),
        Err(_) => Err(Error::lost(
            context,
            std::io::Error::new(
                ErrorKind::TimedOut,
                format!("no data within {}ms", read_timeout.as_millis()),
            ),
        )),
    }
}

/// Read and parse a response header
///
/// Each single-byte read is bounded by `read_timeout`.
pub async fn read_header<R>(reader: &mut R, read_timeout: Duration) -> Result<ResponseHeader>
where
    R: AsyncRead + Unpin,
{
    let mut parser = HeaderParser::new();
    loop {
        let byte = with_timeout(read_timeout, "header", reader.read_u8()).await?;
        if let Some(header) = parser.feed(byte)? {
            debug!(
                "Received header {}://({})?",
                header.mimetype, header.content_length
            );
            return Ok(header);
        }
    }
}

/// Read exactly `content_length` body bytes into memory
pub async fn read_body<R>(
    reader: &mut R,
    content_length: u64,
    read_timeout: Duration,
) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let capacity = usize::try_from(content_length).unwrap_or(usize::MAX);
    let mut body = Vec::with_capacity(capacity.min(1024 * 1024));
    let mut buffer = [0u8; 8192];
    let mut remaining = content_length;

    while remaining > 0 {
        let want = usize::try_from(remaining).map_or(buffer.len(), |r| r.min(buffer.len()));
        let read = with_timeout(read_timeout, "body", reader.read(&mut buffer[..want])).await?;
        if read == 0 {
            return Err(Error::lost(
                "body",
                std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("{remaining} of {content_length} bytes missing"),
                ),
            ));
        }
        body.extend_from_slice(&buffer[..read]);
        remaining -= read as u64;
    }

    Ok(Bytes::from(body))
}

/// Forward exactly `header.content_length` bytes to the sink
///
/// The sink is told the content type and length first. Returns the number
/// of bytes forwarded, which always equals the announced length.
pub async fn forward_body<R>(
    reader: &mut R,
    header: &ResponseHeader,
    sink: &mut dyn ResponseSink,
    read_timeout: Duration,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    sink.announce(&header.mimetype, header.content_length)
        .await
        .map_err(Error::Sink)?;

    let mut buffer = [0u8; SEND_BUFFER_SIZE];
    let mut sent = 0u64;
    while sent < header.content_length {
        let remaining = header.content_length - sent;
        let want = usize::try_from(remaining).map_or(buffer.len(), |r| r.min(buffer.len()));
        let read =
            with_timeout(read_timeout, "passthrough", reader.read(&mut buffer[..want])).await?;
        if read == 0 {
            return Err(Error::lost(
                "passthrough",
                std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("{remaining} of {} bytes missing", header.content_length),
                ),
            ));
        }
        sink.write_chunk(&buffer[..read]).await.map_err(Error::Sink)?;
        sent += read as u64;
        trace!("Forwarded {sent}/{} bytes", header.content_length);
    }

    sink.finish().await.map_err(Error::Sink)?;
    debug!("Forwarded {sent} bytes of {}", header.mimetype);
    Ok(sent)
}

/// Read one complete response, buffering or forwarding its body
pub async fn read_response<R>(
    reader: &mut R,
    sink: &mut dyn ResponseSink,
    read_timeout: Duration,
) -> Result<Response>
where
    R: AsyncRead + Unpin,
{
    let header = read_header(reader, read_timeout).await?;
    let body = if header.is_buffered() {
        ResponseBody::Buffered(read_body(reader, header.content_length, read_timeout).await?)
    } else {
        forward_body(reader, &header, sink, read_timeout).await?;
        ResponseBody::Streamed
    };
    Ok(Response { header, body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use proptest::prelude::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn parse_all(input: &[u8]) -> Result<Option<ResponseHeader>> {
        let mut parser = HeaderParser::new();
        for byte in input {
            if let Some(header) = parser.feed(*byte)? {
                return Ok(Some(header));
            }
        }
        Ok(None)
    }

    #[test]
    fn test_parse_complete_header() {
        let header = parse_all(b"application/json://(42)?").unwrap().unwrap();
        assert_eq!(header.mimetype, "application/json");
        assert_eq!(header.content_length, 42);
        assert_eq!(header.known_mimetype(), Some(Mimetype::Json));
    }

    #[test]
    fn test_incomplete_header_yields_nothing() {
        assert_eq!(parse_all(b"text/plain://(12").unwrap(), None);
    }

    #[test]
    fn test_missing_second_slash() {
        let err = parse_all(b"application/json:/job/(3)?").unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol {
                expected: "'/'",
                found: 'j'
            }
        ));
    }

    #[test]
    fn test_missing_open_paren() {
        let err = parse_all(b"text/plain://12)?").unwrap_err();
        assert!(matches!(err, Error::Protocol { expected: "'('", .. }));
    }

    #[test]
    fn test_missing_question_mark() {
        let err = parse_all(b"text/plain://(1)!").unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol {
                expected: "'?'",
                found: '!'
            }
        ));
    }

    #[test]
    fn test_length_coercion() {
        assert_eq!(parse_length(b""), 0);
        assert_eq!(parse_length(b"abc"), 0);
        assert_eq!(parse_length(b"12abc"), 12);
        assert_eq!(parse_length(b" 7"), 7);
        assert_eq!(parse_length(b"99999999999999999999999"), 0);
    }

    #[test]
    fn test_empty_length_token() {
        let header = parse_all(b"text/plain://()?").unwrap().unwrap();
        assert_eq!(header.content_length, 0);
    }

    #[test]
    fn test_oversized_mimetype_rejected() {
        let input = vec![b'x'; MAX_TOKEN_LEN + 1];
        assert!(matches!(parse_all(&input), Err(Error::Protocol { .. })));
    }

    #[tokio::test]
    async fn test_read_header_eof_is_connection_lost() {
        let mut reader: &[u8] = b"text/plain:/";
        let err = read_header(&mut reader, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost { context: "header", .. }));
    }

    #[tokio::test]
    async fn test_protocol_error_reads_no_body() {
        let mut reader: &[u8] = b"application/json:/x/(3)?abc";
        let mut sink = MemorySink::new();
        let err = read_response(&mut reader, &mut sink, TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert_eq!(reader, b"/(3)?abc");
    }

    #[tokio::test]
    async fn test_short_body_is_connection_lost() {
        let mut reader: &[u8] = b"text/plain://(10)?short";
        let mut sink = MemorySink::new();
        let err = read_response(&mut reader, &mut sink, TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionLost { context: "body", .. }));
    }

    #[tokio::test]
    async fn test_unknown_mimetype_is_forwarded() {
        let mut input = b"image/png://(1500)?".to_vec();
        let payload: Vec<u8> = (0..1500u32).map(|i| (i % 256) as u8).collect();
        input.extend_from_slice(&payload);
        input.extend_from_slice(b"trailing");

        let mut reader: &[u8] = &input;
        let mut sink = MemorySink::new();
        let response = read_response(&mut reader, &mut sink, TIMEOUT).await.unwrap();

        assert_eq!(response.body, ResponseBody::Streamed);
        assert_eq!(sink.content_type().as_deref(), Some("image/png"));
        assert_eq!(sink.content_length(), Some(1500));
        assert_eq!(sink.body(), payload);
        assert_eq!(reader, b"trailing");
    }

    #[tokio::test]
    async fn test_timeout_is_connection_lost() {
        let (mut client, _server) = tokio::io::duplex(64);
        let err = read_header(&mut client, Duration::from_millis(20))
            .await
            .unwrap_err();
        match err {
            Error::ConnectionLost { source, .. } => assert_eq!(source.kind(), ErrorKind::TimedOut),
            other => panic!("unexpected error: {other}"),
        }
    }

    proptest! {
        /// The decoder consumes exactly the announced body, whatever follows it
        #[test]
        fn body_consumption_matches_length(
            body in prop::collection::vec(any::<u8>(), 0..4096),
            trailer in prop::collection::vec(any::<u8>(), 0..64),
            buffered in any::<bool>(),
        ) {
            let mimetype = if buffered { "application/xml" } else { "application/octet-stream" };
            let mut input = format!("{mimetype}://({})?", body.len()).into_bytes();
            input.extend_from_slice(&body);
            input.extend_from_slice(&trailer);

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let mut reader: &[u8] = &input;
            let mut sink = MemorySink::new();
            let response = runtime
                .block_on(read_response(&mut reader, &mut sink, TIMEOUT))
                .unwrap();

            prop_assert_eq!(response.header.content_length, body.len() as u64);
            prop_assert_eq!(reader, trailer.as_slice());
            match response.body {
                ResponseBody::Buffered(bytes) => prop_assert_eq!(bytes.as_ref(), body.as_slice()),
                ResponseBody::Streamed => prop_assert_eq!(sink.body(), body),
            }
        }
    }
}
