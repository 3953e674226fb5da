//! Outbound request frames
//!
//! Every request is a single header followed directly by the body bytes:
//!
//! ```text
//! <type>://<job>/<session id>/(<body length>)?<body>
//! ```
//!
//! Binary uploads send the header as its own write and then stream the file
//! in [`SEND_BUFFER_SIZE`] chunks.

use crate::error::{Error, Result};
use bytes::Bytes;
use serde_json::{Map, Value};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Chunk size for file uploads and passthrough responses
pub const SEND_BUFFER_SIZE: usize = 512;

/// Environment descriptor submitted with the `open` handshake
pub type Environment = Map<String, Value>;

/// Call type carried in the first header field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    /// Connection handshake
    Open,
    /// Connection teardown
    Close,
    /// Keyed parameters, JSON encoded
    Data,
    /// Raw text body
    Text,
    /// Caller supplied JSON body
    Json,
    /// File upload
    Binary,
}

impl RequestType {
    /// Wire name of the call type
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Data => "data",
            Self::Text => "text",
            Self::Json => "json",
            Self::Binary => "binary",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One parameter source of a data call
///
/// # Example
///
/// ```
/// use palava_client::request::{Param, merge_params};
/// use serde_json::json;
///
/// let merged = merge_params([Param::from("a=1"), Param::from(("b", 2)), Param::from("a=3")]);
/// assert_eq!(serde_json::Value::Object(merged), json!({"a": "3", "b": 2}));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// A `key=value` string
    Pair(String),
    /// A ready-made mapping
    Map(Map<String, Value>),
}

impl From<&str> for Param {
    fn from(pair: &str) -> Self {
        Self::Pair(pair.to_string())
    }
}

impl From<String> for Param {
    fn from(pair: String) -> Self {
        Self::Pair(pair)
    }
}

impl From<Map<String, Value>> for Param {
    fn from(map: Map<String, Value>) -> Self {
        Self::Map(map)
    }
}

impl<K: Into<String>, V: Into<Value>> From<(K, V)> for Param {
    fn from((key, value): (K, V)) -> Self {
        let mut map = Map::new();
        map.insert(key.into(), value.into());
        Self::Map(map)
    }
}

/// Merge parameter sources into one insertion-ordered mapping
///
/// Later duplicate keys overwrite the earlier value but keep the position of
/// the first occurrence. A pair without `=` maps its whole text to `null`.
pub fn merge_params<I, P>(params: I) -> Map<String, Value>
where
    I: IntoIterator<Item = P>,
    P: Into<Param>,
{
    let mut merged = Map::new();
    for param in params {
        match param.into() {
            Param::Pair(pair) => match pair.split_once('=') {
                Some((key, value)) => {
                    merged.insert(key.to_string(), Value::String(value.to_string()));
                }
                None => {
                    merged.insert(pair, Value::Null);
                }
            },
            Param::Map(map) => {
                for (key, value) in map {
                    merged.insert(key, value);
                }
            }
        }
    }
    merged
}

/// Body of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// Bytes held in memory
    Inline(Bytes),
    /// File streamed from disk
    File {
        /// Path of the file
        path: PathBuf,
        /// Size recorded when the request was built
        length: u64,
    },
}

impl RequestBody {
    /// Number of body bytes announced in the header
    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            Self::Inline(bytes) => bytes.len() as u64,
            Self::File { length, .. } => *length,
        }
    }

    /// Whether the body is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single outbound call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    request_type: RequestType,
    job: String,
    session_id: String,
    body: RequestBody,
}

impl Request {
    fn inline(request_type: RequestType, job: &str, body: impl Into<Bytes>) -> Self {
        Self {
            request_type,
            job: job.to_string(),
            session_id: String::new(),
            body: RequestBody::Inline(body.into()),
        }
    }

    /// Data call: parameters merged and JSON encoded
    pub fn data<I, P>(job: &str, params: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<Param>,
    {
        let body = serde_json::to_vec(&merge_params(params))?;
        Ok(Self::inline(RequestType::Data, job, body))
    }

    /// Text call with a literal body
    #[must_use]
    pub fn text(job: &str, body: impl Into<String>) -> Self {
        Self::inline(RequestType::Text, job, body.into())
    }

    /// JSON call; empty containers and `null` are sent as `{}`
    pub fn json(job: &str, value: &Value) -> Result<Self> {
        let body = match value {
            Value::Null => "{}".to_string(),
            Value::Object(map) if map.is_empty() => "{}".to_string(),
            Value::Array(items) if items.is_empty() => "{}".to_string(),
            other => serde_json::to_string(other)?,
        };
        Ok(Self::inline(RequestType::Json, job, body))
    }

    /// JSON call with pre-serialized text, sent verbatim
    #[must_use]
    pub fn json_raw(job: &str, text: impl Into<String>) -> Self {
        Self::inline(RequestType::Json, job, text.into())
    }

    /// Binary upload of a local file
    pub async fn binary(job: &str, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(source) => return Err(Error::FileUnreadable { path, source }),
        };
        if !metadata.is_file() {
            return Err(Error::FileUnreadable {
                path,
                source: std::io::Error::new(ErrorKind::InvalidInput, "not a regular file"),
            });
        }

        Ok(Self {
            request_type: RequestType::Binary,
            job: job.to_string(),
            session_id: String::new(),
            body: RequestBody::File {
                path,
                length: metadata.len(),
            },
        })
    }

    /// Handshake carrying the caller's environment descriptor
    pub fn open(environment: &Environment) -> Result<Self> {
        let body = serde_json::to_vec(environment)?;
        Ok(Self::inline(RequestType::Open, "", body))
    }

    /// Teardown frame
    #[must_use]
    pub fn close() -> Self {
        Self::inline(RequestType::Close, "", "{}")
    }

    /// Attach the session token sent with this request
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Call type
    #[must_use]
    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    /// Target job name
    #[must_use]
    pub fn job(&self) -> &str {
        &self.job
    }

    /// Session token sent with the request
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Request body
    #[must_use]
    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Textual frame header
    #[must_use]
    pub fn header(&self) -> String {
        format!(
            "{}://{}/{}/({})?",
            self.request_type,
            self.job,
            self.session_id,
            self.body.len()
        )
    }

    /// Write header and body to the backend
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let header = self.header();
        debug!("Sending {header}");

        match &self.body {
            RequestBody::Inline(body) => {
                let mut frame = Vec::with_capacity(header.len() + body.len());
                frame.extend_from_slice(header.as_bytes());
                frame.extend_from_slice(body);
                writer
                    .write_all(&frame)
                    .await
                    .map_err(|e| Error::lost("send", e))?;
            }
            RequestBody::File { path, length } => {
                let mut file = tokio::fs::File::open(path)
                    .await
                    .map_err(|source| Error::FileUnreadable {
                        path: path.clone(),
                        source,
                    })?;

                writer
                    .write_all(header.as_bytes())
                    .await
                    .map_err(|e| Error::lost("send", e))?;

                let mut buffer = [0u8; SEND_BUFFER_SIZE];
                let mut remaining = *length;
                while remaining > 0 {
                    let want = usize::try_from(remaining)
                        .map_or(SEND_BUFFER_SIZE, |r| r.min(SEND_BUFFER_SIZE));
                    let read = file
                        .read(&mut buffer[..want])
                        .await
                        .map_err(|e| Error::lost("upload", e))?;
                    if read == 0 {
                        return Err(Error::lost(
                            "upload",
                            std::io::Error::new(
                                ErrorKind::UnexpectedEof,
                                format!("{} shrank during upload", path.display()),
                            ),
                        ));
                    }
                    writer
                        .write_all(&buffer[..read])
                        .await
                        .map_err(|e| Error::lost("send", e))?;
                    remaining -= read as u64;
                    trace!("Uploaded {read} bytes, {remaining} remaining");
                }
            }
        }

        writer.flush().await.map_err(|e| Error::lost("send", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn body_text(request: &Request) -> String {
        match request.body() {
            RequestBody::Inline(bytes) => String::from_utf8(bytes.to_vec()).unwrap(),
            RequestBody::File { .. } => panic!("expected inline body"),
        }
    }

    #[test]
    fn test_data_header_and_body() {
        let request = Request::data("shop.cart.add", ["a=1", "b=2"])
            .unwrap()
            .with_session("sess42");
        assert_eq!(body_text(&request), r#"{"a":"1","b":"2"}"#);
        assert_eq!(request.header(), "data://shop.cart.add/sess42/(17)?");
    }

    #[test]
    fn test_merge_overwrites_in_place() {
        let mut map = Map::new();
        map.insert("b".to_string(), json!(["x"]));
        map.insert("c".to_string(), json!(true));

        let merged = merge_params([
            Param::from("a=1"),
            Param::from("b=2"),
            Param::from(map),
            Param::from("a=last"),
        ]);

        let keys: Vec<&str> = merged.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(merged["a"], json!("last"));
        assert_eq!(merged["b"], json!(["x"]));
    }

    #[test]
    fn test_pair_splits_on_first_equals() {
        let merged = merge_params(["query=a=b", "flag"]);
        assert_eq!(merged["query"], json!("a=b"));
        assert_eq!(merged["flag"], Value::Null);
    }

    #[test]
    fn test_text_body_is_literal() {
        let request = Request::text("echo", "héllo");
        assert_eq!(request.header(), "text://echo//(6)?");
        assert_eq!(body_text(&request), "héllo");
    }

    #[test]
    fn test_json_empty_values_become_object() {
        for value in [json!(null), json!({}), json!([])] {
            let request = Request::json("job", &value).unwrap();
            assert_eq!(body_text(&request), "{}");
        }
        let request = Request::json("job", &json!({"k": [1, 2]})).unwrap();
        assert_eq!(body_text(&request), r#"{"k":[1,2]}"#);
    }

    #[test]
    fn test_open_and_close_frames() {
        let mut environment = Environment::new();
        environment.insert("REMOTE_ADDR".to_string(), json!("10.1.2.3"));
        let open = Request::open(&environment).unwrap();
        assert_eq!(open.request_type(), RequestType::Open);
        assert_eq!(open.job(), "");
        assert_eq!(body_text(&open), r#"{"REMOTE_ADDR":"10.1.2.3"}"#);

        let close = Request::close().with_session("s");
        assert_eq!(close.header(), "close:///s/(2)?");
    }

    #[tokio::test]
    async fn test_inline_write_is_exact() {
        let request = Request::json_raw("j", "[1]");
        let mut out = Vec::new();
        request.write_to(&mut out).await.unwrap();
        assert_eq!(out, b"json://j//(3)?[1]");
    }

    #[tokio::test]
    async fn test_binary_streams_whole_file() {
        let mut file = NamedTempFile::new().unwrap();
        let content: Vec<u8> = (0..1300u32).map(|i| (i % 251) as u8).collect();
        file.write_all(&content).unwrap();

        let request = Request::binary("assets.upload", file.path()).await.unwrap();
        assert_eq!(request.body().len(), 1300);

        let mut out = Vec::new();
        request.write_to(&mut out).await.unwrap();

        let header = b"binary://assets.upload//(1300)?";
        assert_eq!(&out[..header.len()], header);
        assert_eq!(&out[header.len()..], content.as_slice());
    }

    #[tokio::test]
    async fn test_binary_file_shrinking_mid_upload() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[7u8; 600]).unwrap();
        let request = Request::binary("assets.upload", file.path()).await.unwrap();
        file.as_file().set_len(100).unwrap();

        let mut out = Vec::new();
        let err = request.write_to(&mut out).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost { context: "upload", .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_binary_missing_file() {
        let result = Request::binary("assets.upload", "/definitely/not/here.bin").await;
        assert!(matches!(result, Err(Error::FileUnreadable { .. })));
    }

    #[tokio::test]
    async fn test_binary_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = Request::binary("assets.upload", dir.path()).await;
        assert!(matches!(result, Err(Error::FileUnreadable { .. })));
    }
}
