//! Typed decoding of buffered response bodies

pub mod php;

use crate::error::{Error, Result};
use crate::mimetype::Mimetype;
use crate::response::{Response, ResponseBody};
use serde_json::Value;
use tracing::{trace, warn};

pub use php::{PhpKey, PhpValue};

/// Result of a call
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// The backend job failed; carries the backend's error text
    Error(String),
    /// Plain text
    Text(String),
    /// XML document, undecoded
    Xml(String),
    /// Decoded JSON document
    Json(Value),
    /// Decoded legacy PHP literal
    Php(PhpValue),
    /// The body went to the response sink
    Streamed {
        /// Announced content type
        content_type: String,
        /// Number of bytes forwarded
        content_length: u64,
    },
}

impl Payload {
    /// Turn a backend failure into [`Error::Application`]
    pub fn into_result(self) -> Result<Self> {
        match self {
            Self::Error(text) => Err(Error::Application(text)),
            other => Ok(other),
        }
    }

    /// Text of a text, XML or error payload, or a string scalar
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Error(text) | Self::Text(text) | Self::Xml(text) => Some(text),
            Self::Json(Value::String(text)) | Self::Php(PhpValue::String(text)) => Some(text),
            _ => None,
        }
    }

    /// Structured view of the payload as a JSON value
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Error(text) | Self::Text(text) | Self::Xml(text) => Value::String(text.clone()),
            Self::Json(value) => value.clone(),
            Self::Php(value) => Value::from(value.clone()),
            Self::Streamed {
                content_type,
                content_length,
            } => serde_json::json!({
                "streamed": content_type,
                "length": content_length,
            }),
        }
    }
}

fn utf8(mimetype: Mimetype, body: &[u8]) -> Result<String> {
    String::from_utf8(body.to_vec()).map_err(|e| Error::Decode {
        mimetype: mimetype.as_str(),
        reason: e.to_string(),
    })
}

/// Decode a buffered body
pub fn decode(mimetype: Mimetype, body: &[u8]) -> Result<Payload> {
    trace!("Decoding {} bytes as {}", body.len(), mimetype.short_name());
    match mimetype {
        Mimetype::Error => {
            let text = String::from_utf8_lossy(body).into_owned();
            warn!("Backend reported an error: {text}");
            Ok(Payload::Error(text))
        }
        Mimetype::Text => Ok(Payload::Text(utf8(mimetype, body)?)),
        Mimetype::Xml => Ok(Payload::Xml(utf8(mimetype, body)?)),
        Mimetype::Json => serde_json::from_slice(body)
            .map(Payload::Json)
            .map_err(|e| Error::Decode {
                mimetype: mimetype.as_str(),
                reason: e.to_string(),
            }),
        Mimetype::Php => {
            let text = utf8(mimetype, body)?;
            php::parse(&text).map(Payload::Php).map_err(|e| Error::Decode {
                mimetype: mimetype.as_str(),
                reason: e.to_string(),
            })
        }
    }
}

/// Decode a response produced by [`crate::response::read_response`]
pub fn decode_response(response: &Response) -> Result<Payload> {
    match (&response.body, response.header.known_mimetype()) {
        (ResponseBody::Buffered(body), Some(mimetype)) => decode(mimetype, body),
        _ => Ok(Payload::Streamed {
            content_type: response.header.mimetype.clone(),
            content_length: response.header.content_length,
        }),
    }
}
