//! Response content types understood by the client
//!
//! A response whose mimetype is one of [`Mimetype::ALL`] is buffered and
//! decoded. Anything else is streamed to the downstream sink untouched.

use std::fmt;

/// Buffered response content types
///
/// # Example
///
/// ```
/// use palava_client::Mimetype;
///
/// assert_eq!(Mimetype::Json.as_str(), "application/json");
/// assert_eq!(Mimetype::from_token("text/plain"), Some(Mimetype::Text));
/// assert_eq!(Mimetype::from_token("image/png"), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mimetype {
    /// Failure report of a backend job
    Error,
    /// Legacy PHP literal expression
    Php,
    /// JSON document
    Json,
    /// Plain text
    Text,
    /// XML document
    Xml,
}

impl Mimetype {
    /// Every buffered mimetype
    pub const ALL: [Self; 5] = [Self::Error, Self::Php, Self::Json, Self::Text, Self::Xml];

    /// Canonical wire token
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "application/error",
            Self::Php => "application/x-httpd-php",
            Self::Json => "application/json",
            Self::Text => "text/plain",
            Self::Xml => "application/xml",
        }
    }

    /// Short name used in logs and on the command line
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Php => "php",
            Self::Json => "json",
            Self::Text => "text",
            Self::Xml => "xml",
        }
    }

    /// Look up a wire token; matching is exact
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == token)
    }
}

impl fmt::Display for Mimetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a response with this token is read into memory
#[must_use]
pub fn is_buffered(token: &str) -> bool {
    Mimetype::from_token(token).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_round_trip() {
        for mimetype in Mimetype::ALL {
            assert_eq!(Mimetype::from_token(mimetype.as_str()), Some(mimetype));
        }
    }

    #[test]
    fn test_short_names_are_not_tokens() {
        assert_eq!(Mimetype::from_token("json"), None);
        assert_eq!(Mimetype::from_token("php"), None);
        assert_eq!(Mimetype::Php.short_name(), "php");
    }

    #[test]
    fn test_buffered_set() {
        assert!(is_buffered("application/error"));
        assert!(is_buffered("application/xml"));
        assert!(!is_buffered("image/png"));
        assert!(!is_buffered("Application/JSON"));
        assert!(!is_buffered(""));
    }
}
