//! Safe reader for legacy PHP literal responses
//!
//! Old backends answer some jobs with a PHP expression such as
//! `array('id' => 5, 'tags' => array('a', 'b'))`. This module parses the
//! literal subset of that syntax into a [`PhpValue`] tree. Nothing is ever
//! evaluated: identifiers other than `null`, `true`, `false`, `array`, `INF`
//! and `NAN` are rejected.
//!
//! Array keys follow PHP rules: implicit keys continue after the largest
//! integer key seen so far, decimal strings such as `"7"` become integer keys,
//! and a repeated key replaces the earlier value in place.

use serde_json::{Number, Value};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Maximum array nesting accepted by the parser
pub const MAX_DEPTH: usize = 128;

/// Key of a PHP array entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PhpKey {
    /// Integer key
    Int(i64),
    /// String key
    String(String),
}

impl fmt::Display for PhpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// Decoded PHP value
#[derive(Debug, Clone, PartialEq)]
pub enum PhpValue {
    /// `null`
    Null,
    /// `true` / `false`
    Bool(bool),
    /// Integer literal
    Int(i64),
    /// Float literal
    Float(f64),
    /// String literal
    String(String),
    /// Array with keys `0..n` in order
    Sequence(Vec<PhpValue>),
    /// Any other array, in insertion order
    Mapping(Vec<(PhpKey, PhpValue)>),
}

impl PhpValue {
    /// Look up a mapping entry by its string form
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Mapping(entries) => entries
                .iter()
                .find(|(k, _)| k.to_string() == key)
                .map(|(_, v)| v),
            Self::Sequence(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// String content, if this is a string
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<PhpValue> for Value {
    fn from(value: PhpValue) -> Self {
        match value {
            PhpValue::Null => Self::Null,
            PhpValue::Bool(b) => Self::Bool(b),
            PhpValue::Int(i) => Self::Number(i.into()),
            PhpValue::Float(f) => Number::from_f64(f).map_or(Self::Null, Self::Number),
            PhpValue::String(s) => Self::String(s),
            PhpValue::Sequence(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            PhpValue::Mapping(entries) => Self::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), Self::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Reasons a PHP literal is rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhpParseError {
    /// Input ended inside a value
    #[error("unexpected end of input")]
    UnexpectedEnd,

    /// A byte that cannot start or continue the current construct
    #[error("unexpected {found:?} at offset {offset}")]
    Unexpected {
        /// Offending character
        found: char,
        /// Byte offset in the input
        offset: usize,
    },

    /// An identifier that is not a literal keyword
    #[error("unsupported identifier '{0}'")]
    Identifier(String),

    /// Malformed numeric literal
    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    /// An array used as an array key
    #[error("illegal array key at offset {0}")]
    IllegalKey(usize),

    /// Arrays nested deeper than [`MAX_DEPTH`]
    #[error("nesting deeper than {MAX_DEPTH} levels")]
    TooDeep,

    /// Content after the expression
    #[error("trailing data at offset {0}")]
    Trailing(usize),
}

type ParseResult<T> = std::result::Result<T, PhpParseError>;

/// Parse a PHP literal expression, optionally terminated by `;`
///
/// # Example
///
/// ```
/// use palava_client::codec::php::{parse, PhpValue};
///
/// let value = parse("array(1, 2, 'three')").unwrap();
/// assert_eq!(
///     value,
///     PhpValue::Sequence(vec![
///         PhpValue::Int(1),
///         PhpValue::Int(2),
///         PhpValue::String("three".to_string()),
///     ])
/// );
/// ```
pub fn parse(input: &str) -> ParseResult<PhpValue> {
    let mut parser = Parser {
        bytes: input.as_bytes(),
        pos: 0,
        depth: 0,
    };
    let value = parser.value()?;
    parser.skip_ws();
    if parser.peek() == Some(b';') {
        parser.pos += 1;
        parser.skip_ws();
    }
    if parser.pos < parser.bytes.len() {
        return Err(PhpParseError::Trailing(parser.pos));
    }
    Ok(value)
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> ParseResult<u8> {
        let byte = self.peek().ok_or(PhpParseError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(byte)
    }

    fn unexpected(&self) -> PhpParseError {
        match self.peek() {
            Some(byte) => PhpParseError::Unexpected {
                found: char::from(byte),
                offset: self.pos,
            },
            None => PhpParseError::UnexpectedEnd,
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn value(&mut self) -> ParseResult<PhpValue> {
        self.skip_ws();
        match self.peek() {
            None => Err(PhpParseError::UnexpectedEnd),
            Some(b'\'') => self.single_quoted().map(PhpValue::String),
            Some(b'"') => self.double_quoted().map(PhpValue::String),
            Some(b'[') => {
                self.pos += 1;
                self.array(b']')
            }
            Some(b'-' | b'+' | b'.' | b'0'..=b'9') => self.number(),
            Some(b) if b.is_ascii_alphabetic() || b == b'_' => self.keyword(),
            Some(_) => Err(self.unexpected()),
        }
    }

    fn identifier(&mut self) -> &str {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            self.pos += 1;
        }
        // identifier bytes are ASCII
        std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or_default()
    }

    fn keyword(&mut self) -> ParseResult<PhpValue> {
        let word = self.identifier().to_ascii_lowercase();
        match word.as_str() {
            "null" => Ok(PhpValue::Null),
            "true" => Ok(PhpValue::Bool(true)),
            "false" => Ok(PhpValue::Bool(false)),
            "inf" => Ok(PhpValue::Float(f64::INFINITY)),
            "nan" => Ok(PhpValue::Float(f64::NAN)),
            "array" => {
                self.skip_ws();
                if self.peek() != Some(b'(') {
                    return Err(self.unexpected());
                }
                self.pos += 1;
                self.array(b')')
            }
            _ => Err(PhpParseError::Identifier(word)),
        }
    }

    fn number(&mut self) -> ParseResult<PhpValue> {
        let negative = match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                true
            }
            Some(b'+') => {
                self.pos += 1;
                false
            }
            _ => false,
        };
        self.skip_ws();

        if self.peek().is_some_and(|b| b.is_ascii_alphabetic()) {
            let word = self.identifier().to_ascii_lowercase();
            return match word.as_str() {
                "inf" if negative => Ok(PhpValue::Float(f64::NEG_INFINITY)),
                "inf" => Ok(PhpValue::Float(f64::INFINITY)),
                _ => Err(PhpParseError::Identifier(word)),
            };
        }

        let start = self.pos;
        if self.bytes[start..].starts_with(b"0x") || self.bytes[start..].starts_with(b"0X") {
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek().is_some_and(|b| b.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let digits = String::from_utf8_lossy(&self.bytes[digits_start..self.pos]);
            let magnitude = i64::from_str_radix(&digits, 16)
                .map_err(|_| PhpParseError::InvalidNumber(format!("0x{digits}")))?;
            return Ok(PhpValue::Int(if negative { -magnitude } else { magnitude }));
        }

        let mut is_float = false;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some(b'.') {
            is_float = true;
            self.pos += 1;
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            is_float = true;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }

        let text = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
        let signed = if negative { format!("-{text}") } else { text };
        if !is_float && let Ok(i) = signed.parse::<i64>() {
            return Ok(PhpValue::Int(i));
        }
        // integers beyond i64 degrade to float, as in PHP
        signed
            .parse::<f64>()
            .map(PhpValue::Float)
            .map_err(|_| PhpParseError::InvalidNumber(signed))
    }

    fn single_quoted(&mut self) -> ParseResult<String> {
        self.pos += 1;
        let mut out = Vec::new();
        loop {
            match self.bump()? {
                b'\'' => break,
                b'\\' => match self.peek() {
                    Some(escaped @ (b'\\' | b'\'')) => {
                        self.pos += 1;
                        out.push(escaped);
                    }
                    _ => out.push(b'\\'),
                },
                byte => out.push(byte),
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn double_quoted(&mut self) -> ParseResult<String> {
        self.pos += 1;
        let mut out = Vec::new();
        loop {
            match self.bump()? {
                b'"' => break,
                b'\\' => self.escape(&mut out)?,
                byte => out.push(byte),
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn escape(&mut self, out: &mut Vec<u8>) -> ParseResult<()> {
        let byte = self.bump()?;
        match byte {
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'v' => out.push(0x0b),
            b'e' => out.push(0x1b),
            b'f' => out.push(0x0c),
            b'\\' | b'$' | b'"' => out.push(byte),
            b'0'..=b'7' => {
                let mut code = u32::from(byte - b'0');
                for _ in 0..2 {
                    match self.peek() {
                        Some(d @ b'0'..=b'7') => {
                            self.pos += 1;
                            code = code * 8 + u32::from(d - b'0');
                        }
                        _ => break,
                    }
                }
                out.push((code & 0xff) as u8);
            }
            b'x' if self.peek().is_some_and(|b| b.is_ascii_hexdigit()) => {
                let mut code = 0u8;
                for _ in 0..2 {
                    match self.peek().and_then(|b| char::from(b).to_digit(16)) {
                        Some(d) => {
                            self.pos += 1;
                            code = code * 16 + d as u8;
                        }
                        None => break,
                    }
                }
                out.push(code);
            }
            b'u' if self.peek() == Some(b'{') => {
                let start = self.pos + 1;
                let end = self.bytes[start..]
                    .iter()
                    .position(|&b| b == b'}')
                    .map(|p| start + p)
                    .ok_or(PhpParseError::UnexpectedEnd)?;
                let digits = String::from_utf8_lossy(&self.bytes[start..end]);
                let ch = u32::from_str_radix(&digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or(PhpParseError::Unexpected {
                        found: 'u',
                        offset: self.pos - 1,
                    })?;
                let mut buf = [0u8; 4];
                out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                self.pos = end + 1;
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
        Ok(())
    }

    fn array(&mut self, close: u8) -> ParseResult<PhpValue> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(PhpParseError::TooDeep);
        }

        let mut entries: Vec<(PhpKey, PhpValue)> = Vec::new();
        let mut index: HashMap<PhpKey, usize> = HashMap::new();
        let mut next_index: i64 = 0;

        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.pos += 1;
                break;
            }

            let key_offset = self.pos;
            let first = self.value()?;
            self.skip_ws();
            let (key, value) = if self.bytes[self.pos..].starts_with(b"=>") {
                self.pos += 2;
                (to_key(first, key_offset)?, self.value()?)
            } else {
                (PhpKey::Int(next_index), first)
            };

            if let PhpKey::Int(i) = key
                && i >= next_index
            {
                next_index = i.saturating_add(1);
            }
            match index.get(&key) {
                Some(&slot) => entries[slot].1 = value,
                None => {
                    index.insert(key.clone(), entries.len());
                    entries.push((key, value));
                }
            }

            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b) if b == close => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(self.unexpected()),
            }
        }

        self.depth -= 1;
        let is_sequence = entries
            .iter()
            .enumerate()
            .all(|(i, (k, _))| *k == PhpKey::Int(i as i64));
        if is_sequence {
            Ok(PhpValue::Sequence(entries.into_iter().map(|(_, v)| v).collect()))
        } else {
            Ok(PhpValue::Mapping(entries))
        }
    }
}

fn to_key(value: PhpValue, offset: usize) -> ParseResult<PhpKey> {
    match value {
        PhpValue::Int(i) => Ok(PhpKey::Int(i)),
        PhpValue::Bool(b) => Ok(PhpKey::Int(i64::from(b))),
        PhpValue::Null => Ok(PhpKey::String(String::new())),
        PhpValue::Float(f) => Ok(PhpKey::Int(f.trunc() as i64)),
        PhpValue::String(s) => Ok(if is_canonical_int(&s) {
            s.parse().map_or(PhpKey::String(s), PhpKey::Int)
        } else {
            PhpKey::String(s)
        }),
        PhpValue::Sequence(_) | PhpValue::Mapping(_) => Err(PhpParseError::IllegalKey(offset)),
    }
}

/// `"0"`, or an optional `-` followed by digits without a leading zero
fn is_canonical_int(s: &str) -> bool {
    if s == "0" {
        return true;
    }
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty()
        && !digits.starts_with('0')
        && digits.bytes().all(|b| b.is_ascii_digit())
}
