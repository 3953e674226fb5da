//! Backend selection and connection ownership
//!
//! A client is configured with several equivalent backends. Selection tries
//! them one at a time, either in configured order or in random order without
//! repetition, until one accepts. Failed attempts are only logged; the
//! collected log is returned as [`Error::Configuration`] if every candidate
//! fails.

use crate::error::{ConnectError, Error, Result};
use crate::request::Request;
use rand::{RngExt, rng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, instrument, warn};

/// A backend `host:port`
///
/// # Example
///
/// ```
/// use palava_client::BackendAddress;
///
/// let address: BackendAddress = "backend-1.internal:2323".parse().unwrap();
/// assert_eq!(address.host, "backend-1.internal");
/// assert_eq!(address.port, 2323);
/// assert_eq!(address.to_string(), "backend-1.internal:2323");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendAddress {
    /// Hostname or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl BackendAddress {
    /// Build an address from its parts
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for BackendAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for BackendAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidAddress {
            address: s.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = s.trim();
        let (host, port) = trimmed
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing port"))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| invalid("port is not a number between 0 and 65535"))?;

        Ok(Self::new(host, port))
    }
}

/// Parse a `;`-separated backend list, skipping empty entries
pub fn parse_backend_list(list: &str) -> Result<Vec<BackendAddress>> {
    list.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::parse)
        .collect()
}

/// Order in which backends are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectStrategy {
    /// Configured order
    Linear,
    /// Uniformly random, each backend at most once
    #[default]
    Random,
}

impl ConnectStrategy {
    /// Name used in configuration
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Random => "random",
        }
    }
}

impl fmt::Display for ConnectStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConnectStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "random" => Ok(Self::Random),
            _ => Err(Error::InvalidStrategy(s.to_string())),
        }
    }
}

/// The single live backend connection of a client
#[derive(Debug)]
pub struct Connection {
    stream: Option<BufReader<TcpStream>>,
    active: Option<BackendAddress>,
    errors: Vec<String>,
    in_flight: bool,
}

impl Connection {
    /// Try candidates until one accepts
    ///
    /// Every attempt is bounded by `connect_timeout`.
    #[instrument(skip(addresses), fields(candidates = addresses.len()))]
    pub async fn select_and_connect(
        addresses: &[BackendAddress],
        strategy: ConnectStrategy,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let mut errors = Vec::new();
        if addresses.is_empty() {
            errors.push("no backend addresses configured".to_string());
            return Err(Error::Configuration { errors });
        }

        let mut remaining: Vec<&BackendAddress> = addresses.iter().collect();
        while !remaining.is_empty() {
            let index = match strategy {
                ConnectStrategy::Linear => 0,
                ConnectStrategy::Random => rng().random_range(0..remaining.len()),
            };
            let address = match strategy {
                ConnectStrategy::Linear => remaining.remove(index),
                ConnectStrategy::Random => remaining.swap_remove(index),
            };

            match Self::attempt(address, connect_timeout).await {
                Ok(stream) => {
                    debug!("Connected to backend {address}");
                    return Ok(Self {
                        stream: Some(BufReader::new(stream)),
                        active: Some(address.clone()),
                        errors,
                        in_flight: false,
                    });
                }
                Err(e) => {
                    warn!("Backend candidate failed: {e}");
                    errors.push(e.to_string());
                }
            }
        }

        Err(Error::Configuration { errors })
    }

    async fn attempt(
        address: &BackendAddress,
        connect_timeout: Duration,
    ) -> std::result::Result<TcpStream, ConnectError> {
        debug!("Connecting to backend {address}");
        let connect = TcpStream::connect((address.host.as_str(), address.port));
        let stream = tokio::time::timeout(connect_timeout, connect)
            .await
            .map_err(|_| ConnectError::Timeout {
                address: address.to_string(),
                timeout: connect_timeout,
            })?
            .map_err(|source| ConnectError::Io {
                address: address.to_string(),
                source,
            })?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle on {address}: {e}");
        }
        Ok(stream)
    }

    /// Whether a socket is held and no abandoned exchange is pending on it
    #[must_use]
    pub fn is_established(&self) -> bool {
        self.stream.is_some() && !self.in_flight
    }

    /// Backend the socket is connected to
    #[must_use]
    pub fn active_address(&self) -> Option<&BackendAddress> {
        if self.is_established() {
            self.active.as_ref()
        } else {
            None
        }
    }

    /// Log of failed connection attempts
    #[must_use]
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Mark a request/response exchange as started and hand out the socket
    ///
    /// The mark stays set until [`Connection::finish_exchange`]. Finding it
    /// still set means an earlier call was dropped mid-exchange and its
    /// response may still be unread; the socket is discarded.
    pub fn begin_exchange(&mut self) -> Result<&mut BufReader<TcpStream>> {
        if self.in_flight {
            warn!("Previous call was abandoned before its response was read");
            self.discard();
            return Err(Error::NotEstablished);
        }
        if self.stream.is_none() {
            return Err(Error::NotEstablished);
        }
        self.in_flight = true;
        self.stream.as_mut().ok_or(Error::NotEstablished)
    }

    /// Clear the exchange mark once the response has been fully consumed
    pub fn finish_exchange(&mut self) {
        self.in_flight = false;
    }

    /// Send a best-effort close frame and release the socket
    ///
    /// Calling this on a closed connection does nothing.
    pub async fn close(&mut self, session_id: &str) {
        if self.in_flight {
            self.discard();
            return;
        }
        let Some(mut stream) = self.stream.take() else {
            return;
        };

        let frame = Request::close().with_session(session_id);
        if let Err(e) = frame.write_to(stream.get_mut()).await {
            debug!("Close frame not delivered: {e}");
        }
        if let Err(e) = stream.get_mut().shutdown().await {
            debug!("Socket shutdown failed: {e}");
        }
        if let Some(address) = &self.active {
            debug!("Connection to {address} closed");
        }
    }

    /// Drop the socket without a close frame
    pub fn discard(&mut self) {
        self.in_flight = false;
        if self.stream.take().is_some()
            && let Some(address) = &self.active
        {
            warn!("Connection to {address} discarded");
        }
    }
}
