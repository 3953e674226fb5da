//! Client for the palava job protocol
//!
//! A palava backend executes named jobs over a plain TCP connection. Each
//! request is a single frame
//!
//! ```text
//! <type>://<job>/<session id>/(<body length>)?<body>
//! ```
//!
//! answered by
//!
//! ```text
//! <mimetype>://(<content length>)?<body>
//! ```
//!
//! Responses with one of the known mimetypes (error, PHP literal, JSON, text,
//! XML) are buffered and decoded into a [`Payload`]. Any other mimetype is
//! forwarded to a [`ResponseSink`] chunk by chunk, after which the connection
//! is closed.
//!
//! # Example
//!
//! ```no_run
//! use palava_client::{ClientBuilder, ClientConfig, ConnectStrategy};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("10.0.0.1:2323;10.0.0.2:2323")?
//!         .with_strategy(ConnectStrategy::Random);
//!     let mut client = ClientBuilder::new(config).connect().await?;
//!
//!     let user = client.call_json("user.load", &json!({"id": 7})).await?;
//!     println!("{}", user.to_json());
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::panic))]

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod instrument;
pub mod mimetype;
pub mod request;
pub mod response;
pub mod session;
pub mod sink;

pub use client::{ClientBuilder, PalavaClient};
pub use codec::{Payload, PhpKey, PhpValue};
pub use config::ClientConfig;
pub use connection::{BackendAddress, ConnectStrategy};
pub use error::{ConnectError, Error, Result};
pub use instrument::{Benchmarks, CallObserver};
pub use mimetype::Mimetype;
pub use request::{Environment, Param};
pub use session::{ClientInfo, SessionCarriers};
pub use sink::{DiscardSink, HttpSink, MemorySink, ResponseSink, WriterSink};
