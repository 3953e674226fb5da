//! Command-line palava client
//!
//! Connects to one of the configured backends, runs a single job and prints
//! the decoded payload. Passthrough responses are streamed to stdout.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use palava_client::{
    ClientBuilder, ClientConfig, ConnectStrategy, HttpSink, Payload, SessionCarriers, WriterSink,
    connection::parse_backend_list,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "palava-call", about = "Run a job on a palava backend", version)]
struct Cli {
    /// Backends as `host:port`, separated by `;`
    #[arg(long, env = "PALAVA_BACKENDS")]
    backends: String,

    /// Backend selection order (linear or random)
    #[arg(long, env = "PALAVA_CONNECT_STRATEGY", default_value = "random")]
    strategy: ConnectStrategy,

    /// Connect timeout per backend, in seconds
    #[arg(long, env = "PALAVA_CONNECT_TIMEOUT", default_value_t = 3)]
    connect_timeout: u64,

    /// Read timeout, in seconds
    #[arg(long, env = "PALAVA_READ_TIMEOUT", default_value_t = 30)]
    read_timeout: u64,

    /// Session token to send, starting with the handshake
    #[arg(long)]
    session: Option<String>,

    /// Prefix streamed responses with Content-Type/Content-Length headers
    #[arg(long)]
    http_headers: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Data call with `key=value` parameters
    Call {
        /// Job name
        job: String,
        /// Parameters
        params: Vec<String>,
    },
    /// Text call
    Text {
        /// Job name
        job: String,
        /// Request body
        body: String,
    },
    /// JSON call
    Json {
        /// Job name
        job: String,
        /// JSON document
        document: String,
    },
    /// Upload a file
    Upload {
        /// Job name
        job: String,
        /// File to send
        path: PathBuf,
    },
    /// Print the backend version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = ClientConfig {
        backends: parse_backend_list(&cli.backends)?,
        strategy: cli.strategy,
        connect_timeout: Duration::from_secs(cli.connect_timeout),
        read_timeout: Duration::from_secs(cli.read_timeout),
        ..ClientConfig::default()
    };

    let mut builder = ClientBuilder::new(config).carriers(SessionCarriers {
        cookie: cli.session,
        ..SessionCarriers::default()
    });
    builder = if cli.http_headers {
        builder.sink(HttpSink::new(tokio::io::stdout()))
    } else {
        builder.sink(WriterSink::new(tokio::io::stdout()))
    };
    let mut client = builder
        .connect()
        .await
        .context("Failed to connect to a palava backend")?;

    let payload = match cli.command {
        Command::Call { job, params } => client.call(&job, params).await,
        Command::Text { job, body } => client.call_text(&job, body).await,
        Command::Json { job, document } => {
            let value: serde_json::Value =
                serde_json::from_str(&document).context("Argument is not valid JSON")?;
            client.call_json(&job, &value).await
        }
        Command::Upload { job, path } => client.upload_file(&job, &path).await,
        Command::Version => client.backend_version().await.map(Payload::Text),
    };
    client.close().await;

    match payload? {
        Payload::Error(text) => bail!("Backend job failed: {text}"),
        Payload::Text(text) | Payload::Xml(text) => println!("{text}"),
        Payload::Streamed { .. } => {}
        other => println!("{}", serde_json::to_string_pretty(&other.to_json())?),
    }

    Ok(())
}
