//! Client facade
//!
//! [`ClientBuilder::connect`] selects a backend and performs the `open`
//! handshake. The resulting [`PalavaClient`] runs one call at a time: every
//! method takes `&mut self` and returns only after the complete response has
//! been read or forwarded.

use crate::codec::{Payload, decode_response};
use crate::config::ClientConfig;
use crate::connection::{BackendAddress, Connection};
use crate::error::{Error, Result};
use crate::instrument::CallObserver;
use crate::request::{Environment, Param, Request};
use crate::response::{Response, ResponseBody, read_response};
use crate::session::{ClientInfo, PropagationHook, SessionCarriers, SessionManager};
use crate::sink::{DiscardSink, ResponseSink};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Job answering with a fresh session token
pub const SESSION_INITIALIZE_JOB: &str = "@palava.session.initialize";

/// Job invalidating the current session
pub const SESSION_DESTROY_JOB: &str = "@palava.session.destroy";

/// Job answering with the backend version
pub const SYSTEM_VERSION_JOB: &str = "@palava.system.version";

/// Builder for [`PalavaClient`]
///
/// # Example
///
/// ```no_run
/// use palava_client::{ClientBuilder, ClientConfig, MemorySink};
///
/// # async fn example() -> palava_client::Result<()> {
/// let sink = MemorySink::new();
/// let mut client = ClientBuilder::new(ClientConfig::new("127.0.0.1:2323")?)
///     .sink(sink.clone())
///     .on_session_assigned(|token| println!("Set-Cookie: ccsess={token}"))
///     .connect()
///     .await?;
///
/// let payload = client.call("user.load", ["id=7"]).await?;
/// println!("{}", payload.to_json());
/// client.close().await;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    config: ClientConfig,
    environment: Environment,
    carriers: SessionCarriers,
    sink: Option<Box<dyn ResponseSink>>,
    observer: Option<Box<dyn CallObserver>>,
    hook: Option<PropagationHook>,
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("environment", &self.environment)
            .field("carriers", &self.carriers)
            .field("sink", &self.sink.is_some())
            .field("observer", &self.observer.is_some())
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl ClientBuilder {
    /// Start from a configuration
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            environment: Environment::new(),
            carriers: SessionCarriers::default(),
            sink: None,
            observer: None,
            hook: None,
        }
    }

    /// Environment descriptor sent with the handshake
    #[must_use]
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Session token candidates from the caller's web layer
    #[must_use]
    pub fn carriers(mut self, carriers: SessionCarriers) -> Self {
        self.carriers = carriers;
        self
    }

    /// Destination of passthrough responses
    #[must_use]
    pub fn sink(mut self, sink: impl ResponseSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Timing observer notified around each call
    #[must_use]
    pub fn observer(mut self, observer: impl CallObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Callback receiving every token assigned to the session
    #[must_use]
    pub fn on_session_assigned(mut self, hook: impl FnMut(&str) + Send + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Connect to a backend and complete the handshake
    #[instrument(
        skip(self),
        fields(backends = self.config.backends.len(), strategy = %self.config.strategy)
    )]
    pub async fn connect(self) -> Result<PalavaClient> {
        let connection = Connection::select_and_connect(
            &self.config.backends,
            self.config.strategy,
            self.config.connect_timeout,
        )
        .await?;

        let mut session = SessionManager::new(self.carriers);
        if let Some(hook) = self.hook {
            session.set_hook(hook);
        }

        let mut client = PalavaClient {
            config: self.config,
            connection,
            session,
            sink: self.sink.unwrap_or_else(|| Box::new(DiscardSink)),
            observer: self.observer,
        };
        client.handshake(&self.environment).await?;
        Ok(client)
    }
}

/// Connected palava client
pub struct PalavaClient {
    config: ClientConfig,
    connection: Connection,
    session: SessionManager,
    sink: Box<dyn ResponseSink>,
    observer: Option<Box<dyn CallObserver>>,
}

impl fmt::Debug for PalavaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PalavaClient")
            .field("config", &self.config)
            .field("connection", &self.connection)
            .field("session", &self.session)
            .field("observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl PalavaClient {
    async fn handshake(&mut self, environment: &Environment) -> Result<()> {
        let request = Request::open(environment)?;
        let payload = self.execute(request).await?;
        if let Payload::Error(text) = payload {
            self.close().await;
            return Err(Error::Application(text));
        }
        if !self.established() {
            return Err(Error::NotEstablished);
        }
        info!(
            "Connected to palava backend {}",
            self.server().map(ToString::to_string).unwrap_or_default()
        );
        Ok(())
    }

    /// Data call with `key=value` pairs and/or maps as parameters
    #[instrument(skip(self, params))]
    pub async fn call<I, P>(&mut self, job: &str, params: I) -> Result<Payload>
    where
        I: IntoIterator<Item = P>,
        P: Into<Param>,
    {
        let request = Request::data(job, params)?;
        self.observed(request).await
    }

    /// Text call
    #[instrument(skip(self, body))]
    pub async fn call_text(&mut self, job: &str, body: impl Into<String>) -> Result<Payload> {
        self.observed(Request::text(job, body)).await
    }

    /// JSON call
    #[instrument(skip(self, value))]
    pub async fn call_json(&mut self, job: &str, value: &Value) -> Result<Payload> {
        let request = Request::json(job, value)?;
        self.observed(request).await
    }

    /// JSON call with an already serialized document
    #[instrument(skip(self, text))]
    pub async fn call_json_raw(&mut self, job: &str, text: impl Into<String>) -> Result<Payload> {
        self.observed(Request::json_raw(job, text)).await
    }

    /// Binary call uploading a local file
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub async fn upload_file(&mut self, job: &str, path: impl AsRef<Path>) -> Result<Payload> {
        let request = Request::binary(job, path).await?;
        self.observed(request).await
    }

    /// Ask the backend for a new session and assign its token
    ///
    /// Returns the assigned token.
    #[instrument(skip(self, info))]
    pub async fn session_start(&mut self, info: &ClientInfo) -> Result<String> {
        let payload = self
            .call(SESSION_INITIALIZE_JOB, info.to_params())
            .await?
            .into_result()?;
        let token = payload
            .as_text()
            .map_or_else(|| payload.to_json().to_string(), str::to_string);
        self.session.assign(token.clone());
        Ok(token)
    }

    /// Destroy the backend session and clear the token
    #[instrument(skip(self))]
    pub async fn session_destroy(&mut self) -> Result<Payload> {
        let payload = self
            .call(SESSION_DESTROY_JOB, std::iter::empty::<Param>())
            .await?;
        self.session.assign("");
        Ok(payload)
    }

    /// Version reported by the backend
    #[instrument(skip(self))]
    pub async fn backend_version(&mut self) -> Result<String> {
        let payload = self
            .call(SYSTEM_VERSION_JOB, std::iter::empty::<Param>())
            .await?
            .into_result()?;
        Ok(payload
            .as_text()
            .map_or_else(|| payload.to_json().to_string(), str::to_string))
    }

    /// Token sent with the next request
    #[must_use]
    pub fn session_id(&self) -> &str {
        self.session.token_for_request()
    }

    /// Assign the session token
    pub fn set_session_id(&mut self, token: impl Into<String>) {
        self.session.assign(token);
    }

    /// Replace the carriers consulted while no token is assigned
    pub fn set_carriers(&mut self, carriers: SessionCarriers) {
        self.session.set_carriers(carriers);
    }

    /// Name under which the caller carries the session token
    #[must_use]
    pub fn session_name(&self) -> &str {
        &self.config.session_name
    }

    /// Whether calls can still be made
    #[must_use]
    pub fn established(&self) -> bool {
        self.connection.is_established()
    }

    /// Backend this client is connected to
    #[must_use]
    pub fn server(&self) -> Option<&BackendAddress> {
        self.connection.active_address()
    }

    /// Failed connection attempts made before the active backend accepted
    #[must_use]
    pub fn errors(&self) -> &[String] {
        self.connection.errors()
    }

    /// Send a close frame and release the connection
    ///
    /// Safe to call repeatedly.
    pub async fn close(&mut self) {
        self.connection
            .close(self.session.token_for_request())
            .await;
    }

    async fn observed(&mut self, request: Request) -> Result<Payload> {
        let job = request.job().to_string();
        if let Some(observer) = self.observer.as_mut() {
            observer.call_started(&job);
        }
        let started = Instant::now();
        let result = self.execute(request).await;
        if let Some(observer) = self.observer.as_mut() {
            observer.call_finished(&job, started.elapsed());
        }
        result
    }

    async fn execute(&mut self, request: Request) -> Result<Payload> {
        let request = request.with_session(self.session.token_for_request());
        let result = self.exchange(&request).await;
        self.connection.finish_exchange();
        match result {
            Ok(response) => {
                if response.body == ResponseBody::Streamed {
                    debug!("Passthrough response ends this connection");
                    self.close().await;
                }
                decode_response(&response)
            }
            Err(e) => {
                if e.is_fatal() {
                    self.connection.discard();
                }
                Err(e)
            }
        }
    }

    async fn exchange(&mut self, request: &Request) -> Result<Response> {
        let read_timeout = self.config.read_timeout;
        let stream = self.connection.begin_exchange()?;
        request.write_to(&mut *stream).await?;
        read_response(stream, &mut *self.sink, read_timeout).await
    }
}
