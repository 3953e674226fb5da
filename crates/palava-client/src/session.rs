//! Session token handling
//!
//! The client never touches cookies or request globals itself. The caller
//! hands in the values its web framework received ([`SessionCarriers`]) and
//! installs a hook to publish tokens the backend assigns.

use std::fmt;
use tracing::debug;

/// Default name of the cookie/field carrying the session token
pub const SESSION_COOKIE_NAME: &str = "ccsess";

/// Session token candidates supplied by the caller's web layer
///
/// Consulted in order cookie, form field, query field; empty values are
/// skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCarriers {
    /// Value of the session cookie
    pub cookie: Option<String>,
    /// Value of the session form field
    pub form: Option<String>,
    /// Value of the session query parameter
    pub query: Option<String>,
}

impl SessionCarriers {
    /// First non-empty carrier value
    #[must_use]
    pub fn resolve(&self) -> Option<&str> {
        [&self.cookie, &self.form, &self.query]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|value| !value.is_empty())
    }
}

/// Identity of the end user, sent when a session is started
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    /// Remote address of the end user
    pub ip: String,
    /// User agent string
    pub user_agent: String,
    /// Requested URI
    pub url: String,
}

impl ClientInfo {
    /// Parameters of the session initialization call
    #[must_use]
    pub fn to_params(&self) -> Vec<String> {
        vec![
            format!("ip={}", self.ip),
            format!("ua={}", self.user_agent),
            format!("url={}", self.url),
        ]
    }
}

/// Callback receiving every token assigned to the session
pub type PropagationHook = Box<dyn FnMut(&str) + Send>;

/// Owner of the session token
#[derive(Default)]
pub struct SessionManager {
    token: String,
    carriers: SessionCarriers,
    hook: Option<PropagationHook>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("token", &self.token)
            .field("carriers", &self.carriers)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl SessionManager {
    /// Manager with an empty token
    #[must_use]
    pub fn new(carriers: SessionCarriers) -> Self {
        Self {
            token: String::new(),
            carriers,
            hook: None,
        }
    }

    /// Install the propagation hook
    pub fn set_hook(&mut self, hook: PropagationHook) {
        self.hook = Some(hook);
    }

    /// Replace the carriers consulted while no token is assigned
    pub fn set_carriers(&mut self, carriers: SessionCarriers) {
        self.carriers = carriers;
    }

    /// The assigned token, empty if none
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Assign a token and publish it through the hook
    pub fn assign(&mut self, token: impl Into<String>) {
        self.token = token.into();
        debug!("Session token assigned ({} chars)", self.token.len());
        if let Some(hook) = self.hook.as_mut() {
            hook(&self.token);
        }
    }

    /// Token to send with the next request
    ///
    /// The assigned token wins; without one the carriers are consulted.
    #[must_use]
    pub fn token_for_request(&self) -> &str {
        if self.token.is_empty() {
            self.carriers.resolve().unwrap_or_default()
        } else {
            &self.token
        }
    }
}
