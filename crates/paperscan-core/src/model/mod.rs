//! Model binding traits and provider implementations.
//!
//! A [`ModelBinder`] turns one API key into a ready-to-call
//! [`GenerativeModel`]. The system instruction and JSON output mode are fixed
//! by the binder at construction, so each request only carries user text.

pub mod gemini;
pub mod mock;

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Outcome of a request the provider accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generation {
    /// Response body, expected to be a JSON object.
    Text(String),
    /// The provider filtered the prompt or the answer.
    Blocked { reason: String },
}

/// The provider (or local validation) refused to bind a key.
#[derive(Error, Debug)]
pub enum BindError {
    #[error("API key is empty")]
    EmptyKey,
    #[error("API key contains characters not allowed in a request header")]
    InvalidKey,
    #[error("invalid model endpoint {url}: {message}")]
    InvalidEndpoint { url: String, message: String },
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("model binding rejected: {0}")]
    Rejected(String),
}

/// A request that did not produce a usable [`Generation`].
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("rate limited (429)")]
    RateLimited,
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed provider response: {0}")]
    Malformed(String),
    #[error("provider returned no content")]
    Empty,
    #[error("{0}")]
    Other(String),
}

/// A model bound to a single API key.
pub trait GenerativeModel: Send + Sync {
    /// Send `user_text` as the user turn and wait for the answer.
    fn generate<'a>(
        &'a self,
        user_text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Generation, RequestError>> + Send + 'a>>;
}

/// Binds API keys to models that share one configuration.
pub trait ModelBinder: Send + Sync {
    /// Provider name used in log lines.
    fn name(&self) -> &str;

    fn bind(&self, api_key: &str) -> Result<Box<dyn GenerativeModel>, BindError>;
}
