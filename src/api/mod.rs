//! Transport adapter for the assistant backend.
//!
//! This module wraps the backend's REST contract behind a narrow trait so the
//! conversation manager never touches HTTP directly and tests can substitute
//! a scripted transport.
//!
//! # Architecture
//!
//! - [`ChatTransport`] - the seam the manager depends on
//! - [`HttpTransport`] - reqwest implementation with bounded retry and
//!   per-request timeouts
//!
//! # Usage
//!
//! ```rust,no_run
//! use medichat::api::{ChatTransport, HttpTransport};
//! use medichat::config::Config;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let transport = HttpTransport::new(&Config::from_env())?;
//! let healthy = transport.check_health().await?;
//! # Ok(())
//! # }
//! ```

mod http;

pub use http::HttpTransport;

use async_trait::async_trait;
use serde::Deserialize;

use crate::types::Message;

/// Failure modes of a single backend call.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request hit its deadline and was aborted. Never retried.
    #[error("request timed out")]
    Timeout,
    /// Connection-level failure after the retry budget was spent.
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("The service is currently busy. Please try again in a moment.")]
    ServiceBusy,
    /// The backend answered with a non-success status.
    #[error("{message}")]
    Status { code: u16, message: String },
    /// A success response whose body did not match the contract.
    #[error("invalid response body: {0}")]
    InvalidResponse(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Successful reply to a sent message.
#[derive(Clone, Debug, Deserialize)]
pub struct MessageResponse {
    pub message: String,
    pub message_id: Option<i64>,
}

/// The backend operations the conversation manager relies on.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Deliver a user message and return the assistant's reply.
    async fn send_message(&self, text: &str) -> ApiResult<MessageResponse>;

    /// Fetch the stored conversation.
    ///
    /// Resolves to an empty history for unauthorized sessions, error
    /// statuses, and connection failures; errs only when a success response
    /// fails to parse.
    async fn fetch_history(&self) -> ApiResult<Vec<Message>>;

    /// Delete a stored message. A message the backend no longer has counts
    /// as deleted.
    async fn delete_message(&self, id: i64) -> ApiResult<()>;

    /// Probe backend liveness. `Ok(bool)` reflects what the backend
    /// reported; `Err` means the probe itself could not reach it.
    async fn check_health(&self) -> ApiResult<bool>;
}
