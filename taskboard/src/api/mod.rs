//! REST collaborator access.
//!
//! [`TaskApi`] is the seam the reconciler and the task view are generic over;
//! [`client::ApiClient`] implements it over HTTP. Tests substitute in-process
//! fakes.

pub mod client;

use std::future::Future;

use taskboard_proto::rest::{NewTask, TaskFilters, TaskUpdate};
use taskboard_proto::task::{Task, TaskId, TaskStatus};

pub use client::ApiClient;

/// Errors from REST calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// No credential is held; the call was not attempted.
    #[error("not signed in")]
    Unauthenticated,

    /// The server rejected the credential (HTTP 401).
    #[error("credential rejected: {}", .message.as_deref().unwrap_or("unauthorized"))]
    Unauthorized {
        /// Server-provided reason, if any.
        message: Option<String>,
    },

    /// Any other non-success response.
    #[error("HTTP {status}: {}", .message.as_deref().unwrap_or("request failed"))]
    Status {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the error body, if any.
        message: Option<String>,
    },

    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// The response body did not decode.
    #[error("unexpected response: {0}")]
    Decode(String),

    /// The client could not be set up (bad base URL, TLS backend).
    #[error("client configuration error: {0}")]
    Config(String),
}

impl ApiError {
    /// Text to show the user: the server's own message when it sent one,
    /// otherwise `fallback`.
    #[must_use]
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            Self::Unauthenticated => "You are not signed in".to_string(),
            Self::Unauthorized { message } | Self::Status { message, .. } => {
                message.clone().unwrap_or_else(|| fallback.to_string())
            }
            Self::Network(_) | Self::Decode(_) | Self::Config(_) => fallback.to_string(),
        }
    }

    /// Whether the error means the session is no longer usable.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthenticated | Self::Unauthorized { .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_builder() {
            Self::Config(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Task endpoints of the REST collaborator.
///
/// Every call requires a credential; implementations fail with
/// [`ApiError::Unauthenticated`] before doing any I/O when none is held.
pub trait TaskApi: Send + Sync + 'static {
    /// Lists tasks matching `filters` (filtered server-side).
    fn list_tasks(
        &self,
        filters: &TaskFilters,
    ) -> impl Future<Output = Result<Vec<Task>, ApiError>> + Send;

    /// Fetches one task.
    fn fetch_task(&self, id: TaskId) -> impl Future<Output = Result<Task, ApiError>> + Send;

    /// Creates a task and returns the stored record.
    fn create_task(&self, task: &NewTask) -> impl Future<Output = Result<Task, ApiError>> + Send;

    /// Updates a task and returns the stored record.
    fn update_task(
        &self,
        id: TaskId,
        update: &TaskUpdate,
    ) -> impl Future<Output = Result<Task, ApiError>> + Send;

    /// Status-only update.
    fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
    ) -> impl Future<Output = Result<Task, ApiError>> + Send {
        let update = TaskUpdate::status(status);
        async move { self.update_task(id, &update).await }
    }

    /// Deletes a task.
    fn delete_task(&self, id: TaskId) -> impl Future<Output = Result<(), ApiError>> + Send;
}
