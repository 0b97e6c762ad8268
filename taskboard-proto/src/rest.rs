//! REST request and response bodies.
//!
//! The REST collaborator is a Rails API: writes wrap their attributes in a
//! resource key (`{"task": {...}}`, `{"user": {...}}`) and failures carry an
//! error body in one of several shapes, see [`ErrorBody`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::task::TaskStatus;
use crate::user::User;

/// Date format used for query parameters and due dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Server-side filters for the task list.
///
/// Filtering is done entirely by the server; the client never re-filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilters {
    /// Free-text query (matched against the assignee's email server-side).
    pub query: String,
    /// Status filter.
    pub status: Option<TaskStatus>,
    /// Inclusive start of the due-date range.
    pub start_date: Option<NaiveDate>,
    /// Inclusive end of the due-date range.
    pub end_date: Option<NaiveDate>,
}

impl TaskFilters {
    /// Query parameters for `GET /api/v1/tasks`.
    ///
    /// All four keys are always sent; unset filters are empty strings.
    #[must_use]
    pub fn to_query(&self) -> [(&'static str, String); 4] {
        let date = |d: Option<NaiveDate>| {
            d.map(|d| d.format(DATE_FORMAT).to_string())
                .unwrap_or_default()
        };
        [
            ("q", self.query.clone()),
            (
                "status",
                self.status.map(|s| s.as_str().to_string()).unwrap_or_default(),
            ),
            ("start_date", date(self.start_date)),
            ("end_date", date(self.end_date)),
        ]
    }
}

/// Attributes for creating a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    /// Title (required by the server).
    pub title: String,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Due date.
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    /// Assignee user id.
    #[serde(default)]
    pub assigned_to_id: Option<u64>,
}

/// Attributes for updating a task. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskUpdate {
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// New status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    /// New due date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    /// New assignee.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to_id: Option<u64>,
}

impl TaskUpdate {
    /// A status-only update.
    #[must_use]
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Whether this update changes only the status.
    #[must_use]
    pub const fn is_status_only(&self) -> bool {
        self.status.is_some()
            && self.title.is_none()
            && self.description.is_none()
            && self.due_date.is_none()
            && self.assigned_to_id.is_none()
    }
}

/// `{"task": ...}` request wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEnvelope<T> {
    /// Wrapped attributes.
    pub task: T,
}

/// Sign-in / sign-up credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Login email.
    pub email: String,
    /// Password.
    pub password: String,
    /// Confirmation, only sent on sign-up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_confirmation: Option<String>,
}

/// `{"user": ...}` request wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEnvelope<T> {
    /// Wrapped attributes.
    pub user: T,
}

/// Successful sign-in / sign-up response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Bearer credential.
    pub token: String,
    /// The authenticated principal (`data` on sign-in, `user` on sign-up).
    #[serde(alias = "user")]
    pub data: User,
}

/// Error body returned by the REST collaborator.
///
/// Validation failures use `errors`, most other failures `error`, and some
/// authorization failures `alert`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Validation messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    /// Single error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Flash-style alert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
}

impl ErrorBody {
    /// A body with a single `error` message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// The most specific message in the body: joined `errors`, then `error`,
    /// then `alert`.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        if let Some(errors) = &self.errors
            && !errors.is_empty()
        {
            return Some(errors.join(", "));
        }
        self.error.clone().or_else(|| self.alert.clone())
    }
}
