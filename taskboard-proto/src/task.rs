//! Task record types for `Taskboard`.
//!
//! [`Task`] is the full record returned by the REST collaborator and carried
//! by `task_assigned` push events. [`TaskPatch`] is the partial form carried
//! by `task_updated` / `status_updated` events: any field it omits is left
//! untouched when the patch is merged into a held record.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use crate::user::UserRef;

/// Server-assigned task identity. Immutable once created; used as the merge key.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    /// Wraps a raw server identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Status of a task.
///
/// The client only ever moves a task forward (see [`TaskStatus::next`]), but
/// statuses pushed by the server are accepted in any order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started.
    #[default]
    Pending,
    /// Being worked on.
    InProgress,
    /// Done.
    Completed,
}

impl TaskStatus {
    /// All statuses in transition order.
    pub const ALL: [Self; 3] = [Self::Pending, Self::InProgress, Self::Completed];

    /// The status a user may move this task to, or `None` once completed.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::InProgress),
            Self::InProgress => Some(Self::Completed),
            Self::Completed => None,
        }
    }

    /// Wire representation (`pending`, `in_progress`, `completed`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task status: {0} (expected pending, in_progress or completed)")]
pub struct ParseStatusError(pub String);

impl std::str::FromStr for TaskStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" | "in-progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// A full task record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Merge key.
    pub id: TaskId,
    /// Task title.
    pub title: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Current status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Optional due date (`YYYY-MM-DD` on the wire).
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    /// User the task is assigned to.
    #[serde(default)]
    pub assigned_to: Option<UserRef>,
    /// User who assigned the task.
    #[serde(default)]
    pub assigned_by: Option<UserRef>,
}

impl Task {
    /// Creates a pending task with only an id and title set.
    pub fn new(id: TaskId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            description: None,
            status: TaskStatus::Pending,
            due_date: None,
            assigned_to: None,
            assigned_by: None,
        }
    }

    /// Builder-style status setter.
    #[must_use]
    pub const fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }
}

/// Partial task carried by update events.
///
/// `None` means the field was absent and must be preserved. For nullable
/// fields, `Some(None)` means the server explicitly cleared the value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    /// Merge key (always present).
    pub id: TaskId,
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New description, or explicit clear.
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    /// New status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    /// New due date, or explicit clear.
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub due_date: Option<Option<NaiveDate>>,
    /// New assignee, or explicit clear.
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub assigned_to: Option<Option<UserRef>>,
    /// New assigner, or explicit clear.
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub assigned_by: Option<Option<UserRef>>,
}

impl TaskPatch {
    /// A patch that only carries the id.
    #[must_use]
    pub fn empty(id: TaskId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// A status-only patch.
    #[must_use]
    pub fn status(id: TaskId, status: TaskStatus) -> Self {
        Self {
            id,
            status: Some(status),
            ..Self::default()
        }
    }

    /// Shallow-merges this patch into `task`.
    ///
    /// Fields absent from the patch are preserved. The id is never changed.
    /// Returns `true` if any field value changed.
    pub fn apply_to(&self, task: &mut Task) -> bool {
        let before = task.clone();
        if let Some(title) = &self.title {
            task.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            task.description.clone_from(description);
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(assigned_to) = &self.assigned_to {
            task.assigned_to.clone_from(assigned_to);
        }
        if let Some(assigned_by) = &self.assigned_by {
            task.assigned_by.clone_from(assigned_by);
        }
        *task != before
    }
}

impl From<Task> for TaskPatch {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            title: Some(task.title),
            description: Some(task.description),
            status: Some(task.status),
            due_date: Some(task.due_date),
            assigned_to: Some(task.assigned_to),
            assigned_by: Some(task.assigned_by),
        }
    }
}

/// Deserializes a present field (including `null`) as `Some(..)`.
///
/// Combined with `#[serde(default)]`, an absent field stays `None`.
fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
