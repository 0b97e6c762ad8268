//! User-visible notifications.

use std::fmt;

use taskboard_proto::task::{Task, TaskStatus};

/// Fallback shown when a snapshot fetch fails without a server message.
pub const FETCH_FAILED: &str = "Failed to fetch tasks";
/// Fallback shown when creating or editing a task fails without a server message.
pub const TASK_OPERATION_FAILED: &str = "Failed to perform task operation";
/// Fallback shown when moving a task fails without a server message.
pub const STATUS_UPDATE_FAILED: &str = "Failed to update task status";
/// Fallback shown when deleting a task fails without a server message.
pub const DELETE_FAILED: &str = "Failed to delete task";

/// Severity of a [`Notification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    /// Something happened (a push event).
    Info,
    /// Something failed (a REST call).
    Error,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A message for the user, passed by value to whoever displays it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Headline.
    pub title: String,
    /// Body text.
    pub description: String,
    /// Severity.
    pub level: NotificationLevel,
}

impl Notification {
    /// An informational notification.
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            level: NotificationLevel::Info,
        }
    }

    /// An error notification titled "Error".
    pub fn error(description: impl Into<String>) -> Self {
        Self {
            title: "Error".to_string(),
            description: description.into(),
            level: NotificationLevel::Error,
        }
    }

    /// Confirms a created task.
    #[must_use]
    pub fn task_created(task: &Task) -> Self {
        Self::info(
            "Task Created",
            format!("The task \"{}\" has been created successfully!", task.title),
        )
    }

    /// Confirms an edited task.
    #[must_use]
    pub fn task_updated(task: &Task) -> Self {
        Self::info(
            "Task Updated",
            format!("The task \"{}\" has been updated successfully!", task.title),
        )
    }

    /// Confirms a status move.
    #[must_use]
    pub fn status_moved(status: TaskStatus) -> Self {
        Self::info(
            "Status Updated",
            format!("The task status moved to {status} successfully!"),
        )
    }

    /// Confirms a deletion.
    #[must_use]
    pub fn task_deleted() -> Self {
        Self::info("Task Deleted", "The task has been deleted successfully!")
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            write!(f, "[{}] {}", self.level, self.title)
        } else {
            write!(f, "[{}] {}: {}", self.level, self.title, self.description)
        }
    }
}
