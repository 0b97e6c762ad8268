//! Push-channel task events.
//!
//! Events arrive as the `message` payload of an Action Cable data frame:
//!
//! ```json
//! {"action": "status_updated", "task": {"id": 1, "status": "completed"}, "message": "moved"}
//! ```
//!
//! `task_assigned` normally carries a full [`Task`] but may arrive partial,
//! in which case it decodes as [`TaskEvent::AssignedPartial`]. The two
//! update kinds carry a [`TaskPatch`]. Events are consumed once and never
//! stored.

use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskId, TaskPatch};

/// Wire discriminant of a [`TaskEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A task was assigned to the principal.
    TaskAssigned,
    /// A task's fields were edited.
    TaskUpdated,
    /// A task's status changed.
    StatusUpdated,
}

impl EventKind {
    /// Wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TaskAssigned => "task_assigned",
            Self::TaskUpdated => "task_updated",
            Self::StatusUpdated => "status_updated",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors decoding a task event payload.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The payload is not an event object or its task does not decode.
    #[error("malformed task event: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The `action` is not one this client understands.
    #[error("unknown task event action: {0}")]
    UnknownAction(String),
}

/// A task lifecycle event delivered over the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// A task was assigned; carries the full record.
    Assigned {
        /// The assigned task.
        task: Task,
        /// Human-readable notification text.
        message: String,
    },
    /// A task was assigned but the record is incomplete; carries the fields
    /// that were sent.
    AssignedPartial {
        /// The fields that were sent.
        task: TaskPatch,
        /// Human-readable notification text.
        message: String,
    },
    /// A task was edited; carries only the changed fields.
    Updated {
        /// The changed fields.
        task: TaskPatch,
        /// Human-readable notification text.
        message: String,
    },
    /// A task's status changed; carries only the changed fields.
    StatusUpdated {
        /// The changed fields.
        task: TaskPatch,
        /// Human-readable notification text.
        message: String,
    },
}

/// Raw wire shape. The original client keys events by `action`; `kind` is
/// accepted too.
#[derive(Deserialize, Serialize)]
struct WireEvent {
    #[serde(alias = "kind")]
    action: String,
    task: serde_json::Value,
    #[serde(default)]
    message: Option<String>,
}

impl TaskEvent {
    /// Decodes an event from the `message` object of a data frame.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::UnknownAction`] for unrecognized actions and
    /// [`EventError::Malformed`] when the object or its task does not decode.
    pub fn from_value(value: serde_json::Value) -> Result<Self, EventError> {
        let wire: WireEvent = serde_json::from_value(value)?;
        let message = wire.message.unwrap_or_default();
        match wire.action.as_str() {
            "task_assigned" => match serde_json::from_value::<Task>(wire.task.clone()) {
                Ok(task) => Ok(Self::Assigned { task, message }),
                Err(_) => Ok(Self::AssignedPartial {
                    task: serde_json::from_value(wire.task)?,
                    message,
                }),
            },
            "task_updated" => Ok(Self::Updated {
                task: serde_json::from_value(wire.task)?,
                message,
            }),
            "status_updated" => Ok(Self::StatusUpdated {
                task: serde_json::from_value(wire.task)?,
                message,
            }),
            other => Err(EventError::UnknownAction(other.to_string())),
        }
    }

    /// Encodes this event into its wire object.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Malformed`] if the task fails to serialize.
    pub fn to_value(&self) -> Result<serde_json::Value, EventError> {
        let task = match self {
            Self::Assigned { task, .. } => serde_json::to_value(task)?,
            Self::AssignedPartial { task, .. }
            | Self::Updated { task, .. }
            | Self::StatusUpdated { task, .. } => serde_json::to_value(task)?,
        };
        Ok(serde_json::to_value(WireEvent {
            action: self.kind().as_str().to_string(),
            task,
            message: Some(self.message().to_string()),
        })?)
    }

    /// The event's discriminant.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Assigned { .. } | Self::AssignedPartial { .. } => EventKind::TaskAssigned,
            Self::Updated { .. } => EventKind::TaskUpdated,
            Self::StatusUpdated { .. } => EventKind::StatusUpdated,
        }
    }

    /// Merge key of the task this event concerns.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        match self {
            Self::Assigned { task, .. } => task.id,
            Self::AssignedPartial { task, .. }
            | Self::Updated { task, .. }
            | Self::StatusUpdated { task, .. } => task.id,
        }
    }

    /// Notification text.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Assigned { message, .. }
            | Self::AssignedPartial { message, .. }
            | Self::Updated { message, .. }
            | Self::StatusUpdated { message, .. } => message,
        }
    }

    /// Task title carried by the event, if any.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        match self {
            Self::Assigned { task, .. } => Some(&task.title),
            Self::AssignedPartial { task, .. }
            | Self::Updated { task, .. }
            | Self::StatusUpdated { task, .. } => task.title.as_deref(),
        }
    }
}
