//! Pure merge functions over an ordered task collection.
//!
//! Every function keeps the collection free of duplicate ids: records are
//! matched by [`TaskId`] and replaced in place, so an existing record never
//! moves. Only genuinely new records change the order, and the caller
//! chooses which end they land on.

use std::collections::HashSet;

use taskboard_proto::task::{Task, TaskId, TaskPatch};

/// What a merge did to the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new record was added at the end.
    Appended,
    /// A new record was added at the front.
    Prepended,
    /// An existing record was replaced in place.
    Replaced,
    /// Fields of an existing record were overwritten in place.
    Patched {
        /// Whether any field actually changed value.
        changed: bool,
    },
    /// A record was removed.
    Removed,
    /// Nothing matched; the collection is unchanged.
    Ignored,
}

impl MergeOutcome {
    /// Whether the collection may differ from before the merge.
    #[must_use]
    pub const fn is_change(self) -> bool {
        match self {
            Self::Appended | Self::Prepended | Self::Replaced | Self::Removed => true,
            Self::Patched { changed } => changed,
            Self::Ignored => false,
        }
    }
}

/// Index of the record with `id`.
#[must_use]
pub fn position_of(tasks: &[Task], id: TaskId) -> Option<usize> {
    tasks.iter().position(|task| task.id == id)
}

/// Replaces the record with the same id, or appends `task`.
pub fn upsert_back(tasks: &mut Vec<Task>, task: Task) -> MergeOutcome {
    if let Some(index) = position_of(tasks, task.id) {
        tasks[index] = task;
        MergeOutcome::Replaced
    } else {
        tasks.push(task);
        MergeOutcome::Appended
    }
}

/// Replaces the record with the same id, or inserts `task` at the front.
pub fn upsert_front(tasks: &mut Vec<Task>, task: Task) -> MergeOutcome {
    if let Some(index) = position_of(tasks, task.id) {
        tasks[index] = task;
        MergeOutcome::Replaced
    } else {
        tasks.insert(0, task);
        MergeOutcome::Prepended
    }
}

/// Replaces the record with the same id; never inserts.
pub fn replace(tasks: &mut [Task], task: Task) -> MergeOutcome {
    match position_of(tasks, task.id) {
        Some(index) => {
            tasks[index] = task;
            MergeOutcome::Replaced
        }
        None => MergeOutcome::Ignored,
    }
}

/// Overwrites the fields `patch` carries on the matching record; never
/// inserts.
pub fn patch(tasks: &mut [Task], patch: &TaskPatch) -> MergeOutcome {
    match tasks.iter_mut().find(|task| task.id == patch.id) {
        Some(task) => MergeOutcome::Patched {
            changed: patch.apply_to(task),
        },
        None => MergeOutcome::Ignored,
    }
}

/// Removes the record with `id`.
pub fn remove(tasks: &mut Vec<Task>, id: TaskId) -> MergeOutcome {
    match position_of(tasks, id) {
        Some(index) => {
            tasks.remove(index);
            MergeOutcome::Removed
        }
        None => MergeOutcome::Ignored,
    }
}

/// Drops later records whose id was already seen, keeping order.
#[must_use]
pub fn dedup_by_id(tasks: Vec<Task>) -> Vec<Task> {
    let mut seen = HashSet::with_capacity(tasks.len());
    let before = tasks.len();
    let unique: Vec<Task> = tasks
        .into_iter()
        .filter(|task| seen.insert(task.id))
        .collect();
    if unique.len() != before {
        tracing::warn!(
            dropped = before - unique.len(),
            "snapshot contained duplicate task ids"
        );
    }
    unique
}
