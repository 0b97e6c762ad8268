//! Single-writer reconciliation of snapshots, push events and confirmed
//! local mutations into one ordered task collection.
//!
//! The [`Reconciler`] is synchronous and does no I/O of its own. Whoever
//! owns it serializes calls, so a merge never interleaves with another.
//!
//! Snapshots are split into [`Reconciler::begin_snapshot`], which issues a
//! new generation, and [`Reconciler::complete_snapshot`], which accepts a
//! result only if it belongs to the latest generation issued. Results of
//! superseded requests are discarded whatever order they arrive in.

use taskboard_proto::event::TaskEvent;
use taskboard_proto::rest::TaskFilters;
use taskboard_proto::task::{Task, TaskId};

use super::merge::{self, MergeOutcome};
use crate::api::{ApiError, TaskApi};
use crate::notify::{FETCH_FAILED, Notification};

/// Title used when neither the event nor the collection names the task.
const FALLBACK_TITLE: &str = "Task update";

/// A snapshot fetch to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRequest {
    /// Tag to pass back to [`Reconciler::complete_snapshot`].
    pub generation: u64,
    /// Filters to fetch with.
    pub filters: TaskFilters,
}

/// Result of completing a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// The collection was replaced.
    Applied {
        /// Records in the new collection.
        count: usize,
    },
    /// A newer request was issued; the result was discarded.
    Stale,
    /// The latest request failed; the collection is unchanged.
    Failed(Notification),
    /// The reconciler was released; nothing was touched.
    Released,
}

/// Result of applying a push event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventOutcome {
    /// What happened to the collection.
    pub merge: MergeOutcome,
    /// Notification to show, produced even when the merge is a no-op.
    pub notification: Notification,
}

/// A REST mutation the server has confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalMutation {
    /// A task this user created. Inserted at the front.
    Created(Task),
    /// A task this user edited.
    Updated(Task),
    /// A task this user deleted.
    Deleted(TaskId),
    /// A task this user moved to its next status.
    StatusMoved(Task),
}

/// Owner of the task collection for one mounted view.
#[derive(Debug, Default)]
pub struct Reconciler {
    tasks: Vec<Task>,
    filters: TaskFilters,
    /// Latest generation issued.
    generation: u64,
    /// Generation still awaiting its result.
    pending: Option<u64>,
    last_error: Option<String>,
    released: bool,
}

impl Reconciler {
    /// An empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a new snapshot generation for `filters`, superseding any
    /// request still outstanding.
    pub fn begin_snapshot(&mut self, filters: TaskFilters) -> SnapshotRequest {
        self.generation += 1;
        if !self.released {
            if let Some(superseded) = self.pending.replace(self.generation) {
                tracing::debug!(
                    superseded,
                    generation = self.generation,
                    "snapshot superseded"
                );
            }
            self.filters = filters.clone();
        }
        SnapshotRequest {
            generation: self.generation,
            filters,
        }
    }

    /// Accepts the result of the snapshot tagged `generation`.
    ///
    /// Only the latest generation is applied; anything else, failures
    /// included, is [`SnapshotOutcome::Stale`] and leaves no trace. A failure
    /// of the latest generation keeps the previous collection.
    pub fn complete_snapshot(
        &mut self,
        generation: u64,
        result: Result<Vec<Task>, ApiError>,
    ) -> SnapshotOutcome {
        if self.released {
            tracing::debug!(generation, "snapshot after release dropped");
            return SnapshotOutcome::Released;
        }
        if self.pending != Some(generation) {
            tracing::debug!(
                generation,
                latest = self.generation,
                "stale snapshot discarded"
            );
            return SnapshotOutcome::Stale;
        }
        self.pending = None;
        match result {
            Ok(tasks) => {
                self.tasks = merge::dedup_by_id(tasks);
                self.last_error = None;
                tracing::debug!(
                    generation,
                    count = self.tasks.len(),
                    "snapshot applied"
                );
                SnapshotOutcome::Applied {
                    count: self.tasks.len(),
                }
            }
            Err(e) => {
                tracing::warn!(generation, err = %e, "snapshot fetch failed");
                let message = e.user_message(FETCH_FAILED);
                self.last_error = Some(message.clone());
                SnapshotOutcome::Failed(Notification::error(message))
            }
        }
    }

    /// Fetches and applies one snapshot.
    ///
    /// Holding `&mut self` across the fetch makes this a single-caller
    /// convenience; concurrent fetches go through
    /// [`begin_snapshot`](Self::begin_snapshot) and
    /// [`complete_snapshot`](Self::complete_snapshot) directly.
    pub async fn load_snapshot<A: TaskApi>(
        &mut self,
        api: &A,
        filters: TaskFilters,
    ) -> SnapshotOutcome {
        let request = self.begin_snapshot(filters);
        let result = api.list_tasks(&request.filters).await;
        self.complete_snapshot(request.generation, result)
    }

    /// Merges a push event.
    ///
    /// `task_assigned` replaces a record with the same id or appends. A
    /// partial `task_assigned`, `task_updated` and `status_updated` patch a
    /// present record in place and are ignored otherwise. A notification is produced in every case.
    pub fn apply_event(&mut self, event: &TaskEvent) -> EventOutcome {
        let merge = if self.released {
            MergeOutcome::Ignored
        } else {
            match event {
                TaskEvent::Assigned { task, .. } => merge::upsert_back(&mut self.tasks, task.clone()),
                TaskEvent::AssignedPartial { task, .. }
                | TaskEvent::Updated { task, .. }
                | TaskEvent::StatusUpdated { task, .. } => merge::patch(&mut self.tasks, task),
            }
        };
        tracing::debug!(
            kind = event.kind().as_str(),
            task_id = %event.task_id(),
            outcome = ?merge,
            "task event merged"
        );

        let title = event
            .title()
            .map(str::to_string)
            .or_else(|| self.get(event.task_id()).map(|t| t.title.clone()))
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| FALLBACK_TITLE.to_string());
        EventOutcome {
            merge,
            notification: Notification::info(title, event.message()),
        }
    }

    /// Applies a mutation the server has already confirmed.
    pub fn apply_local_mutation(&mut self, mutation: LocalMutation) -> MergeOutcome {
        if self.released {
            return MergeOutcome::Ignored;
        }
        let outcome = match mutation {
            LocalMutation::Created(task) => merge::upsert_front(&mut self.tasks, task),
            LocalMutation::Updated(task) | LocalMutation::StatusMoved(task) => {
                merge::replace(&mut self.tasks, task)
            }
            LocalMutation::Deleted(id) => merge::remove(&mut self.tasks, id),
        };
        tracing::debug!(outcome = ?outcome, "local mutation applied");
        outcome
    }

    /// Records a failed mutation. The collection is not touched.
    pub fn record_failure(&mut self, context: &str, err: &ApiError) -> Notification {
        tracing::warn!(context, err = %err, "task mutation failed");
        let message = err.user_message(context);
        if !self.released {
            self.last_error = Some(message.clone());
        }
        Notification::error(message)
    }

    /// Releases the collection. Every later call is a no-op.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.pending = None;
            self.tasks.clear();
            tracing::debug!("reconciler released");
        }
    }

    /// The collection, in display order.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// The record with `id`.
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Whether a snapshot is outstanding.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    /// Message of the most recent failure, cleared by a successful snapshot.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Filters of the latest snapshot request.
    #[must_use]
    pub const fn filters(&self) -> &TaskFilters {
        &self.filters
    }

    /// Latest generation issued.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}
