//! Task view driver.
//!
//! Mounting a view spawns one actor task that exclusively owns a
//! [`Reconciler`]. Everything that changes the collection reaches the actor
//! as a message on one inbox and is handled to completion before the next
//! message is read:
//!
//! ```text
//! ViewHandle ── ViewCommand ──▶ ┌───────┐ ── ViewEvent ──▶ consumer
//! subscription ── TaskEvent ──▶ │ actor │
//! REST tasks ── completions ──▶ └───────┘ ── spawns ──▶ REST tasks
//! ```
//!
//! REST calls run on their own tasks and report back with their snapshot
//! generation or mutation. At most one snapshot fetch is outstanding: a new
//! filter aborts the previous fetch. Unmounting closes the subscription and
//! stops the actor; anything still in flight finds the inbox closed and is
//! dropped.

use std::sync::Arc;

use chrono::NaiveDate;
use taskboard_proto::event::TaskEvent;
use taskboard_proto::rest::{NewTask, TaskFilters, TaskUpdate};
use taskboard_proto::task::{Task, TaskId, TaskStatus};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::{ApiError, TaskApi};
use crate::channel::EventChannel;
use crate::notify::{self, Notification};
use crate::tasks::{LocalMutation, Reconciler, SnapshotOutcome};

/// Default capacity of the [`ViewEvent`] channel.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// A user action on the mounted view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewCommand {
    /// Replace all filters.
    SetFilters(TaskFilters),
    /// Change the free-text query.
    SetQuery(String),
    /// Change the status filter.
    SetStatusFilter(Option<TaskStatus>),
    /// Change the due-date range.
    SetDateRange(Option<NaiveDate>, Option<NaiveDate>),
    /// Fetch again with the current filters.
    Refresh,
    /// Create a task.
    Create(NewTask),
    /// Edit a task.
    Update(TaskId, TaskUpdate),
    /// Move a task to its next status.
    MoveStatus(TaskId),
    /// Delete a task.
    Delete(TaskId),
}

/// Something the consumer should render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    /// The collection changed; carries the full new collection.
    TasksChanged(Vec<Task>),
    /// A snapshot fetch started or finished.
    Loading(bool),
    /// A notification to show.
    Notification(Notification),
}

/// Errors talking to a mounted view.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ViewError {
    /// The view has been unmounted.
    #[error("task view is unmounted")]
    Unmounted,
}

/// Tuning for a mounted view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewOptions {
    /// Capacity of the [`ViewEvent`] channel.
    pub event_capacity: usize,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// A confirmed or failed REST mutation, routed back to the actor.
#[derive(Debug)]
enum Completion {
    Created(Result<Task, ApiError>),
    Updated(Result<Task, ApiError>),
    Moved(TaskStatus, Result<Task, ApiError>),
    Deleted(TaskId, Result<(), ApiError>),
}

#[derive(Debug)]
enum Inbox {
    Command(ViewCommand),
    Event(TaskEvent),
    Snapshot {
        generation: u64,
        result: Result<Vec<Task>, ApiError>,
    },
    Mutation(Completion),
}

/// The mounted view's actor state.
///
/// The inbox is unbounded so the push callback, which cannot wait, never
/// drops an event.
pub struct TaskView<A: TaskApi> {
    api: Arc<A>,
    reconciler: Reconciler,
    inbox: mpsc::UnboundedReceiver<Inbox>,
    /// Weak so the inbox closes once every outside sender is gone.
    inbox_tx: mpsc::WeakUnboundedSender<Inbox>,
    events: mpsc::Sender<ViewEvent>,
    fetch: Option<JoinHandle<()>>,
}

impl<A: TaskApi> TaskView<A> {
    /// Mounts a view: opens the event channel (if a credential is held),
    /// spawns the actor and issues the first snapshot with `filters`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn mount(
        api: A,
        mut channel: EventChannel,
        filters: TaskFilters,
        options: ViewOptions,
    ) -> (ViewHandle, mpsc::Receiver<ViewEvent>) {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(options.event_capacity.max(1));

        let live = match channel.open() {
            Some(subscription) => {
                let tx = inbox_tx.clone();
                match subscription.on_event(move |event| {
                    let _ = tx.send(Inbox::Event(event));
                }) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(err = %e, "live task updates unavailable");
                        false
                    }
                }
            }
            None => false,
        };

        let view = Self {
            api: Arc::new(api),
            reconciler: Reconciler::new(),
            inbox: inbox_rx,
            inbox_tx: inbox_tx.downgrade(),
            events: events_tx,
            fetch: None,
        };
        let actor = tokio::spawn(view.run(filters));
        tracing::info!(live, "task view mounted");

        (
            ViewHandle {
                inbox: Some(inbox_tx),
                channel,
                actor: Some(actor),
            },
            events_rx,
        )
    }

    async fn run(mut self, filters: TaskFilters) {
        self.request_snapshot(filters).await;
        while let Some(message) = self.inbox.recv().await {
            match message {
                Inbox::Command(command) => self.handle_command(command).await,
                Inbox::Event(event) => self.handle_event(&event).await,
                Inbox::Snapshot { generation, result } => {
                    self.handle_snapshot(generation, result).await;
                }
                Inbox::Mutation(completion) => self.handle_completion(completion).await,
            }
        }
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(fetch) = self.fetch.take() {
            fetch.abort();
        }
        self.reconciler.release();
        tracing::debug!("task view actor stopped");
    }

    async fn handle_command(&mut self, command: ViewCommand) {
        tracing::debug!(?command, "view command");
        let mut filters = self.reconciler.filters().clone();
        match command {
            ViewCommand::SetFilters(new) => filters = new,
            ViewCommand::SetQuery(query) => filters.query = query,
            ViewCommand::SetStatusFilter(status) => filters.status = status,
            ViewCommand::SetDateRange(start, end) => {
                filters.start_date = start;
                filters.end_date = end;
            }
            ViewCommand::Refresh => {}
            ViewCommand::Create(task) => {
                self.spawn_call(move |api| async move {
                    Completion::Created(api.create_task(&task).await)
                });
                return;
            }
            ViewCommand::Update(id, update) => {
                self.spawn_call(move |api| async move {
                    Completion::Updated(api.update_task(id, &update).await)
                });
                return;
            }
            ViewCommand::MoveStatus(id) => {
                self.move_status(id).await;
                return;
            }
            ViewCommand::Delete(id) => {
                self.spawn_call(move |api| async move {
                    Completion::Deleted(id, api.delete_task(id).await)
                });
                return;
            }
        }
        self.request_snapshot(filters).await;
    }

    async fn move_status(&mut self, id: TaskId) {
        let Some(current) = self.reconciler.get(id).map(|task| task.status) else {
            let notification = Notification::error(format!("Task {id} is not in the list"));
            self.emit(ViewEvent::Notification(notification)).await;
            return;
        };
        let Some(next) = current.next() else {
            let notification = Notification::error(format!("Task {id} is already {current}"));
            self.emit(ViewEvent::Notification(notification)).await;
            return;
        };
        self.spawn_call(move |api| async move {
            Completion::Moved(next, api.update_status(id, next).await)
        });
    }

    /// Issues a snapshot for `filters`, aborting the previous fetch.
    async fn request_snapshot(&mut self, filters: TaskFilters) {
        if let Some(previous) = self.fetch.take() {
            previous.abort();
        }
        let request = self.reconciler.begin_snapshot(filters);
        tracing::debug!(generation = request.generation, "snapshot requested");
        self.emit(ViewEvent::Loading(true)).await;

        let Some(inbox) = self.inbox_tx.upgrade() else {
            return;
        };
        let api = Arc::clone(&self.api);
        self.fetch = Some(tokio::spawn(async move {
            let result = api.list_tasks(&request.filters).await;
            let _ = inbox.send(Inbox::Snapshot {
                generation: request.generation,
                result,
            });
        }));
    }

    /// Runs one REST mutation on its own task and routes the result back.
    fn spawn_call<F, Fut>(&self, call: F)
    where
        F: FnOnce(Arc<A>) -> Fut + Send + 'static,
        Fut: Future<Output = Completion> + Send + 'static,
    {
        let Some(inbox) = self.inbox_tx.upgrade() else {
            return;
        };
        let api = Arc::clone(&self.api);
        tokio::spawn(async move {
            let completion = call(api).await;
            let _ = inbox.send(Inbox::Mutation(completion));
        });
    }

    async fn handle_snapshot(&mut self, generation: u64, result: Result<Vec<Task>, ApiError>) {
        match self.reconciler.complete_snapshot(generation, result) {
            SnapshotOutcome::Applied { .. } => {
                self.fetch = None;
                self.emit(ViewEvent::Loading(false)).await;
                self.emit_tasks().await;
            }
            SnapshotOutcome::Failed(notification) => {
                self.fetch = None;
                self.emit(ViewEvent::Loading(false)).await;
                self.emit(ViewEvent::Notification(notification)).await;
            }
            SnapshotOutcome::Stale | SnapshotOutcome::Released => {}
        }
    }

    async fn handle_event(&mut self, event: &TaskEvent) {
        let outcome = self.reconciler.apply_event(event);
        if outcome.merge.is_change() {
            self.emit_tasks().await;
        }
        self.emit(ViewEvent::Notification(outcome.notification))
            .await;
    }

    async fn handle_completion(&mut self, completion: Completion) {
        let (mutation, success) = match completion {
            Completion::Created(Ok(task)) => {
                let note = Notification::task_created(&task);
                (LocalMutation::Created(task), note)
            }
            Completion::Updated(Ok(task)) => {
                let note = Notification::task_updated(&task);
                (LocalMutation::Updated(task), note)
            }
            Completion::Moved(status, Ok(task)) => {
                (LocalMutation::StatusMoved(task), Notification::status_moved(status))
            }
            Completion::Deleted(id, Ok(())) => {
                (LocalMutation::Deleted(id), Notification::task_deleted())
            }
            Completion::Created(Err(e)) | Completion::Updated(Err(e)) => {
                self.fail(notify::TASK_OPERATION_FAILED, &e).await;
                return;
            }
            Completion::Moved(_, Err(e)) => {
                self.fail(notify::STATUS_UPDATE_FAILED, &e).await;
                return;
            }
            Completion::Deleted(_, Err(e)) => {
                self.fail(notify::DELETE_FAILED, &e).await;
                return;
            }
        };
        if self.reconciler.apply_local_mutation(mutation).is_change() {
            self.emit_tasks().await;
        }
        self.emit(ViewEvent::Notification(success)).await;
    }

    async fn fail(&mut self, context: &str, err: &ApiError) {
        let notification = self.reconciler.record_failure(context, err);
        self.emit(ViewEvent::Notification(notification)).await;
    }

    async fn emit_tasks(&self) {
        self.emit(ViewEvent::TasksChanged(self.reconciler.tasks().to_vec()))
            .await;
    }

    async fn emit(&self, event: ViewEvent) {
        if self.events.send(event).await.is_err() {
            tracing::trace!("view event dropped, no consumer");
        }
    }
}

/// Handle to a mounted view. Dropping it unmounts the view.
#[derive(Debug)]
pub struct ViewHandle {
    inbox: Option<mpsc::UnboundedSender<Inbox>>,
    channel: EventChannel,
    actor: Option<JoinHandle<()>>,
}

impl ViewHandle {
    /// Sends a user action to the view.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::Unmounted`] after [`unmount`](Self::unmount) or
    /// once the actor has stopped.
    pub fn send(&self, command: ViewCommand) -> Result<(), ViewError> {
        self.inbox
            .as_ref()
            .ok_or(ViewError::Unmounted)?
            .send(Inbox::Command(command))
            .map_err(|_| ViewError::Unmounted)
    }

    /// Whether the view receives live push updates.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.channel.is_open()
    }

    /// Whether the view is still mounted.
    #[must_use]
    pub const fn is_mounted(&self) -> bool {
        self.inbox.is_some()
    }

    /// Unmounts: closes the subscription and stops the actor. Results of
    /// calls still in flight are dropped. Idempotent.
    pub fn unmount(&mut self) {
        if self.inbox.take().is_none() {
            return;
        }
        self.channel.close();
        if let Some(actor) = self.actor.take() {
            actor.abort();
        }
        tracing::info!("task view unmounted");
    }
}

impl Drop for ViewHandle {
    fn drop(&mut self) {
        self.unmount();
    }
}
