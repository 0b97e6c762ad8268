// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::redundant_clone
)]

//! Integration tests for the List Reconciler.
//!
//! Drives [`Reconciler`] through the scenarios a mounted task view produces:
//! snapshots racing each other, push events interleaved with snapshots,
//! confirmed local mutations and their server echoes, and release on
//! unmount. Property tests cover re-delivery idempotence and patch
//! preservation over arbitrary inputs.

use proptest::prelude::*;
use taskboard::api::{ApiError, TaskApi};
use taskboard::notify::NotificationLevel;
use taskboard::tasks::{LocalMutation, MergeOutcome, Reconciler, SnapshotOutcome};
use taskboard_proto::event::TaskEvent;
use taskboard_proto::rest::{NewTask, TaskFilters, TaskUpdate};
use taskboard_proto::task::{Task, TaskId, TaskPatch, TaskStatus};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn task(id: u64, title: &str) -> Task {
    Task::new(TaskId::new(id), title)
}

fn assigned(task: Task, message: &str) -> TaskEvent {
    TaskEvent::Assigned {
        task,
        message: message.to_string(),
    }
}

fn status_updated(id: u64, status: TaskStatus, message: &str) -> TaskEvent {
    TaskEvent::StatusUpdated {
        task: TaskPatch::status(TaskId::new(id), status),
        message: message.to_string(),
    }
}

fn ids(reconciler: &Reconciler) -> Vec<u64> {
    reconciler.tasks().iter().map(|t| t.id.get()).collect()
}

/// Applies `tasks` as the result of a fresh snapshot.
fn load(reconciler: &mut Reconciler, tasks: Vec<Task>) {
    let request = reconciler.begin_snapshot(TaskFilters::default());
    let outcome = reconciler.complete_snapshot(request.generation, Ok(tasks));
    assert!(matches!(outcome, SnapshotOutcome::Applied { .. }));
}

/// `TaskApi` that answers every list with a fixed collection.
struct FixedApi {
    tasks: Vec<Task>,
}

impl TaskApi for FixedApi {
    async fn list_tasks(&self, _filters: &TaskFilters) -> Result<Vec<Task>, ApiError> {
        Ok(self.tasks.clone())
    }

    async fn fetch_task(&self, id: TaskId) -> Result<Task, ApiError> {
        self.tasks
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or(ApiError::Status {
                status: 404,
                message: None,
            })
    }

    async fn create_task(&self, _task: &NewTask) -> Result<Task, ApiError> {
        Err(ApiError::Network("unused".to_string()))
    }

    async fn update_task(&self, _id: TaskId, _update: &TaskUpdate) -> Result<Task, ApiError> {
        Err(ApiError::Network("unused".to_string()))
    }

    async fn delete_task(&self, _id: TaskId) -> Result<(), ApiError> {
        Err(ApiError::Network("unused".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

#[test]
fn older_generation_after_newer_is_discarded() {
    let mut r = Reconciler::new();
    let first = r.begin_snapshot(TaskFilters::default());
    let second = r.begin_snapshot(TaskFilters {
        query: "report".to_string(),
        ..TaskFilters::default()
    });

    let applied = r.complete_snapshot(second.generation, Ok(vec![task(2, "Write report")]));
    assert_eq!(applied, SnapshotOutcome::Applied { count: 1 });

    let late = r.complete_snapshot(first.generation, Ok(vec![task(1, "a"), task(3, "b")]));
    assert_eq!(late, SnapshotOutcome::Stale);
    assert_eq!(ids(&r), [2]);
    assert_eq!(r.filters().query, "report");
}

#[test]
fn older_generation_before_newer_is_also_discarded() {
    let mut r = Reconciler::new();
    let first = r.begin_snapshot(TaskFilters::default());
    let second = r.begin_snapshot(TaskFilters::default());

    assert_eq!(
        r.complete_snapshot(first.generation, Ok(vec![task(1, "old")])),
        SnapshotOutcome::Stale
    );
    assert!(r.is_loading());
    assert_eq!(
        r.complete_snapshot(second.generation, Ok(vec![task(5, "new")])),
        SnapshotOutcome::Applied { count: 1 }
    );
    assert!(!r.is_loading());
    assert_eq!(ids(&r), [5]);
}

#[test]
fn stale_failure_is_not_surfaced() {
    let mut r = Reconciler::new();
    let first = r.begin_snapshot(TaskFilters::default());
    let second = r.begin_snapshot(TaskFilters::default());

    let outcome = r.complete_snapshot(first.generation, Err(ApiError::Network("reset".into())));
    assert_eq!(outcome, SnapshotOutcome::Stale);
    assert!(r.last_error().is_none());

    r.complete_snapshot(second.generation, Ok(vec![]));
    assert!(r.last_error().is_none());
}

#[test]
fn failed_snapshot_keeps_previous_collection() {
    let mut r = Reconciler::new();
    load(&mut r, vec![task(1, "a"), task(2, "b")]);

    let request = r.begin_snapshot(TaskFilters::default());
    let outcome = r.complete_snapshot(
        request.generation,
        Err(ApiError::Status {
            status: 500,
            message: None,
        }),
    );

    let SnapshotOutcome::Failed(notification) = outcome else {
        panic!("expected a failure, got {outcome:?}");
    };
    assert_eq!(notification.level, NotificationLevel::Error);
    assert_eq!(notification.description, "Failed to fetch tasks");
    assert_eq!(ids(&r), [1, 2]);
    assert_eq!(r.last_error(), Some("Failed to fetch tasks"));

    load(&mut r, vec![task(3, "c")]);
    assert!(r.last_error().is_none());
}

#[test]
fn snapshot_duplicates_collapse_to_first_occurrence() {
    let mut r = Reconciler::new();
    load(
        &mut r,
        vec![task(1, "first"), task(2, "b"), task(1, "second")],
    );
    assert_eq!(ids(&r), [1, 2]);
    assert_eq!(r.get(TaskId::new(1)).unwrap().title, "first");
}

#[test]
fn events_before_acceptance_are_replaced_events_after_are_layered() {
    let mut r = Reconciler::new();
    let request = r.begin_snapshot(TaskFilters::default());

    // Arrives while the fetch is in flight; the snapshot supersedes it.
    r.apply_event(&assigned(task(9, "early"), "assigned"));
    assert_eq!(ids(&r), [9]);

    r.complete_snapshot(request.generation, Ok(vec![task(1, "a"), task(2, "b")]));
    assert_eq!(ids(&r), [1, 2]);

    // Arrive after acceptance; applied on top in delivery order.
    r.apply_event(&assigned(task(3, "c"), "assigned"));
    r.apply_event(&status_updated(1, TaskStatus::InProgress, "moved"));
    r.apply_event(&status_updated(1, TaskStatus::Completed, "done"));

    assert_eq!(ids(&r), [1, 2, 3]);
    assert_eq!(r.get(TaskId::new(1)).unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn load_snapshot_fetches_and_applies() {
    let api = FixedApi {
        tasks: vec![task(4, "d"), task(7, "g")],
    };
    let mut r = Reconciler::new();
    let outcome = r
        .load_snapshot(
            &api,
            TaskFilters {
                status: Some(TaskStatus::Pending),
                ..TaskFilters::default()
            },
        )
        .await;
    assert_eq!(outcome, SnapshotOutcome::Applied { count: 2 });
    assert_eq!(ids(&r), [4, 7]);
    assert_eq!(r.filters().status, Some(TaskStatus::Pending));
    assert_eq!(r.generation(), 1);
}

// ---------------------------------------------------------------------------
// Push events
// ---------------------------------------------------------------------------

#[test]
fn status_update_moves_status_in_place() {
    let mut r = Reconciler::new();
    load(&mut r, vec![task(1, "one"), task(2, "two")]);

    let outcome = r.apply_event(&status_updated(1, TaskStatus::InProgress, "moved"));

    assert!(matches!(outcome.merge, MergeOutcome::Patched { changed: true }));
    assert_eq!(outcome.notification.description, "moved");
    assert_eq!(outcome.notification.title, "one");
    assert_eq!(ids(&r), [1, 2]);
    assert_eq!(r.tasks()[0].status, TaskStatus::InProgress);
    assert_eq!(r.tasks()[1].status, TaskStatus::Pending);
}

#[test]
fn update_for_absent_task_is_noop_with_notification() {
    let mut r = Reconciler::new();
    load(&mut r, vec![task(1, "one")]);
    let before = r.tasks().to_vec();

    let outcome = r.apply_event(&status_updated(42, TaskStatus::Completed, "finished"));

    assert_eq!(outcome.merge, MergeOutcome::Ignored);
    assert_eq!(r.tasks(), before.as_slice());
    assert_eq!(outcome.notification.description, "finished");
    assert_eq!(outcome.notification.title, "Task update");
    assert_eq!(outcome.notification.level, NotificationLevel::Info);
}

#[test]
fn partial_update_preserves_other_fields() {
    let mut r = Reconciler::new();
    let mut held = task(1, "Write report");
    held.description = Some("quarterly".to_string());
    load(&mut r, vec![held, task(2, "other")]);

    let event = TaskEvent::Updated {
        task: TaskPatch {
            title: Some("Write annual report".to_string()),
            ..TaskPatch::empty(TaskId::new(1))
        },
        message: "renamed".to_string(),
    };
    let outcome = r.apply_event(&event);

    let updated = r.get(TaskId::new(1)).unwrap();
    assert_eq!(updated.title, "Write annual report");
    assert_eq!(updated.description.as_deref(), Some("quarterly"));
    assert_eq!(outcome.notification.title, "Write annual report");
    assert_eq!(ids(&r), [1, 2]);
}

#[test]
fn assigned_appends_at_back() {
    let mut r = Reconciler::new();
    load(&mut r, vec![task(1, "a")]);
    let outcome = r.apply_event(&assigned(task(2, "b"), "New task assigned"));
    assert_eq!(outcome.merge, MergeOutcome::Appended);
    assert_eq!(ids(&r), [1, 2]);
}

#[test]
fn partial_assigned_patches_present_and_never_inserts() {
    let mut r = Reconciler::new();
    load(&mut r, vec![task(3, "Plan offsite")]);

    let present = TaskEvent::from_value(serde_json::json!({
        "action": "task_assigned",
        "task": {"id": 3, "status": "in_progress"},
        "message": "New task assigned"
    }))
    .unwrap();
    let outcome = r.apply_event(&present);
    assert!(matches!(outcome.merge, MergeOutcome::Patched { changed: true }));
    assert_eq!(outcome.notification.title, "Plan offsite");
    assert_eq!(outcome.notification.description, "New task assigned");
    let held = r.get(TaskId::new(3)).unwrap();
    assert_eq!(held.status, TaskStatus::InProgress);
    assert_eq!(held.title, "Plan offsite");

    let absent = TaskEvent::from_value(serde_json::json!({
        "action": "task_assigned",
        "task": {"id": 8, "status": "pending"},
        "message": null
    }))
    .unwrap();
    let outcome = r.apply_event(&absent);
    assert_eq!(outcome.merge, MergeOutcome::Ignored);
    assert_eq!(outcome.notification.title, "Task update");
    assert_eq!(outcome.notification.description, "");
    assert_eq!(ids(&r), [3]);
}

// ---------------------------------------------------------------------------
// Local mutations
// ---------------------------------------------------------------------------

#[test]
fn local_create_then_server_echo_keeps_one_record() {
    let mut r = Reconciler::new();
    load(&mut r, vec![task(1, "a"), task(2, "b")]);

    let created = task(3, "Plan offsite");
    assert_eq!(
        r.apply_local_mutation(LocalMutation::Created(created.clone())),
        MergeOutcome::Prepended
    );
    assert_eq!(ids(&r), [3, 1, 2]);

    let mut echo = created;
    echo.description = Some("from the server".to_string());
    let outcome = r.apply_event(&assigned(echo.clone(), "New task assigned"));

    assert_eq!(outcome.merge, MergeOutcome::Replaced);
    assert_eq!(ids(&r), [3, 1, 2]);
    assert_eq!(r.get(TaskId::new(3)), Some(&echo));
}

#[test]
fn push_and_local_creations_land_at_opposite_ends() {
    let mut r = Reconciler::new();
    load(&mut r, vec![task(1, "a")]);
    r.apply_event(&assigned(task(2, "pushed"), ""));
    r.apply_local_mutation(LocalMutation::Created(task(3, "mine")));
    assert_eq!(ids(&r), [3, 1, 2]);
}

#[test]
fn local_update_delete_and_move_work_by_identity() {
    let mut r = Reconciler::new();
    load(&mut r, vec![task(1, "a"), task(2, "b"), task(3, "c")]);

    r.apply_local_mutation(LocalMutation::Updated(task(2, "b2")));
    r.apply_local_mutation(LocalMutation::StatusMoved(
        task(3, "c").with_status(TaskStatus::InProgress),
    ));
    r.apply_local_mutation(LocalMutation::Deleted(TaskId::new(1)));

    assert_eq!(ids(&r), [2, 3]);
    assert_eq!(r.tasks()[0].title, "b2");
    assert_eq!(r.tasks()[1].status, TaskStatus::InProgress);

    assert_eq!(
        r.apply_local_mutation(LocalMutation::Updated(task(9, "ghost"))),
        MergeOutcome::Ignored
    );
    assert_eq!(ids(&r), [2, 3]);
}

#[test]
fn mutation_failure_leaves_collection_untouched() {
    let mut r = Reconciler::new();
    load(&mut r, vec![task(1, "a")]);

    let notification = r.record_failure(
        "Failed to delete task",
        &ApiError::Status {
            status: 422,
            message: Some("Task is locked".to_string()),
        },
    );

    assert_eq!(notification.level, NotificationLevel::Error);
    assert_eq!(notification.description, "Task is locked");
    assert_eq!(r.last_error(), Some("Task is locked"));
    assert_eq!(ids(&r), [1]);
}

// ---------------------------------------------------------------------------
// Release (unmount)
// ---------------------------------------------------------------------------

#[test]
fn response_after_release_is_dropped() {
    let mut r = Reconciler::new();
    load(&mut r, vec![task(1, "a")]);
    let in_flight = r.begin_snapshot(TaskFilters::default());

    r.release();

    assert_eq!(
        r.complete_snapshot(in_flight.generation, Ok(vec![task(2, "late")])),
        SnapshotOutcome::Released
    );
    assert_eq!(
        r.complete_snapshot(
            in_flight.generation,
            Err(ApiError::Network("late".to_string()))
        ),
        SnapshotOutcome::Released
    );
    assert!(r.is_empty());
    assert!(r.last_error().is_none());
    assert_eq!(
        r.apply_event(&assigned(task(3, "c"), "")).merge,
        MergeOutcome::Ignored
    );
    assert!(r.is_empty());
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

fn status_strategy() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(TaskStatus::ALL.to_vec())
}

proptest! {
    #[test]
    fn redelivered_assignments_never_duplicate(
        initial in prop::collection::vec(1u64..20, 0..10),
        titles in prop::collection::vec("[a-z]{1,8}", 1..10),
        id in 1u64..20,
    ) {
        let mut r = Reconciler::new();
        load(&mut r, initial.iter().map(|i| task(*i, "seed")).collect());

        for title in &titles {
            r.apply_event(&assigned(task(id, title), "again"));
        }

        let matching = r.tasks().iter().filter(|t| t.id.get() == id).count();
        prop_assert_eq!(matching, 1);
        prop_assert_eq!(&r.get(TaskId::new(id)).unwrap().title, titles.last().unwrap());
    }

    #[test]
    fn status_events_preserve_order_and_length(
        count in 1u64..10,
        updates in prop::collection::vec((1u64..15, status_strategy()), 0..20),
    ) {
        let mut r = Reconciler::new();
        load(&mut r, (1..=count).map(|i| task(i, &format!("t{i}"))).collect());
        let order = ids(&r);

        for (id, status) in &updates {
            let outcome = r.apply_event(&status_updated(*id, *status, "moved"));
            prop_assert_eq!(outcome.notification.description.as_str(), "moved");
        }

        prop_assert_eq!(ids(&r), order);
        for t in r.tasks() {
            prop_assert_eq!(&t.title, &format!("t{}", t.id));
        }
    }

    #[test]
    fn only_latest_generation_survives_any_completion_order(
        results in prop::collection::vec(prop::collection::vec(1u64..50, 0..5), 2..6),
        rotation in any::<usize>(),
    ) {
        let mut r = Reconciler::new();
        let requests: Vec<_> = results
            .iter()
            .map(|_| r.begin_snapshot(TaskFilters::default()))
            .collect();
        let latest = requests.last().unwrap().generation;

        let mut completions: Vec<_> = requests.iter().zip(&results).collect();
        let len = completions.len();
        completions.rotate_left(rotation % len);

        for (request, tasks) in completions {
            let tasks: Vec<Task> = tasks.iter().map(|i| task(*i, "x")).collect();
            let outcome = r.complete_snapshot(request.generation, Ok(tasks));
            prop_assert_eq!(
                matches!(outcome, SnapshotOutcome::Applied { .. }),
                request.generation == latest
            );
        }

        let mut expected: Vec<u64> = Vec::new();
        for id in results.last().unwrap() {
            if !expected.contains(id) {
                expected.push(*id);
            }
        }
        prop_assert_eq!(ids(&r), expected);
    }
}
