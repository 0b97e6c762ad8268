// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Integration tests for the REST client against the dev server.
//!
//! Covers the session lifecycle (sign-in, sign-up, sign-out), the task
//! endpoints with server-side filtering, and how HTTP failures map onto
//! [`ApiError`] variants.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use taskboard::api::{ApiClient, ApiError, TaskApi};
use taskboard::session::{Credential, MemorySessionStore, Session};
use taskboard_devserver::server::{DevState, start_server_with_state};
use taskboard_proto::rest::{NewTask, TaskFilters, TaskUpdate};
use taskboard_proto::task::{TaskId, TaskStatus};
use taskboard_proto::user::{Role, User};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    state: Arc<DevState>,
    base_url: String,
}

async fn start() -> Harness {
    let state = Arc::new(DevState::new());
    state
        .store
        .create_account("alice@example.com", "secret1", Role::Manager)
        .unwrap();
    state
        .store
        .create_account("bob@example.com", "secret2", Role::User)
        .unwrap();
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    Harness {
        state,
        base_url: format!("http://{addr}"),
    }
}

fn client(base_url: &str) -> ApiClient {
    let session = Session::restore(MemorySessionStore::default()).unwrap();
    ApiClient::new(base_url, session, Duration::from_secs(5)).unwrap()
}

async fn signed_in(harness: &Harness) -> (ApiClient, User) {
    let api = client(&harness.base_url);
    let user = api.sign_in("alice@example.com", "secret1").await.unwrap();
    (api, user)
}

fn new_task(title: &str) -> NewTask {
    NewTask {
        title: title.to_string(),
        ..NewTask::default()
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sign_in_establishes_session() {
    let harness = start().await;
    let api = client(&harness.base_url);
    assert!(!api.session().is_authenticated());

    let user = api.sign_in("alice@example.com", "secret1").await.unwrap();
    assert_eq!(user.email, "alice@example.com");
    assert_eq!(user.role, Role::Manager);

    let session = api.session();
    assert!(session.is_authenticated());
    assert_eq!(session.principal(), Some(user));
    let token = session.credential().unwrap();
    assert!(harness.state.store.authenticate(token.as_str()).is_some());
}

#[tokio::test]
async fn bad_password_is_unauthorized_with_server_message() {
    let harness = start().await;
    let api = client(&harness.base_url);

    let err = api
        .sign_in("alice@example.com", "wrong-password")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ApiError::Unauthorized {
            message: Some("Invalid Email or password.".to_string()),
        }
    );
    assert!(err.is_auth());
    assert!(!api.session().is_authenticated());
}

#[tokio::test]
async fn sign_up_creates_regular_user() {
    let harness = start().await;
    let api = client(&harness.base_url);

    let user = api
        .sign_up("carol@example.com", "secret3", "secret3")
        .await
        .unwrap();
    assert_eq!(user.role, Role::User);
    assert!(api.session().is_authenticated());
    assert_eq!(harness.state.store.list_users("carol").len(), 1);
}

#[tokio::test]
async fn sign_up_reports_validation_messages() {
    let harness = start().await;
    let api = client(&harness.base_url);

    let err = api
        .sign_up("carol@example.com", "secret3", "different")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ApiError::Status {
            status: 422,
            message: Some("Password confirmation doesn't match Password".to_string()),
        }
    );

    let err = api
        .sign_up("alice@example.com", "abc", "abc")
        .await
        .unwrap_err();
    let message = err.user_message("Sign up failed");
    assert!(message.contains("Email has already been taken"), "{message}");
    assert!(message.contains("Password is too short"), "{message}");
    assert!(!api.session().is_authenticated());
}

#[tokio::test]
async fn sign_out_revokes_and_clears() {
    let harness = start().await;
    let (api, _) = signed_in(&harness).await;
    let token = api.session().credential().unwrap();

    api.sign_out().await.unwrap();
    assert!(!api.session().is_authenticated());
    assert!(harness.state.store.authenticate(token.as_str()).is_none());
}

#[tokio::test]
async fn sign_out_clears_locally_when_server_unreachable() {
    // Nothing listens on port 9.
    let api = client("http://127.0.0.1:9");
    api.session()
        .establish(
            Credential::new("dev-1-00000001"),
            User {
                id: 1,
                email: "alice@example.com".to_string(),
                role: Role::Manager,
            },
        )
        .unwrap();

    api.sign_out().await.unwrap();
    assert!(!api.session().is_authenticated());
}

#[tokio::test]
async fn calls_without_credential_fail_before_io() {
    let harness = start().await;
    let api = client(&harness.base_url);

    assert_eq!(
        api.list_tasks(&TaskFilters::default()).await.unwrap_err(),
        ApiError::Unauthenticated
    );
    assert_eq!(
        api.create_task(&new_task("Nope")).await.unwrap_err(),
        ApiError::Unauthenticated
    );
    assert_eq!(
        api.list_users("").await.unwrap_err(),
        ApiError::Unauthenticated
    );
}

#[tokio::test]
async fn revoked_credential_is_unauthorized() {
    let harness = start().await;
    let (api, _) = signed_in(&harness).await;
    let token = api.session().credential().unwrap();
    assert!(harness.state.store.revoke(token.as_str()));

    let err = api.list_tasks(&TaskFilters::default()).await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized { message: Some(_) }));
    assert!(err.is_auth());
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn task_lifecycle() {
    let harness = start().await;
    let (api, alice) = signed_in(&harness).await;
    let bob = harness.state.store.list_users("bob").remove(0);

    let created = api
        .create_task(&NewTask {
            title: "Write release notes".to_string(),
            description: Some("Cover the sync changes".to_string()),
            due_date: Some(date(2025, 3, 1)),
            assigned_to_id: Some(bob.id),
        })
        .await
        .unwrap();
    assert_eq!(created.status, TaskStatus::Pending);
    assert_eq!(created.assigned_to.as_ref().map(|u| u.id), Some(bob.id));
    assert_eq!(created.assigned_by.as_ref().map(|u| u.id), Some(alice.id));

    let fetched = api.fetch_task(created.id).await.unwrap();
    assert_eq!(fetched, created);

    let renamed = api
        .update_task(
            created.id,
            &TaskUpdate {
                title: Some("Publish release notes".to_string()),
                ..TaskUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.title, "Publish release notes");
    assert_eq!(renamed.description, created.description);

    let moved = api
        .update_status(created.id, TaskStatus::InProgress)
        .await
        .unwrap();
    assert_eq!(moved.status, TaskStatus::InProgress);
    assert_eq!(moved.title, "Publish release notes");

    api.delete_task(created.id).await.unwrap();
    let err = api.fetch_task(created.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 404, .. }));
}

#[tokio::test]
async fn list_filters_are_applied_server_side() {
    let harness = start().await;
    let (api, _) = signed_in(&harness).await;

    let early = api
        .create_task(&NewTask {
            title: "Book venue".to_string(),
            due_date: Some(date(2025, 1, 10)),
            ..NewTask::default()
        })
        .await
        .unwrap();
    let late = api
        .create_task(&NewTask {
            title: "Send invites".to_string(),
            due_date: Some(date(2025, 2, 20)),
            ..NewTask::default()
        })
        .await
        .unwrap();
    let undated = api.create_task(&new_task("Pick a theme")).await.unwrap();
    api.update_status(late.id, TaskStatus::Completed)
        .await
        .unwrap();

    let all = api.list_tasks(&TaskFilters::default()).await.unwrap();
    let ids: Vec<TaskId> = all.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![undated.id, late.id, early.id], "newest first");

    let completed = api
        .list_tasks(&TaskFilters {
            status: Some(TaskStatus::Completed),
            ..TaskFilters::default()
        })
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, late.id);

    let by_query = api
        .list_tasks(&TaskFilters {
            query: "venue".to_string(),
            ..TaskFilters::default()
        })
        .await
        .unwrap();
    assert_eq!(by_query.len(), 1);
    assert_eq!(by_query[0].id, early.id);

    let january = api
        .list_tasks(&TaskFilters {
            start_date: Some(date(2025, 1, 1)),
            end_date: Some(date(2025, 1, 31)),
            ..TaskFilters::default()
        })
        .await
        .unwrap();
    assert_eq!(january.len(), 1);
    assert_eq!(january[0].id, early.id);
}

#[tokio::test]
async fn invalid_task_reports_validation_message() {
    let harness = start().await;
    let (api, _) = signed_in(&harness).await;

    let err = api.create_task(&new_task("   ")).await.unwrap_err();
    assert_eq!(
        err,
        ApiError::Status {
            status: 422,
            message: Some("Title can't be blank".to_string()),
        }
    );

    let err = api
        .create_task(&NewTask {
            title: "Orphan".to_string(),
            assigned_to_id: Some(999),
            ..NewTask::default()
        })
        .await
        .unwrap_err();
    assert_eq!(
        err.user_message("Failed to perform task operation"),
        "Assigned to must exist"
    );
}

#[tokio::test]
async fn missing_task_is_not_found() {
    let harness = start().await;
    let (api, _) = signed_in(&harness).await;

    let err = api.delete_task(TaskId::new(404)).await.unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 404, .. }));
    assert!(!err.is_auth());
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[tokio::test]
async fn users_are_listed_and_detailed() {
    let harness = start().await;
    let (api, _) = signed_in(&harness).await;

    let everyone = api.list_users("").await.unwrap();
    assert_eq!(everyone.len(), 2);
    let bobs = api.list_users("BOB").await.unwrap();
    assert_eq!(bobs.len(), 1);
    let bob = &bobs[0];

    api.create_task(&NewTask {
        title: "Review budget".to_string(),
        assigned_to_id: Some(bob.id),
        ..NewTask::default()
    })
    .await
    .unwrap();
    api.create_task(&new_task("Unassigned")).await.unwrap();

    let details = api.fetch_user(bob.id).await.unwrap();
    assert_eq!(details.email, "bob@example.com");
    assert_eq!(details.role, Role::User);
    assert_eq!(details.tasks.len(), 1);
    assert_eq!(details.tasks[0].title, "Review budget");

    let err = api.fetch_user(999).await.unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 404, .. }));
}
