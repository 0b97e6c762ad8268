// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Integration tests for the Event Channel Client against the dev server.
//!
//! Each test starts an in-process dev server on an ephemeral port, signs a
//! user in directly through its store, and opens a real Action Cable
//! subscription over WebSocket. Broadcasts are pushed through the server
//! state the test keeps a handle to.

use std::sync::Arc;
use std::time::Duration;

use taskboard::api::{ApiClient, TaskApi};
use taskboard::channel::{ChannelError, EventChannel};
use taskboard::session::{Credential, MemorySessionStore, Session, StoredSession};
use taskboard::transport::ReconnectConfig;
use taskboard::transport::cable::CableOptions;
use taskboard::view::{TaskView, ViewEvent, ViewOptions};
use taskboard_devserver::server::{DevState, start_server_with_state};
use taskboard_devserver::store::Store;
use taskboard_proto::event::TaskEvent;
use taskboard_proto::rest::{NewTask, TaskFilters};
use taskboard_proto::task::{Task, TaskId, TaskPatch, TaskStatus};
use taskboard_proto::user::Role;
use tokio::sync::mpsc;
use url::Url;

const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    state: Arc<DevState>,
    base_url: String,
    endpoint: Url,
    session: Session,
}

async fn start() -> Harness {
    let state = Arc::new(DevState::with_config(
        Store::new(),
        Duration::from_millis(200),
    ));
    state
        .store
        .create_account("alice@example.com", "secret1", Role::Manager)
        .unwrap();
    let (token, user) = state
        .store
        .sign_in("alice@example.com", "secret1")
        .unwrap();

    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    let endpoint: Url = format!("ws://{addr}/cable").parse().unwrap();
    let session = session_with(&token, user);

    Harness {
        state,
        base_url: format!("http://{addr}"),
        endpoint,
        session,
    }
}

fn session_with(token: &str, user: taskboard_proto::user::User) -> Session {
    Session::restore(MemorySessionStore::with_session(StoredSession {
        token: Credential::new(token),
        user,
    }))
    .unwrap()
}

fn fast_options() -> CableOptions {
    CableOptions {
        connect_timeout: Duration::from_secs(2),
        stale_after: Duration::from_secs(2),
        capacity: 64,
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            max_attempts: 0,
        },
    }
}

fn channel(harness: &Harness) -> EventChannel {
    EventChannel::new(
        harness.endpoint.clone(),
        harness.session.clone(),
        fast_options(),
    )
}

/// Polls until the server reports `expected` subscribed connections.
async fn wait_for_subscribers(state: &DevState, expected: usize) {
    tokio::time::timeout(WAIT, async {
        while state.subscriber_count().await != expected {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never reached {expected} subscriber(s)"));
}

fn assigned(id: u64, title: &str) -> TaskEvent {
    TaskEvent::Assigned {
        task: Task::new(TaskId::new(id), title),
        message: "New task assigned".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn broadcast_reaches_subscriber() {
    let harness = start().await;
    let mut channel = channel(&harness);
    assert!(channel.open().is_some());
    assert!(channel.is_open());
    wait_for_subscribers(&harness.state, 1).await;

    let event = assigned(1, "Prepare demo");
    assert_eq!(harness.state.broadcast(&event).await, 1);

    let subscription = channel.subscription().unwrap();
    let received = tokio::time::timeout(WAIT, subscription.next_event())
        .await
        .expect("timed out waiting for event")
        .expect("subscription ended");
    assert_eq!(received, event);
    assert!(subscription.is_connected());
}

#[tokio::test]
async fn callback_receives_events_in_order() {
    let harness = start().await;
    let mut channel = channel(&harness);
    let (tx, mut rx) = mpsc::unbounded_channel();
    channel
        .open()
        .unwrap()
        .on_event(move |event| {
            let _ = tx.send(event);
        })
        .unwrap();
    wait_for_subscribers(&harness.state, 1).await;

    let events = vec![
        assigned(5, "Draft"),
        TaskEvent::StatusUpdated {
            task: TaskPatch::status(TaskId::new(5), TaskStatus::InProgress),
            message: "Task status updated to in_progress".to_string(),
        },
        TaskEvent::StatusUpdated {
            task: TaskPatch::status(TaskId::new(5), TaskStatus::Completed),
            message: "Task status updated to completed".to_string(),
        },
    ];
    for event in &events {
        harness.state.broadcast(event).await;
    }

    for expected in &events {
        let received = tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for callback")
            .expect("callback sender dropped");
        assert_eq!(&received, expected);
    }
}

#[tokio::test]
async fn malformed_broadcast_is_skipped() {
    let harness = start().await;
    let mut channel = channel(&harness);
    channel.open().unwrap();
    wait_for_subscribers(&harness.state, 1).await;

    harness
        .state
        .broadcast_raw(serde_json::json!({ "type": "task_archived", "task": { "id": 1 } }))
        .await;
    harness
        .state
        .broadcast_raw(serde_json::json!("not even an object"))
        .await;
    let valid = assigned(2, "Survivor");
    harness.state.broadcast(&valid).await;

    let received = tokio::time::timeout(WAIT, channel.subscription().unwrap().next_event())
        .await
        .expect("timed out waiting for event")
        .expect("subscription ended");
    assert_eq!(received, valid);
}

#[tokio::test]
async fn second_callback_is_refused() {
    let harness = start().await;
    let mut channel = channel(&harness);
    let subscription = channel.open().unwrap();
    subscription.on_event(|_| {}).unwrap();

    let again = subscription.on_event(|_| {});
    assert!(matches!(again, Err(ChannelError::CallbackAlreadyRegistered)));
    assert!(subscription.next_event().await.is_none());
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn close_releases_server_subscription() {
    let harness = start().await;
    let mut channel = channel(&harness);
    channel.open().unwrap();
    wait_for_subscribers(&harness.state, 1).await;

    channel.close();
    assert!(!channel.is_open());
    wait_for_subscribers(&harness.state, 0).await;

    // Idempotent, and nothing is delivered afterwards.
    channel.close();
    assert_eq!(harness.state.broadcast(&assigned(3, "Late")).await, 0);
}

#[tokio::test]
async fn closed_subscription_yields_nothing() {
    let harness = start().await;
    let mut channel = channel(&harness);
    let subscription = channel.open().unwrap();
    subscription.close();

    assert!(!subscription.is_open());
    assert!(subscription.next_event().await.is_none());
    assert!(matches!(
        subscription.on_event(|_| {}),
        Err(ChannelError::Closed)
    ));
}

#[tokio::test]
async fn open_without_credential_is_rest_only() {
    let harness = start().await;
    let mut channel = EventChannel::new(
        harness.endpoint.clone(),
        Session::anonymous(),
        fast_options(),
    );

    assert!(channel.open().is_none());
    assert!(!channel.is_open());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.state.subscriber_count().await, 0);
}

#[tokio::test]
async fn open_returns_the_same_subscription() {
    let harness = start().await;
    let mut channel = channel(&harness);
    channel.open().unwrap();
    channel.open().unwrap();
    wait_for_subscribers(&harness.state, 1).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.state.subscriber_count().await, 1);
}

#[tokio::test]
async fn rejected_credential_ends_stream() {
    let harness = start().await;
    let user = harness.session.principal().unwrap();
    let mut channel = EventChannel::new(
        harness.endpoint.clone(),
        session_with("dev-0-forged", user),
        fast_options(),
    );

    let subscription = channel.open().unwrap();
    let next = tokio::time::timeout(WAIT, subscription.next_event())
        .await
        .expect("stream did not end after the server refused the credential");
    assert!(next.is_none());
    assert_eq!(harness.state.subscriber_count().await, 0);
}

#[tokio::test]
async fn server_disconnect_without_reconnect_ends_stream() {
    let harness = start().await;
    let mut channel = channel(&harness);
    channel.open().unwrap();
    wait_for_subscribers(&harness.state, 1).await;

    harness.state.disconnect_all("server_restart", false).await;

    let next = tokio::time::timeout(WAIT, channel.subscription().unwrap().next_event())
        .await
        .expect("stream did not end after disconnect");
    assert!(next.is_none());
}

#[tokio::test]
async fn reconnects_after_connection_drop() {
    let harness = start().await;
    let mut channel = channel(&harness);
    channel.open().unwrap();
    wait_for_subscribers(&harness.state, 1).await;

    harness.state.close_all_connections().await;

    // Broadcasts sent before the new subscription is confirmed are lost;
    // keep sending until one arrives.
    let event = assigned(9, "After reconnect");
    let subscription = channel.subscription().unwrap();
    let received = tokio::time::timeout(WAIT, async {
        loop {
            harness.state.broadcast(&event).await;
            let attempt =
                tokio::time::timeout(Duration::from_millis(100), subscription.next_event()).await;
            if let Ok(Some(received)) = attempt {
                return received;
            }
        }
    })
    .await
    .expect("no event delivered after reconnect");
    assert_eq!(received, event);
}

// ---------------------------------------------------------------------------
// Mounted view end to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mounted_view_follows_changes_from_another_client() {
    let harness = start().await;
    let api = ApiClient::new(&harness.base_url, harness.session.clone(), WAIT).unwrap();
    let (_handle, mut events) = TaskView::mount(
        api.clone(),
        channel(&harness),
        TaskFilters::default(),
        ViewOptions::default(),
    );
    wait_for_subscribers(&harness.state, 1).await;

    // A task created elsewhere; its broadcast lands in the view.
    let creator = harness.session.principal().unwrap();
    let created = harness
        .state
        .store
        .create_task(
            &creator,
            &NewTask {
                title: "Restock printer".to_string(),
                ..NewTask::default()
            },
        )
        .unwrap();
    harness
        .state
        .broadcast(&TaskEvent::Assigned {
            task: created.clone(),
            message: "New task assigned".to_string(),
        })
        .await;

    let tasks = tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(ViewEvent::TasksChanged(tasks)) if !tasks.is_empty() => break tasks,
                Some(_) => {}
                None => panic!("view events closed"),
            }
        }
    })
    .await
    .expect("pushed task never reached the view");
    assert_eq!(tasks, vec![created.clone()]);

    // A status move through REST comes back as a patch.
    api.update_status(created.id, TaskStatus::InProgress)
        .await
        .unwrap();
    let tasks = tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(ViewEvent::TasksChanged(tasks))
                    if tasks.first().map(|t| t.status) == Some(TaskStatus::InProgress) =>
                {
                    break tasks;
                }
                Some(_) => {}
                None => panic!("view events closed"),
            }
        }
    })
    .await
    .expect("status change never reached the view");
    assert_eq!(tasks.len(), 1);
}
