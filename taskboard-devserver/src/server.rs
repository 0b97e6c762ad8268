//! Dev server core: shared state, REST routes and the Action Cable endpoint.
//!
//! REST routes mirror the paths the `taskboard` client calls. Every task
//! write that succeeds is broadcast as a task event to each connection
//! subscribed to the task channel; deletions are not broadcast.
//!
//! The cable endpoint authenticates with the `token` query parameter. A
//! connection without a live token receives a `disconnect` frame with
//! `reconnect: false` and is closed, the way Action Cable refuses an
//! unauthorized connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use futures_util::{SinkExt, StreamExt};
use taskboard_proto::cable::{
    self, ClientCommand, CommandKind, Identifier, SUBPROTOCOL, ServerFrame, TASK_CHANNEL,
};
use taskboard_proto::event::TaskEvent;
use taskboard_proto::rest::{
    AuthResponse, Credentials, DATE_FORMAT, ErrorBody, NewTask, TaskEnvelope, TaskFilters,
    TaskUpdate, UserEnvelope,
};
use taskboard_proto::task::{Task, TaskId, TaskPatch, TaskStatus};
use taskboard_proto::user::{User, UserDetails};
use tokio::sync::{RwLock, mpsc};

use crate::store::{Store, StoreError};

/// Default interval between cable heartbeats (Action Cable's beat).
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(3);

/// One open cable connection.
struct CableConnection {
    sender: mpsc::UnboundedSender<Message>,
    user: String,
    subscriptions: Vec<Identifier>,
}

/// Shared dev server state: the store plus the open cable connections.
pub struct DevState {
    /// Accounts, tokens and tasks.
    pub store: Store,
    connections: RwLock<HashMap<u64, CableConnection>>,
    last_connection: AtomicU64,
    ping_interval: Duration,
}

impl Default for DevState {
    fn default() -> Self {
        Self::new()
    }
}

impl DevState {
    /// Creates a state with an empty store and the default heartbeat.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Store::new(), DEFAULT_PING_INTERVAL)
    }

    /// Creates a state around a pre-seeded store.
    #[must_use]
    pub fn with_config(store: Store, ping_interval: Duration) -> Self {
        Self {
            store,
            connections: RwLock::new(HashMap::new()),
            last_connection: AtomicU64::new(0),
            ping_interval,
        }
    }

    async fn register(&self, user: &str, sender: mpsc::UnboundedSender<Message>) -> u64 {
        let id = self.last_connection.fetch_add(1, Ordering::Relaxed) + 1;
        self.connections.write().await.insert(
            id,
            CableConnection {
                sender,
                user: user.to_string(),
                subscriptions: Vec::new(),
            },
        );
        id
    }

    async fn unregister(&self, id: u64) {
        self.connections.write().await.remove(&id);
    }

    /// Adds a subscription and confirms it under the same lock, so no
    /// broadcast can overtake the confirmation.
    async fn subscribe(&self, id: u64, identifier: Identifier) {
        let mut conns = self.connections.write().await;
        let Some(conn) = conns.get_mut(&id) else {
            return;
        };
        if !conn.subscriptions.contains(&identifier) {
            conn.subscriptions.push(identifier.clone());
        }
        tracing::info!(user = %conn.user, %identifier, "subscription confirmed");
        let _ = conn
            .sender
            .send(text(&ServerFrame::ConfirmSubscription { identifier }));
    }

    async fn unsubscribe(&self, id: u64, identifier: &Identifier) {
        if let Some(conn) = self.connections.write().await.get_mut(&id) {
            conn.subscriptions.retain(|s| s != identifier);
            tracing::info!(user = %conn.user, %identifier, "unsubscribed");
        }
    }

    async fn send_to(&self, id: u64, frame: &ServerFrame) {
        if let Some(conn) = self.connections.read().await.get(&id) {
            let _ = conn.sender.send(text(frame));
        }
    }

    /// Broadcasts a task event to every subscribed connection. Returns the
    /// number of connections it was sent to.
    pub async fn broadcast(&self, event: &TaskEvent) -> usize {
        match event.to_value() {
            Ok(message) => self.broadcast_raw(message).await,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode task event");
                0
            }
        }
    }

    /// Broadcasts an arbitrary `message` payload on the task channel, valid
    /// event or not.
    pub async fn broadcast_raw(&self, message: serde_json::Value) -> usize {
        let conns = self.connections.read().await;
        let mut delivered = 0;
        for conn in conns.values() {
            for identifier in &conn.subscriptions {
                let frame = ServerFrame::Message {
                    identifier: identifier.clone(),
                    message: message.clone(),
                };
                if conn.sender.send(text(&frame)).is_ok() {
                    delivered += 1;
                }
            }
        }
        tracing::debug!(delivered, "broadcast task event");
        delivered
    }

    /// Number of connections holding at least one subscription.
    pub async fn subscriber_count(&self) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| !c.subscriptions.is_empty())
            .count()
    }

    /// Sends a `disconnect` frame followed by a close to every connection.
    pub async fn disconnect_all(&self, reason: &str, reconnect: bool) {
        let frame = ServerFrame::Disconnect {
            reason: Some(reason.to_string()),
            reconnect,
        };
        for conn in self.connections.read().await.values() {
            let _ = conn.sender.send(text(&frame));
            let _ = conn.sender.send(Message::Close(None));
        }
    }

    /// Send a WebSocket Close frame to every connection.
    ///
    /// Clients see the connection drop without a `disconnect` frame, as if
    /// the server went away.
    pub async fn close_all_connections(&self) {
        for (id, conn) in self.connections.read().await.iter() {
            tracing::info!(connection = id, user = %conn.user, "sending close frame");
            let _ = conn.sender.send(Message::Close(None));
        }
    }
}

fn text(frame: &ServerFrame) -> Message {
    Message::Text(cable::encode_frame(frame).into())
}

// ---------------------------------------------------------------------------
// Cable endpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct CableQuery {
    token: Option<String>,
}

/// axum handler that upgrades `/cable` to an Action Cable connection.
async fn cable_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<CableQuery>,
    State(state): State<Arc<DevState>>,
) -> impl IntoResponse {
    let user = query
        .token
        .as_deref()
        .and_then(|token| state.store.authenticate(token));
    ws.protocols([SUBPROTOCOL])
        .on_upgrade(move |socket| handle_cable(socket, state, user))
}

/// Handles one upgraded cable connection.
///
/// The connection lifecycle:
/// 1. Refuse it with a `disconnect` frame if the token was not live.
/// 2. Register it and send `welcome`.
/// 3. Send `ping` every heartbeat interval.
/// 4. Answer `subscribe` / `unsubscribe` commands until the socket closes.
/// 5. Unregister it.
async fn handle_cable(socket: WebSocket, state: Arc<DevState>, user: Option<User>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(user) = user else {
        tracing::info!("refusing unauthorized cable connection");
        let refusal = ServerFrame::Disconnect {
            reason: Some("unauthorized".to_string()),
            reconnect: false,
        };
        let _ = ws_sender.send(text(&refusal)).await;
        let _ = ws_sender.send(Message::Close(None)).await;
        return;
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let _ = tx.send(text(&ServerFrame::Welcome));
    let id = state.register(&user.email, tx.clone()).await;
    tracing::info!(connection = id, user = %user.email, "cable connected");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    let ping_interval = state.ping_interval;
    let ping_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let ping = ServerFrame::Ping {
                timestamp: chrono::Utc::now().timestamp(),
            };
            if tx.send(text(&ping)).is_err() {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(body) => handle_command(&reader_state, id, body.as_str()).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => write_task.abort(),
        _ = &mut write_task => read_task.abort(),
    }
    ping_task.abort();

    state.unregister(id).await;
    tracing::info!(connection = id, user = %user.email, "cable disconnected");
}

async fn handle_command(state: &DevState, id: u64, body: &str) {
    let command: ClientCommand = match cable::decode_command(body) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(connection = id, error = %e, "ignoring malformed cable command");
            return;
        }
    };
    match command.command {
        CommandKind::Subscribe => {
            if command.identifier.channel_name().as_deref() == Some(TASK_CHANNEL) {
                state.subscribe(id, command.identifier).await;
            } else {
                tracing::warn!(connection = id, identifier = %command.identifier, "unknown channel");
                let reject = ServerFrame::RejectSubscription {
                    identifier: command.identifier,
                };
                state.send_to(id, &reject).await;
            }
        }
        CommandKind::Unsubscribe => state.unsubscribe(id, &command.identifier).await,
        CommandKind::Message => {
            tracing::debug!(connection = id, "ignoring channel message");
        }
    }
}

// ---------------------------------------------------------------------------
// REST routes
// ---------------------------------------------------------------------------

/// A failed REST call, rendered as a status plus an error body.
#[derive(Debug)]
struct ApiFailure {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiFailure {
    fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            body: ErrorBody::error("You need to sign in or sign up before continuing."),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            body: ErrorBody {
                errors: Some(vec![message.into()]),
                ..ErrorBody::default()
            },
        }
    }
}

impl From<StoreError> for ApiFailure {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Invalid(errors) => Self {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                body: ErrorBody {
                    errors: Some(errors),
                    ..ErrorBody::default()
                },
            },
            StoreError::BadCredentials => Self {
                status: StatusCode::UNAUTHORIZED,
                body: ErrorBody::error(err.to_string()),
            },
            StoreError::NotFound => Self {
                status: StatusCode::NOT_FOUND,
                body: ErrorBody::error("Not found"),
            },
        }
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn current_user(state: &DevState, headers: &HeaderMap) -> Result<User, ApiFailure> {
    bearer(headers)
        .and_then(|token| state.store.authenticate(token))
        .ok_or_else(ApiFailure::unauthorized)
}

async fn sign_in(
    State(state): State<Arc<DevState>>,
    Json(body): Json<UserEnvelope<Credentials>>,
) -> Result<Json<AuthResponse>, ApiFailure> {
    let (token, user) = state.store.sign_in(&body.user.email, &body.user.password)?;
    tracing::info!(user = %user.email, "signed in");
    Ok(Json(AuthResponse { token, data: user }))
}

async fn sign_up(
    State(state): State<Arc<DevState>>,
    Json(body): Json<UserEnvelope<Credentials>>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiFailure> {
    let credentials = body.user;
    let (token, user) = state.store.sign_up(
        &credentials.email,
        &credentials.password,
        credentials.password_confirmation.as_deref(),
    )?;
    tracing::info!(user = %user.email, "signed up");
    Ok((StatusCode::CREATED, Json(AuthResponse { token, data: user })))
}

async fn sign_out(
    State(state): State<Arc<DevState>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiFailure> {
    let token = bearer(&headers).ok_or_else(ApiFailure::unauthorized)?;
    if !state.store.revoke(token) {
        return Err(ApiFailure::unauthorized());
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UsersQuery {
    q: String,
}

async fn list_users(
    State(state): State<Arc<DevState>>,
    headers: HeaderMap,
    Query(query): Query<UsersQuery>,
) -> Result<Json<Vec<User>>, ApiFailure> {
    current_user(&state, &headers)?;
    Ok(Json(state.store.list_users(&query.q)))
}

async fn show_user(
    State(state): State<Arc<DevState>>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Result<Json<UserDetails>, ApiFailure> {
    current_user(&state, &headers)?;
    Ok(Json(state.store.user_details(id)?))
}

/// Task list query. Every key is sent by the client, empty when unset.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TasksQuery {
    q: String,
    status: String,
    start_date: String,
    end_date: String,
}

impl TasksQuery {
    fn into_filters(self) -> Result<TaskFilters, ApiFailure> {
        let status = match self.status.as_str() {
            "" => None,
            other => Some(
                other
                    .parse::<TaskStatus>()
                    .map_err(|_| ApiFailure::invalid("Status is invalid"))?,
            ),
        };
        Ok(TaskFilters {
            query: self.q,
            status,
            start_date: parse_date(&self.start_date, "Start date is invalid")?,
            end_date: parse_date(&self.end_date, "End date is invalid")?,
        })
    }
}

fn parse_date(text: &str, message: &str) -> Result<Option<NaiveDate>, ApiFailure> {
    if text.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map(Some)
        .map_err(|_| ApiFailure::invalid(message))
}

async fn list_tasks(
    State(state): State<Arc<DevState>>,
    headers: HeaderMap,
    Query(query): Query<TasksQuery>,
) -> Result<Json<Vec<Task>>, ApiFailure> {
    current_user(&state, &headers)?;
    let filters = query.into_filters()?;
    Ok(Json(state.store.list_tasks(&filters)))
}

async fn show_task(
    State(state): State<Arc<DevState>>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Result<Json<Task>, ApiFailure> {
    current_user(&state, &headers)?;
    Ok(Json(state.store.task(TaskId::new(id))?))
}

async fn create_task(
    State(state): State<Arc<DevState>>,
    headers: HeaderMap,
    Json(body): Json<TaskEnvelope<NewTask>>,
) -> Result<(StatusCode, Json<Task>), ApiFailure> {
    let creator = current_user(&state, &headers)?;
    let task = state.store.create_task(&creator, &body.task)?;
    let event = TaskEvent::Assigned {
        task: task.clone(),
        message: "New task assigned".to_string(),
    };
    state.broadcast(&event).await;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn update_task(
    State(state): State<Arc<DevState>>,
    headers: HeaderMap,
    Path(id): Path<u64>,
    Json(body): Json<TaskEnvelope<TaskUpdate>>,
) -> Result<Json<Task>, ApiFailure> {
    current_user(&state, &headers)?;
    let update = body.task;
    let task = state.store.update_task(TaskId::new(id), &update)?;
    let event = if update.is_status_only() {
        TaskEvent::StatusUpdated {
            task: TaskPatch {
                title: Some(task.title.clone()),
                ..TaskPatch::status(task.id, task.status)
            },
            message: format!("Task status updated to {}", task.status),
        }
    } else {
        TaskEvent::Updated {
            task: TaskPatch::from(task.clone()),
            message: "Task updated".to_string(),
        }
    };
    state.broadcast(&event).await;
    Ok(Json(task))
}

async fn destroy_task(
    State(state): State<Arc<DevState>>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiFailure> {
    current_user(&state, &headers)?;
    state.store.delete_task(TaskId::new(id))?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Server entry points
// ---------------------------------------------------------------------------

fn router(state: Arc<DevState>) -> Router {
    Router::new()
        .route("/users/sign_in", post(sign_in))
        .route("/users", post(sign_up))
        .route("/users/sign_out", delete(sign_out))
        .route("/api/v1/users", get(list_users))
        .route("/api/v1/users/{id}", get(show_user))
        .route("/api/v1/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/v1/tasks/{id}",
            get(show_task).put(update_task).delete(destroy_task),
        )
        .route("/cable", get(cable_handler))
        .with_state(state)
}

/// Starts the dev server on the given address with an empty store and
/// returns the bound address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(DevState::new())).await
}

/// Starts the dev server with a pre-configured [`DevState`].
///
/// This is the entry point used by `main.rs` and by integration tests,
/// which keep the `Arc` to seed data and push events.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<DevState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "dev server error");
        }
    });

    Ok((bound_addr, handle))
}
