//! Event Channel Client.
//!
//! An [`EventChannel`] turns the session credential into at most one live
//! [`Subscription`] to the task channel. The subscription decodes broadcasts
//! into [`TaskEvent`]s and hands them out in transport order, either to one
//! registered callback or to a caller awaiting [`Subscription::next_event`].
//!
//! Connection state changes are logged and otherwise ignored: the transport
//! retries on its own and anything missed while disconnected is picked up
//! by the next snapshot fetch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use taskboard_proto::cable::Identifier;
use taskboard_proto::event::{EventError, TaskEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::session::Session;
use crate::transport::TransportEvent;
use crate::transport::cable::{CableConsumer, CableOptions};

/// Misuse of a [`Subscription`].
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// A subscription delivers to exactly one callback.
    #[error("an event callback is already registered")]
    CallbackAlreadyRegistered,

    /// The subscription has been closed.
    #[error("subscription closed")]
    Closed,

    /// An event could not be encoded for a loopback feed.
    #[error("event encoding failed: {0}")]
    Encode(#[from] EventError),
}

enum Connector {
    Cable {
        endpoint: Url,
        session: Session,
        options: CableOptions,
    },
    /// A ready-made subscription, handed out once.
    Preset,
}

/// Opens the task-event subscription for one view lifetime.
pub struct EventChannel {
    connector: Connector,
    subscription: Option<Subscription>,
}

impl EventChannel {
    /// Channel to the Action Cable `endpoint`, authenticated with the
    /// credential `session` holds when [`open`](Self::open) is called.
    #[must_use]
    pub const fn new(endpoint: Url, session: Session, options: CableOptions) -> Self {
        Self {
            connector: Connector::Cable {
                endpoint,
                session,
                options,
            },
            subscription: None,
        }
    }

    /// Channel whose [`open`](Self::open) returns `subscription`. Used with
    /// [`Subscription::loopback`].
    #[must_use]
    pub const fn with_subscription(subscription: Subscription) -> Self {
        Self {
            connector: Connector::Preset,
            subscription: Some(subscription),
        }
    }

    /// Opens the subscription, or returns the one already open.
    ///
    /// Returns `None` when the session holds no credential: the caller runs
    /// REST-only, without live updates. This is logged, not an error.
    pub fn open(&mut self) -> Option<&mut Subscription> {
        if self.subscription.is_none()
            && let Connector::Cable {
                endpoint,
                session,
                options,
            } = &self.connector
        {
            let Some(credential) = session.credential() else {
                tracing::info!("no credential held, live task updates disabled");
                return None;
            };
            match CableConsumer::start(endpoint, &credential, Identifier::tasks(), options.clone())
            {
                Ok((consumer, events)) => {
                    tracing::info!(url = %endpoint, "task event channel opened");
                    self.subscription = Some(Subscription::from_cable(consumer, events));
                }
                Err(e) => {
                    tracing::warn!(url = %endpoint, err = %e, "task event channel unavailable");
                    return None;
                }
            }
        }
        self.subscription.as_mut()
    }

    /// The open subscription, if any.
    pub const fn subscription(&mut self) -> Option<&mut Subscription> {
        self.subscription.as_mut()
    }

    /// Whether a subscription is open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.subscription.is_some()
    }

    /// Closes and releases the subscription. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.close();
        }
    }
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Decodes transport events into task events, logging everything else.
struct EventStream {
    transport: mpsc::Receiver<TransportEvent>,
}

impl EventStream {
    async fn next(&mut self) -> Option<TaskEvent> {
        loop {
            match self.transport.recv().await? {
                TransportEvent::Connected => tracing::info!("task event channel connected"),
                TransportEvent::Disconnected { reason } => {
                    tracing::info!(reason = ?reason, "task event channel disconnected");
                }
                TransportEvent::Rejected => {
                    tracing::warn!("task event subscription rejected, live updates stopped");
                }
                TransportEvent::Message(value) => match TaskEvent::from_value(value) {
                    Ok(event) => {
                        tracing::debug!(
                            kind = event.kind().as_str(),
                            task_id = %event.task_id(),
                            "task event received"
                        );
                        return Some(event);
                    }
                    Err(e) => tracing::warn!(err = %e, "undecodable task event, skipping"),
                },
            }
        }
    }
}

/// One live attachment to the task channel.
///
/// Closed explicitly with [`close`](Self::close) or implicitly on drop; in
/// both cases the transport is shut down and no further events are
/// delivered.
pub struct Subscription {
    consumer: Option<CableConsumer>,
    /// Present until a callback takes it over.
    stream: Option<EventStream>,
    dispatcher: Option<JoinHandle<()>>,
    open: Arc<AtomicBool>,
}

impl Subscription {
    fn from_cable(consumer: CableConsumer, events: mpsc::Receiver<TransportEvent>) -> Self {
        Self {
            consumer: Some(consumer),
            stream: Some(EventStream { transport: events }),
            dispatcher: None,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// In-process subscription fed through the returned [`LoopbackFeed`].
    #[must_use]
    pub fn loopback(capacity: usize) -> (Self, LoopbackFeed) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let subscription = Self {
            consumer: None,
            stream: Some(EventStream { transport: rx }),
            dispatcher: None,
            open: Arc::new(AtomicBool::new(true)),
        };
        (subscription, LoopbackFeed { tx })
    }

    /// Registers the callback that receives every event, once each, in
    /// transport order. Callbacks run on a dedicated task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::CallbackAlreadyRegistered`] on a second
    /// registration and [`ChannelError::Closed`] after [`close`](Self::close).
    pub fn on_event<F>(&mut self, mut callback: F) -> Result<(), ChannelError>
    where
        F: FnMut(TaskEvent) + Send + 'static,
    {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }
        let Some(mut stream) = self.stream.take() else {
            return Err(ChannelError::CallbackAlreadyRegistered);
        };
        let open = Arc::clone(&self.open);
        self.dispatcher = Some(tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                if !open.load(Ordering::Acquire) {
                    break;
                }
                callback(event);
            }
            tracing::debug!("task event dispatcher exiting");
        }));
        Ok(())
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the subscription is closed, the transport has
    /// stopped for good, or a callback has been registered.
    pub async fn next_event(&mut self) -> Option<TaskEvent> {
        if !self.is_open() {
            return None;
        }
        self.stream.as_mut()?.next().await
    }

    /// Whether the subscription is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Whether the underlying transport currently has a confirmed
    /// subscription. Always `false` for loopback subscriptions.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.consumer
            .as_ref()
            .is_some_and(CableConsumer::is_connected)
    }

    /// Unsubscribes and releases the transport. Idempotent.
    pub fn close(&mut self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
        self.stream = None;
        if let Some(mut consumer) = self.consumer.take() {
            consumer.shutdown();
        }
        tracing::info!("task event subscription closed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("open", &self.is_open())
            .field("callback", &self.dispatcher.is_some())
            .finish_non_exhaustive()
    }
}

/// Sending side of a loopback [`Subscription`].
#[derive(Debug, Clone)]
pub struct LoopbackFeed {
    tx: mpsc::Sender<TransportEvent>,
}

impl LoopbackFeed {
    /// Delivers `event` as if it had arrived on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] once the subscription is gone.
    pub async fn send(&self, event: &TaskEvent) -> Result<(), ChannelError> {
        let value = event.to_value()?;
        self.send_raw(value).await
    }

    /// Delivers an arbitrary broadcast payload, decodable or not.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] once the subscription is gone.
    pub async fn send_raw(&self, message: serde_json::Value) -> Result<(), ChannelError> {
        self.send_transport(TransportEvent::Message(message)).await
    }

    /// Delivers a raw transport event, e.g. a connection state change.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] once the subscription is gone.
    pub async fn send_transport(&self, event: TransportEvent) -> Result<(), ChannelError> {
        self.tx.send(event).await.map_err(|_| ChannelError::Closed)
    }

    /// Whether the subscription side has been released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Waits until the subscription side has been released.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }
}
