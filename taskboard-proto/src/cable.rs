//! Action Cable frame codec.
//!
//! The push collaborator speaks the `actioncable-v1-json` sub-protocol. The
//! client sends [`ClientCommand`]s (`subscribe` / `unsubscribe`) naming a
//! channel [`Identifier`]; the server answers with typed control frames
//! (`welcome`, `ping`, `confirm_subscription`, ...) and untyped data frames
//! carrying an identifier and a `message` object.
//!
//! Both directions are provided so the dev server can reuse the codec.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// WebSocket sub-protocol negotiated with the cable endpoint.
pub const SUBPROTOCOL: &str = "actioncable-v1-json";

/// Channel class that delivers task lifecycle events.
pub const TASK_CHANNEL: &str = "TaskChannel";

/// Error type for cable encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CableError {
    /// The frame is not valid JSON or has the wrong shape.
    #[error("invalid cable frame: {0}")]
    Json(#[from] serde_json::Error),
    /// The frame carries a `type` this codec does not know.
    #[error("unknown cable frame type: {0}")]
    UnknownType(String),
    /// A field required by the frame type is missing.
    #[error("cable frame missing field: {0}")]
    MissingField(&'static str),
}

/// A channel subscription identifier.
///
/// On the wire this is a JSON document serialized into a string, e.g.
/// `"{\"channel\":\"TaskChannel\"}"`. It is compared byte-for-byte, the same
/// way the server matches it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Identifier for the named channel with no parameters.
    #[must_use]
    pub fn channel(name: &str) -> Self {
        Self(json!({ "channel": name }).to_string())
    }

    /// Identifier for [`TASK_CHANNEL`].
    #[must_use]
    pub fn tasks() -> Self {
        Self::channel(TASK_CHANNEL)
    }

    /// Wraps an identifier string received from the wire.
    #[must_use]
    pub const fn from_raw(raw: String) -> Self {
        Self(raw)
    }

    /// The raw identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Channel class named by this identifier, if it parses.
    #[must_use]
    pub fn channel_name(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(&self.0).ok()?;
        value.get("channel")?.as_str().map(str::to_string)
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Command verbs a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Attach to a channel.
    Subscribe,
    /// Detach from a channel.
    Unsubscribe,
    /// Perform a channel action (unused by this client).
    Message,
}

/// A client-to-server command frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCommand {
    /// The verb.
    pub command: CommandKind,
    /// Target channel.
    pub identifier: Identifier,
    /// JSON-encoded action payload for [`CommandKind::Message`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl ClientCommand {
    /// A `subscribe` command.
    #[must_use]
    pub const fn subscribe(identifier: Identifier) -> Self {
        Self {
            command: CommandKind::Subscribe,
            identifier,
            data: None,
        }
    }

    /// An `unsubscribe` command.
    #[must_use]
    pub const fn unsubscribe(identifier: Identifier) -> Self {
        Self {
            command: CommandKind::Unsubscribe,
            identifier,
            data: None,
        }
    }
}

/// A server-to-client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Connection accepted.
    Welcome,
    /// Heartbeat; `timestamp` is unix seconds.
    Ping {
        /// Server clock at send time.
        timestamp: i64,
    },
    /// A subscription was accepted.
    ConfirmSubscription {
        /// The accepted channel.
        identifier: Identifier,
    },
    /// A subscription was refused.
    RejectSubscription {
        /// The refused channel.
        identifier: Identifier,
    },
    /// The server is closing the connection.
    Disconnect {
        /// Why, e.g. `unauthorized` or `server_restart`.
        reason: Option<String>,
        /// Whether the client should reconnect.
        reconnect: bool,
    },
    /// A channel broadcast.
    Message {
        /// Channel the broadcast belongs to.
        identifier: Identifier,
        /// Broadcast payload.
        message: serde_json::Value,
    },
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    identifier: Option<Identifier>,
    message: Option<serde_json::Value>,
    reason: Option<String>,
    reconnect: Option<bool>,
}

/// Encodes a client command as a text frame.
///
/// # Errors
///
/// Returns [`CableError::Json`] if serialization fails.
pub fn encode_command(command: &ClientCommand) -> Result<String, CableError> {
    Ok(serde_json::to_string(command)?)
}

/// Decodes a client command text frame.
///
/// # Errors
///
/// Returns [`CableError::Json`] if the text is not a command object.
pub fn decode_command(text: &str) -> Result<ClientCommand, CableError> {
    Ok(serde_json::from_str(text)?)
}

/// Decodes a server text frame.
///
/// # Errors
///
/// Returns [`CableError::Json`] for non-JSON input, [`CableError::UnknownType`]
/// for unrecognized control frames and [`CableError::MissingField`] when a
/// frame lacks a field its type requires.
pub fn decode_frame(text: &str) -> Result<ServerFrame, CableError> {
    let raw: RawFrame = serde_json::from_str(text)?;
    match raw.kind.as_deref() {
        Some("welcome") => Ok(ServerFrame::Welcome),
        Some("ping") => Ok(ServerFrame::Ping {
            timestamp: raw
                .message
                .as_ref()
                .and_then(serde_json::Value::as_i64)
                .unwrap_or_default(),
        }),
        Some("confirm_subscription") => Ok(ServerFrame::ConfirmSubscription {
            identifier: raw.identifier.ok_or(CableError::MissingField("identifier"))?,
        }),
        Some("reject_subscription") => Ok(ServerFrame::RejectSubscription {
            identifier: raw.identifier.ok_or(CableError::MissingField("identifier"))?,
        }),
        Some("disconnect") => Ok(ServerFrame::Disconnect {
            reason: raw.reason,
            reconnect: raw.reconnect.unwrap_or(true),
        }),
        Some(other) => Err(CableError::UnknownType(other.to_string())),
        None => Ok(ServerFrame::Message {
            identifier: raw.identifier.ok_or(CableError::MissingField("identifier"))?,
            message: raw.message.ok_or(CableError::MissingField("message"))?,
        }),
    }
}

/// Encodes a server frame as text.
#[must_use]
pub fn encode_frame(frame: &ServerFrame) -> String {
    let value = match frame {
        ServerFrame::Welcome => json!({ "type": "welcome" }),
        ServerFrame::Ping { timestamp } => json!({ "type": "ping", "message": timestamp }),
        ServerFrame::ConfirmSubscription { identifier } => {
            json!({ "type": "confirm_subscription", "identifier": identifier })
        }
        ServerFrame::RejectSubscription { identifier } => {
            json!({ "type": "reject_subscription", "identifier": identifier })
        }
        ServerFrame::Disconnect { reason, reconnect } => {
            json!({ "type": "disconnect", "reason": reason, "reconnect": reconnect })
        }
        ServerFrame::Message {
            identifier,
            message,
        } => json!({ "identifier": identifier, "message": message }),
    };
    value.to_string()
}
