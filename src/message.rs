//! STOMP messages and the synthetic payloads carried by them.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Header carrying the destination of `SEND`, `SUBSCRIBE` and `MESSAGE` frames.
pub const DESTINATION_HEADER: &str = "destination";

/// Header carrying the instrumentation correlation id.
pub const CORRELATION_HEADER: &str = "correlation-id";

/// STOMP frame command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Command {
    /// Client opens a session.
    Connect,
    /// Server accepts a session.
    Connected,
    /// Client sends a message to a destination.
    Send,
    /// Client subscribes to a destination.
    Subscribe,
    /// Client cancels a subscription.
    Unsubscribe,
    /// Server delivers a message to a subscriber.
    Message,
    /// Server acknowledges a frame that requested a receipt.
    Receipt,
    /// Server reports an error.
    Error,
    /// Client closes the session.
    Disconnect,
}

impl Command {
    /// Wire name of the command.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
            Command::Disconnect => "DISCONNECT",
        }
    }

    /// Parse a wire command name. `STOMP` is accepted as an alias of `CONNECT`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFrame`] for unknown commands.
    pub fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "CONNECT" | "STOMP" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            "DISCONNECT" => Command::Disconnect,
            other => return Err(Error::InvalidFrame(format!("unknown command {other:?}"))),
        })
    }

    /// Whether frames with this command may carry a body.
    #[must_use]
    pub const fn allows_body(&self) -> bool {
        matches!(self, Command::Send | Command::Message | Command::Error)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A STOMP message: command, ordered headers and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Frame command.
    pub command: Command,
    headers: Vec<(String, String)>,
    /// Frame body.
    pub body: Bytes,
    session: Option<SessionId>,
}

/// Identifies a connected session inside one process.
pub type SessionId = u64;

impl Message {
    /// Create a message without headers or body.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Bytes::new(),
            session: None,
        }
    }

    /// Tag the message with the session it came from or is bound for.
    ///
    /// The session is routing metadata and is never written to the wire.
    #[must_use]
    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }

    /// Session this message came from or is bound for.
    #[must_use]
    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    /// `SEND` frame with a body.
    #[must_use]
    pub fn send(destination: &str, body: impl Into<Bytes>) -> Self {
        Self::new(Command::Send)
            .with_header(DESTINATION_HEADER, destination)
            .with_body(body)
    }

    /// `MESSAGE` frame delivered on behalf of `subscription`.
    #[must_use]
    pub fn deliver(destination: &str, subscription: &str, body: impl Into<Bytes>) -> Self {
        Self::new(Command::Message)
            .with_header(DESTINATION_HEADER, destination)
            .with_header("subscription", subscription)
            .with_body(body)
    }

    /// `SUBSCRIBE` frame.
    #[must_use]
    pub fn subscribe(destination: &str, id: &str) -> Self {
        Self::new(Command::Subscribe)
            .with_header(DESTINATION_HEADER, destination)
            .with_header("id", id)
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header. STOMP gives the first occurrence precedence.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set a header, replacing any existing occurrences.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(k, _)| k != name);
        self.headers.push((name.to_string(), value.into()));
    }

    /// All headers in wire order.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Destination header, if present.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.header(DESTINATION_HEADER)
    }

    /// Correlation id attached by an interceptor, if any.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.header(CORRELATION_HEADER)
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPayload`] if the body does not decode as `T`.
    pub fn json<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Synthetic request sent by load clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundRequest {
    /// Client-chosen id.
    pub id: u64,
    /// Time the request was created.
    pub timestamp: DateTime<Utc>,
}

impl InboundRequest {
    /// Request stamped with the current time.
    #[must_use]
    pub fn now(id: u64) -> Self {
        Self {
            id,
            timestamp: Utc::now(),
        }
    }
}

/// Payload broadcast by the response service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundResponse {
    /// Monotonically increasing broadcast id.
    pub id: u64,
    /// Time the broadcast was produced.
    pub timestamp: DateTime<Utc>,
}

impl OutboundResponse {
    /// Response stamped with the current time.
    #[must_use]
    pub fn now(id: u64) -> Self {
        Self {
            id,
            timestamp: Utc::now(),
        }
    }
}
