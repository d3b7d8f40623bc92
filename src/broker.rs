//! In-process topic broker.
//!
//! [`Broker::publish`] turns a payload into one `MESSAGE` frame per
//! subscriber and sends each through the outbound [`MessageChannel`]. The
//! channel's handler, a [`SessionRegistry`], hands the frame to the target
//! session's queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::channel::{MessageChannel, MessageHandler};
use crate::error::{Error, Result};
use crate::message::{Message, SessionId};

/// The `publish(topic, payload)` capability the response service relies on.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Deliver `payload` to every subscriber of `topic`.
    ///
    /// Returns how many deliveries were accepted.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<usize>;
}

/// Outgoing queues of the connected sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    sessions: RwLock<HashMap<SessionId, mpsc::Sender<Message>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session's outgoing queue and assign it an id.
    pub fn register(&self, outgoing: mpsc::Sender<Message>) -> SessionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.sessions.write().insert(id, outgoing);
        tracing::debug!(session = id, "session registered");
        id
    }

    /// Forget a session. Returns whether it was registered.
    pub fn remove(&self, id: SessionId) -> bool {
        let removed = self.sessions.write().remove(&id).is_some();
        if removed {
            tracing::debug!(session = id, "session removed");
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[async_trait]
impl MessageHandler for SessionRegistry {
    async fn handle(&self, message: &Message) -> Result<()> {
        let session = message
            .session()
            .ok_or_else(|| Error::InvalidFrame("delivery without a target session".into()))?;
        let outgoing = self
            .sessions
            .read()
            .get(&session)
            .cloned()
            .ok_or(Error::SessionClosed)?;
        outgoing
            .send(message.clone())
            .await
            .map_err(|_| Error::SessionClosed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Subscription {
    session: SessionId,
    id: String,
}

/// Topic broker delivering through the outbound channel.
#[derive(Debug)]
pub struct Broker {
    outbound: Arc<MessageChannel>,
    sessions: Arc<SessionRegistry>,
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
    message_seq: AtomicU64,
}

impl Broker {
    #[must_use]
    pub fn new(outbound: Arc<MessageChannel>, sessions: Arc<SessionRegistry>) -> Self {
        Self {
            outbound,
            sessions,
            subscriptions: RwLock::new(HashMap::new()),
            message_seq: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Subscribe `session` to `destination` under `subscription_id`.
    ///
    /// Re-using a subscription id on the same destination is a no-op.
    pub fn subscribe(&self, session: SessionId, destination: &str, subscription_id: &str) {
        let subscription = Subscription {
            session,
            id: subscription_id.to_string(),
        };
        let mut subscriptions = self.subscriptions.write();
        let subscribers = subscriptions.entry(destination.to_string()).or_default();
        if !subscribers.contains(&subscription) {
            subscribers.push(subscription);
            tracing::debug!(session, destination, subscription = subscription_id, "subscribed");
        }
    }

    /// Remove one subscription of `session`.
    pub fn unsubscribe(&self, session: SessionId, subscription_id: &str) {
        let mut subscriptions = self.subscriptions.write();
        for subscribers in subscriptions.values_mut() {
            subscribers.retain(|s| !(s.session == session && s.id == subscription_id));
        }
        subscriptions.retain(|_, subscribers| !subscribers.is_empty());
    }

    /// Drop every subscription of `session` and its outgoing queue.
    pub fn disconnect(&self, session: SessionId) {
        {
            let mut subscriptions = self.subscriptions.write();
            for subscribers in subscriptions.values_mut() {
                subscribers.retain(|s| s.session != session);
            }
            subscriptions.retain(|_, subscribers| !subscribers.is_empty());
        }
        self.sessions.remove(session);
    }

    #[must_use]
    pub fn subscriber_count(&self, destination: &str) -> usize {
        self.subscriptions
            .read()
            .get(destination)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl Publisher for Broker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<usize> {
        let subscribers = self
            .subscriptions
            .read()
            .get(topic)
            .cloned()
            .unwrap_or_default();

        let mut delivered = 0;
        let mut first_error = None;
        for subscriber in subscribers {
            let seq = self.message_seq.fetch_add(1, Ordering::Relaxed);
            let message = Message::deliver(topic, &subscriber.id, payload.clone())
                .with_header("message-id", seq.to_string())
                .with_header("content-type", "application/json")
                .with_session(subscriber.session);
            match self.outbound.send(message).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if delivered == 0 => Err(e),
            Some(e) => {
                tracing::warn!(topic, delivered, error = %e, "partial broadcast");
                Ok(delivered)
            }
            None => Ok(delivered),
        }
    }
}
