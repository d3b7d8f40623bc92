//! Observation hooks around message channels.
//!
//! A [`MessageChannel`](crate::channel::MessageChannel) calls
//! [`ChannelInterceptor::pre_send`] on the sender's task, then
//! [`ChannelInterceptor::before_handle`] and
//! [`ChannelInterceptor::after_handled`] on the executor around the handler.
//! The metric interceptors use these three points to time each stage.

mod inbound;
mod outbound;

use crate::error::Error;
use crate::message::Message;
use crate::metrics::CorrelationId;

pub use inbound::InboundMetricInterceptor;
pub use outbound::OutboundMetricInterceptor;

/// Hooks invoked as a message passes through a channel.
///
/// Every hook has a pass-through default.
pub trait ChannelInterceptor: Send + Sync {
    /// Stage entry, on the sending task. May rewrite the message.
    fn pre_send(&self, message: Message) -> Message {
        message
    }

    /// Just before the handler runs, on the executor.
    fn before_handle(&self, _message: &Message) {}

    /// After the handler returned, with its error if it failed.
    fn after_handled(&self, _message: &Message, _error: Option<&Error>) {}
}

/// Correlation id a metric interceptor attached to `message`, if any.
fn tagged_id(message: &Message) -> Option<CorrelationId> {
    message.correlation_id().map(CorrelationId::from)
}
