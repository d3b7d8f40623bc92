use std::sync::Arc;

use super::{ChannelInterceptor, tagged_id};
use crate::error::Error;
use crate::message::{CORRELATION_HEADER, Command, Message};
use crate::metrics::{CorrelationId, Counter, MetricsAggregator, Stage};

/// Times `MESSAGE` deliveries through the outbound channel.
///
/// Ids are fresh per delivery and unrelated to any inbound id.
#[derive(Debug, Clone)]
pub struct OutboundMetricInterceptor {
    metrics: Arc<MetricsAggregator>,
}

impl OutboundMetricInterceptor {
    #[must_use]
    pub fn new(metrics: Arc<MetricsAggregator>) -> Self {
        Self { metrics }
    }
}

impl ChannelInterceptor for OutboundMetricInterceptor {
    fn pre_send(&self, mut message: Message) -> Message {
        if message.command != Command::Message {
            return message;
        }
        let id = CorrelationId::generate();
        message.set_header(CORRELATION_HEADER, id.as_str());
        self.metrics.record_start(Stage::Outbound, &id);
        self.metrics.increment(Counter::Outbound);
        message
    }

    fn after_handled(&self, message: &Message, _error: Option<&Error>) {
        if message.command != Command::Message {
            return;
        }
        if let Some(id) = tagged_id(message) {
            self.metrics.record_stop(Stage::Outbound, &id);
        }
    }
}
