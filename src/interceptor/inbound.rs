use std::sync::Arc;

use super::{ChannelInterceptor, tagged_id};
use crate::error::Error;
use crate::message::{CORRELATION_HEADER, Command, Message};
use crate::metrics::{CorrelationId, Counter, MetricsAggregator, Stage};

/// Times client `SEND` messages through the inbound channel.
///
/// Stage entry tags the message with a fresh correlation id, starts the
/// inbound timer and counts the message. Dispatch starts the business-logic
/// timer. Exit stops both. Any other command passes through untouched.
#[derive(Debug, Clone)]
pub struct InboundMetricInterceptor {
    metrics: Arc<MetricsAggregator>,
}

impl InboundMetricInterceptor {
    #[must_use]
    pub fn new(metrics: Arc<MetricsAggregator>) -> Self {
        Self { metrics }
    }

    fn collectible(message: &Message) -> bool {
        message.command == Command::Send
    }
}

impl ChannelInterceptor for InboundMetricInterceptor {
    fn pre_send(&self, mut message: Message) -> Message {
        if !Self::collectible(&message) {
            return message;
        }
        let id = CorrelationId::generate();
        message.set_header(CORRELATION_HEADER, id.as_str());
        self.metrics.record_start(Stage::Inbound, &id);
        self.metrics.increment(Counter::Inbound);
        message
    }

    fn before_handle(&self, message: &Message) {
        if !Self::collectible(message) {
            return;
        }
        if let Some(id) = tagged_id(message) {
            self.metrics.record_start(Stage::BusinessLogic, &id);
        }
    }

    fn after_handled(&self, message: &Message, _error: Option<&Error>) {
        if !Self::collectible(message) {
            return;
        }
        if let Some(id) = tagged_id(message) {
            self.metrics.record_stop(Stage::Inbound, &id);
            self.metrics.record_stop(Stage::BusinessLogic, &id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;

    fn interceptor() -> (InboundMetricInterceptor, Arc<MetricsAggregator>) {
        let metrics = Arc::new(MetricsAggregator::new(MetricsConfig::default()).unwrap());
        (InboundMetricInterceptor::new(metrics.clone()), metrics)
    }

    #[test]
    fn test_send_is_instrumented() {
        let (interceptor, metrics) = interceptor();
        let message = interceptor.pre_send(Message::send("/app/x", "{}"));
        assert!(message.correlation_id().is_some());
        assert_eq!(metrics.total(Counter::Inbound), 1);
        assert_eq!(metrics.pending(Stage::Inbound), 1);

        interceptor.before_handle(&message);
        assert_eq!(metrics.pending(Stage::BusinessLogic), 1);

        interceptor.after_handled(&message, None);
        assert_eq!(metrics.samples(Stage::Inbound), 1);
        assert_eq!(metrics.samples(Stage::BusinessLogic), 1);
        assert_eq!(metrics.pending(Stage::Inbound), 0);
    }

    #[test]
    fn test_failed_handler_still_stops_timers() {
        let (interceptor, metrics) = interceptor();
        let message = interceptor.pre_send(Message::send("/app/x", "{}"));
        interceptor.before_handle(&message);
        interceptor.after_handled(&message, Some(&Error::TaskFailed("boom".into())));
        assert_eq!(metrics.samples(Stage::Inbound), 1);
        assert_eq!(metrics.samples(Stage::BusinessLogic), 1);
    }

    #[test]
    fn test_client_supplied_id_is_replaced() {
        let (interceptor, _metrics) = interceptor();
        let message = interceptor
            .pre_send(Message::send("/app/x", "{}").with_header(CORRELATION_HEADER, "forged"));
        assert_ne!(message.correlation_id(), Some("forged"));
        assert_eq!(
            message
                .headers()
                .iter()
                .filter(|(k, _)| k == CORRELATION_HEADER)
                .count(),
            1
        );
    }

    #[test]
    fn test_other_commands_untouched() {
        let (interceptor, metrics) = interceptor();
        for message in [
            Message::subscribe("/topic/x", "sub-0"),
            Message::new(Command::Connect),
            Message::deliver("/topic/x", "sub-0", "{}"),
        ] {
            let out = interceptor.pre_send(message.clone());
            assert_eq!(out, message);
            interceptor.before_handle(&out);
            interceptor.after_handled(&out, None);
        }
        assert_eq!(metrics.total(Counter::Inbound), 0);
        for stage in Stage::ALL {
            assert_eq!(metrics.pending(stage), 0);
            assert_eq!(metrics.samples(stage), 0);
        }
    }

    #[test]
    fn test_untagged_send_stop_is_noop() {
        let (interceptor, metrics) = interceptor();
        let message = Message::send("/app/x", "{}");
        interceptor.before_handle(&message);
        interceptor.after_handled(&message, None);
        assert_eq!(metrics.samples(Stage::Inbound), 0);
    }
}
