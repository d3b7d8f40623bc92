//! Executor-backed message channels.
//!
//! A channel runs its interceptors' `pre_send` hooks on the sending task,
//! then hands the message to its [`Executor`], where the handler runs between
//! `before_handle` and `after_handled`. The inbound and outbound halves of
//! the harness are each one channel with their own executor.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::error::{Error, Result};
use crate::executor::{Executor, ExecutorStats};
use crate::interceptor::ChannelInterceptor;
use crate::message::Message;

/// Consumes messages that have passed through a channel.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message. An error or panic is reported to interceptors and
    /// logged.
    async fn handle(&self, message: &Message) -> Result<()>;
}

/// A subscribable channel whose handler runs on an executor.
pub struct MessageChannel {
    name: String,
    executor: Arc<Executor>,
    interceptors: Arc<[Arc<dyn ChannelInterceptor>]>,
    handler: Arc<dyn MessageHandler>,
}

impl MessageChannel {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        executor: Arc<Executor>,
        interceptors: Vec<Arc<dyn ChannelInterceptor>>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            executor,
            interceptors: interceptors.into(),
            handler,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pass `message` through the channel.
    ///
    /// Resolves once the executor accepts the message. Handler failures are
    /// not returned here.
    ///
    /// # Errors
    ///
    /// Whatever [`Executor::submit`] returns: backpressure rejection or
    /// shutdown.
    pub async fn send(&self, message: Message) -> Result<()> {
        let message = self
            .interceptors
            .iter()
            .fold(message, |message, interceptor| interceptor.pre_send(message));

        let interceptors = self.interceptors.clone();
        let handler = self.handler.clone();
        let result = self
            .executor
            .submit(async move {
                for interceptor in interceptors.iter() {
                    interceptor.before_handle(&message);
                }
                let result = AssertUnwindSafe(handler.handle(&message))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(Error::TaskFailed("handler panicked".into())));
                for interceptor in interceptors.iter().rev() {
                    interceptor.after_handled(&message, result.as_ref().err());
                }
                result
            })
            .await;

        if let Err(e) = &result {
            tracing::warn!(channel = %self.name, error = %e, "message not accepted");
        }
        result
    }

    #[must_use]
    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    #[must_use]
    pub fn stats(&self) -> ExecutorStats {
        self.executor.stats()
    }
}

impl std::fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageChannel")
            .field("name", &self.name)
            .field("executor", &self.executor.name())
            .field("interceptors", &self.interceptors.len())
            .finish_non_exhaustive()
    }
}
