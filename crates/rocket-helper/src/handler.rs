//! Message handlers and the batch listener that drives them.
//!
//! [`BatchListener`] applies one policy to every delivered batch: messages are
//! handled in order, the first failure stops the batch and asks for the whole
//! batch to be redelivered later. There is no partial acknowledgement.

use crate::client::{ConsumeResult, MessageListener};
use crate::error::ProcessingError;
use crate::message::MessageExt;
use async_trait::async_trait;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;

/// Caller-supplied processing for a single delivered message
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one message; an error requests redelivery of its batch
    async fn handle(&self, message: &MessageExt) -> Result<(), ProcessingError>;
}

/// Adapter running a synchronous closure as a [`MessageHandler`]
pub struct FnHandler<F> {
    f: F,
}

/// Wrap a closure as a message handler
///
/// ```
/// use rocket_helper::{handler_fn, MessageExt};
///
/// let handler = handler_fn(|message: &MessageExt| {
///     println!("{}", message.msg_id);
///     Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&MessageExt) -> Result<(), ProcessingError> + Send + Sync,
{
    FnHandler { f }
}

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&MessageExt) -> Result<(), ProcessingError> + Send + Sync,
{
    async fn handle(&self, message: &MessageExt) -> Result<(), ProcessingError> {
        (self.f)(message)
    }
}

/// Listener that logs each delivered message and hands it to a handler
pub struct BatchListener<H> {
    handler: H,
}

impl<H: MessageHandler> BatchListener<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }
}

#[async_trait]
impl<H: MessageHandler> MessageListener for BatchListener<H> {
    async fn consume(&self, messages: &[MessageExt]) -> ConsumeResult {
        for message in messages {
            let summary = message.summary();
            debug!(
                message_id = summary.message_id,
                topic = summary.topic,
                queue_offset = summary.queue_offset,
                tags = ?summary.tags,
                keys = ?summary.keys,
                properties = ?summary.properties,
                region_id = summary.region_id,
                reconsume_times = summary.reconsume_times,
                "received-rocketmq-message"
            );

            if let Err(error) = self.handler.handle(message).await {
                warn!(
                    message_id = %message.msg_id,
                    topic = message.topic(),
                    batch_size = messages.len(),
                    error = %error,
                    "process-message-failed"
                );
                return ConsumeResult::RetryLater(error);
            }
        }

        ConsumeResult::Success
    }
}
