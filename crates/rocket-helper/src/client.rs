//! Client library seam: the traits a message queue client implements.
//!
//! The helper only talks to these traits. Wire protocol, offset storage,
//! redelivery timing and queue balancing all live behind them.

use crate::error::{ClientError, ProcessingError};
use crate::message::{Message, MessageExt, SendResult};
use crate::selector::MessageSelector;
use crate::settings::{ConsumerSettings, ProducerSettings};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Caller-controlled cancellation and deadline for a send
#[derive(Debug, Clone, Default)]
pub struct SendContext {
    timeout: Option<Duration>,
    cancellation: CancellationToken,
}

impl SendContext {
    /// Context with no deadline and a fresh cancellation token
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the send with [`ClientError::Timeout`] once `timeout` elapses
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Tie the send to an existing cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Verdict a listener returns for one delivered batch
#[derive(Debug)]
pub enum ConsumeResult {
    /// The whole batch was processed
    Success,
    /// Redeliver the whole batch later; carries the failure that caused it
    RetryLater(ProcessingError),
}

impl ConsumeResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Receives batches of messages from a push consumer
#[async_trait]
pub trait MessageListener: Send + Sync {
    /// Process one delivered batch
    async fn consume(&self, messages: &[MessageExt]) -> ConsumeResult;
}

/// Message producer provided by the client library
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Producer: Send + Sync {
    /// Connect and make the producer ready to send
    async fn start(&self) -> Result<(), ClientError>;

    /// Send a message and wait for the broker acknowledgement
    async fn send_sync(
        &self,
        ctx: &SendContext,
        message: &Message,
    ) -> Result<SendResult, ClientError>;

    /// Stop the producer and release its resources
    async fn shutdown(&self) -> Result<(), ClientError>;
}

/// Push consumer provided by the client library
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushConsumer: Send + Sync {
    /// Register the listener for a topic, replacing any earlier subscription
    async fn subscribe(
        &self,
        topic: &str,
        selector: MessageSelector,
        listener: Arc<dyn MessageListener>,
    ) -> Result<(), ClientError>;

    /// Remove the subscription for a topic
    async fn unsubscribe(&self, topic: &str) -> Result<(), ClientError>;

    /// Begin delivering messages to subscribed listeners
    async fn start(&self) -> Result<(), ClientError>;

    /// Stop delivery and release queue locks
    async fn shutdown(&self) -> Result<(), ClientError>;
}

/// Factory for client library instances
#[cfg_attr(test, mockall::automock)]
pub trait ClientProvider: Send + Sync {
    /// Construct an unstarted producer
    fn new_producer(&self, settings: ProducerSettings) -> Result<Arc<dyn Producer>, ClientError>;

    /// Construct an unstarted push consumer
    fn new_push_consumer(
        &self,
        settings: ConsumerSettings,
    ) -> Result<Arc<dyn PushConsumer>, ClientError>;
}
