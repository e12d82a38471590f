//! # Rocket Helper
//!
//! A thin helper over a RocketMQ-style message queue client.
//!
//! This library provides:
//! - Connection options and credentials, loadable from a file and the environment
//! - A producer factory with message tracing enabled
//! - A clustered, ordered push consumer with tag filtering
//! - A batch listener policy: the first handler failure redelivers the whole batch
//! - Lazily created, cached producer and consumer per helper
//! - Synchronous sends bounded by a cancellation token and an optional timeout
//!
//! The client library itself sits behind the [`ClientProvider`] seam. The
//! bundled [`InMemoryProvider`] runs a small broker in-process.
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for client, configuration and selector failures
//! - [`options`] - Helper options and credentials
//! - [`message`] - Outgoing and delivered messages, send results
//! - [`selector`] - Subscription selectors and tag filters
//! - [`settings`] - Producer and consumer construction settings
//! - [`client`] - Client library traits
//! - [`handler`] - Message handlers and the batch listener
//! - [`helper`] - The [`RocketHelper`] itself
//! - [`providers`] - Client provider implementations

pub mod client;
pub mod error;
pub mod handler;
pub mod helper;
pub mod message;
pub mod options;
pub mod providers;
pub mod selector;
pub mod settings;

pub use client::{
    ClientProvider, ConsumeResult, MessageListener, Producer, PushConsumer, SendContext,
};
pub use error::{ClientError, ConfigurationError, ProcessingError, ValidationError};
pub use handler::{handler_fn, BatchListener, FnHandler, MessageHandler};
pub use helper::RocketHelper;
pub use message::{
    Message, MessageExt, MessageId, MessageQueue, MessageSummary, SendResult, SendStatus,
    Timestamp,
};
pub use options::{ConsumeFrom, Credentials, HelperOptions, ENV_PREFIX};
pub use providers::{InMemoryConfig, InMemoryProvider};
pub use selector::{ExpressionType, MessageSelector, TagFilter, SUBSCRIBE_ALL};
pub use settings::{
    AccessChannel, ConsumerModel, ConsumerSettings, ProducerSettings, TraceConfig,
};

// Re-export the cancellation token so callers need not depend on tokio-util directly
pub use tokio_util::sync::CancellationToken;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
