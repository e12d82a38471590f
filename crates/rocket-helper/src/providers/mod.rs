//! Client provider implementations.
//!
//! Providers implement [`ClientProvider`](crate::client::ClientProvider) and
//! hand out producers and push consumers for one broker deployment.

pub mod memory;

pub use memory::{
    InMemoryBroker, InMemoryConfig, InMemoryProducer, InMemoryProvider, InMemoryPushConsumer,
    TraceRecord,
};
