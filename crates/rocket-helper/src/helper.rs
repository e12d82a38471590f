//! The helper: client factories, cached clients and send/consume shortcuts.

use crate::client::{ClientProvider, Producer, PushConsumer, SendContext};
use crate::error::ClientError;
use crate::handler::{BatchListener, MessageHandler};
use crate::message::{Message, SendResult};
use crate::options::HelperOptions;
use crate::selector::MessageSelector;
use crate::settings::{AccessChannel, ConsumerModel, ConsumerSettings, ProducerSettings, TraceConfig};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

#[cfg(test)]
#[path = "helper_tests.rs"]
mod tests;

/// Producer and consumer access for one RocketMQ instance and group
///
/// Clients are built through a [`ClientProvider`]. The cached accessors
/// [`producer`](Self::producer) and [`push_consumer`](Self::push_consumer)
/// create at most one instance of each per helper; a failed creation leaves
/// the cache empty so the next call tries again.
pub struct RocketHelper {
    options: HelperOptions,
    provider: Arc<dyn ClientProvider>,
    producer: Mutex<Option<Arc<dyn Producer>>>,
    push_consumer: Mutex<Option<Arc<dyn PushConsumer>>>,
}

impl RocketHelper {
    pub fn new(options: HelperOptions, provider: Arc<dyn ClientProvider>) -> Self {
        Self {
            options,
            provider,
            producer: Mutex::new(None),
            push_consumer: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &HelperOptions {
        &self.options
    }

    /// Producer settings derived from the options, with cloud tracing on
    pub fn producer_settings(&self) -> ProducerSettings {
        let credentials = self.options.credentials();
        ProducerSettings {
            name_server_addrs: vec![self.options.endpoint.clone()],
            namespace: self.options.instance_id.clone(),
            instance_name: self.options.instance_id.clone(),
            group_name: self.options.group_id.clone(),
            credentials: credentials.clone(),
            trace: Some(TraceConfig {
                group_name: self.options.group_id.clone(),
                access: AccessChannel::Cloud,
                name_server_addrs: vec![self.options.endpoint.clone()],
                credentials,
            }),
        }
    }

    /// Clustered, ordered consumer settings derived from the options
    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            name_server_addrs: vec![self.options.endpoint.clone()],
            namespace: self.options.instance_id.clone(),
            instance_name: self.options.instance_id.clone(),
            group_name: self.options.group_id.clone(),
            credentials: self.options.credentials(),
            model: ConsumerModel::Clustering,
            consume_from: self.options.consume_from,
            consume_orderly: true,
        }
    }

    /// Create and start a new producer
    pub async fn new_producer(&self) -> Result<Arc<dyn Producer>, ClientError> {
        info!(
            endpoint = %self.options.endpoint,
            instance_id = %self.options.instance_id,
            group_id = %self.options.group_id,
            "create-rocketmq-producer"
        );

        let producer = self.provider.new_producer(self.producer_settings())?;
        producer.start().await?;
        Ok(producer)
    }

    /// Create a push consumer; it is started by [`push_consume_by_consumer`](Self::push_consume_by_consumer)
    pub fn create_push_consumer(&self) -> Result<Arc<dyn PushConsumer>, ClientError> {
        info!(
            endpoint = %self.options.endpoint,
            instance_id = %self.options.instance_id,
            group_id = %self.options.group_id,
            "create-rocketmq-push-consumer"
        );

        self.provider.new_push_consumer(self.consumer_settings())
    }

    /// Cached producer, created and started on first use
    pub async fn producer(&self) -> Result<Arc<dyn Producer>, ClientError> {
        let mut cached = self.producer.lock().await;
        if let Some(producer) = cached.as_ref() {
            return Ok(Arc::clone(producer));
        }

        let producer = self.new_producer().await?;
        *cached = Some(Arc::clone(&producer));
        Ok(producer)
    }

    /// Cached push consumer, created on first use
    pub async fn push_consumer(&self) -> Result<Arc<dyn PushConsumer>, ClientError> {
        let mut cached = self.push_consumer.lock().await;
        if let Some(consumer) = cached.as_ref() {
            return Ok(Arc::clone(consumer));
        }

        let consumer = self.create_push_consumer()?;
        *cached = Some(Arc::clone(&consumer));
        Ok(consumer)
    }

    /// Subscribe `handler` to a topic on the given consumer, then start it
    ///
    /// Each delivered batch is handled in order. The first handler error
    /// stops the batch and the whole batch is redelivered later.
    pub async fn push_consume_by_consumer<H>(
        &self,
        consumer: &Arc<dyn PushConsumer>,
        topic: &str,
        selector: MessageSelector,
        handler: H,
    ) -> Result<(), ClientError>
    where
        H: MessageHandler + 'static,
    {
        info!(topic = %topic, expression = %selector.expression, "subscribe-rocketmq");

        consumer
            .subscribe(topic, selector, Arc::new(BatchListener::new(handler)))
            .await?;
        consumer.start().await
    }

    /// Subscribe `handler` on the cached consumer with a tag filter such as `"*"` or `"a || b"`
    pub async fn push_consume<H>(
        &self,
        topic: &str,
        tag_filter: &str,
        handler: H,
    ) -> Result<(), ClientError>
    where
        H: MessageHandler + 'static,
    {
        let consumer = self.push_consumer().await?;
        self.push_consume_by_consumer(&consumer, topic, MessageSelector::tag(tag_filter), handler)
            .await
    }

    /// Build a message carrying exactly the given fields
    pub fn create_public_message(
        topic: impl Into<String>,
        body: impl Into<Bytes>,
        tag: impl Into<String>,
        keys: Vec<String>,
        properties: HashMap<String, String>,
    ) -> Message {
        Message::new(topic, body)
            .with_tag(tag)
            .with_keys(keys)
            .with_properties(properties)
    }

    /// Send through a specific producer and wait for the broker acknowledgement
    pub async fn send_message_by_producer(
        &self,
        ctx: &SendContext,
        producer: &Arc<dyn Producer>,
        message: &Message,
    ) -> Result<SendResult, ClientError> {
        producer.send_sync(ctx, message).await
    }

    /// Send through the cached producer
    pub async fn send_message(
        &self,
        ctx: &SendContext,
        message: &Message,
    ) -> Result<SendResult, ClientError> {
        let producer = self.producer().await?;
        self.send_message_by_producer(ctx, &producer, message).await
    }
}
