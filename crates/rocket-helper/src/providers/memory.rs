//! In-memory client provider for testing and development.
//!
//! This module provides an in-process broker that behaves like a small
//! RocketMQ deployment:
//! - Topics split into a fixed number of queues, filled round-robin
//! - Tag filtering on subscription
//! - Consumer group offsets initialised from the consume-from position
//! - Ordered consumption that blocks a queue until its batch succeeds
//! - Concurrent consumption that retries failed batches out of band, kept
//!   per group on the broker so another group member can pick them up
//! - Dead letter queues once a batch exceeds the reconsume limit
//! - Trace records for producers configured with tracing
//!
//! Nothing is persisted; every provider owns an independent broker.

use crate::client::{
    ClientProvider, ConsumeResult, MessageListener, Producer, PushConsumer, SendContext,
};
use crate::error::ClientError;
use crate::message::{Message, MessageExt, MessageId, MessageQueue, SendResult, SendStatus, Timestamp};
use crate::options::{ConsumeFrom, Credentials};
use crate::selector::{MessageSelector, TagFilter};
use crate::settings::{
    namespaced, AccessChannel, ConsumerModel, ConsumerSettings, ProducerSettings,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Longest topic name the broker accepts
const MAX_TOPIC_LENGTH: usize = 127;

/// In-memory broker configuration
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// Queues created for each new topic
    pub queues_per_topic: u32,
    /// Create topics on first send instead of rejecting the send
    pub auto_create_topics: bool,
    /// Largest accepted message body in bytes
    pub max_message_size: usize,
    /// Messages handed to a listener per call
    pub consume_batch_size: usize,
    /// Wait before a failed batch is delivered again
    pub suspend_delay: Duration,
    /// Redeliveries allowed before a batch is dead-lettered
    pub max_reconsume_times: u32,
    /// Idle wait between delivery rounds when nothing new arrived
    pub poll_interval: Duration,
    /// Simulated broker round trip applied to each send
    pub send_latency: Duration,
    pub broker_name: String,
    pub region_id: String,
    /// When set, clients must present exactly these credentials to start
    pub required_credentials: Option<Credentials>,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            queues_per_topic: 4,
            auto_create_topics: true,
            max_message_size: 4 * 1024 * 1024, // 4MB
            consume_batch_size: 1,
            suspend_delay: Duration::from_secs(1),
            max_reconsume_times: 16,
            poll_interval: Duration::from_millis(100),
            send_latency: Duration::ZERO,
            broker_name: "memory-broker-a".to_string(),
            region_id: "DefaultRegion".to_string(),
            required_credentials: None,
        }
    }
}

/// Trace entry written for each send of a traced producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    pub group_name: String,
    pub access: AccessChannel,
    pub topic: String,
    pub msg_id: Option<MessageId>,
    pub tags: Option<String>,
    pub keys: Vec<String>,
    pub success: bool,
    pub timestamp: Timestamp,
}

// ============================================================================
// Broker Storage
// ============================================================================

/// Identifies one queue as seen by one consumer group
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QueueKey {
    group: String,
    topic: String,
    queue_id: u32,
}

struct TopicQueues {
    queues: Vec<Vec<MessageExt>>,
    next_queue: usize,
}

impl TopicQueues {
    fn new(queue_count: u32) -> Self {
        Self {
            queues: (0..queue_count.max(1)).map(|_| Vec::new()).collect(),
            next_queue: 0,
        }
    }
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, TopicQueues>,
    group_offsets: HashMap<QueueKey, u64>,
    queue_locks: HashMap<QueueKey, String>,
    dead_letters: HashMap<String, Vec<MessageExt>>,
    retries: HashMap<String, VecDeque<PendingBatch>>,
    traces: Vec<TraceRecord>,
}

/// Shared broker state behind an [`InMemoryProvider`]
pub struct InMemoryBroker {
    state: RwLock<BrokerState>,
    arrivals: Notify,
    config: InMemoryConfig,
}

impl InMemoryBroker {
    fn new(config: InMemoryConfig) -> Self {
        Self {
            state: RwLock::new(BrokerState::default()),
            arrivals: Notify::new(),
            config,
        }
    }

    pub fn config(&self) -> &InMemoryConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, BrokerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BrokerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a topic ahead of use; existing topics are left untouched
    pub fn create_topic(&self, topic: &str) {
        let queues = self.config.queues_per_topic;
        self.write()
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicQueues::new(queues));
    }

    /// Number of queues of a stored topic (0 if it does not exist)
    pub fn queue_count(&self, topic: &str) -> u32 {
        self.read()
            .topics
            .get(topic)
            .map(|t| t.queues.len() as u32)
            .unwrap_or(0)
    }

    /// Total messages stored for a topic across all queues
    pub fn message_count(&self, topic: &str) -> usize {
        self.read()
            .topics
            .get(topic)
            .map(|t| t.queues.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Offset a consumer group has committed for a queue
    pub fn committed_offset(&self, group: &str, topic: &str, queue_id: u32) -> Option<u64> {
        let key = QueueKey {
            group: group.to_string(),
            topic: topic.to_string(),
            queue_id,
        };
        self.read().group_offsets.get(&key).copied()
    }

    /// Messages moved to the dead letter queue of a group
    pub fn dead_letters(&self, group: &str) -> Vec<MessageExt> {
        self.read()
            .dead_letters
            .get(&dead_letter_topic(group))
            .cloned()
            .unwrap_or_default()
    }

    /// Failed batches of a consumer group waiting for redelivery
    pub fn pending_retries(&self, group: &str) -> usize {
        self.read()
            .retries
            .get(&retry_topic(group))
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Trace records written by traced producers, oldest first
    pub fn trace_records(&self) -> Vec<TraceRecord> {
        self.read().traces.clone()
    }

    fn authenticate(&self, credentials: &Credentials) -> Result<(), ClientError> {
        match &self.config.required_credentials {
            Some(required) if required != credentials => Err(ClientError::AuthenticationFailed {
                message: format!(
                    "access key '{}' is not authorized",
                    credentials.access_key()
                ),
            }),
            _ => Ok(()),
        }
    }

    fn append(&self, topic: &str, message: &Message) -> Result<MessageExt, ClientError> {
        let stored = {
            let mut state = self.write();
            if !state.topics.contains_key(topic) {
                if !self.config.auto_create_topics {
                    return Err(ClientError::TopicNotFound {
                        topic: topic.to_string(),
                    });
                }
                state
                    .topics
                    .insert(topic.to_string(), TopicQueues::new(self.config.queues_per_topic));
            }

            let queues = state
                .topics
                .get_mut(topic)
                .ok_or_else(|| ClientError::TopicNotFound {
                    topic: topic.to_string(),
                })?;
            let queue_id = queues.next_queue % queues.queues.len();
            queues.next_queue = queues.next_queue.wrapping_add(1);

            let queue = &mut queues.queues[queue_id];
            let queue_offset = queue.len() as u64;
            let now = Timestamp::now();
            let stored = MessageExt {
                message: message.clone(),
                msg_id: MessageId::new(),
                offset_msg_id: format!("{:08X}{:016X}", queue_id, queue_offset),
                broker_name: self.config.broker_name.clone(),
                queue_id: queue_id as u32,
                queue_offset,
                region_id: self.config.region_id.clone(),
                reconsume_times: 0,
                born_timestamp: now.clone(),
                store_timestamp: now,
            };
            queue.push(stored.clone());
            stored
        };

        self.arrivals.notify_waiters();
        Ok(stored)
    }

    fn record_trace(&self, record: TraceRecord) {
        self.write().traces.push(record);
    }

    /// Starting offset for a group that has never consumed this queue
    fn initial_offset(&self, key: &QueueKey, consume_from: ConsumeFrom) -> u64 {
        match consume_from {
            ConsumeFrom::First => 0,
            ConsumeFrom::Last => self
                .read()
                .topics
                .get(&key.topic)
                .and_then(|t| t.queues.get(key.queue_id as usize))
                .map(|q| q.len() as u64)
                .unwrap_or(0),
        }
    }

    fn group_offset_or_init(&self, key: &QueueKey, consume_from: ConsumeFrom) -> u64 {
        if let Some(offset) = self.read().group_offsets.get(key) {
            return *offset;
        }
        let initial = self.initial_offset(key, consume_from);
        *self
            .write()
            .group_offsets
            .entry(key.clone())
            .or_insert(initial)
    }

    fn commit_group_offset(&self, key: &QueueKey, offset: u64) {
        let mut state = self.write();
        let entry = state.group_offsets.entry(key.clone()).or_insert(0);
        if offset > *entry {
            *entry = offset;
        }
    }

    /// Read up to `max` matching messages starting at `offset`
    ///
    /// Returns the matching messages and the offset just past the last
    /// message examined, so skipped messages can be committed.
    fn fetch(
        &self,
        key: &QueueKey,
        offset: u64,
        filter: &TagFilter,
        max: usize,
    ) -> (Vec<MessageExt>, u64) {
        let state = self.read();
        let queue = match state
            .topics
            .get(&key.topic)
            .and_then(|t| t.queues.get(key.queue_id as usize))
        {
            Some(queue) => queue,
            None => return (Vec::new(), offset),
        };

        let mut batch = Vec::new();
        let mut next = offset;
        for message in queue.iter().skip(offset as usize) {
            if batch.len() >= max.max(1) {
                break;
            }
            next = message.queue_offset + 1;
            if filter.matches(message.tags()) {
                batch.push(message.clone());
            }
        }

        (batch, next)
    }

    fn try_lock_queue(&self, key: &QueueKey, owner: &str) -> bool {
        let mut state = self.write();
        match state.queue_locks.get(key) {
            Some(current) => current == owner,
            None => {
                state.queue_locks.insert(key.clone(), owner.to_string());
                true
            }
        }
    }

    fn release_locks(&self, owner: &str) {
        self.write().queue_locks.retain(|_, current| current != owner);
    }

    fn release_topic_locks(&self, owner: &str, topic: &str) {
        self.write()
            .queue_locks
            .retain(|key, current| current != owner || key.topic != topic);
    }

    fn schedule_retry(&self, owner: &str, pending: PendingBatch) {
        self.write()
            .retries
            .entry(retry_topic(owner))
            .or_default()
            .push_back(pending);
    }

    /// Take the oldest retry that is due and belongs to a subscribed topic
    fn take_due_retry(
        &self,
        owner: &str,
        now: Instant,
        subscribed: impl Fn(&str) -> bool,
    ) -> Option<PendingBatch> {
        let mut state = self.write();
        let retries = state.retries.get_mut(&retry_topic(owner))?;
        let index = retries
            .iter()
            .position(|p| p.due_at <= now && p.topic().map_or(false, &subscribed))?;
        retries.remove(index)
    }

    fn dead_letter(&self, group: &str, messages: Vec<MessageExt>) {
        self.write()
            .dead_letters
            .entry(dead_letter_topic(group))
            .or_default()
            .extend(messages);
    }
}

fn dead_letter_topic(group: &str) -> String {
    format!("%DLQ%{}", group)
}

fn retry_topic(group: &str) -> String {
    format!("%RETRY%{}", group)
}

fn validate_client_settings(name_server_addrs: &[String], group: &str) -> Result<(), ClientError> {
    if name_server_addrs.is_empty() || name_server_addrs.iter().any(|a| a.trim().is_empty()) {
        return Err(ClientError::InvalidSettings {
            field: "name_server_addrs".to_string(),
            message: "at least one non-empty name server address is required".to_string(),
        });
    }

    if group.trim().is_empty() {
        return Err(ClientError::InvalidSettings {
            field: "group_name".to_string(),
            message: "group name must not be empty".to_string(),
        });
    }

    Ok(())
}

fn validate_topic(topic: &str) -> Result<(), ClientError> {
    if topic.is_empty() {
        return Err(ClientError::InvalidMessage {
            message: "topic must not be empty".to_string(),
        });
    }

    if topic.len() > MAX_TOPIC_LENGTH {
        return Err(ClientError::InvalidMessage {
            message: format!("topic exceeds {} characters", MAX_TOPIC_LENGTH),
        });
    }

    if !topic
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '%' || c == '|' || c == '-' || c == '_')
    {
        return Err(ClientError::InvalidMessage {
            message: format!("topic '{}' contains illegal characters", topic),
        });
    }

    Ok(())
}

// ============================================================================
// InMemoryProvider
// ============================================================================

/// Client provider backed by an in-process broker
#[derive(Clone)]
pub struct InMemoryProvider {
    broker: Arc<InMemoryBroker>,
}

impl InMemoryProvider {
    /// Create new in-memory provider with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            broker: Arc::new(InMemoryBroker::new(config)),
        }
    }

    /// Broker shared by every client this provider creates
    pub fn broker(&self) -> &Arc<InMemoryBroker> {
        &self.broker
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

impl ClientProvider for InMemoryProvider {
    fn new_producer(&self, settings: ProducerSettings) -> Result<Arc<dyn Producer>, ClientError> {
        validate_client_settings(&settings.name_server_addrs, &settings.group_name)?;
        Ok(Arc::new(InMemoryProducer::new(
            Arc::clone(&self.broker),
            settings,
        )))
    }

    fn new_push_consumer(
        &self,
        settings: ConsumerSettings,
    ) -> Result<Arc<dyn PushConsumer>, ClientError> {
        validate_client_settings(&settings.name_server_addrs, &settings.group_name)?;
        Ok(Arc::new(InMemoryPushConsumer::new(
            Arc::clone(&self.broker),
            settings,
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Created,
    Running,
    Shutdown,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// InMemoryProducer
// ============================================================================

/// Producer writing into an [`InMemoryBroker`]
pub struct InMemoryProducer {
    broker: Arc<InMemoryBroker>,
    settings: ProducerSettings,
    state: Mutex<ClientState>,
}

impl InMemoryProducer {
    fn new(broker: Arc<InMemoryBroker>, settings: ProducerSettings) -> Self {
        Self {
            broker,
            settings,
            state: Mutex::new(ClientState::Created),
        }
    }

    pub fn settings(&self) -> &ProducerSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        *lock(&self.state) == ClientState::Running
    }

    fn ensure_running(&self) -> Result<(), ClientError> {
        match *lock(&self.state) {
            ClientState::Running => Ok(()),
            ClientState::Created => Err(ClientError::NotStarted {
                client: "producer".to_string(),
            }),
            ClientState::Shutdown => Err(ClientError::AlreadyShutdown {
                client: "producer".to_string(),
            }),
        }
    }

    async fn store(&self, message: &Message) -> Result<SendResult, ClientError> {
        let config = self.broker.config();
        if !config.send_latency.is_zero() {
            tokio::time::sleep(config.send_latency).await;
        }

        validate_topic(message.topic())?;
        if message.body().is_empty() {
            return Err(ClientError::InvalidMessage {
                message: "message body must not be empty".to_string(),
            });
        }
        if message.body().len() > config.max_message_size {
            return Err(ClientError::MessageTooLarge {
                size: message.body().len(),
                max_size: config.max_message_size,
            });
        }

        let topic = namespaced(&self.settings.namespace, message.topic());
        let result = self.broker.append(&topic, message);

        if let Some(trace) = &self.settings.trace {
            self.broker.record_trace(TraceRecord {
                group_name: trace.group_name.clone(),
                access: trace.access,
                topic: message.topic().to_string(),
                msg_id: result.as_ref().ok().map(|m| m.msg_id.clone()),
                tags: message.tag().map(str::to_string),
                keys: message.keys().to_vec(),
                success: result.is_ok(),
                timestamp: Timestamp::now(),
            });
        }

        let stored = result?;
        debug!(
            topic = %topic,
            msg_id = %stored.msg_id,
            queue_id = stored.queue_id,
            queue_offset = stored.queue_offset,
            "Message stored"
        );

        Ok(SendResult {
            status: SendStatus::SendOk,
            msg_id: stored.msg_id,
            offset_msg_id: stored.offset_msg_id,
            message_queue: MessageQueue {
                topic: message.topic().to_string(),
                broker_name: stored.broker_name,
                queue_id: stored.queue_id,
            },
            queue_offset: stored.queue_offset,
            region_id: stored.region_id,
            trace_on: self.settings.trace.is_some(),
        })
    }
}

#[async_trait]
impl Producer for InMemoryProducer {
    async fn start(&self) -> Result<(), ClientError> {
        let mut state = lock(&self.state);
        match *state {
            ClientState::Running => Ok(()),
            ClientState::Shutdown => Err(ClientError::AlreadyShutdown {
                client: "producer".to_string(),
            }),
            ClientState::Created => {
                self.broker.authenticate(&self.settings.credentials)?;
                *state = ClientState::Running;
                info!(group = %self.settings.group_name, "In-memory producer started");
                Ok(())
            }
        }
    }

    async fn send_sync(
        &self,
        ctx: &SendContext,
        message: &Message,
    ) -> Result<SendResult, ClientError> {
        self.ensure_running()?;
        if ctx.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let guarded = async {
            tokio::select! {
                biased;
                _ = ctx.cancellation().cancelled() => Err(ClientError::Cancelled),
                result = self.store(message) => result,
            }
        };

        match ctx.timeout() {
            Some(duration) => tokio::time::timeout(duration, guarded)
                .await
                .unwrap_or(Err(ClientError::Timeout { duration })),
            None => guarded.await,
        }
    }

    async fn shutdown(&self) -> Result<(), ClientError> {
        *lock(&self.state) = ClientState::Shutdown;
        Ok(())
    }
}

// ============================================================================
// InMemoryPushConsumer
// ============================================================================

#[derive(Clone)]
struct Subscription {
    filter: TagFilter,
    listener: Arc<dyn MessageListener>,
}

/// Failed batch waiting for redelivery
struct PendingBatch {
    key: QueueKey,
    messages: Vec<MessageExt>,
    due_at: Instant,
}

impl PendingBatch {
    /// Topic as subscribed, without the namespace
    fn topic(&self) -> Option<&str> {
        self.messages.first().map(|m| m.topic())
    }
}

/// Delivery progress private to one consumer task
#[derive(Default)]
struct DeliveryState {
    /// Orderly mode: the batch a queue is blocked on
    blocked: HashMap<QueueKey, PendingBatch>,
    /// Namespaced topics delivered in the previous round
    topics: HashSet<String>,
}

impl DeliveryState {
    /// Forget the queues of topics that are no longer subscribed
    ///
    /// Returns the dropped topics. A dropped orderly batch was never
    /// committed, so it is fetched again on the next subscription.
    fn retain_topics(&mut self, subscribed: HashSet<String>) -> Vec<String> {
        let dropped = self.topics.difference(&subscribed).cloned().collect();
        self.blocked.retain(|key, _| subscribed.contains(&key.topic));
        self.topics = subscribed;
        dropped
    }
}

tokio::task_local! {
    /// Id of the consumer whose delivery task is running
    static DELIVERING_FOR: String;
}

struct ConsumerInner {
    id: String,
    group: String,
    broker: Arc<InMemoryBroker>,
    settings: ConsumerSettings,
    subscriptions: RwLock<HashMap<String, Subscription>>,
    /// Broadcasting mode offsets
    local_offsets: Mutex<HashMap<QueueKey, u64>>,
    state: Mutex<ClientState>,
    shutdown: CancellationToken,
}

/// Push consumer delivering from an [`InMemoryBroker`]
pub struct InMemoryPushConsumer {
    inner: Arc<ConsumerInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl InMemoryPushConsumer {
    fn new(broker: Arc<InMemoryBroker>, settings: ConsumerSettings) -> Self {
        let group = namespaced(&settings.namespace, &settings.group_name);
        Self {
            inner: Arc::new(ConsumerInner {
                id: uuid::Uuid::new_v4().to_string(),
                group,
                broker,
                settings,
                subscriptions: RwLock::new(HashMap::new()),
                local_offsets: Mutex::new(HashMap::new()),
                state: Mutex::new(ClientState::Created),
                shutdown: CancellationToken::new(),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.inner.settings
    }

    pub fn is_running(&self) -> bool {
        *lock(&self.inner.state) == ClientState::Running
    }

    /// Topics currently subscribed
    pub fn subscribed_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .inner
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        topics.sort();
        topics
    }

    fn ensure_not_shutdown(&self) -> Result<(), ClientError> {
        if *lock(&self.inner.state) == ClientState::Shutdown {
            return Err(ClientError::AlreadyShutdown {
                client: "push consumer".to_string(),
            });
        }
        Ok(())
    }
}

impl Drop for InMemoryPushConsumer {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

#[async_trait]
impl PushConsumer for InMemoryPushConsumer {
    async fn subscribe(
        &self,
        topic: &str,
        selector: MessageSelector,
        listener: Arc<dyn MessageListener>,
    ) -> Result<(), ClientError> {
        self.ensure_not_shutdown()?;
        validate_topic(topic).map_err(|e| ClientError::SubscriptionFailed {
            topic: topic.to_string(),
            message: e.to_string(),
        })?;
        let filter =
            TagFilter::from_selector(&selector).map_err(|e| ClientError::SubscriptionFailed {
                topic: topic.to_string(),
                message: e.to_string(),
            })?;

        debug!(
            group = %self.inner.group,
            topic = %topic,
            expression = %selector.expression,
            "Subscription registered"
        );
        self.inner
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_string(), Subscription { filter, listener });

        if self.is_running() {
            self.inner.init_offsets(topic);
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), ClientError> {
        self.ensure_not_shutdown()?;
        self.inner
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic);
        Ok(())
    }

    async fn start(&self) -> Result<(), ClientError> {
        {
            let mut state = lock(&self.inner.state);
            match *state {
                ClientState::Running => return Ok(()),
                ClientState::Shutdown => {
                    return Err(ClientError::AlreadyShutdown {
                        client: "push consumer".to_string(),
                    })
                }
                ClientState::Created => {
                    self.inner
                        .broker
                        .authenticate(&self.inner.settings.credentials)?;
                    *state = ClientState::Running;
                }
            }
        }

        for (topic, _) in self.inner.subscriptions() {
            self.inner.init_offsets(&topic);
        }

        info!(
            group = %self.inner.group,
            model = ?self.inner.settings.model,
            orderly = self.inner.settings.consume_orderly,
            "In-memory push consumer started"
        );
        let handle = tokio::spawn(
            DELIVERING_FOR.scope(self.inner.id.clone(), run_delivery(Arc::clone(&self.inner))),
        );
        *lock(&self.task) = Some(handle);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ClientError> {
        *lock(&self.inner.state) = ClientState::Shutdown;
        self.inner.shutdown.cancel();

        // A listener stopping its own consumer runs on the delivery task and cannot join it
        let from_listener = DELIVERING_FOR
            .try_with(|id| *id == self.inner.id)
            .unwrap_or(false);
        let handle = lock(&self.task).take();
        match handle {
            Some(_) if from_listener => {
                debug!(group = %self.inner.group, "Shutdown requested from a listener");
            }
            Some(handle) => {
                if let Err(e) = handle.await {
                    warn!(group = %self.inner.group, error = %e, "Delivery task ended abnormally");
                }
            }
            None => {}
        }
        Ok(())
    }
}

async fn run_delivery(inner: Arc<ConsumerInner>) {
    let mut state = DeliveryState::default();

    while !inner.shutdown.is_cancelled() {
        // Register interest before the round so arrivals during it are not missed
        let arrivals = inner.broker.arrivals.notified();
        tokio::pin!(arrivals);
        arrivals.as_mut().enable();

        if inner.deliver_round(&mut state).await {
            tokio::task::yield_now().await;
            continue;
        }

        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = &mut arrivals => {}
            _ = tokio::time::sleep(inner.broker.config.poll_interval) => {}
        }
    }

    inner.broker.release_locks(&inner.id);
    debug!(group = %inner.group, "Delivery task stopped");
}

impl ConsumerInner {
    fn subscriptions(&self) -> Vec<(String, Subscription)> {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(topic, sub)| (topic.clone(), sub.clone()))
            .collect()
    }

    /// Fix the starting offset of every queue of a topic
    ///
    /// Runs before delivery starts so messages sent right after `start`
    /// returns are not skipped by a `ConsumeFrom::Last` group.
    fn init_offsets(&self, topic: &str) {
        let resolved = namespaced(&self.settings.namespace, topic);
        if self.broker.config.auto_create_topics {
            self.broker.create_topic(&resolved);
        }
        for queue_id in 0..self.broker.queue_count(&resolved) {
            let key = QueueKey {
                group: self.group.clone(),
                topic: resolved.clone(),
                queue_id,
            };
            self.current_offset(&key);
        }
    }

    /// Deliver at most one batch per owned queue; true if anything was delivered
    async fn deliver_round(&self, state: &mut DeliveryState) -> bool {
        let subscriptions = self.subscriptions();

        let resolved = subscriptions
            .iter()
            .map(|(topic, _)| namespaced(&self.settings.namespace, topic))
            .collect();
        for topic in state.retain_topics(resolved) {
            debug!(group = %self.group, topic = %topic, "Releasing queues of unsubscribed topic");
            self.broker.release_topic_locks(&self.id, &topic);
        }

        let mut delivered = self.deliver_retries(state, &subscriptions).await;

        for (topic, subscription) in &subscriptions {
            let resolved = namespaced(&self.settings.namespace, topic);
            for queue_id in 0..self.broker.queue_count(&resolved) {
                if self.shutdown.is_cancelled() {
                    return delivered;
                }

                let key = QueueKey {
                    group: self.group.clone(),
                    topic: resolved.clone(),
                    queue_id,
                };

                // Queue ownership stands in for rebalancing within a group
                if self.settings.model == ConsumerModel::Clustering
                    && !self.broker.try_lock_queue(&key, &self.id)
                {
                    continue;
                }

                let batch = match state.blocked.remove(&key) {
                    Some(pending) if pending.due_at > Instant::now() => {
                        state.blocked.insert(key, pending);
                        continue;
                    }
                    Some(pending) => pending.messages,
                    None => {
                        let offset = self.current_offset(&key);
                        let (messages, scanned_to) = self.broker.fetch(
                            &key,
                            offset,
                            &subscription.filter,
                            self.broker.config.consume_batch_size,
                        );
                        if messages.is_empty() {
                            if scanned_to > offset {
                                self.commit(&key, scanned_to);
                            }
                            continue;
                        }
                        messages
                    }
                };

                delivered = true;
                let result = subscription.listener.consume(&batch).await;
                self.settle(key, batch, result, state, true);
            }
        }

        delivered
    }

    /// Concurrent mode: redeliver failed batches whose delay has passed
    ///
    /// Retries live on the broker, so batches that failed on a consumer
    /// which has since shut down or unsubscribed are picked up here.
    async fn deliver_retries(
        &self,
        state: &mut DeliveryState,
        subscriptions: &[(String, Subscription)],
    ) -> bool {
        let owner = self.retry_owner();
        let now = Instant::now();
        let mut delivered = false;

        for _ in 0..self.broker.pending_retries(&owner) {
            if self.shutdown.is_cancelled() {
                break;
            }
            let pending = match self.broker.take_due_retry(&owner, now, |topic| {
                subscriptions.iter().any(|(t, _)| t == topic)
            }) {
                Some(pending) => pending,
                None => break,
            };

            let listener = subscriptions
                .iter()
                .find(|(t, _)| Some(t.as_str()) == pending.topic())
                .map(|(_, sub)| Arc::clone(&sub.listener));
            let listener = match listener {
                Some(listener) => listener,
                None => {
                    self.broker.schedule_retry(&owner, pending);
                    continue;
                }
            };

            delivered = true;
            let result = listener.consume(&pending.messages).await;
            self.settle(pending.key, pending.messages, result, state, false);
        }

        delivered
    }

    /// Apply a listener verdict to a delivered batch
    fn settle(
        &self,
        key: QueueKey,
        batch: Vec<MessageExt>,
        result: ConsumeResult,
        state: &mut DeliveryState,
        from_queue: bool,
    ) {
        let next_offset = batch.last().map(|m| m.queue_offset + 1).unwrap_or(0);

        match result {
            ConsumeResult::Success => {
                if from_queue {
                    self.commit(&key, next_offset);
                }
            }
            ConsumeResult::RetryLater(error) => {
                let reconsume_times = batch.iter().map(|m| m.reconsume_times).max().unwrap_or(0);
                warn!(
                    group = %self.group,
                    topic = %key.topic,
                    queue_id = key.queue_id,
                    batch_size = batch.len(),
                    reconsume_times,
                    error = %error,
                    "Batch consumption failed"
                );

                if reconsume_times >= self.broker.config.max_reconsume_times {
                    warn!(
                        group = %self.group,
                        topic = %key.topic,
                        batch_size = batch.len(),
                        "Reconsume limit reached, moving batch to dead letter queue"
                    );
                    self.broker.dead_letter(&self.group, batch);
                    if from_queue {
                        self.commit(&key, next_offset);
                    }
                    return;
                }

                let messages: Vec<MessageExt> = batch
                    .into_iter()
                    .map(|mut m| {
                        m.reconsume_times += 1;
                        m
                    })
                    .collect();
                let due_at = Instant::now() + self.broker.config.suspend_delay;

                if self.settings.consume_orderly {
                    state.blocked.insert(
                        key.clone(),
                        PendingBatch {
                            key,
                            messages,
                            due_at,
                        },
                    );
                } else {
                    let commit_to = from_queue.then(|| key.clone());
                    self.broker.schedule_retry(
                        &self.retry_owner(),
                        PendingBatch {
                            key,
                            messages,
                            due_at,
                        },
                    );
                    if let Some(key) = commit_to {
                        self.commit(&key, next_offset);
                    }
                }
            }
        }
    }

    /// Retries are shared by a clustering group and private to a broadcasting consumer
    fn retry_owner(&self) -> String {
        match self.settings.model {
            ConsumerModel::Clustering => self.group.clone(),
            ConsumerModel::Broadcasting => self.id.clone(),
        }
    }

    fn current_offset(&self, key: &QueueKey) -> u64 {
        match self.settings.model {
            ConsumerModel::Clustering => self
                .broker
                .group_offset_or_init(key, self.settings.consume_from),
            ConsumerModel::Broadcasting => {
                if let Some(offset) = lock(&self.local_offsets).get(key) {
                    return *offset;
                }
                let initial = self.broker.initial_offset(key, self.settings.consume_from);
                *lock(&self.local_offsets)
                    .entry(key.clone())
                    .or_insert(initial)
            }
        }
    }

    fn commit(&self, key: &QueueKey, offset: u64) {
        match self.settings.model {
            ConsumerModel::Clustering => self.broker.commit_group_offset(key, offset),
            ConsumerModel::Broadcasting => {
                let mut offsets = lock(&self.local_offsets);
                let entry = offsets.entry(key.clone()).or_insert(0);
                if offset > *entry {
                    *entry = offset;
                }
            }
        }
    }
}
