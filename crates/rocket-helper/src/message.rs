//! Message types for producing and consuming, including send results.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Broker-assigned message identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a new unique message ID (32 uppercase hex characters)
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.simple().to_string().to_uppercase())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Milliseconds since the Unix epoch
    pub fn timestamp_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Outgoing Messages
// ============================================================================

/// A message to be sent to a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    topic: String,
    body: Bytes,
    tag: Option<String>,
    keys: Vec<String>,
    properties: HashMap<String, String>,
}

impl Message {
    /// Create new message for a topic
    pub fn new(topic: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            body: body.into(),
            tag: None,
            keys: Vec::new(),
            properties: HashMap::new(),
        }
    }

    /// Set the tag used for server-side filtering
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Set the business keys used for message lookup
    pub fn with_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Merge user properties into the message
    pub fn with_properties(mut self, properties: HashMap<String, String>) -> Self {
        self.properties.extend(properties);
        self
    }

    /// Add a single user property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    /// Look up a single user property
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

// ============================================================================
// Delivered Messages
// ============================================================================

/// A message delivered to a consumer, with broker metadata
#[derive(Debug, Clone)]
pub struct MessageExt {
    pub message: Message,
    pub msg_id: MessageId,
    pub offset_msg_id: String,
    pub broker_name: String,
    pub queue_id: u32,
    pub queue_offset: u64,
    pub region_id: String,
    /// Number of times this message has been handed back for redelivery
    pub reconsume_times: u32,
    pub born_timestamp: Timestamp,
    pub store_timestamp: Timestamp,
}

impl MessageExt {
    pub fn topic(&self) -> &str {
        self.message.topic()
    }

    pub fn body(&self) -> &Bytes {
        &self.message.body
    }

    pub fn tags(&self) -> Option<&str> {
        self.message.tag()
    }

    pub fn keys(&self) -> &[String] {
        self.message.keys()
    }

    pub fn properties(&self) -> &HashMap<String, String> {
        self.message.properties()
    }

    /// Summary used for delivery logging
    pub fn summary(&self) -> MessageSummary<'_> {
        MessageSummary {
            message_id: self.msg_id.as_str(),
            topic: self.topic(),
            queue_offset: self.queue_offset,
            tags: self.tags(),
            keys: self.keys(),
            properties: self.properties(),
            region_id: &self.region_id,
            reconsume_times: self.reconsume_times,
        }
    }
}

/// Borrowed view of the fields logged for every delivered message
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary<'a> {
    pub message_id: &'a str,
    pub topic: &'a str,
    pub queue_offset: u64,
    pub tags: Option<&'a str>,
    pub keys: &'a [String],
    pub properties: &'a HashMap<String, String>,
    pub region_id: &'a str,
    pub reconsume_times: u32,
}

// ============================================================================
// Send Results
// ============================================================================

/// A single queue within a topic on a specific broker
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageQueue {
    pub topic: String,
    pub broker_name: String,
    pub queue_id: u32,
}

impl fmt::Display for MessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MessageQueue [topic={}, brokerName={}, queueId={}]",
            self.topic, self.broker_name, self.queue_id
        )
    }
}

/// Broker acknowledgement status for a synchronous send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendStatus {
    SendOk,
    FlushDiskTimeout,
    FlushSlaveTimeout,
    SlaveNotAvailable,
}

/// Outcome of a synchronous send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResult {
    pub status: SendStatus,
    pub msg_id: MessageId,
    pub offset_msg_id: String,
    pub message_queue: MessageQueue,
    pub queue_offset: u64,
    pub region_id: String,
    pub trace_on: bool,
}

impl SendResult {
    pub fn is_ok(&self) -> bool {
        self.status == SendStatus::SendOk
    }
}

impl fmt::Display for SendResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SendResult [sendStatus={:?}, msgIds={}, offsetMsgId={}, queueOffset={}, messageQueue={}]",
            self.status, self.msg_id, self.offset_msg_id, self.queue_offset, self.message_queue
        )
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
