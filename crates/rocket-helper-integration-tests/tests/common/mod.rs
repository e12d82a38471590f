//! Common test utilities for rocket-helper integration tests
//!
//! This module provides:
//! - Options and provider fixtures tuned for fast delivery
//! - A recording handler that forwards deliveries to a channel
//! - Helpers for waiting on deliveries

#![allow(dead_code)]

use async_trait::async_trait;
use rocket_helper::{
    ConsumeFrom, HelperOptions, InMemoryConfig, InMemoryProvider, MessageExt, MessageHandler,
    ProcessingError, RocketHelper,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

pub const DELIVERY_WAIT: Duration = Duration::from_secs(3);

pub fn test_options(group_id: &str) -> HelperOptions {
    HelperOptions {
        endpoint: "http://MQ_INST_TEST.mq.local:80".to_string(),
        instance_id: "MQ_INST_TEST".to_string(),
        group_id: group_id.to_string(),
        consume_from: ConsumeFrom::First,
        access_key_id: "test-ak".to_string(),
        access_key_secret: "test-sk".to_string(),
    }
}

/// Broker config with short delays so redelivery tests finish quickly
pub fn fast_config() -> InMemoryConfig {
    InMemoryConfig {
        queues_per_topic: 2,
        poll_interval: Duration::from_millis(5),
        suspend_delay: Duration::from_millis(20),
        ..InMemoryConfig::default()
    }
}

pub fn create_helper(group_id: &str, config: InMemoryConfig) -> (RocketHelper, InMemoryProvider) {
    let provider = InMemoryProvider::new(config);
    let helper = RocketHelper::new(test_options(group_id), Arc::new(provider.clone()));
    (helper, provider)
}

/// One delivery observed by [`RecordingHandler`]
#[derive(Debug, Clone)]
pub struct Delivery {
    pub body: String,
    pub tag: Option<String>,
    pub queue_id: u32,
    pub queue_offset: u64,
    pub reconsume_times: u32,
}

/// Handler forwarding every message to a channel
///
/// Bodies listed in `failing` are rejected until they have been seen
/// `failures_per_body` times.
pub struct RecordingHandler {
    tx: mpsc::UnboundedSender<Delivery>,
    failing: HashSet<String>,
    failures_per_body: u32,
    attempts: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        Self::failing(&[], 0)
    }

    pub fn failing(
        bodies: &[&str],
        failures_per_body: u32,
    ) -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = Self {
            tx,
            failing: bodies.iter().map(|b| b.to_string()).collect(),
            failures_per_body,
            attempts: Mutex::new(Vec::new()),
        };
        (handler, rx)
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, message: &MessageExt) -> Result<(), ProcessingError> {
        let body = String::from_utf8_lossy(message.body()).to_string();
        let _ = self.tx.send(Delivery {
            body: body.clone(),
            tag: message.tags().map(str::to_string),
            queue_id: message.queue_id,
            queue_offset: message.queue_offset,
            reconsume_times: message.reconsume_times,
        });

        let attempts = {
            let mut attempts = self.attempts.lock().unwrap();
            attempts.push(body.clone());
            attempts.iter().filter(|b| **b == body).count() as u32
        };
        if self.failing.contains(&body) && attempts <= self.failures_per_body {
            anyhow::bail!("rejecting '{}' on attempt {}", body, attempts);
        }
        Ok(())
    }
}

/// Wait for the next delivery or panic after [`DELIVERY_WAIT`]
pub async fn next_delivery(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Delivery {
    timeout(DELIVERY_WAIT, rx.recv())
        .await
        .expect("timed out waiting for a delivery")
        .expect("handler channel closed")
}

/// Collect exactly `count` deliveries
pub async fn collect_deliveries(
    rx: &mut mpsc::UnboundedReceiver<Delivery>,
    count: usize,
) -> Vec<Delivery> {
    let mut deliveries = Vec::with_capacity(count);
    for _ in 0..count {
        deliveries.push(next_delivery(rx).await);
    }
    deliveries
}

/// Assert nothing else is delivered within a short window
pub async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Delivery>) {
    let extra = timeout(Duration::from_millis(150), rx.recv()).await;
    assert!(extra.is_err(), "unexpected delivery: {:?}", extra);
}
