//! Tests for the batch listener policy.

use super::*;
use crate::message::{Message, MessageId, Timestamp};
use std::sync::Mutex;

fn batch(size: usize) -> Vec<MessageExt> {
    (0..size)
        .map(|i| MessageExt {
            message: Message::new("orders", format!("body-{}", i)).with_tag("created"),
            msg_id: MessageId::new(),
            offset_msg_id: format!("OFFSET{}", i),
            broker_name: "broker-a".to_string(),
            queue_id: 0,
            queue_offset: i as u64,
            region_id: "DefaultRegion".to_string(),
            reconsume_times: 0,
            born_timestamp: Timestamp::now(),
            store_timestamp: Timestamp::now(),
        })
        .collect()
}

/// Handler recording which offsets it saw and failing on one of them
struct RecordingHandler {
    fail_at: Option<u64>,
    seen: Mutex<Vec<u64>>,
}

impl RecordingHandler {
    fn new(fail_at: Option<u64>) -> Self {
        Self {
            fail_at,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<u64> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, message: &MessageExt) -> Result<(), ProcessingError> {
        self.seen.lock().unwrap().push(message.queue_offset);
        if self.fail_at == Some(message.queue_offset) {
            anyhow::bail!("cannot process offset {}", message.queue_offset);
        }
        Ok(())
    }
}

mod batch_policy {
    use super::*;

    #[tokio::test]
    async fn test_all_messages_succeed() {
        let listener = BatchListener::new(RecordingHandler::new(None));
        let messages = batch(5);

        let result = listener.consume(&messages).await;

        assert!(result.is_success());
        assert_eq!(listener.handler().seen(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_failure_stops_batch_and_requests_redelivery() {
        let listener = BatchListener::new(RecordingHandler::new(Some(2)));
        let messages = batch(5);

        let result = listener.consume(&messages).await;

        match result {
            ConsumeResult::RetryLater(error) => {
                assert!(error.to_string().contains("offset 2"));
            }
            ConsumeResult::Success => panic!("Expected RetryLater for failed batch"),
        }
        // Messages after the failing one are never handed to the handler
        assert_eq!(listener.handler().seen(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_failure_on_first_message() {
        let listener = BatchListener::new(RecordingHandler::new(Some(0)));

        let result = listener.consume(&batch(3)).await;

        assert!(!result.is_success());
        assert_eq!(listener.handler().seen(), vec![0]);
    }

    #[tokio::test]
    async fn test_failure_on_last_message() {
        let listener = BatchListener::new(RecordingHandler::new(Some(3)));

        let result = listener.consume(&batch(4)).await;

        assert!(matches!(result, ConsumeResult::RetryLater(_)));
        assert_eq!(listener.handler().seen(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_empty_batch_is_success() {
        let listener = BatchListener::new(RecordingHandler::new(Some(0)));

        let result = listener.consume(&[]).await;

        assert!(result.is_success());
        assert!(listener.handler().seen().is_empty());
    }
}

mod closure_handlers {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_handler_fn_runs_closure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let listener = BatchListener::new(handler_fn(move |_message: &MessageExt| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let result = listener.consume(&batch(3)).await;

        assert!(result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_handler_fn_error_propagates() {
        let listener = BatchListener::new(handler_fn(|message: &MessageExt| {
            if message.queue_offset == 1 {
                Err(anyhow::anyhow!("bad payload"))
            } else {
                Ok(())
            }
        }));

        match listener.consume(&batch(3)).await {
            ConsumeResult::RetryLater(error) => assert_eq!(error.to_string(), "bad payload"),
            ConsumeResult::Success => panic!("Expected RetryLater"),
        }
    }
}
