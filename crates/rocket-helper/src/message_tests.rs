//! Tests for message types.

use super::*;

fn delivered(message: Message) -> MessageExt {
    MessageExt {
        message,
        msg_id: MessageId::new(),
        offset_msg_id: "0A0000010000000000000042".to_string(),
        broker_name: "broker-a".to_string(),
        queue_id: 2,
        queue_offset: 42,
        region_id: "cn-hangzhou".to_string(),
        reconsume_times: 1,
        born_timestamp: Timestamp::now(),
        store_timestamp: Timestamp::now(),
    }
}

#[test]
fn test_message_id_generation() {
    let id1 = MessageId::new();
    let id2 = MessageId::new();

    assert_ne!(id1, id2);
    assert_eq!(id1.as_str().len(), 32);
    assert!(id1
        .as_str()
        .chars()
        .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
}

#[test]
fn test_message_builder() {
    let message = Message::new("orders", "payload")
        .with_tag("created")
        .with_keys(["order-1", "customer-9"])
        .with_property("region", "eu");

    assert_eq!(message.topic(), "orders");
    assert_eq!(message.body(), &Bytes::from("payload"));
    assert_eq!(message.tag(), Some("created"));
    assert_eq!(message.keys(), ["order-1".to_string(), "customer-9".to_string()]);
    assert_eq!(message.property("region"), Some("eu"));
    assert_eq!(message.property("missing"), None);
}

#[test]
fn test_with_properties_merges() {
    let mut extra = HashMap::new();
    extra.insert("b".to_string(), "2".to_string());
    extra.insert("a".to_string(), "overridden".to_string());

    let message = Message::new("t", "x")
        .with_property("a", "1")
        .with_properties(extra);

    assert_eq!(message.properties().len(), 2);
    assert_eq!(message.property("a"), Some("overridden"));
    assert_eq!(message.property("b"), Some("2"));
}

#[test]
fn test_untagged_message() {
    let message = Message::new("t", Vec::from("bytes".as_bytes()));
    assert_eq!(message.tag(), None);
    assert!(message.keys().is_empty());
    assert!(message.properties().is_empty());
}

#[test]
fn test_message_summary_fields() {
    let ext = delivered(
        Message::new("orders", "payload")
            .with_tag("paid")
            .with_keys(["k1"])
            .with_property("p", "v"),
    );

    let summary = ext.summary();

    assert_eq!(summary.message_id, ext.msg_id.as_str());
    assert_eq!(summary.topic, "orders");
    assert_eq!(summary.queue_offset, 42);
    assert_eq!(summary.tags, Some("paid"));
    assert_eq!(summary.keys, ["k1".to_string()]);
    assert_eq!(summary.properties.get("p"), Some(&"v".to_string()));
    assert_eq!(summary.region_id, "cn-hangzhou");
    assert_eq!(summary.reconsume_times, 1);

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["messageId"], ext.msg_id.as_str());
    assert_eq!(json["reconsumeTimes"], 1);
}

#[test]
fn test_send_result_display() {
    let result = SendResult {
        status: SendStatus::SendOk,
        msg_id: MessageId::from("ABC".to_string()),
        offset_msg_id: "OFF".to_string(),
        message_queue: MessageQueue {
            topic: "orders".to_string(),
            broker_name: "broker-a".to_string(),
            queue_id: 3,
        },
        queue_offset: 7,
        region_id: "DefaultRegion".to_string(),
        trace_on: true,
    };

    assert!(result.is_ok());
    let text = result.to_string();
    assert!(text.contains("msgIds=ABC"));
    assert!(text.contains("queueId=3"));
    assert!(text.contains("queueOffset=7"));
}

#[test]
fn test_timestamp_ordering() {
    let earlier = Timestamp::from_datetime(Utc::now() - chrono::Duration::minutes(1));
    let later = Timestamp::now();
    assert!(earlier < later);
    assert!(earlier.timestamp_millis() < later.timestamp_millis());
}
