//! Tests for client settings helpers.

use super::*;

#[test]
fn test_namespaced_topic() {
    assert_eq!(namespaced("MQ_INST_1", "orders"), "MQ_INST_1%orders");
    assert_eq!(namespaced("", "orders"), "orders");
}

#[test]
fn test_namespaced_is_idempotent() {
    let once = namespaced("ns", "orders");
    assert_eq!(namespaced("ns", &once), "ns%orders");
}

#[test]
fn test_without_namespace() {
    assert_eq!(without_namespace("ns", "ns%orders"), "orders");
    assert_eq!(without_namespace("ns", "other%orders"), "other%orders");
    assert_eq!(without_namespace("", "ns%orders"), "ns%orders");
}

#[test]
fn test_consumer_model_default() {
    assert_eq!(ConsumerModel::default(), ConsumerModel::Clustering);
}
