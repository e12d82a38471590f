//! Tests for error types.

use super::*;

#[test]
fn test_error_transience() {
    assert!(ClientError::Timeout {
        duration: Duration::from_millis(100),
    }
    .is_transient());

    assert!(!ClientError::AuthenticationFailed {
        message: "bad secret".to_string(),
    }
    .is_transient());

    assert!(ClientError::Broker {
        code: "SYSTEM_BUSY".to_string(),
        message: "broker busy".to_string(),
    }
    .is_transient());

    assert!(!ClientError::MessageTooLarge {
        size: 1000,
        max_size: 500
    }
    .is_transient());

    assert!(!ClientError::Cancelled.is_transient());
}

#[test]
fn test_retry_suggestions() {
    let timeout = ClientError::Timeout {
        duration: Duration::from_secs(3),
    };
    assert_eq!(timeout.retry_after(), Some(Duration::from_secs(1)));

    let not_found = ClientError::TopicNotFound {
        topic: "orders".to_string(),
    };
    assert_eq!(not_found.retry_after(), None);
}

#[test]
fn test_validation_error_converts_into_client_error() {
    let err: ClientError = ValidationError::Unsupported {
        field: "selector".to_string(),
        message: "SQL92".to_string(),
    }
    .into();

    assert!(matches!(err, ClientError::ValidationError(_)));
    assert!(err.to_string().contains("SQL92"));
}

#[test]
fn test_config_error_maps_to_parsing() {
    let err: ConfigurationError = config::ConfigError::Message("boom".to_string()).into();
    match err {
        ConfigurationError::Parsing { message } => assert!(message.contains("boom")),
        other => panic!("Expected Parsing error, got: {:?}", other),
    }
}
