//! Tests for helper options and credentials.

use super::*;
use serial_test::serial;
use std::io::Write;

fn sample_options() -> HelperOptions {
    HelperOptions {
        endpoint: "http://MQ_INST_1.mq.cn-hangzhou.aliyuncs.com:80".to_string(),
        instance_id: "MQ_INST_1".to_string(),
        group_id: "GID_orders".to_string(),
        consume_from: ConsumeFrom::First,
        access_key_id: "LTAI-key-id".to_string(),
        access_key_secret: "very-secret-value".to_string(),
    }
}

mod credentials {
    use super::*;

    #[test]
    fn test_credentials_match_supplied_pair() {
        let options = sample_options();
        let credentials = options.credentials();

        assert_eq!(credentials.access_key(), "LTAI-key-id");
        assert_eq!(credentials.secret_key(), "very-secret-value");
        assert_eq!(
            credentials,
            Credentials::new("LTAI-key-id", "very-secret-value")
        );
    }

    #[test]
    fn test_credentials_preserve_empty_values() {
        let options = HelperOptions::default();
        let credentials = options.credentials();

        assert_eq!(credentials.access_key(), "");
        assert_eq!(credentials.secret_key(), "");
        assert!(credentials.is_empty());
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let debug_str = format!("{:?}", sample_options().credentials());
        assert!(
            !debug_str.contains("very-secret-value"),
            "debug output must not leak secret: {debug_str}"
        );
        assert!(debug_str.contains("REDACTED"));
        assert!(debug_str.contains("LTAI-key-id"));
    }
}

mod options_format {
    use super::*;

    #[test]
    fn test_options_debug_redacts_secret() {
        let debug_str = format!("{:?}", sample_options());
        assert!(!debug_str.contains("very-secret-value"));
        assert!(debug_str.contains("GID_orders"));
    }

    #[test]
    fn test_options_serialization_omits_secret() {
        let json = serde_json::to_string(&sample_options()).unwrap();
        assert!(!json.contains("very-secret-value"));
        assert!(json.contains("\"consume_from\":\"earliest\""));
    }

    #[test]
    fn test_consume_from_defaults_to_latest() {
        assert_eq!(ConsumeFrom::default(), ConsumeFrom::Last);
        assert_eq!(HelperOptions::default().consume_from, ConsumeFrom::Last);
        assert_eq!(ConsumeFrom::First.to_string(), "earliest");
    }

    #[test]
    fn test_consume_from_accepts_aliases() {
        let first: ConsumeFrom = serde_json::from_str("\"first\"").unwrap();
        let earliest: ConsumeFrom = serde_json::from_str("\"earliest\"").unwrap();
        let last: ConsumeFrom = serde_json::from_str("\"last\"").unwrap();

        assert_eq!(first, ConsumeFrom::First);
        assert_eq!(earliest, ConsumeFrom::First);
        assert_eq!(last, ConsumeFrom::Last);
    }
}

mod loading {
    use super::*;

    fn write_config(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(suffix)
            .tempfile()
            .expect("create temp config");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    #[serial]
    fn test_load_from_yaml_file() {
        let file = write_config(
            ".yaml",
            "endpoint: \"localhost:9876\"\n\
             instance_id: \"MQ_INST_2\"\n\
             group_id: \"GID_billing\"\n\
             consume_from: \"earliest\"\n\
             access_key_id: \"id\"\n\
             access_key_secret: \"secret\"\n",
        );

        let options = HelperOptions::load(Some(file.path())).expect("load options");

        assert_eq!(options.endpoint, "localhost:9876");
        assert_eq!(options.instance_id, "MQ_INST_2");
        assert_eq!(options.group_id, "GID_billing");
        assert_eq!(options.consume_from, ConsumeFrom::First);
        assert_eq!(options.credentials(), Credentials::new("id", "secret"));
    }

    #[test]
    #[serial]
    fn test_load_keeps_defaults_for_missing_fields() {
        let file = write_config(".toml", "group_id = \"GID_partial\"\n");

        let options = HelperOptions::load(Some(file.path())).expect("load options");

        assert_eq!(options.group_id, "GID_partial");
        assert_eq!(options.endpoint, "");
        assert_eq!(options.consume_from, ConsumeFrom::Last);
    }

    #[test]
    #[serial]
    fn test_load_missing_file_fails() {
        let result = HelperOptions::load(Some(Path::new("/nonexistent/rocketmq.yaml")));
        assert!(matches!(
            result,
            Err(ConfigurationError::FileNotFound { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_load_rejects_unknown_consume_position() {
        let file = write_config(".json", r#"{ "consume_from": "middle" }"#);

        let result = HelperOptions::load(Some(file.path()));
        assert!(matches!(result, Err(ConfigurationError::Parsing { .. })));
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        let file = write_config(".yaml", "group_id: \"GID_file\"\nendpoint: \"file:9876\"\n");

        std::env::set_var("ROCKETMQ__GROUP_ID", "GID_env");
        let result = HelperOptions::load(Some(file.path()));
        std::env::remove_var("ROCKETMQ__GROUP_ID");

        let options = result.expect("load options");
        assert_eq!(options.group_id, "GID_env");
        assert_eq!(options.endpoint, "file:9876");
    }
}
