//! Client settings handed to a [`ClientProvider`](crate::client::ClientProvider).

use crate::options::{ConsumeFrom, Credentials};

/// Where trace data is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessChannel {
    /// Self-hosted broker with a trace topic
    Local,
    /// Managed cloud instance
    Cloud,
}

/// Message trace settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceConfig {
    pub group_name: String,
    pub access: AccessChannel,
    pub name_server_addrs: Vec<String>,
    pub credentials: Credentials,
}

/// How messages of a topic are shared between consumers of one group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsumerModel {
    /// Each message goes to one consumer of the group; progress is shared
    #[default]
    Clustering,
    /// Every consumer of the group receives every message
    Broadcasting,
}

/// Settings for constructing a producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerSettings {
    pub name_server_addrs: Vec<String>,
    pub namespace: String,
    pub instance_name: String,
    pub group_name: String,
    pub credentials: Credentials,
    pub trace: Option<TraceConfig>,
}

/// Settings for constructing a push consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub name_server_addrs: Vec<String>,
    pub namespace: String,
    pub instance_name: String,
    pub group_name: String,
    pub credentials: Credentials,
    pub model: ConsumerModel,
    pub consume_from: ConsumeFrom,
    /// Deliver each queue's messages strictly in order, one batch at a time
    pub consume_orderly: bool,
}

/// Resolve a topic name inside a namespace
///
/// Namespaced topics are stored as `{namespace}%{topic}`.
pub fn namespaced(namespace: &str, topic: &str) -> String {
    if namespace.is_empty() || topic.starts_with(&format!("{}%", namespace)) {
        topic.to_string()
    } else {
        format!("{}%{}", namespace, topic)
    }
}

/// Strip a namespace prefix added by [`namespaced`]
pub fn without_namespace<'a>(namespace: &str, resource: &'a str) -> &'a str {
    if namespace.is_empty() {
        return resource;
    }
    resource
        .strip_prefix(namespace)
        .and_then(|rest| rest.strip_prefix('%'))
        .unwrap_or(resource)
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
