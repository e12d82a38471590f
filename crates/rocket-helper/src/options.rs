//! Connection options and credentials for the helper.
//!
//! [`HelperOptions`] is a plain holder: nothing is validated here. Bad
//! endpoints, groups or credentials are reported by the client library when a
//! producer or consumer is constructed or started.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[cfg(test)]
#[path = "options_tests.rs"]
mod tests;

/// Environment variable prefix used by [`HelperOptions::load`].
///
/// Keys use a double underscore separator, e.g. `ROCKETMQ__GROUP_ID=GID_orders`.
pub const ENV_PREFIX: &str = "ROCKETMQ";

/// Position a new consumer group starts reading from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConsumeFrom {
    /// Start after the last message stored when the group first subscribes
    #[default]
    #[serde(rename = "latest", alias = "last")]
    Last,
    /// Start from the first message still stored in each queue
    #[serde(rename = "earliest", alias = "first")]
    First,
}

impl fmt::Display for ConsumeFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Last => write!(f, "latest"),
            Self::First => write!(f, "earliest"),
        }
    }
}

/// Access key pair used to sign requests to the broker.
///
/// The secret is wiped from memory on drop and never shown in `Debug` output.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    access_key: String,
    secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    /// True when neither key is set
    pub fn is_empty(&self) -> bool {
        self.access_key.is_empty() && self.secret_key.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<REDACTED>")
            .finish()
    }
}

/// Connection parameters shared by producers and consumers.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperOptions {
    /// Name server endpoint of the RocketMQ instance
    pub endpoint: String,

    /// Instance identifier, also used as the client namespace
    pub instance_id: String,

    /// Producer or consumer group identifier
    pub group_id: String,

    /// Where a new consumer group starts reading
    pub consume_from: ConsumeFrom,

    pub access_key_id: String,

    #[serde(skip_serializing)]
    pub access_key_secret: String,
}

impl HelperOptions {
    /// Derive the credential pair for client construction
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.access_key_id.clone(), self.access_key_secret.clone())
    }

    /// Load options from an optional file, then `ROCKETMQ__*` environment variables.
    ///
    /// The file format is inferred from its extension (yaml, toml or json).
    /// Fields missing from every source keep their defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigurationError::FileNotFound {
                    path: path.display().to_string(),
                });
            }
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

impl fmt::Debug for HelperOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelperOptions")
            .field("endpoint", &self.endpoint)
            .field("instance_id", &self.instance_id)
            .field("group_id", &self.group_id)
            .field("consume_from", &self.consume_from)
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<REDACTED>")
            .finish()
    }
}
