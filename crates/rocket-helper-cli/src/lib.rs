//! # Rocket Helper CLI
//!
//! Command-line interface for inspecting helper options and exercising the
//! helper end to end.
//!
//! This module provides CLI commands for:
//! - Showing the resolved options (file plus `ROCKETMQ__*` environment)
//! - Running a produce/consume round trip on the in-process broker

use clap::{Parser, Subcommand};
use rocket_helper::{
    handler_fn, ClientError, ConfigurationError, HelperOptions, InMemoryConfig, InMemoryProvider,
    MessageExt, RocketHelper, SendContext,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// Rocket Helper CLI - RocketMQ producer/consumer helper
#[derive(Parser)]
#[command(name = "rocket-helper")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Producer and push consumer helper for RocketMQ-style brokers")]
pub struct Cli {
    /// Configuration file path (yaml, toml or json)
    #[arg(short, long, env = "ROCKET_HELPER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level, used when RUST_LOG is not set
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Print the resolved options; the access key secret is never shown
    ShowConfig {
        /// Output format
        #[arg(short, long, default_value = "json")]
        format: OutputFormat,
    },

    /// Send messages through the helper and consume them again in-process
    Demo {
        /// Topic to send to and subscribe on
        #[arg(short, long, default_value = "demo-topic")]
        topic: String,

        /// Tag set on every message and used as the subscription filter
        #[arg(long, default_value = "demo")]
        tag: String,

        /// Number of messages to send
        #[arg(short = 'n', long, default_value = "3")]
        count: usize,

        /// Send timeout and overall receive deadline in milliseconds
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Client(_) => 2,
            Self::CommandFailed { .. } => 3,
            Self::InvalidArgument { .. } => 4,
            Self::Output(_) => 5,
        }
    }
}

// ============================================================================
// Demo Report
// ============================================================================

/// Outcome of a demo round trip
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DemoReport {
    pub topic: String,
    pub tag: String,
    pub sent: Vec<SentMessage>,
    pub received: Vec<ReceivedMessage>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    pub msg_id: String,
    pub queue_id: u32,
    pub queue_offset: u64,
    pub trace_on: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    pub msg_id: String,
    pub body: String,
    pub tag: Option<String>,
    pub keys: Vec<String>,
    pub queue_offset: u64,
    pub reconsume_times: u32,
}

impl From<&MessageExt> for ReceivedMessage {
    fn from(message: &MessageExt) -> Self {
        Self {
            msg_id: message.msg_id.to_string(),
            body: String::from_utf8_lossy(message.body()).to_string(),
            tag: message.tags().map(str::to_string),
            keys: message.keys().to_vec(),
            queue_offset: message.queue_offset,
            reconsume_times: message.reconsume_times,
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    let output = run(cli).await?;
    println!("{}", output);
    Ok(())
}

/// Execute a parsed command and return what should be printed
pub async fn run(cli: Cli) -> Result<String, CliError> {
    let options = HelperOptions::load(cli.config.as_deref())?;

    match cli.command {
        Commands::ShowConfig { format } => render_options(&options, format),
        Commands::Demo {
            topic,
            tag,
            count,
            timeout_ms,
            format,
        } => {
            let report =
                execute_demo(options, topic, tag, count, Duration::from_millis(timeout_ms))
                    .await?;
            render_report(&report, format)
        }
    }
}

/// Install the tracing subscriber; logs go to stderr so stdout stays parseable
fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "rocket_helper={level},rocket_helper_cli={level}",
            level = cli.log_level
        ))
    });
    let registry = tracing_subscriber::registry().with(filter);

    let result = if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::CommandFailed {
        message: format!("failed to initialize logging: {}", e),
    })
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Render options; serialization skips the access key secret
pub fn render_options(options: &HelperOptions, format: OutputFormat) -> Result<String, CliError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(options)?),
        OutputFormat::Text => Ok(format!(
            "endpoint: {}\ninstance_id: {}\ngroup_id: {}\nconsume_from: {}\naccess_key_id: {}",
            options.endpoint,
            options.instance_id,
            options.group_id,
            options.consume_from,
            options.access_key_id
        )),
    }
}

pub fn render_report(report: &DemoReport, format: OutputFormat) -> Result<String, CliError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        OutputFormat::Text => {
            let mut lines = vec![format!(
                "topic '{}' tag '{}': sent {}, received {}",
                report.topic,
                report.tag,
                report.sent.len(),
                report.received.len()
            )];
            for message in &report.received {
                lines.push(format!(
                    "  received {} at offset {}: {}",
                    message.msg_id, message.queue_offset, message.body
                ));
            }
            Ok(lines.join("\n"))
        }
    }
}

/// Run a produce/consume round trip through the helper on the in-process broker
pub async fn execute_demo(
    mut options: HelperOptions,
    topic: String,
    tag: String,
    count: usize,
    timeout: Duration,
) -> Result<DemoReport, CliError> {
    if count == 0 {
        return Err(CliError::InvalidArgument {
            arg: "count".to_string(),
            message: "at least one message is required".to_string(),
        });
    }

    if options.endpoint.is_empty() {
        options.endpoint = "localhost:9876".to_string();
    }
    if options.group_id.is_empty() {
        options.group_id = "GID_rocket_helper_demo".to_string();
    }

    info!(
        topic = %topic,
        tag = %tag,
        count = count,
        group_id = %options.group_id,
        "Starting demo round trip"
    );

    let provider = InMemoryProvider::new(InMemoryConfig {
        poll_interval: Duration::from_millis(10),
        ..InMemoryConfig::default()
    });
    let helper = RocketHelper::new(options, Arc::new(provider));

    let (tx, mut rx) = mpsc::unbounded_channel();
    helper
        .push_consume(
            &topic,
            &tag,
            handler_fn(move |message: &MessageExt| {
                tx.send(ReceivedMessage::from(message))?;
                Ok(())
            }),
        )
        .await?;

    let ctx = SendContext::new().with_timeout(timeout);
    let mut sent = Vec::with_capacity(count);
    for sequence in 0..count {
        let mut properties = HashMap::new();
        properties.insert("sequence".to_string(), sequence.to_string());
        let message = RocketHelper::create_public_message(
            topic.as_str(),
            format!("demo message {}", sequence),
            tag.as_str(),
            vec![format!("demo-{}", sequence)],
            properties,
        );

        let result = helper.send_message(&ctx, &message).await?;
        debug!(msg_id = %result.msg_id, queue_offset = result.queue_offset, "Demo message sent");
        sent.push(SentMessage {
            msg_id: result.msg_id.to_string(),
            queue_id: result.message_queue.queue_id,
            queue_offset: result.queue_offset,
            trace_on: result.trace_on,
        });
    }

    let mut received = Vec::with_capacity(count);
    let deadline = tokio::time::Instant::now() + timeout;
    while received.len() < count {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(message)) => received.push(message),
            Ok(None) => break,
            Err(_) => {
                return Err(CliError::CommandFailed {
                    message: format!(
                        "received {} of {} messages before the deadline",
                        received.len(),
                        count
                    ),
                })
            }
        }
    }

    helper.push_consumer().await?.shutdown().await?;
    helper.producer().await?.shutdown().await?;

    info!(sent = sent.len(), received = received.len(), "Demo round trip finished");

    Ok(DemoReport {
        topic,
        tag,
        sent,
        received,
    })
}
