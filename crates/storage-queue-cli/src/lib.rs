//! # sqd
//!
//! Command-line interface for Azure Storage queues, built on the
//! storage queue driver.
//!
//! This module provides CLI commands for:
//! - Listing, creating and deleting queues
//! - Sending, receiving, peeking, updating and deleting messages
//! - Reading queue properties and clearing queues
//!
//! Every command prints its result as JSON on stdout. Logs go to stderr.

use chrono::{Duration, Utc};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use storage_queue_driver::{
    ConfigurationError, CreateQueueOptions, DriverConfig, DriverError, DriverRegistry,
    ListQueuesOptions, MemoryConnector, MessageId, MessageUpdate, Payload, PeekOptions,
    PopReceipt, QueueDriver, ReceiveOptions, RequestOptions, StorageQueueDriver, StoreOptions,
    ValidationError, MEMORY_DRIVER,
};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// sqd - Azure Storage queue client
#[derive(Parser, Debug)]
#[command(name = "sqd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Work with Azure Storage queues from the command line")]
pub struct Cli {
    /// Configuration file path (YAML, TOML or JSON)
    #[arg(short, long, env = "STORAGE_QUEUE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Queue to operate on, overrides the configured name
    #[arg(short, long, global = true)]
    pub queue: Option<String>,

    /// Storage connection string, overrides the configured one
    #[arg(long, env = "AZURE_STORAGE_CONNECTION_STRING", hide_env_values = true)]
    pub connection_string: Option<String>,

    /// Logging level
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
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Queue management commands
    Queues {
        #[command(subcommand)]
        action: QueueCommands,
    },

    /// Show approximate message count and metadata of the queue
    Properties(TimeoutArgs),

    /// Send a message; JSON text is stored as structured data
    Send {
        /// Message payload
        payload: String,

        /// Delay before the message becomes visible, in milliseconds
        #[arg(long)]
        delay_ms: Option<i64>,

        /// Message time to live in seconds
        #[arg(long)]
        ttl_secs: Option<i64>,

        #[command(flatten)]
        timeout: TimeoutArgs,
    },

    /// Receive and lease messages
    Receive {
        /// Number of messages to receive (1-32)
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,

        /// Lease duration in seconds
        #[arg(long)]
        visibility_secs: Option<i64>,

        #[command(flatten)]
        timeout: TimeoutArgs,
    },

    /// Look at messages without leasing them
    Peek {
        /// Number of messages to peek (1-32)
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,

        #[command(flatten)]
        timeout: TimeoutArgs,
    },

    /// Delete a leased message
    Delete {
        /// Message ID
        message_id: String,

        /// Pop receipt from the receive
        pop_receipt: String,

        #[command(flatten)]
        timeout: TimeoutArgs,
    },

    /// Update content or visibility of a leased message
    Update {
        /// Message ID
        message_id: String,

        /// Pop receipt from the receive
        pop_receipt: String,

        /// Replacement payload
        #[arg(long)]
        payload: Option<String>,

        /// New visibility timeout in seconds
        #[arg(long, default_value = "0")]
        visibility_secs: i64,

        #[command(flatten)]
        timeout: TimeoutArgs,
    },

    /// Delete every message in the queue
    Clear(TimeoutArgs),
}

/// Queue management subcommands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum QueueCommands {
    /// List queues in the account
    List {
        /// Only list queues starting with this prefix
        #[arg(short, long)]
        prefix: Option<String>,

        /// Include queue metadata
        #[arg(short, long)]
        metadata: bool,

        #[command(flatten)]
        timeout: TimeoutArgs,
    },

    /// Create a queue
    Create {
        /// Queue name
        name: String,

        /// Metadata entries as key=value
        #[arg(short, long = "metadata", value_parser = parse_key_value)]
        metadata: Vec<(String, String)>,

        #[command(flatten)]
        timeout: TimeoutArgs,
    },

    /// Delete a queue and all its messages
    Delete {
        /// Queue name
        name: String,

        #[command(flatten)]
        timeout: TimeoutArgs,
    },
}

/// Deadline shared by every remote command
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct TimeoutArgs {
    /// Give up after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<i64>,
}

impl TimeoutArgs {
    fn request(&self) -> RequestOptions {
        RequestOptions {
            timeout: self.timeout_secs.map(Duration::seconds),
        }
    }
}

fn parse_key_value(input: &str) -> Result<(String, String), String> {
    input
        .split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", input))
}

// ============================================================================
// Error Types
// ============================================================================

/// CLI operation errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Queue operation failed: {0}")]
    Driver(#[from] DriverError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),

    #[error("Logging setup failed: {message}")]
    Logging { message: String },
}

impl From<ValidationError> for CliError {
    fn from(e: ValidationError) -> Self {
        Self::Driver(e.into())
    }
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Driver(DriverError::Configuration(_)) => 1,
            Self::Driver(_) => 2,
            Self::InvalidArgument { .. } => 4,
            Self::Output(_) => 5,
            Self::Logging { .. } => 6,
        }
    }
}

// ============================================================================
// Execution
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    let config = load_configuration(&cli)?;
    let driver = build_driver(config)?;

    let output = execute_command(&cli.command, &driver).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

/// Install the tracing subscriber; `RUST_LOG` wins over `--log-level`
fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cli.log_level).map_err(|e| CliError::InvalidArgument {
            arg: "log-level".to_string(),
            message: e.to_string(),
        })?,
    };

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

    result.map_err(|e| CliError::Logging {
        message: e.to_string(),
    })
}

/// Load the driver configuration and apply command-line overrides
pub fn load_configuration(cli: &Cli) -> Result<DriverConfig, CliError> {
    let mut config = DriverConfig::load(cli.config.as_deref())?;

    if let Some(queue) = &cli.queue {
        config.name = queue.clone();
    }
    if let Some(connection_string) = &cli.connection_string {
        config.config.connection_string = Some(connection_string.clone());
    }

    debug!(queue = %config.name, driver = %config.driver, "Loaded configuration");
    Ok(config)
}

/// Construct the driver named by the configuration.
///
/// The driver key is checked against the default [`DriverRegistry`], but the
/// driver is built here as a concrete [`StorageQueueDriver`]: the `queues`
/// commands need its account-level `list_queues`, `create_queue` and
/// `delete_queue`, which the `QueueDriver` objects the registry hands out do
/// not offer.
pub fn build_driver(config: DriverConfig) -> Result<StorageQueueDriver, CliError> {
    if !DriverRegistry::with_default_drivers().contains(&config.driver) {
        return Err(ConfigurationError::UnknownDriver {
            driver: config.driver,
        }
        .into());
    }

    if config.driver == MEMORY_DRIVER {
        return Ok(StorageQueueDriver::with_connector(
            config,
            Arc::new(MemoryConnector::new()),
        ));
    }

    Ok(StorageQueueDriver::new(config))
}

fn require_queue(driver: &StorageQueueDriver) -> Result<(), CliError> {
    if driver.name().is_empty() {
        return Err(CliError::InvalidArgument {
            arg: "queue".to_string(),
            message: "no queue configured; pass --queue or set name in the configuration"
                .to_string(),
        });
    }
    Ok(())
}

/// Run one command and return its JSON result
pub async fn execute_command(
    command: &Commands,
    driver: &StorageQueueDriver,
) -> Result<Value, CliError> {
    if !matches!(command, Commands::Queues { .. }) {
        require_queue(driver)?;
    }

    let output = match command {
        Commands::Queues { action } => execute_queue_command(action, driver).await?,
        Commands::Properties(timeout) => {
            serde_json::to_value(driver.queue_properties(&timeout.request()).await?)?
        }
        Commands::Send {
            payload,
            delay_ms,
            ttl_secs,
            timeout,
        } => {
            let mut options = StoreOptions {
                request: timeout.request(),
                ..StoreOptions::new()
            };
            if let Some(delay) = delay_ms {
                options = options.with_run_at(Utc::now().timestamp_millis() + delay);
            }
            if let Some(ttl) = ttl_secs {
                options = options.with_time_to_live(Duration::seconds(*ttl));
            }

            let job = driver.store(Payload::decode(payload), &options).await?;
            info!(message_id = %job.id, "Message sent");
            serde_json::to_value(job)?
        }
        Commands::Receive {
            count,
            visibility_secs,
            timeout,
        } => {
            let mut options = ReceiveOptions {
                request: timeout.request(),
                ..ReceiveOptions::new()
            }
            .with_number_of_messages(*count);
            if let Some(secs) = visibility_secs {
                options = options.with_visibility_timeout(Duration::seconds(*secs));
            }
            serde_json::to_value(driver.get_next(&options).await?)?
        }
        Commands::Peek { count, timeout } => {
            let options = PeekOptions {
                number_of_messages: Some(*count),
                request: timeout.request(),
            };
            serde_json::to_value(driver.peek_next(&options).await?)?
        }
        Commands::Delete {
            message_id,
            pop_receipt,
            timeout,
        } => {
            let id: MessageId = message_id.parse()?;
            let receipt: PopReceipt = pop_receipt.parse()?;
            serde_json::to_value(driver.remove(&id, &receipt, &timeout.request()).await?)?
        }
        Commands::Update {
            message_id,
            pop_receipt,
            payload,
            visibility_secs,
            timeout,
        } => {
            let id: MessageId = message_id.parse()?;
            let receipt: PopReceipt = pop_receipt.parse()?;
            let mut update =
                MessageUpdate::new().with_visibility_timeout(Duration::seconds(*visibility_secs));
            if let Some(payload) = payload {
                update = update
                    .with_payload(&Payload::decode(payload))
                    .map_err(DriverError::from)?;
            }
            serde_json::to_value(
                driver
                    .update(&id, &receipt, update, &timeout.request())
                    .await?,
            )?
        }
        Commands::Clear(timeout) => serde_json::to_value(driver.clear(&timeout.request()).await?)?,
    };

    Ok(output)
}

async fn execute_queue_command(
    action: &QueueCommands,
    driver: &StorageQueueDriver,
) -> Result<Value, CliError> {
    let output = match action {
        QueueCommands::List {
            prefix,
            metadata,
            timeout,
        } => {
            let options = ListQueuesOptions {
                prefix: prefix.clone(),
                include_metadata: *metadata,
                page_size: None,
                request: timeout.request(),
            };
            serde_json::to_value(driver.list_queues(&options).await?)?
        }
        QueueCommands::Create {
            name,
            metadata,
            timeout,
        } => {
            let options = CreateQueueOptions {
                metadata: metadata.iter().cloned().collect(),
                request: timeout.request(),
            };
            serde_json::to_value(driver.create_queue(name, &options).await?)?
        }
        QueueCommands::Delete { name, timeout } => {
            serde_json::to_value(driver.delete_queue(name, &timeout.request()).await?)?
        }
    };

    Ok(output)
}
