//! Relay configuration and seed data.
//!
//! Both are read once at process start and treated as immutable afterwards.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Gift, ModelError, User};

const BUILTIN_USERS: &str = include_str!("../assets/users.json");
const BUILTIN_GIFTS: &str = include_str!("../assets/gifts.json");

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// TOML config did not parse.
    #[error("invalid config {path}: {source}")]
    Toml {
        /// File path.
        path: PathBuf,
        /// Decoder error.
        #[source]
        source: toml::de::Error,
    },
    /// Seed JSON did not parse.
    #[error("invalid seed data {path}: {source}")]
    Json {
        /// File path, or `<builtin>`.
        path: PathBuf,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
    /// Seed data violates a model invariant.
    #[error(transparent)]
    Model(#[from] ModelError),
    /// A setting is out of range.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Setting name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Relay service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Listening address for WebSocket connections.
    pub bind_addr: SocketAddr,
    /// Wall-time interval between compaction passes; `0` disables compaction.
    pub compaction_interval_ms: u64,
    /// Recent batches per connection compared for duplicate suppression; `0` disables it.
    pub dedup_window: usize,
    /// Outbound frames buffered per connection before drops begin.
    pub outbound_queue_bound: usize,
    /// Commands buffered ahead of the relay owner task.
    pub command_queue_bound: usize,
    /// SQLite journal location; `None` keeps history in memory only.
    pub journal_path: Option<PathBuf>,
    /// Journal write batch size.
    pub batch_max_ops: usize,
    /// Journal write latency bound.
    pub batch_max_latency_ms: u64,
    /// Batches buffered ahead of the journal writer.
    pub persist_queue_bound: usize,
    /// Roster file (JSON list of `{id, name}`); builtin roster when unset.
    pub users_path: Option<PathBuf>,
    /// Default gift file (JSON list of `{id, description, image}`); builtin set when unset.
    pub gifts_path: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5001)),
            compaction_interval_ms: 5000,
            dedup_window: 1,
            outbound_queue_bound: 64,
            command_queue_bound: 256,
            journal_path: None,
            batch_max_ops: 32,
            batch_max_latency_ms: 75,
            persist_queue_bound: 64,
            users_path: None,
            gifts_path: None,
        }
    }
}

impl RelayConfig {
    /// Reads and validates a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = read(path)?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks settings that would stall or wedge the relay.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outbound_queue_bound == 0 {
            return Err(ConfigError::Invalid {
                field: "outbound_queue_bound",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.command_queue_bound == 0 {
            return Err(ConfigError::Invalid {
                field: "command_queue_bound",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.journal_path.is_some() && (self.persist_queue_bound == 0 || self.batch_max_ops == 0) {
            return Err(ConfigError::Invalid {
                field: "persist_queue_bound",
                reason: "journal queue and batch size must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Compaction period, or `None` when compaction is disabled.
    pub fn compaction_interval(&self) -> Option<Duration> {
        (self.compaction_interval_ms > 0).then(|| Duration::from_millis(self.compaction_interval_ms))
    }

    /// Loads the seed named by `users_path`/`gifts_path`, falling back to the builtin set.
    pub fn load_seed(&self) -> Result<SeedData, ConfigError> {
        let builtin = SeedData::builtin()?;
        let users = match &self.users_path {
            Some(path) => parse_json(&read(path)?, path)?,
            None => builtin.users,
        };
        let gifts = match &self.gifts_path {
            Some(path) => parse_json(&read(path)?, path)?,
            None => builtin.gifts,
        };
        Ok(SeedData { users, gifts })
    }
}

/// User roster plus the default gift set installed by `Reset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedData {
    /// Roster in load order.
    pub users: Vec<User>,
    /// Default gifts.
    pub gifts: Vec<Gift>,
}

impl SeedData {
    /// Seed compiled into the crate.
    pub fn builtin() -> Result<Self, ConfigError> {
        let builtin = Path::new("<builtin>");
        Ok(Self {
            users: parse_json(BUILTIN_USERS, builtin)?,
            gifts: parse_json(BUILTIN_GIFTS, builtin)?,
        })
    }

    /// Parses the two flat JSON lists.
    pub fn from_json(users: &str, gifts: &str) -> Result<Self, ConfigError> {
        let origin = Path::new("<inline>");
        Ok(Self {
            users: parse_json(users, origin)?,
            gifts: parse_json(gifts, origin)?,
        })
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_json<T: serde::de::DeserializeOwned>(text: &str, path: &Path) -> Result<T, ConfigError> {
    serde_json::from_str(text).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}
