//! Data-server configuration.

use crate::error::{DsError, DsResult};
use cpfs_core::{GroupId, GroupRole};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for a data server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataServerConfig {
    /// DS group this server belongs to.
    pub group_id: GroupId,

    /// Role this server occupies in its group.
    pub role: GroupRole,

    /// Number of roles in the group.
    pub group_size: u32,

    /// Whether the optimized resync strategy starts enabled.
    pub opt_resync: bool,

    /// Resync configuration.
    pub resync: ResyncConfig,

    /// Maximum number of reconstructed segments kept while degraded.
    pub degraded_cache_entries: usize,
}

/// Resync pacing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResyncConfig {
    /// Maximum number of inodes admitted into one resync round.
    pub batch_size: usize,

    /// Admission attempts per round before giving up on busy inodes.
    pub quiesce_retries: u32,

    /// Delay between admission attempts, in milliseconds.
    pub retry_backoff_ms: u64,
}

impl Default for DataServerConfig {
    fn default() -> Self {
        Self {
            group_id: GroupId::new(0),
            role: GroupRole::new(0),
            group_size: 5,
            opt_resync: false,
            resync: ResyncConfig::default(),
            degraded_cache_entries: 1024,
        }
    }
}

impl Default for ResyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            quiesce_retries: 3,
            retry_backoff_ms: 50,
        }
    }
}

impl DataServerConfig {
    /// Create a new configuration builder.
    pub fn builder() -> DataServerConfigBuilder {
        DataServerConfigBuilder::default()
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> DsResult<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(DsError::ConfigParse)?;
        config.validate().map_err(DsError::Config)?;
        Ok(config)
    }

    /// Load and validate a YAML configuration file.
    pub fn load_file(path: impl AsRef<Path>) -> DsResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| DsError::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| DsError::ConfigFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate().map_err(DsError::Config)?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.group_size < 2 {
            return Err(format!(
                "group_size must be >= 2, got {}",
                self.group_size
            ));
        }

        if self.role.index() >= self.group_size {
            return Err(format!(
                "role {} is outside a group of {} roles",
                self.role, self.group_size
            ));
        }

        if self.resync.batch_size == 0 {
            return Err("resync.batch_size must be > 0".to_string());
        }

        Ok(())
    }
}

/// Builder for DataServerConfig.
#[derive(Debug, Default)]
pub struct DataServerConfigBuilder {
    config: DataServerConfig,
}

impl DataServerConfigBuilder {
    /// Set the group ID.
    pub fn group_id(mut self, id: GroupId) -> Self {
        self.config.group_id = id;
        self
    }

    /// Set this server's role.
    pub fn role(mut self, role: GroupRole) -> Self {
        self.config.role = role;
        self
    }

    /// Set the number of roles in the group.
    pub fn group_size(mut self, size: u32) -> Self {
        self.config.group_size = size;
        self
    }

    /// Enable or disable the optimized resync strategy.
    pub fn opt_resync(mut self, enabled: bool) -> Self {
        self.config.opt_resync = enabled;
        self
    }

    /// Set the resync batch size.
    pub fn resync_batch_size(mut self, size: usize) -> Self {
        self.config.resync.batch_size = size;
        self
    }

    /// Set how many admission attempts a resync round makes.
    pub fn quiesce_retries(mut self, retries: u32) -> Self {
        self.config.resync.quiesce_retries = retries;
        self
    }

    /// Set the delay between admission attempts.
    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.resync.retry_backoff_ms = ms;
        self
    }

    /// Set the degraded cache capacity.
    pub fn degraded_cache_entries(mut self, entries: usize) -> Self {
        self.config.degraded_cache_entries = entries;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<DataServerConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}
