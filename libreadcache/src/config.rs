use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_BLOCK_SIZE: u32 = 64 * 1024;
pub const DEFAULT_CHUNK_SIZE: u32 = 64 * 1024 * 1024;

/// Tunables of the read path, usually taken from the mount options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReadCacheConfig {
    /// Retry budget shared by the no-valid-copies and recoverable policies.
    pub max_retries: u32,
    /// Period of the sweep task.
    pub sweep_interval_ms: u64,
    /// Sweep ticks after which a session re-resolves chunk locations.
    pub refresh_ticks: u8,
    /// log2 of the number of registry buckets.
    pub bucket_bits: u8,
    pub block_size: u32,
    pub chunk_size: u32,
    /// Local address bound by outgoing chunk-server connections.
    pub source_ip: Option<Ipv4Addr>,
    pub connect_timeout_ms: u64,
    /// How long a returned connection stays parked in the pool.
    pub idle_connection_timeout_ms: u64,
}

impl Default for ReadCacheConfig {
    fn default() -> Self {
        Self {
            max_retries: 30,
            sweep_interval_ms: 333,
            refresh_ticks: 15,
            bucket_bits: 10,
            block_size: DEFAULT_BLOCK_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            source_ip: None,
            connect_timeout_ms: 1000,
            idle_connection_timeout_ms: 6000,
        }
    }
}

impl ReadCacheConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let cfg: ReadCacheConfig = serde_yaml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "block_size must be a power of two, got {}",
                self.block_size
            )));
        }
        if self.chunk_size == 0 || self.chunk_size % self.block_size != 0 {
            return Err(ConfigError::Invalid(format!(
                "chunk_size ({}) must be a non-zero multiple of block_size ({})",
                self.chunk_size, self.block_size
            )));
        }
        if self.refresh_ticks == 0 {
            return Err(ConfigError::Invalid("refresh_ticks must be positive".into()));
        }
        if self.bucket_bits > 20 {
            return Err(ConfigError::Invalid(format!(
                "bucket_bits must be at most 20, got {}",
                self.bucket_bits
            )));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_connection_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_connection_timeout_ms)
    }

    pub fn bucket_count(&self) -> usize {
        1usize << self.bucket_bits
    }
}
