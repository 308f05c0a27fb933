//! Configuration for a bootstrap session.

use std::net::{IpAddr, Ipv4Addr};
use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Half-open port range hosts draw their listen ports from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn as_range(&self) -> Range<u16> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.as_range().len()
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 3000,
            end: 3500,
        }
    }
}

/// Where log lines go and how much of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `shard_network=debug,warn`.
    /// `RUST_LOG` takes precedence when set.
    pub filter: String,

    /// Directory for daily rolling log files. Console only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            log_dir: None,
        }
    }
}

/// Settings for one provisioning + join run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardConfig {
    /// Identity seed. `0` draws keys from the OS random source.
    pub seed: i64,

    /// Shard the client joins.
    pub shard_id: u32,

    /// Number of shards to provision bootstrap hosts for.
    pub shard_count: u32,

    /// Address every host binds on.
    pub listen_ip: IpAddr,

    pub port_range: PortRange,

    pub log: LogConfig,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            shard_id: 1,
            shard_count: 5,
            listen_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port_range: PortRange::default(),
            log: LogConfig::default(),
        }
    }
}

impl ShardConfig {
    /// Save the config to a JSON file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config: {}", path.display()))
    }

    /// Load config from a JSON file. Missing keys take their defaults; a
    /// missing, unreadable or malformed file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    /// Load config from a JSON file, or return defaults if the file is
    /// missing or unreadable.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(data) => match serde_json::from_str::<ShardConfig>(&data) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Corrupt config file, using defaults: {e}");
                    }
                },
                Err(e) => {
                    tracing::warn!("Cannot read config file, using defaults: {e}");
                }
            }
        }
        Self::default()
    }

    /// Reject settings no session could run with.
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            bail!("shard_count must be at least 1");
        }
        if self.shard_id >= self.shard_count {
            bail!(
                "shard_id {} is out of range for {} shards",
                self.shard_id,
                self.shard_count
            );
        }
        if self.port_range.is_empty() {
            bail!(
                "port range {}..{} is empty",
                self.port_range.start,
                self.port_range.end
            );
        }
        if self.log.filter.trim().is_empty() {
            bail!("log filter must not be empty");
        }
        crate::logging::parse_filter(&self.log.filter)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
