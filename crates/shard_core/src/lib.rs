//! Shard Core — configuration and logging shared by the shard binaries.

pub mod config;
pub mod logging;

pub use config::{LogConfig, PortRange, ShardConfig};
pub use logging::init_logging;
