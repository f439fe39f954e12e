//! Command line and platform description

mod args;
mod platform;

pub use args::{Args, Command};
pub use platform::{ConfigError, NodeConfig, PlatformConfig, PoolConfig, SlotConfig, CONFIG_FILE_NAME};
