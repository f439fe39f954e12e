//! asrc-route - audio routing negotiation and ASRC allocation
//!
//! Discovers the live path behind a DMA channel, resolves the format its
//! far end runs at, hands out sample-rate converter units from per-direction
//! pools and programs their tick configuration through a register bus.

pub mod asrc;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod graph;
pub mod hw;
pub mod sync;

pub use engine::{Negotiation, Platform, RestoreReport, RouteEngine};
pub use error::{Result, RouteError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
