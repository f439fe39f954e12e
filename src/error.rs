//! Unified error types for asrc-route

use crate::format::SlotId;
use crate::graph::{Direction, NodeId};
use thiserror::Error;

/// Main error type for routing negotiation and converter allocation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// No format slot or interface override is reachable from the start node
    #[error("No target format reachable from node {start} ({direction})")]
    PathIncomplete { start: NodeId, direction: Direction },

    /// No converter unit satisfies capacity, lock and pairing constraints
    #[error("No {direction} converter unit available for {channels} channels")]
    AllocationExhausted { direction: Direction, channels: u32 },

    /// A register write did not land
    #[error("Register access failed at {addr:#06x}: {message}")]
    RegisterAccessFailure { addr: u32, message: String },

    /// Firmware did not acknowledge within the bound
    #[error("Firmware did not acknowledge {message} within {timeout_ms}ms")]
    IpcTimeout { message: String, timeout_ms: u64 },

    /// Firmware channel is gone
    #[error("Firmware IPC channel disconnected")]
    IpcDisconnected,

    /// Both or neither converter side is tied to an external tick
    #[error("Invalid tick configuration: input {input}, output {output}")]
    InvalidTickConfiguration { input: String, output: String },

    /// The complementary factor does not fit even at the lowest oversample ratio
    #[error("Converter factor {factor} exceeds field maximum at lowest ratio")]
    TickFactorOverflow { factor: u64 },

    /// Node id outside the graph arena
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// Format slot outside the slot table
    #[error("Unknown format slot: {0}")]
    UnknownSlot(SlotId),

    /// Logical channel outside the pool's slot range
    #[error("Unknown {direction} channel: {channel}")]
    UnknownChannel { direction: Direction, channel: u8 },

    /// Unit is pinned to a different channel
    #[error("Converter unit {unit} is locked to channel {owner}")]
    UnitLocked { unit: u8, owner: u8 },

    /// Unit is converting for another channel
    #[error("Converter unit {unit} is active on channel {channel}")]
    UnitInUse { unit: u8, channel: u8 },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for asrc-route operations
pub type Result<T> = std::result::Result<T, RouteError>;

impl RouteError {
    /// Create a register failure with context
    pub fn register(addr: u32, message: impl Into<String>) -> Self {
        Self::RegisterAccessFailure {
            addr,
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (caller can retry the stream open)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RouteError::RegisterAccessFailure { .. } | RouteError::IpcTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(RouteError::register(0x10, "bus fault").is_recoverable());
        assert!(RouteError::IpcTimeout {
            message: "rate".into(),
            timeout_ms: 10
        }
        .is_recoverable());
        assert!(!RouteError::AllocationExhausted {
            direction: Direction::Playback,
            channels: 8
        }
        .is_recoverable());
        assert!(!RouteError::IpcDisconnected.is_recoverable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = RouteError::register(0x1004, "nack");
        assert_eq!(err.to_string(), "Register access failed at 0x1004: nack");
    }
}
