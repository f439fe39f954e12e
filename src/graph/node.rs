//! Node identification and kinds for the routing graph

use crate::format::{PcmFormat, SlotId};
use serde::{Deserialize, Serialize};

/// Arena index of a node in the routing graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u16);

impl NodeId {
    /// Position in the arena
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stream direction; playback walks downstream, capture walks upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Playback,
    Capture,
}

impl Direction {
    /// Both directions, in pool order
    pub const ALL: [Direction; 2] = [Direction::Playback, Direction::Capture];

    /// Index used for per-direction arrays
    #[inline]
    pub fn index(&self) -> usize {
        match self {
            Direction::Playback => 0,
            Direction::Capture => 1,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Playback => write!(f, "playback"),
            Direction::Capture => write!(f, "capture"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "playback" | "p" => Ok(Direction::Playback),
            "capture" | "c" => Ok(Direction::Capture),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

/// What a node does on the signal path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// DMA engine feeding (playback) or draining (capture) one logical channel
    DmaEndpoint { channel: u8, direction: Direction },
    /// Named point whose stored format other blocks treat as their target
    FormatSlot { slot: SlotId },
    /// Per-channel converter position on the path
    ConversionUnit { channel: u8 },
    /// Software-selectable switch; only the selected neighbour is live
    Selector,
    /// Physical interface, optionally forcing its own format on the path
    PhysicalInterface { override_format: Option<PcmFormat> },
}

impl NodeKind {
    pub fn is_selector(&self) -> bool {
        matches!(self, NodeKind::Selector)
    }
}

/// One node in the graph arena
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    /// Static downstream neighbours
    pub downstream: Vec<NodeId>,
}

impl Node {
    pub fn new(id: NodeId, name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            downstream: Vec::new(),
        }
    }
}
