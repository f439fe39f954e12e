//! Platform description file support
//!
//! Topology, format slots, converter pools and tick settings are data, loaded
//! from TOML. Pairing tables differ between hardware revisions and live here
//! rather than in the allocator.

use crate::asrc::{AsrcPool, ChannelConfig, PairingGroup};
use crate::engine::Platform;
use crate::error::RouteError;
use crate::format::{FormatSlot, PcmFormat, SlotId, SlotTable};
use crate::graph::{Direction, GraphBuilder, NodeId, NodeKind};
use crate::sync::{TickRouter, TickSource, DEFAULT_FACTOR};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// File name looked up next to the executable
pub const CONFIG_FILE_NAME: &str = "asrc-route.toml";

/// Converter pool for one direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum channels per unit, indexed by unit id
    pub capacities: Vec<u32>,
    /// Allocation search order
    pub priority: Vec<u8>,
    #[serde(default)]
    pub groups: Vec<PairingGroup>,
    /// Per-channel tick sources and flags; missing channels use defaults
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

impl PoolConfig {
    fn build(&self, direction: Direction) -> Result<AsrcPool, RouteError> {
        AsrcPool::new(
            direction,
            &self.capacities,
            &self.priority,
            self.groups.clone(),
            &self.channels,
        )
    }
}

/// One format slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConfig {
    pub name: String,
    pub direction: Direction,
    /// Slot whose format this one copies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<String>,
    #[serde(default = "default_true")]
    pub has_register: bool,
    pub format: PcmFormat,
    /// Minimum format; setting it enables the floor rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor: Option<PcmFormat>,
}

fn default_true() -> bool {
    true
}

/// One graph node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeConfig {
    Dma {
        name: String,
        channel: u8,
        direction: Direction,
    },
    Slot {
        name: String,
        slot: String,
    },
    Asrc {
        name: String,
        channel: u8,
    },
    Selector {
        name: String,
    },
    Interface {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        override_format: Option<PcmFormat>,
    },
}

impl NodeConfig {
    pub fn name(&self) -> &str {
        match self {
            NodeConfig::Dma { name, .. }
            | NodeConfig::Slot { name, .. }
            | NodeConfig::Asrc { name, .. }
            | NodeConfig::Selector { name }
            | NodeConfig::Interface { name, .. } => name,
        }
    }
}

/// Platform description loaded from a TOML file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Audio bus clock in Hz
    #[serde(default = "default_bus_clock")]
    pub bus_clock_hz: u64,

    /// Nominal factor for asynchronous converter operation
    #[serde(default = "default_factor")]
    pub default_factor: u32,

    /// Bound on acknowledged firmware messages
    #[serde(default = "default_ipc_timeout")]
    pub ipc_timeout_ms: u64,

    /// Static edges as [from, to] node names
    #[serde(default)]
    pub edges: Vec<[String; 2]>,

    /// Initial selector choices, selector name to neighbour name
    #[serde(default)]
    pub selections: BTreeMap<String, String>,

    pub playback: PoolConfig,
    pub capture: PoolConfig,
    pub slots: Vec<SlotConfig>,
    pub nodes: Vec<NodeConfig>,
}

fn default_bus_clock() -> u64 {
    400_000_000
}

fn default_factor() -> u32 {
    DEFAULT_FACTOR
}

fn default_ipc_timeout() -> u64 {
    100
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self::sample()
    }
}

impl PlatformConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path_str.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path_str,
            source: e,
        })
    }

    /// Load configuration from default locations
    ///
    /// Searches in order:
    /// 1. Same directory as executable: asrc-route.toml
    /// 2. User config directory: asrc-route/config.toml
    ///
    /// Falls back to the built-in reference platform.
    pub fn load_default() -> Result<Self, ConfigError> {
        for path in Self::default_paths() {
            if path.exists() {
                debug!("Loading platform from {}", path.display());
                return Self::load(&path);
            }
        }
        Ok(Self::sample())
    }

    fn default_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                paths.push(exe_dir.join(CONFIG_FILE_NAME));
            }
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("asrc-route").join("config.toml"));
        }
        paths
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = self.to_toml()?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_string_lossy().to_string(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Reference description with commented header, as printed by `sample-config`
    pub fn sample_config() -> Result<String, ConfigError> {
        let body = Self::sample().to_toml()?;
        Ok(format!(
            "# asrc-route platform description\n\
             #\n\
             # nodes/edges describe the routing graph; selections set the initial\n\
             # selector choices. Pool pairing groups share one channel budget.\n\
             # Tick sources: sync, cp, uaif0..uaif3, usb.\n\n{}",
            body
        ))
    }

    /// Check that the description builds
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.build().map(|_| ()).map_err(ConfigError::Invalid)
    }

    /// Build the runtime platform
    pub fn build(&self) -> Result<Platform, RouteError> {
        if self.default_factor == 0 {
            return Err(RouteError::InvalidConfig("default_factor must be non-zero".into()));
        }

        let slots = self.build_slots()?;
        let graph = {
            let mut b = GraphBuilder::new();
            let mut ids: HashMap<&str, NodeId> = HashMap::new();

            for node in &self.nodes {
                let kind = match node {
                    NodeConfig::Dma {
                        channel, direction, ..
                    } => NodeKind::DmaEndpoint {
                        channel: *channel,
                        direction: *direction,
                    },
                    NodeConfig::Slot { slot, .. } => NodeKind::FormatSlot {
                        slot: slots.find(slot).ok_or_else(|| {
                            RouteError::InvalidConfig(format!("node '{}' names unknown slot '{}'", node.name(), slot))
                        })?,
                    },
                    NodeConfig::Asrc { channel, .. } => NodeKind::ConversionUnit { channel: *channel },
                    NodeConfig::Selector { .. } => NodeKind::Selector,
                    NodeConfig::Interface { override_format, .. } => NodeKind::PhysicalInterface {
                        override_format: *override_format,
                    },
                };
                let id = b.add_node(node.name(), kind);
                if ids.insert(node.name(), id).is_some() {
                    return Err(RouteError::InvalidConfig(format!(
                        "duplicate node name '{}'",
                        node.name()
                    )));
                }
            }

            let lookup = |name: &str| {
                ids.get(name)
                    .copied()
                    .ok_or_else(|| RouteError::InvalidConfig(format!("unknown node '{}'", name)))
            };

            for [from, to] in &self.edges {
                b.connect(lookup(from)?, lookup(to)?);
            }

            let graph = b.build()?;
            for (selector, target) in &self.selections {
                graph.set_selection(lookup(selector)?, Some(lookup(target)?))?;
            }
            graph
        };

        Ok(Platform {
            graph,
            slots,
            playback: self.playback.build(Direction::Playback)?,
            capture: self.capture.build(Direction::Capture)?,
            router: TickRouter::new(self.default_factor, self.bus_clock_hz),
            ipc_timeout: Duration::from_millis(self.ipc_timeout_ms),
        })
    }

    fn build_slots(&self) -> Result<SlotTable, RouteError> {
        let mut table = SlotTable::new();
        for cfg in &self.slots {
            if table.find(&cfg.name).is_some() {
                return Err(RouteError::InvalidConfig(format!("duplicate slot '{}'", cfg.name)));
            }
            let mut slot = FormatSlot::new(SlotId(0), &cfg.name, cfg.direction, cfg.format);
            if let Some(floor) = cfg.floor {
                slot = slot.with_floor(floor);
            }
            slot.has_register = cfg.has_register;
            table.push(slot);
        }

        for cfg in &self.slots {
            let Some(master) = &cfg.master else {
                continue;
            };
            let master_id = table.find(master).ok_or_else(|| {
                RouteError::InvalidConfig(format!("slot '{}' names unknown master '{}'", cfg.name, master))
            })?;
            if *master == cfg.name {
                return Err(RouteError::InvalidConfig(format!("slot '{}' is its own master", cfg.name)));
            }
            if let Some(id) = table.find(&cfg.name) {
                table.get_mut(id)?.master = Some(master_id);
            }
        }
        Ok(table)
    }

    /// Built-in reference platform
    ///
    /// Four playback DMAs feed per-channel converters and output selectors in
    /// front of two playback slots; two capture paths come back through input
    /// selectors. UAIF1 carries a fixed 16 kHz link and SIFM1 is slaved to
    /// SIFS0 as an echo reference.
    pub fn sample() -> Self {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        let mut selections = BTreeMap::new();
        let edge = |a: &str, b: &str| [a.to_string(), b.to_string()];

        for ch in 0..4u8 {
            nodes.push(NodeConfig::Dma {
                name: format!("RDMA{}", ch),
                channel: ch,
                direction: Direction::Playback,
            });
            nodes.push(NodeConfig::Asrc {
                name: format!("SPUS ASRC{}", ch),
                channel: ch,
            });
            nodes.push(NodeConfig::Selector {
                name: format!("SPUS OUT{}", ch),
            });
        }
        for name in ["SIFS0", "SIFS1"] {
            nodes.push(NodeConfig::Slot {
                name: name.into(),
                slot: name.into(),
            });
        }
        nodes.push(NodeConfig::Interface {
            name: "UAIF0".into(),
            override_format: None,
        });
        nodes.push(NodeConfig::Interface {
            name: "UAIF1".into(),
            override_format: Some(PcmFormat::new(16000, 16, 2)),
        });
        for ch in 0..2u8 {
            nodes.push(NodeConfig::Selector {
                name: format!("NSRC{}", ch),
            });
            nodes.push(NodeConfig::Slot {
                name: format!("SIFM{}", ch),
                slot: format!("SIFM{}", ch),
            });
            nodes.push(NodeConfig::Asrc {
                name: format!("SPUM ASRC{}", ch),
                channel: ch,
            });
            nodes.push(NodeConfig::Dma {
                name: format!("WDMA{}", ch),
                channel: ch,
                direction: Direction::Capture,
            });
        }

        for ch in 0..4 {
            let rdma = format!("RDMA{}", ch);
            let asrc = format!("SPUS ASRC{}", ch);
            let out = format!("SPUS OUT{}", ch);
            edges.push(edge(&rdma, &asrc));
            edges.push(edge(&asrc, &out));
            edges.push(edge(&out, "SIFS0"));
            edges.push(edge(&out, "SIFS1"));
        }
        edges.push(edge("SIFS0", "UAIF0"));
        edges.push(edge("SIFS1", "UAIF1"));
        for ch in 0..2 {
            let nsrc = format!("NSRC{}", ch);
            let sifm = format!("SIFM{}", ch);
            let asrc = format!("SPUM ASRC{}", ch);
            edges.push(edge("UAIF0", &nsrc));
            edges.push(edge("UAIF1", &nsrc));
            edges.push(edge(&nsrc, &sifm));
            edges.push(edge(&sifm, &asrc));
            edges.push(edge(&asrc, &format!("WDMA{}", ch)));
        }

        selections.insert("SPUS OUT0".to_string(), "SIFS0".to_string());
        selections.insert("SPUS OUT1".to_string(), "SIFS0".to_string());
        selections.insert("SPUS OUT2".to_string(), "SIFS1".to_string());
        selections.insert("NSRC0".to_string(), "UAIF0".to_string());
        selections.insert("NSRC1".to_string(), "UAIF1".to_string());

        let slots = vec![
            SlotConfig {
                name: "SIFS0".into(),
                direction: Direction::Playback,
                master: None,
                has_register: true,
                format: PcmFormat::new(48000, 16, 2),
                floor: Some(PcmFormat::new(48000, 16, 2)),
            },
            SlotConfig {
                name: "SIFS1".into(),
                direction: Direction::Playback,
                master: None,
                has_register: true,
                format: PcmFormat::new(48000, 16, 2),
                floor: None,
            },
            SlotConfig {
                name: "SIFM0".into(),
                direction: Direction::Capture,
                master: None,
                has_register: true,
                format: PcmFormat::new(48000, 16, 2),
                floor: None,
            },
            SlotConfig {
                name: "SIFM1".into(),
                direction: Direction::Capture,
                master: Some("SIFS0".into()),
                has_register: true,
                format: PcmFormat::new(48000, 16, 2),
                floor: None,
            },
        ];

        let mut playback_channels = vec![ChannelConfig::default(); 4];
        playback_channels[3].input_tick = TickSource::Cp;
        let mut capture_channels = vec![ChannelConfig::default(); 2];
        capture_channels[1].input_tick = TickSource::Uaif(1);

        Self {
            bus_clock_hz: default_bus_clock(),
            default_factor: DEFAULT_FACTOR,
            ipc_timeout_ms: default_ipc_timeout(),
            edges,
            selections,
            playback: PoolConfig {
                capacities: [8, 4, 4, 2].repeat(3),
                priority: vec![3, 7, 11, 2, 6, 10, 1, 5, 9, 0, 4, 8],
                groups: pairs(12),
                channels: playback_channels,
            },
            capture: PoolConfig {
                capacities: [8, 4, 4, 2].repeat(2),
                priority: vec![3, 7, 2, 6, 1, 5, 0, 4],
                groups: pairs(8),
                channels: capture_channels,
            },
            slots,
            nodes,
        }
    }
}

/// Even/odd unit pairs; the even unit's capacity is the shared budget
fn pairs(units: u8) -> Vec<PairingGroup> {
    (0..units)
        .step_by(2)
        .map(|even| PairingGroup {
            members: vec![even, even + 1],
            budget: if even % 4 == 0 { 8 } else { 4 },
        })
        .collect()
}

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading/writing config file
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing TOML
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    /// Error serializing config
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Description does not form a valid platform
    #[error("Invalid platform description: {0}")]
    Invalid(#[from] RouteError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_builds() {
        let cfg = PlatformConfig::sample();
        cfg.validate().unwrap();

        let platform = cfg.build().unwrap();
        assert_eq!(platform.playback.len(), 12);
        assert_eq!(platform.capture.len(), 8);
        assert_eq!(platform.slots.len(), 4);
        assert_eq!(platform.ipc_timeout, Duration::from_millis(100));

        let out0 = platform.graph.find("SPUS OUT0").unwrap();
        assert_eq!(platform.graph.selection(out0), platform.graph.find("SIFS0"));
        let sifm1 = platform.slots.find("SIFM1").unwrap();
        assert_eq!(platform.slots.get(sifm1).unwrap().master, platform.slots.find("SIFS0"));
    }

    #[test]
    fn test_toml_round_trip() {
        let cfg = PlatformConfig::sample();
        let text = cfg.to_toml().unwrap();
        let parsed: PlatformConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, cfg);
        assert!(PlatformConfig::sample_config().unwrap().starts_with("# asrc-route"));
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let text = r#"
            edges = [["RDMA0", "SIFS0"]]

            [playback]
            capacities = [8, 4]
            priority = [1, 0]

            [capture]
            capacities = [2]
            priority = [0]

            [[slots]]
            name = "SIFS0"
            direction = "playback"
            format = { rate = 48000, width = 16, channels = 2 }

            [[nodes]]
            kind = "dma"
            name = "RDMA0"
            channel = 0
            direction = "playback"

            [[nodes]]
            kind = "slot"
            name = "SIFS0"
            slot = "SIFS0"
        "#;
        let cfg: PlatformConfig = toml::from_str(text).unwrap();
        assert_eq!(cfg.bus_clock_hz, 400_000_000);
        assert_eq!(cfg.default_factor, DEFAULT_FACTOR);
        assert!(cfg.slots[0].has_register);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_invalid_descriptions() {
        let mut cfg = PlatformConfig::sample();
        cfg.edges.push(["RDMA0".into(), "NOWHERE".into()]);
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        let mut cfg = PlatformConfig::sample();
        cfg.slots[3].master = Some("SIFM1".into());
        assert!(cfg.validate().is_err());

        let mut cfg = PlatformConfig::sample();
        cfg.playback.priority.pop();
        assert!(cfg.validate().is_err());

        let mut cfg = PlatformConfig::sample();
        cfg.selections.insert("NSRC0".into(), "WDMA1".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("asrc-route-test-{}", std::process::id()));
        let path = dir.join("platform.toml");
        let cfg = PlatformConfig::sample();
        cfg.save(&path).unwrap();
        assert_eq!(PlatformConfig::load(&path).unwrap(), cfg);
        let _ = std::fs::remove_dir_all(&dir);

        assert!(matches!(
            PlatformConfig::load(dir.join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
