//! Format slots and the table that owns them

use crate::error::{Result, RouteError};
use crate::format::PcmFormat;
use crate::graph::Direction;
use serde::{Deserialize, Serialize};

/// Index of a format slot in the slot table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(pub u16);

impl SlotId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot{}", self.0)
    }
}

/// Software-controlled point whose format other blocks treat as their target
#[derive(Debug, Clone)]
pub struct FormatSlot {
    pub id: SlotId,
    pub name: String,
    /// Direction used when discovering this slot's own path
    pub direction: Direction,
    current: PcmFormat,
    /// Per-component minimum applied when `auto_config` is set
    pub floor: PcmFormat,
    pub auto_config: bool,
    /// Slot this one copies its format from (one hop only)
    pub master: Option<SlotId>,
    /// Whether the slot has a hardware format field
    pub has_register: bool,
}

impl FormatSlot {
    pub fn new(id: SlotId, name: impl Into<String>, direction: Direction, current: PcmFormat) -> Self {
        Self {
            id,
            name: name.into(),
            direction,
            current,
            floor: PcmFormat::new(0, 0, 0),
            auto_config: false,
            master: None,
            has_register: true,
        }
    }

    /// Enable the floor rule with the given minimum
    pub fn with_floor(mut self, floor: PcmFormat) -> Self {
        self.floor = floor;
        self.auto_config = true;
        self
    }

    pub fn with_master(mut self, master: SlotId) -> Self {
        self.master = Some(master);
        self
    }

    /// Last stored triple, before the floor rule
    pub fn stored(&self) -> PcmFormat {
        self.current
    }

    pub fn store(&mut self, format: PcmFormat) {
        self.current = format;
    }

    /// Format other blocks must target
    pub fn effective(&self) -> PcmFormat {
        if self.auto_config {
            self.current.at_least(&self.floor)
        } else {
            self.current
        }
    }
}

/// All format slots, indexed by `SlotId`
#[derive(Debug, Clone, Default)]
pub struct SlotTable {
    slots: Vec<FormatSlot>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a slot; its id is reassigned to its table position
    pub fn push(&mut self, mut slot: FormatSlot) -> SlotId {
        let id = SlotId(self.slots.len() as u16);
        slot.id = id;
        self.slots.push(slot);
        id
    }

    pub fn get(&self, id: SlotId) -> Result<&FormatSlot> {
        self.slots.get(id.index()).ok_or(RouteError::UnknownSlot(id))
    }

    pub fn get_mut(&mut self, id: SlotId) -> Result<&mut FormatSlot> {
        self.slots
            .get_mut(id.index())
            .ok_or(RouteError::UnknownSlot(id))
    }

    pub fn find(&self, name: &str) -> Option<SlotId> {
        self.slots.iter().find(|s| s.name == name).map(|s| s.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FormatSlot> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_applies_only_with_auto_config() {
        let slot = FormatSlot::new(SlotId(0), "SIFS0", Direction::Playback, PcmFormat::new(8000, 16, 1));
        assert_eq!(slot.effective(), PcmFormat::new(8000, 16, 1));

        let slot = slot.with_floor(PcmFormat::new(48000, 16, 2));
        assert_eq!(slot.effective(), PcmFormat::new(48000, 16, 2));
        assert_eq!(slot.stored(), PcmFormat::new(8000, 16, 1));
    }

    #[test]
    fn test_table_assigns_ids() {
        let mut table = SlotTable::new();
        let a = table.push(FormatSlot::new(SlotId(7), "A", Direction::Playback, PcmFormat::default()));
        let b = table.push(FormatSlot::new(SlotId(7), "B", Direction::Capture, PcmFormat::default()));
        assert_eq!(a, SlotId(0));
        assert_eq!(b, SlotId(1));
        assert_eq!(table.find("B"), Some(b));
        assert_eq!(table.get(b).unwrap().id, b);
        assert!(matches!(table.get(SlotId(5)), Err(RouteError::UnknownSlot(SlotId(5)))));
    }
}
