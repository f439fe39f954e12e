//! Per-direction converter unit pool

use crate::error::{Result, RouteError};
use crate::graph::Direction;
use crate::sync::{TickConfig, TickSource};
use serde::{Deserialize, Serialize};

/// One physical converter unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionUnit {
    pub id: u8,
    /// Maximum channels the unit converts
    pub capacity: u32,
    pub channels_in_use: u32,
    /// Last configuration committed to the unit, replayed on restore
    pub tick: Option<TickConfig>,
}

/// Units that share one combined channel budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingGroup {
    pub members: Vec<u8>,
    pub budget: u32,
}

/// Static per-channel converter settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub input_tick: TickSource,
    pub output_tick: TickSource,
    /// Keep the converter in the path even when formats match
    pub force_enable: bool,
    pub apf_coef: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            input_tick: TickSource::Sync,
            output_tick: TickSource::Sync,
            force_enable: false,
            apf_coef: 0,
        }
    }
}

/// Converter position on one logical channel's path
///
/// Mirrors the channel's slot register: which unit serves it and whether
/// conversion is switched on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSlot {
    pub unit: u8,
    pub enabled: bool,
    /// Unit pinned to this channel
    pub pinned: Option<u8>,
    pub config: ChannelConfig,
}

/// Diagnostic view of one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    pub id: u8,
    pub capacity: u32,
    pub channel: u8,
    pub active: bool,
    pub channels_in_use: u32,
    pub lock_owner: Option<u8>,
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unit {:2} cap {} -> ch {:2} {} {}/{}",
            self.id,
            self.capacity,
            self.channel,
            if self.active { "on " } else { "off" },
            self.channels_in_use,
            self.capacity
        )?;
        if let Some(owner) = self.lock_owner {
            write!(f, " locked:{}", owner)?;
        }
        Ok(())
    }
}

/// Fixed set of converter units for one direction
///
/// Logical channel `n` and slot `n` are the same thing; initially slot `n`
/// holds unit `n`.
#[derive(Debug, Clone)]
pub struct AsrcPool {
    direction: Direction,
    units: Vec<ConversionUnit>,
    slots: Vec<ChannelSlot>,
    priority: Vec<u8>,
    groups: Vec<PairingGroup>,
}

impl AsrcPool {
    /// Build a pool from its static tables
    ///
    /// `priority` must name every unit once; group members must be valid and
    /// appear in at most one group.
    pub fn new(
        direction: Direction,
        capacities: &[u32],
        priority: &[u8],
        groups: Vec<PairingGroup>,
        channels: &[ChannelConfig],
    ) -> Result<Self> {
        let n = capacities.len();
        if n == 0 || n > 16 {
            return Err(RouteError::InvalidConfig(format!(
                "{} pool must have 1..=16 units, got {}",
                direction, n
            )));
        }

        let mut sorted = priority.to_vec();
        sorted.sort_unstable();
        if sorted != (0..n as u8).collect::<Vec<_>>() {
            return Err(RouteError::InvalidConfig(format!(
                "{} priority order must list each of the {} units once",
                direction, n
            )));
        }

        let mut grouped = vec![false; n];
        for group in &groups {
            for &m in &group.members {
                if m as usize >= n || grouped[m as usize] {
                    return Err(RouteError::InvalidConfig(format!(
                        "{} pairing group member {} is unknown or repeated",
                        direction, m
                    )));
                }
                grouped[m as usize] = true;
            }
        }

        if channels.len() > n {
            return Err(RouteError::InvalidConfig(format!(
                "{} pool has {} units but {} channel settings",
                direction,
                n,
                channels.len()
            )));
        }

        let units = capacities
            .iter()
            .enumerate()
            .map(|(i, &capacity)| ConversionUnit {
                id: i as u8,
                capacity,
                channels_in_use: 0,
                tick: None,
            })
            .collect();

        let slots = (0..n)
            .map(|i| ChannelSlot {
                unit: i as u8,
                enabled: false,
                pinned: None,
                config: channels.get(i).copied().unwrap_or_default(),
            })
            .collect();

        Ok(Self {
            direction,
            units,
            slots,
            priority: priority.to_vec(),
            groups,
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Number of units, which is also the number of channels
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn priority(&self) -> &[u8] {
        &self.priority
    }

    pub fn groups(&self) -> &[PairingGroup] {
        &self.groups
    }

    pub fn unit(&self, id: u8) -> Result<&ConversionUnit> {
        self.units
            .get(id as usize)
            .ok_or_else(|| RouteError::InvalidConfig(format!("no {} unit {}", self.direction, id)))
    }

    pub(crate) fn unit_mut(&mut self, id: u8) -> Result<&mut ConversionUnit> {
        let direction = self.direction;
        self.units
            .get_mut(id as usize)
            .ok_or_else(|| RouteError::InvalidConfig(format!("no {} unit {}", direction, id)))
    }

    pub fn channel(&self, channel: u8) -> Result<&ChannelSlot> {
        self.slots
            .get(channel as usize)
            .ok_or(RouteError::UnknownChannel {
                direction: self.direction,
                channel,
            })
    }

    pub(crate) fn channel_mut(&mut self, channel: u8) -> Result<&mut ChannelSlot> {
        let direction = self.direction;
        self.slots
            .get_mut(channel as usize)
            .ok_or(RouteError::UnknownChannel { direction, channel })
    }

    pub fn channels(&self) -> impl Iterator<Item = (u8, &ChannelSlot)> {
        self.slots.iter().enumerate().map(|(i, s)| (i as u8, s))
    }

    /// Channel slot currently holding `unit`
    pub fn slot_of(&self, unit: u8) -> Option<u8> {
        self.slots
            .iter()
            .position(|s| s.unit == unit)
            .map(|i| i as u8)
    }

    pub fn capacity(&self, id: u8) -> u32 {
        self.units.get(id as usize).map_or(0, |u| u.capacity)
    }

    pub fn channels_in_use(&self, id: u8) -> u32 {
        self.units.get(id as usize).map_or(0, |u| u.channels_in_use)
    }

    /// A unit is active when the slot holding it has conversion enabled
    pub fn is_active(&self, id: u8) -> bool {
        self.slot_of(id)
            .map_or(false, |ch| self.slots[ch as usize].enabled)
    }

    /// Channel the unit is pinned to
    pub fn lock_owner(&self, id: u8) -> Option<u8> {
        self.slots
            .iter()
            .position(|s| s.pinned == Some(id))
            .map(|i| i as u8)
    }

    pub fn group_of(&self, id: u8) -> Option<&PairingGroup> {
        self.groups.iter().find(|g| g.members.contains(&id))
    }

    pub fn snapshot(&self) -> Vec<UnitStatus> {
        self.units
            .iter()
            .map(|u| UnitStatus {
                id: u.id,
                capacity: u.capacity,
                channel: self.slot_of(u.id).unwrap_or(u8::MAX),
                active: self.is_active(u.id),
                channels_in_use: u.channels_in_use,
                lock_owner: self.lock_owner(u.id),
            })
            .collect()
    }

    pub(crate) fn map_unit(&mut self, channel: u8, unit: u8) {
        self.slots[channel as usize].unit = unit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> AsrcPool {
        AsrcPool::new(
            Direction::Capture,
            &[8, 4, 4, 2],
            &[2, 0, 1, 3],
            vec![
                PairingGroup {
                    members: vec![0, 1],
                    budget: 8,
                },
                PairingGroup {
                    members: vec![2, 3],
                    budget: 4,
                },
            ],
            &[],
        )
        .unwrap()
    }

    #[test]
    fn test_initial_identity_mapping() {
        let pool = pool();
        for id in 0..4 {
            assert_eq!(pool.slot_of(id), Some(id));
            assert!(!pool.is_active(id));
            assert_eq!(pool.lock_owner(id), None);
        }
        assert_eq!(pool.capacity(0), 8);
        assert_eq!(pool.capacity(3), 2);
        assert_eq!(pool.group_of(3).unwrap().budget, 4);
    }

    #[test]
    fn test_rejects_bad_tables() {
        assert!(AsrcPool::new(Direction::Playback, &[8, 4], &[0, 0], vec![], &[]).is_err());
        assert!(AsrcPool::new(Direction::Playback, &[8, 4], &[1, 0], vec![], &[]).is_ok());
        let dup = PairingGroup {
            members: vec![0, 1],
            budget: 8,
        };
        assert!(AsrcPool::new(Direction::Playback, &[8, 4], &[1, 0], vec![dup.clone(), dup], &[]).is_err());
        assert!(AsrcPool::new(Direction::Playback, &[], &[], vec![], &[]).is_err());
    }

    #[test]
    fn test_unknown_channel() {
        let pool = pool();
        assert_eq!(
            pool.channel(9).unwrap_err(),
            RouteError::UnknownChannel {
                direction: Direction::Capture,
                channel: 9
            }
        );
    }
}
