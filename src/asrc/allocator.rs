//! Converter unit assignment, exchange and release

use crate::asrc::AsrcPool;
use crate::error::{Result, RouteError};
use crate::hw::regs;
use crate::hw::RegisterBus;
use tracing::{debug, error, info, warn};

/// Assignment logic over one direction's pool
///
/// Borrows the pool for the duration of one request; callers hold the pool
/// mutex for as long as the allocator lives.
pub struct AsrcAllocator<'a> {
    pool: &'a mut AsrcPool,
    bus: &'a dyn RegisterBus,
}

impl<'a> AsrcAllocator<'a> {
    pub fn new(pool: &'a mut AsrcPool, bus: &'a dyn RegisterBus) -> Self {
        Self { pool, bus }
    }

    /// Find a unit for `channel` and move it into the channel's slot
    ///
    /// A unit pinned to the channel always wins over the search.
    pub fn assign(&mut self, channel: u8, channels: u32) -> Result<u8> {
        let direction = self.pool.direction();
        let slot = self.pool.channel(channel)?.clone();

        let unit = match slot.pinned {
            Some(unit) => {
                if self.pool.capacity(unit) < channels {
                    return Err(RouteError::AllocationExhausted {
                        direction,
                        channels,
                    });
                }
                unit
            }
            None => self
                .pool
                .priority()
                .iter()
                .copied()
                .find(|&id| self.is_eligible(channel, id, channels))
                .ok_or(RouteError::AllocationExhausted {
                    direction,
                    channels,
                })?,
        };

        let previous = slot.unit;
        let holder = self
            .pool
            .slot_of(unit)
            .ok_or_else(|| RouteError::InvalidConfig(format!("unit {} has no slot", unit)))?;
        self.exchange(channel, holder)?;
        self.write_unit_id(channel)?;

        if previous != unit {
            self.pool.unit_mut(previous)?.channels_in_use = 0;
        }
        self.pool.unit_mut(unit)?.channels_in_use = channels;
        self.set_enabled(channel, true)?;

        info!(
            "asrc {} ch{} -> unit {} ({} channels)",
            direction, channel, unit, channels
        );
        Ok(unit)
    }

    fn is_eligible(&self, channel: u8, id: u8, channels: u32) -> bool {
        let pool = &*self.pool;
        let current = pool.channel(channel).map(|s| s.unit).ok();
        let own = current == Some(id);

        let eligible = pool.capacity(id) >= channels
            && (own || !pool.is_active(id))
            && pool.lock_owner(id).map_or(true, |owner| owner == channel)
            && self.group_allows(channel, id, channels);

        debug!("asrc {} unit {} for ch{} ({}): {}", pool.direction(), id, channel, channels, eligible);
        eligible
    }

    /// Budget check: other active members plus the request fit the group
    fn group_allows(&self, channel: u8, id: u8, channels: u32) -> bool {
        let pool = &*self.pool;
        let Some(group) = pool.group_of(id) else {
            return true;
        };

        let used: u32 = group
            .members
            .iter()
            .copied()
            .filter(|&m| m != id && pool.is_active(m) && pool.slot_of(m) != Some(channel))
            .map(|m| pool.channels_in_use(m))
            .sum();

        used + channels <= group.budget
    }

    /// Swap the units held by two channel slots
    ///
    /// Slot `a` is written first; if the write to `b` fails, `a` is restored so
    /// each unit stays mapped to exactly one slot.
    pub fn exchange(&mut self, a: u8, b: u8) -> Result<()> {
        let direction = self.pool.direction();
        let unit_a = self.pool.channel(a)?.unit;
        let unit_b = self.pool.channel(b)?.unit;
        if a == b {
            return Ok(());
        }

        let field_a = regs::slot_unit_id(direction, a);
        let field_b = regs::slot_unit_id(direction, b);

        self.bus.write_field(field_a, unit_b as u32)?;
        if let Err(e) = self.bus.write_field(field_b, unit_a as u32) {
            if let Err(rollback) = self.bus.write_field(field_a, unit_a as u32) {
                error!("asrc {} ch{} rollback failed: {}", direction, a, rollback);
            }
            return Err(e);
        }

        self.pool.map_unit(a, unit_b);
        self.pool.map_unit(b, unit_a);
        debug!(
            "asrc {} exchange ch{}<->ch{}: units {}<->{}",
            direction, a, b, unit_a, unit_b
        );
        Ok(())
    }

    /// Take the channel's converter out of service
    ///
    /// A pinned unit keeps its mapping and usage; only the enable bit drops.
    pub fn release(&mut self, channel: u8) -> Result<()> {
        let slot = self.pool.channel(channel)?.clone();
        if slot.pinned.is_none() {
            self.pool.unit_mut(slot.unit)?.channels_in_use = 0;
        }
        if slot.enabled {
            info!("release asrc {} ch{}", self.pool.direction(), channel);
        }
        self.set_enabled(channel, false)
    }

    /// Pin `unit` to `channel`, bring it into the channel's slot and enable it
    ///
    /// A unit converting for another channel is refused rather than pulled
    /// out from under it.
    pub fn lock(&mut self, channel: u8, unit: u8) -> Result<()> {
        self.pool.unit(unit)?;
        self.pool.channel(channel)?;
        if let Some(owner) = self.pool.lock_owner(unit) {
            if owner != channel {
                return Err(RouteError::UnitLocked { unit, owner });
            }
        }

        let holder = self
            .pool
            .slot_of(unit)
            .ok_or_else(|| RouteError::InvalidConfig(format!("unit {} has no slot", unit)))?;
        if holder != channel && self.pool.channel(holder)?.enabled {
            return Err(RouteError::UnitInUse {
                unit,
                channel: holder,
            });
        }

        self.exchange(channel, holder)?;
        self.write_unit_id(channel)?;
        self.pool.channel_mut(channel)?.pinned = Some(unit);
        self.set_enabled(channel, true)?;
        info!("asrc {} ch{} locked to unit {}", self.pool.direction(), channel, unit);
        Ok(())
    }

    /// Remove the channel's pin, leaving mapping and enable state alone
    pub fn unlock(&mut self, channel: u8) -> Result<()> {
        let slot = self.pool.channel_mut(channel)?;
        if let Some(unit) = slot.pinned.take() {
            info!("asrc ch{} unlocked from unit {}", channel, unit);
        }
        Ok(())
    }

    /// Write every slot's unit id and enable bit from the pool
    ///
    /// Brings freshly reset hardware in line with the pool's mapping.
    pub fn sync_mapping(&mut self) -> Result<()> {
        let direction = self.pool.direction();
        let mut first_err = None;
        for channel in 0..self.pool.len() as u8 {
            let enabled = self.pool.channel(channel)?.enabled;
            let result = self
                .write_unit_id(channel)
                .and_then(|_| self.bus.write_field(regs::slot_enable(direction, channel), enabled as u32));
            if let Err(e) = result {
                warn!("asrc {} ch{} mapping: {}", direction, channel, e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Write the unit the pool maps to `channel` into its slot
    fn write_unit_id(&self, channel: u8) -> Result<()> {
        let unit = self.pool.channel(channel)?.unit;
        self.bus
            .write_field(regs::slot_unit_id(self.pool.direction(), channel), unit as u32)
    }

    /// Write the channel's enable bit
    pub fn set_enabled(&mut self, channel: u8, on: bool) -> Result<()> {
        let direction = self.pool.direction();
        self.pool.channel(channel)?;
        self.bus
            .write_field(regs::slot_enable(direction, channel), on as u32)?;
        self.pool.channel_mut(channel)?.enabled = on;
        Ok(())
    }
}
