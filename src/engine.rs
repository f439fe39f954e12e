//! Route engine - stream-open negotiation entry point
//!
//! Owns the routing graph, the format slots, both converter pools and the
//! tick router. Each direction's pool sits behind its own mutex and the whole
//! assign, configure and commit sequence for one request runs with it held.
//! When both are needed the pool mutex is taken before the slot table.

use crate::asrc::{AsrcAllocator, AsrcPool, UnitStatus};
use crate::error::{Result, RouteError};
use crate::format::{FormatResolver, FormatSlot, PcmFormat, SampleWidth, SlotId, SlotTable};
use crate::graph::{Direction, NodeId, RoutingGraph};
use crate::hw::{regs, FirmwareIpc, IpcMessage, RegisterBus, WriteBatch};
use crate::sync::{queue_bus_tick, TickConfig, TickRouter};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Static platform description the engine is built from
pub struct Platform {
    pub graph: RoutingGraph,
    pub slots: SlotTable,
    pub playback: AsrcPool,
    pub capture: AsrcPool,
    pub router: TickRouter,
    /// Bound on acknowledged firmware messages
    pub ipc_timeout: Duration,
}

/// Result of negotiating one stream open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiation {
    /// Stream parameters after the hardware minimums were applied
    pub adjusted: PcmFormat,
    /// Format the far end of the path requires
    pub target: PcmFormat,
    pub slot: Option<SlotId>,
    /// Converter unit serving the stream, if conversion is needed
    pub unit: Option<u8>,
    pub tick: Option<TickConfig>,
}

/// Outcome of replaying state after a power cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub messages_acked: usize,
    pub ipc_failures: usize,
    pub registers_restored: usize,
    pub register_failures: usize,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.ipc_failures == 0 && self.register_failures == 0
    }
}

/// Negotiates routing, formats and converter units for DMA streams
pub struct RouteEngine {
    graph: RoutingGraph,
    slots: Mutex<SlotTable>,
    pools: [Mutex<AsrcPool>; 2],
    router: RwLock<TickRouter>,
    bus: Arc<dyn RegisterBus>,
    ipc: Arc<dyn FirmwareIpc>,
    ipc_timeout: Duration,
}

impl RouteEngine {
    /// Build the engine and program both pools' slot mapping into hardware
    pub fn new(mut platform: Platform, bus: Arc<dyn RegisterBus>, ipc: Arc<dyn FirmwareIpc>) -> Result<Self> {
        for pool in [&mut platform.playback, &mut platform.capture] {
            AsrcAllocator::new(pool, &*bus).sync_mapping()?;
        }

        Ok(Self {
            graph: platform.graph,
            slots: Mutex::new(platform.slots),
            pools: [Mutex::new(platform.playback), Mutex::new(platform.capture)],
            router: RwLock::new(platform.router),
            bus,
            ipc,
            ipc_timeout: platform.ipc_timeout,
        })
    }

    pub fn graph(&self) -> &RoutingGraph {
        &self.graph
    }

    /// Snapshot of every format slot
    pub fn slots(&self) -> Vec<FormatSlot> {
        self.slots.lock().iter().cloned().collect()
    }

    /// Negotiate a stream open on `channel`
    ///
    /// Discovers the live path, resolves its target format, then either
    /// assigns and configures a converter or takes the channel's converter
    /// out of service. The slot format is committed and sent to firmware.
    pub fn hw_params(
        &self,
        direction: Direction,
        channel: u8,
        requested: PcmFormat,
    ) -> Result<Negotiation> {
        let adjusted = requested.clamped_to_hw();
        let start = self
            .graph
            .dma_node(channel, direction)
            .ok_or(RouteError::UnknownChannel { direction, channel })?;

        let mut pool = self.pools[direction.index()].lock();
        let resolution = {
            let mut slots = self.slots.lock();
            let path = self.graph.discover(start, direction)?;
            FormatResolver::new(&self.graph, &mut slots).resolve(&path)?
        };
        let target = resolution.format;
        let config = pool.channel(channel)?.config;

        let (in_rate, out_rate) = match direction {
            Direction::Playback => (adjusted.rate, target.rate),
            Direction::Capture => (target.rate, adjusted.rate),
        };

        let convert = config.force_enable
            || adjusted.rate != target.rate
            || adjusted.width != target.width
            || config.input_tick.is_external()
            || config.output_tick.is_external();

        let mut batch = WriteBatch::new();
        let mut alloc = AsrcAllocator::new(&mut pool, &*self.bus);

        let (unit, tick) = if convert {
            let unit = alloc.assign(channel, adjusted.channels)?;
            let computed = self.router.read().compute(
                config.input_tick,
                in_rate,
                config.output_tick,
                out_rate,
                target.width,
                config.apf_coef,
            );
            let tick = match computed {
                Ok(tick) => tick,
                Err(e) => {
                    alloc.release(channel)?;
                    return Err(e);
                }
            };
            tick.queue_writes(direction, unit, &mut batch);
            (Some(unit), Some(tick))
        } else {
            alloc.release(channel)?;
            (None, None)
        };

        info!(
            "{} ch{}: {} -> {} conversion {}",
            direction,
            channel,
            adjusted,
            target,
            if convert { "on" } else { "off" }
        );

        if let (Some(unit), Some(tick)) = (unit, tick) {
            pool.unit_mut(unit)?.tick = Some(tick);
        }
        if let Some(slot) = resolution.slot {
            self.queue_slot_format(slot, target, &mut batch)?;
        }
        batch.commit(&*self.bus)?;

        if let Some(slot) = resolution.slot {
            self.notify(slot, target)?;
        }

        Ok(Negotiation {
            adjusted,
            target,
            slot: resolution.slot,
            unit,
            tick,
        })
    }

    /// Assign a converter to `channel` without negotiating formats
    pub fn assign_conversion(&self, direction: Direction, channel: u8, channels: u32) -> Result<u8> {
        let mut pool = self.pools[direction.index()].lock();
        AsrcAllocator::new(&mut pool, &*self.bus).assign(channel, channels)
    }

    /// Stream close
    pub fn release_conversion(&self, direction: Direction, channel: u8) -> Result<()> {
        let mut pool = self.pools[direction.index()].lock();
        AsrcAllocator::new(&mut pool, &*self.bus).release(channel)
    }

    /// Pin `unit` to `channel`
    pub fn lock_conversion(&self, direction: Direction, channel: u8, unit: u8) -> Result<()> {
        let mut pool = self.pools[direction.index()].lock();
        AsrcAllocator::new(&mut pool, &*self.bus).lock(channel, unit)
    }

    pub fn unlock_conversion(&self, direction: Direction, channel: u8) -> Result<()> {
        let mut pool = self.pools[direction.index()].lock();
        AsrcAllocator::new(&mut pool, &*self.bus).unlock(channel)
    }

    /// Resolve the target format seen from `start`
    pub fn resolve_format(&self, start: NodeId, direction: Direction) -> Result<PcmFormat> {
        let path = self.graph.discover(start, direction)?;
        let mut slots = self.slots.lock();
        let resolution = FormatResolver::new(&self.graph, &mut slots).resolve(&path)?;
        debug!("resolve {} ({}): {}", start, direction, resolution.format);
        Ok(resolution.format)
    }

    /// Store a format into a slot and commit it
    ///
    /// Unsupported widths are stored as 16 bit.
    pub fn set_slot_format(&self, slot: SlotId, format: PcmFormat) -> Result<()> {
        let format = PcmFormat {
            width: SampleWidth::from_bits(format.width).bits(),
            ..format
        };
        self.slots.lock().get_mut(slot)?.store(format);

        let mut batch = WriteBatch::new();
        self.queue_slot_format(slot, format, &mut batch)?;
        batch.commit(&*self.bus)?;
        self.notify(slot, format)
    }

    fn queue_slot_format(&self, slot: SlotId, format: PcmFormat, batch: &mut WriteBatch) -> Result<()> {
        if self.slots.lock().get(slot)?.has_register {
            batch.set("slot format", regs::slot_format(slot.0), format.format_code());
        }
        Ok(())
    }

    /// Fire-and-forget format notification; a send failure is returned
    fn notify(&self, slot: SlotId, format: PcmFormat) -> Result<()> {
        for msg in format_messages(slot, format) {
            self.ipc.send(msg)?;
        }
        Ok(())
    }

    /// Replay slot formats, the converter factor and pinned units after a
    /// power cycle
    ///
    /// Best-effort: each failed message or write is logged and counted.
    pub fn restore_all(&self) -> RestoreReport {
        let mut report = RestoreReport::default();

        let slots: Vec<FormatSlot> = self.slots();
        for slot in &slots {
            let format = slot.stored();
            for msg in format_messages(slot.id, format) {
                self.send_acked(msg, &mut report);
            }
            if slot.has_register {
                let mut batch = WriteBatch::new();
                batch.set("slot format", regs::slot_format(slot.id.0), format.format_code());
                self.commit_counted(&mut batch, &mut report);
            }
        }

        let factor = self.router.read().default_factor();
        self.send_acked(IpcMessage::SetAsrcFactor { factor }, &mut report);

        for direction in Direction::ALL {
            let pool = self.pools[direction.index()].lock();
            for (channel, slot) in pool.channels().filter(|(_, s)| s.pinned.is_some()) {
                let mut batch = WriteBatch::new();
                batch
                    .set("asrc id", regs::slot_unit_id(direction, channel), slot.unit as u32)
                    .set("asrc enable", regs::slot_enable(direction, channel), slot.enabled as u32);
                if let Some(tick) = pool.unit(slot.unit).ok().and_then(|u| u.tick) {
                    tick.queue_writes(direction, slot.unit, &mut batch);
                }
                self.commit_counted(&mut batch, &mut report);
            }
        }

        info!(
            "restore: {} acked, {} ipc failures, {} registers, {} register failures",
            report.messages_acked,
            report.ipc_failures,
            report.registers_restored,
            report.register_failures
        );
        report
    }

    fn send_acked(&self, msg: IpcMessage, report: &mut RestoreReport) {
        match self.ipc.send_and_wait(msg, self.ipc_timeout) {
            Ok(()) => report.messages_acked += 1,
            Err(e) => {
                warn!("restore {}: {}", msg, e);
                report.ipc_failures += 1;
            }
        }
    }

    fn commit_counted(&self, batch: &mut WriteBatch, report: &mut RestoreReport) {
        let count = batch.len();
        match batch.commit(&*self.bus) {
            Ok(()) => report.registers_restored += count,
            Err(e) => {
                warn!("restore registers: {}", e);
                report.register_failures += 1;
            }
        }
    }

    /// Re-program the tick divider of every externally clocked unit
    pub fn update_all_ticks(&self) -> Result<()> {
        let tick = self.router.read().bus_tick();
        let mut batch = WriteBatch::new();

        for direction in Direction::ALL {
            let pool = self.pools[direction.index()].lock();
            for unit in 0..pool.len() as u8 {
                let Some(channel) = pool.slot_of(unit) else {
                    continue;
                };
                let config = pool.channel(channel)?.config;
                if config.input_tick.is_external() || config.output_tick.is_external() {
                    queue_bus_tick(direction, unit, tick, &mut batch);
                }
            }
        }

        debug!("asrc tick {}/{}: {} writes", tick.num, tick.div, batch.len());
        batch.commit(&*self.bus)
    }

    /// Record a new bus clock and re-program tick dividers
    pub fn set_bus_clock(&self, hz: u64) -> Result<()> {
        self.router.write().set_bus_clock_hz(hz);
        info!("bus clock {}Hz", hz);
        self.update_all_ticks()
    }

    pub fn pool_snapshot(&self, direction: Direction) -> Vec<UnitStatus> {
        self.pools[direction.index()].lock().snapshot()
    }
}

fn format_messages(slot: SlotId, format: PcmFormat) -> [IpcMessage; 2] {
    [
        IpcMessage::SetRate {
            slot,
            rate: format.rate,
        },
        IpcMessage::SetFormat {
            slot,
            width: format.width,
            channels: format.channels,
        },
    ]
}
