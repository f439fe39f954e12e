//! Register access primitive and batched commits

use crate::error::{Result, RouteError};
use crate::hw::regs::Field;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use tracing::{trace, warn};

/// Masked register access to the audio subsystem
///
/// Implementations serialize access internally, so the bus can be shared
/// across both direction pools.
pub trait RegisterBus: Send + Sync {
    fn read(&self, addr: u32) -> Result<u32>;

    /// Replace the bits selected by `mask` with `value`
    fn write_masked(&self, addr: u32, value: u32, mask: u32) -> Result<()>;

    /// Wait for outstanding writes to land
    fn complete(&self) -> Result<()> {
        Ok(())
    }

    fn read_field(&self, field: Field) -> Result<u32> {
        Ok(field.extract(self.read(field.addr)?))
    }

    fn write_field(&self, field: Field, value: u32) -> Result<()> {
        self.write_masked(field.addr, field.place(value), field.mask())
    }
}

/// In-memory register file with write-fault injection
#[derive(Debug, Default)]
pub struct RegisterFile {
    regs: Mutex<BTreeMap<u32, u32>>,
    faults: Mutex<HashSet<u32>>,
    writes: Mutex<u64>,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write to `addr` fail until `reset`
    pub fn inject_fault(&self, addr: u32) {
        self.faults.lock().insert(addr);
    }

    /// Power-cycle: every register reads zero and injected faults are gone
    pub fn reset(&self) {
        self.regs.lock().clear();
        self.faults.lock().clear();
    }

    /// Number of writes that landed
    pub fn write_count(&self) -> u64 {
        *self.writes.lock()
    }

    /// Current register contents, for inspection
    pub fn peek(&self, addr: u32) -> u32 {
        self.regs.lock().get(&addr).copied().unwrap_or(0)
    }

    pub fn peek_field(&self, field: Field) -> u32 {
        field.extract(self.peek(field.addr))
    }
}

impl RegisterBus for RegisterFile {
    fn read(&self, addr: u32) -> Result<u32> {
        Ok(self.peek(addr))
    }

    fn write_masked(&self, addr: u32, value: u32, mask: u32) -> Result<()> {
        if self.faults.lock().contains(&addr) {
            return Err(RouteError::register(addr, "injected write fault"));
        }

        let mut regs = self.regs.lock();
        let reg = regs.entry(addr).or_insert(0);
        *reg = (*reg & !mask) | (value & mask);
        *self.writes.lock() += 1;
        trace!("reg[{:#06x}] = {:#010x}", addr, *reg);
        Ok(())
    }
}

/// One queued masked write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub name: &'static str,
    pub addr: u32,
    pub mask: u32,
    pub value: u32,
}

/// Ordered batch of register writes
///
/// `commit` applies writes in submission order. A failed write is logged and
/// the rest are still attempted; the first failure is returned at the end.
#[derive(Debug, Default)]
pub struct WriteBatch {
    writes: Vec<PendingWrite>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &'static str, addr: u32, mask: u32, value: u32) -> &mut Self {
        self.writes.push(PendingWrite {
            name,
            addr,
            mask,
            value,
        });
        self
    }

    /// Queue a field update
    pub fn set(&mut self, name: &'static str, field: Field, value: u32) -> &mut Self {
        self.push(name, field.addr, field.mask(), field.place(value))
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[PendingWrite] {
        &self.writes
    }

    /// Apply every queued write, then wait for completion
    pub fn commit(&mut self, bus: &dyn RegisterBus) -> Result<()> {
        let mut first_error = None;

        for w in self.writes.drain(..) {
            trace!("{}({:#06x}, {:#010x}, {:#010x})", w.name, w.addr, w.mask, w.value);
            if let Err(e) = bus.write_masked(w.addr, w.value, w.mask) {
                warn!("{} write failed: {}", w.name, e);
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = bus.complete() {
            warn!("Register completion failed: {}", e);
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_write_preserves_other_bits() {
        let bus = RegisterFile::new();
        bus.write_masked(0x10, 0xFF, 0xFF).unwrap();
        bus.write_masked(0x10, 0x0A00, 0x0F00).unwrap();
        assert_eq!(bus.read(0x10).unwrap(), 0x0AFF);

        let field = Field::new(0x10, 0, 4);
        bus.write_field(field, 3).unwrap();
        assert_eq!(bus.read_field(field).unwrap(), 3);
        assert_eq!(bus.peek(0x10), 0x0AF3);
    }

    #[test]
    fn test_batch_applies_in_order() {
        let bus = RegisterFile::new();
        let mut batch = WriteBatch::new();
        batch
            .push("first", 0x20, 0xFF, 0x11)
            .push("second", 0x20, 0xFF, 0x22);
        batch.commit(&bus).unwrap();
        assert_eq!(bus.peek(0x20), 0x22);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_batch_continues_past_failure() {
        let bus = RegisterFile::new();
        bus.inject_fault(0x24);

        let mut batch = WriteBatch::new();
        batch
            .push("a", 0x20, 0xFF, 0x01)
            .push("b", 0x24, 0xFF, 0x02)
            .push("c", 0x28, 0xFF, 0x03);
        let err = batch.commit(&bus).unwrap_err();

        assert_eq!(err, RouteError::register(0x24, "injected write fault"));
        assert_eq!(bus.peek(0x20), 0x01);
        assert_eq!(bus.peek(0x24), 0x00);
        assert_eq!(bus.peek(0x28), 0x03);
        assert_eq!(bus.write_count(), 2);
    }

    #[test]
    fn test_reset_clears_registers_and_faults() {
        let bus = RegisterFile::new();
        bus.write_masked(0x30, 0x5, 0xF).unwrap();
        bus.inject_fault(0x34);
        bus.reset();

        assert_eq!(bus.peek(0x30), 0);
        bus.write_masked(0x34, 0x1, 0x1).unwrap();
        assert_eq!(bus.peek(0x34), 1);
    }
}
