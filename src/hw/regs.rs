//! Register map for the converter pools and format slots
//!
//! All registers are 32 bits wide. Per-channel slot registers hold the
//! channel-to-unit mapping and enable bit; per-unit registers hold the
//! converter configuration.

use crate::graph::Direction;

// Field helper

/// A bit field inside one register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub addr: u32,
    pub shift: u32,
    pub bits: u32,
}

impl Field {
    pub const fn new(addr: u32, shift: u32, bits: u32) -> Self {
        Self { addr, shift, bits }
    }

    /// Largest value the field can hold
    pub const fn max(&self) -> u32 {
        ((1u64 << self.bits) - 1) as u32
    }

    pub const fn mask(&self) -> u32 {
        self.max() << self.shift
    }

    /// Value shifted into position, truncated to the field
    pub const fn place(&self, value: u32) -> u32 {
        (value & self.max()) << self.shift
    }

    pub const fn extract(&self, reg: u32) -> u32 {
        (reg & self.mask()) >> self.shift
    }
}

// Channel slots

/// Playback channel slot registers (one per logical playback channel)
pub const SPUS_SLOT_BASE: u32 = 0x0200;

/// Capture channel slot registers (one per logical capture channel)
pub const SPUM_SLOT_BASE: u32 = 0x0300;

pub const SLOT_STRIDE: u32 = 0x04;

/// Channel slot control.
/// - Bit  0  : ENABLE (converter in the channel's path)
/// - Bits 7:4: ASRC_ID (unit currently serving the channel)
fn slot_ctrl(direction: Direction, channel: u8) -> u32 {
    let base = match direction {
        Direction::Playback => SPUS_SLOT_BASE,
        Direction::Capture => SPUM_SLOT_BASE,
    };
    base + channel as u32 * SLOT_STRIDE
}

pub fn slot_enable(direction: Direction, channel: u8) -> Field {
    Field::new(slot_ctrl(direction, channel), 0, 1)
}

pub fn slot_unit_id(direction: Direction, channel: u8) -> Field {
    Field::new(slot_ctrl(direction, channel), 4, 4)
}

// Converter units

pub const SPUS_ASRC_BASE: u32 = 0x1000;
pub const SPUM_ASRC_BASE: u32 = 0x1800;
pub const ASRC_STRIDE: u32 = 0x20;

const ASRC_CTRL: u32 = 0x00;
const ASRC_IS_PARA0: u32 = 0x04;
const ASRC_IS_PARA1: u32 = 0x08;
const ASRC_OS_PARA0: u32 = 0x0C;
const ASRC_OS_PARA1: u32 = 0x10;
const ASRC_FILTER_CTRL: u32 = 0x14;

/// Width of the IS/OS default factor fields
pub const ASRC_FACTOR_BITS: u32 = 18;

/// Fields of one converter unit.
///
/// CTRL:
/// - Bit  0    : IS_ASYNC (input side on an external tick)
/// - Bit  1    : OS_ASYNC (output side on an external tick)
/// - Bits 7:4  : OVSF_RATIO (oversample shift)
/// - Bits 11:8 : DCMF_RATIO (decimate shift)
/// - Bits 13:12: OUT_BIT_WIDTH ((width / 8) - 1)
/// - Bits 19:16: IS_SOURCE_SEL
/// - Bits 23:20: OS_SOURCE_SEL
/// - Bits 27:24: TICKNUM
/// - Bits 31:28: TICKDIV
///
/// IS_PARA0/OS_PARA0 hold the 18-bit default factors, IS_PARA1/OS_PARA1 the
/// t-period limits, FILTER_CTRL bits 1:0 the APF coefficient select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsrcField {
    IsAsync,
    OsAsync,
    OvsfRatio,
    DcmfRatio,
    OutBitWidth,
    IsSource,
    OsSource,
    TickNum,
    TickDiv,
    IsDefault,
    IsTperiodLimit,
    OsDefault,
    OsTperiodLimit,
    ApfCoef,
}

impl AsrcField {
    pub fn of(self, direction: Direction, unit: u8) -> Field {
        let base = match direction {
            Direction::Playback => SPUS_ASRC_BASE,
            Direction::Capture => SPUM_ASRC_BASE,
        } + unit as u32 * ASRC_STRIDE;

        match self {
            AsrcField::IsAsync => Field::new(base + ASRC_CTRL, 0, 1),
            AsrcField::OsAsync => Field::new(base + ASRC_CTRL, 1, 1),
            AsrcField::OvsfRatio => Field::new(base + ASRC_CTRL, 4, 4),
            AsrcField::DcmfRatio => Field::new(base + ASRC_CTRL, 8, 4),
            AsrcField::OutBitWidth => Field::new(base + ASRC_CTRL, 12, 2),
            AsrcField::IsSource => Field::new(base + ASRC_CTRL, 16, 4),
            AsrcField::OsSource => Field::new(base + ASRC_CTRL, 20, 4),
            AsrcField::TickNum => Field::new(base + ASRC_CTRL, 24, 4),
            AsrcField::TickDiv => Field::new(base + ASRC_CTRL, 28, 4),
            AsrcField::IsDefault => Field::new(base + ASRC_IS_PARA0, 0, ASRC_FACTOR_BITS),
            AsrcField::IsTperiodLimit => Field::new(base + ASRC_IS_PARA1, 0, ASRC_FACTOR_BITS),
            AsrcField::OsDefault => Field::new(base + ASRC_OS_PARA0, 0, ASRC_FACTOR_BITS),
            AsrcField::OsTperiodLimit => Field::new(base + ASRC_OS_PARA1, 0, ASRC_FACTOR_BITS),
            AsrcField::ApfCoef => Field::new(base + ASRC_FILTER_CTRL, 0, 2),
        }
    }
}

/// Largest value the OS default factor field holds
pub const OS_DEFAULT_MAX: u32 = Field::new(0, 0, ASRC_FACTOR_BITS).max();

// Format slots

pub const SLOT_FORMAT_BASE: u32 = 0x0400;

/// Slot format.
/// - Bits 7:3: CHANNELS - 1
/// - Bits 1:0: WIDTH (0=16bit, 1=24bit, 2=32bit)
pub fn slot_format(slot: u16) -> Field {
    Field::new(SLOT_FORMAT_BASE + slot as u32 * 4, 0, 8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_masks() {
        let f = Field::new(0x10, 4, 4);
        assert_eq!(f.mask(), 0xF0);
        assert_eq!(f.place(0x1F), 0xF0);
        assert_eq!(f.extract(0xA5), 0xA);
        assert_eq!(OS_DEFAULT_MAX, 0x3FFFF);
    }

    #[test]
    fn test_unit_fields_do_not_overlap() {
        let fields = [
            AsrcField::IsAsync,
            AsrcField::OsAsync,
            AsrcField::OvsfRatio,
            AsrcField::DcmfRatio,
            AsrcField::OutBitWidth,
            AsrcField::IsSource,
            AsrcField::OsSource,
            AsrcField::TickNum,
            AsrcField::TickDiv,
        ];
        let mut seen = 0u32;
        for f in fields {
            let field = f.of(Direction::Playback, 0);
            assert_eq!(seen & field.mask(), 0, "{:?} overlaps", f);
            seen |= field.mask();
        }
    }

    #[test]
    fn test_directions_use_separate_banks() {
        assert_ne!(
            slot_unit_id(Direction::Playback, 1).addr,
            slot_unit_id(Direction::Capture, 1).addr
        );
        assert_eq!(
            AsrcField::IsDefault.of(Direction::Capture, 2).addr,
            SPUM_ASRC_BASE + 2 * ASRC_STRIDE + 0x04
        );
    }
}
