//! PCM format triple and its register encoding

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Smallest channel count the DMA engines accept
pub const MIN_CHANNELS: u32 = 2;

/// Smallest sample width the DMA engines accept
pub const MIN_WIDTH: u32 = 16;

/// Sample rate, sample width and channel count of one stream or slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PcmFormat {
    pub rate: u32,
    pub width: u32,
    pub channels: u32,
}

impl PcmFormat {
    pub const fn new(rate: u32, width: u32, channels: u32) -> Self {
        Self {
            rate,
            width,
            channels,
        }
    }

    /// Component-wise maximum against a floor
    pub fn at_least(&self, floor: &PcmFormat) -> PcmFormat {
        PcmFormat {
            rate: self.rate.max(floor.rate),
            width: self.width.max(floor.width),
            channels: self.channels.max(floor.channels),
        }
    }

    /// Raise channel count and width to what the DMA engines accept
    pub fn clamped_to_hw(&self) -> PcmFormat {
        let mut fixed = *self;
        if fixed.channels < MIN_CHANNELS {
            tracing::info!("channel is fixed from {} to {}", fixed.channels, MIN_CHANNELS);
            fixed.channels = MIN_CHANNELS;
        }
        if fixed.width < MIN_WIDTH {
            tracing::info!("width is fixed from {} to {}", fixed.width, MIN_WIDTH);
            fixed.width = MIN_WIDTH;
        }
        fixed
    }

    /// Encoded {width, channels} code for slot format fields
    ///
    /// Bits 1:0 hold the width class, bits 7:3 hold channels - 1.
    pub fn format_code(&self) -> u32 {
        (self.channels.saturating_sub(1) & 0x1f) << 3 | SampleWidth::from_bits(self.width).code()
    }
}

/// Sample widths a format slot can store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleWidth {
    S16,
    S24,
    S32,
}

impl SampleWidth {
    /// Snap a bit count to a storable width
    ///
    /// Unsupported widths fall back to 16 bit.
    pub fn from_bits(bits: u32) -> Self {
        match bits {
            16 => SampleWidth::S16,
            24 => SampleWidth::S24,
            32 => SampleWidth::S32,
            other => {
                warn!("unsupported width {}, storing 16 bit", other);
                SampleWidth::S16
            }
        }
    }

    pub fn bits(&self) -> u32 {
        match self {
            SampleWidth::S16 => 16,
            SampleWidth::S24 => 24,
            SampleWidth::S32 => 32,
        }
    }

    /// Register encoding of the width class
    pub fn code(&self) -> u32 {
        match self {
            SampleWidth::S16 => 0,
            SampleWidth::S24 => 1,
            SampleWidth::S32 => 2,
        }
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::new(48000, 16, 2)
    }
}

impl std::fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}Hz {}bit {}ch", self.rate, self.width, self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_least_is_component_wise() {
        let cur = PcmFormat::new(44100, 24, 2);
        let floor = PcmFormat::new(48000, 16, 4);
        assert_eq!(cur.at_least(&floor), PcmFormat::new(48000, 24, 4));
    }

    #[test]
    fn test_clamp_to_hw() {
        let fixed = PcmFormat::new(8000, 8, 1).clamped_to_hw();
        assert_eq!(fixed, PcmFormat::new(8000, 16, 2));
        let untouched = PcmFormat::new(96000, 32, 6);
        assert_eq!(untouched.clamped_to_hw(), untouched);
    }

    #[test]
    fn test_format_code() {
        assert_eq!(PcmFormat::new(48000, 16, 2).format_code(), 0b1_000);
        assert_eq!(PcmFormat::new(48000, 24, 8).format_code(), (7 << 3) | 1);
        assert_eq!(PcmFormat::new(48000, 20, 1).format_code(), 0);
    }

    #[test]
    fn test_sample_width_fallback() {
        assert_eq!(SampleWidth::from_bits(24), SampleWidth::S24);
        assert_eq!(SampleWidth::from_bits(20), SampleWidth::S16);
        assert_eq!(SampleWidth::from_bits(32).bits(), 32);
    }

    #[test]
    fn test_display() {
        assert_eq!(PcmFormat::new(48000, 16, 2).to_string(), "48000Hz 16bit 2ch");
    }
}
