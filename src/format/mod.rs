//! PCM formats, format slots and target format resolution

mod pcm;
mod resolver;
mod slot;

pub use pcm::{PcmFormat, SampleWidth, MIN_CHANNELS, MIN_WIDTH};
pub use resolver::{FormatResolver, Resolution};
pub use slot::{FormatSlot, SlotId, SlotTable};
