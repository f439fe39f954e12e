//! Sample-rate converter pool and allocation

mod allocator;
mod pool;

pub use allocator::AsrcAllocator;
pub use pool::{AsrcPool, ChannelConfig, ChannelSlot, ConversionUnit, PairingGroup, UnitStatus};
