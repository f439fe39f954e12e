//! Converter tick domains and factor computation

mod tick;

pub use tick::{
    output_factor, queue_bus_tick, tperiod_limit, BusTick, RateClass, Ratio, SyncEntry, TickConfig,
    TickMode, TickRouter, TickSource, DEFAULT_FACTOR, SYNC_TABLE,
};
