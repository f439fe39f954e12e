//! Hardware commit: register access, write batches and firmware IPC

mod bus;
mod ipc;
pub mod regs;

pub use bus::{PendingWrite, RegisterBus, RegisterFile, WriteBatch};
pub use ipc::{ChannelIpc, Envelope, FirmwareIpc, IpcMessage, SimulatedFirmware};
