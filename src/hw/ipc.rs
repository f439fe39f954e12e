//! Firmware IPC channel
//!
//! Configuration messages go to the owning firmware core over a crossbeam
//! channel. The common path is fire-and-forget; the restore path waits for an
//! acknowledgement with a bounded timeout.

use crate::error::{Result, RouteError};
use crate::format::SlotId;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace};

/// Messages understood by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcMessage {
    SetRate { slot: SlotId, rate: u32 },
    SetFormat { slot: SlotId, width: u32, channels: u32 },
    SetAsrcFactor { factor: u32 },
}

impl std::fmt::Display for IpcMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpcMessage::SetRate { slot, rate } => write!(f, "SET_RATE({}, {}Hz)", slot, rate),
            IpcMessage::SetFormat {
                slot,
                width,
                channels,
            } => write!(f, "SET_FORMAT({}, {}bit, {}ch)", slot, width, channels),
            IpcMessage::SetAsrcFactor { factor } => write!(f, "SET_ASRC_FACTOR({})", factor),
        }
    }
}

/// Transport to the firmware core
pub trait FirmwareIpc: Send + Sync {
    /// Queue a message without waiting
    fn send(&self, msg: IpcMessage) -> Result<()>;

    /// Send and block until the firmware acknowledges or `timeout` passes
    fn send_and_wait(&self, msg: IpcMessage, timeout: Duration) -> Result<()>;
}

/// Message plus optional acknowledgement sender
#[derive(Debug)]
pub struct Envelope {
    pub msg: IpcMessage,
    pub ack: Option<Sender<()>>,
}

/// Crossbeam-backed IPC sender
#[derive(Debug, Clone)]
pub struct ChannelIpc {
    tx: Sender<Envelope>,
}

impl ChannelIpc {
    /// Create a sender and the receiving end a firmware loop drains
    pub fn new() -> (Self, Receiver<Envelope>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl FirmwareIpc for ChannelIpc {
    fn send(&self, msg: IpcMessage) -> Result<()> {
        trace!("ipc send {}", msg);
        self.tx
            .send(Envelope { msg, ack: None })
            .map_err(|_| RouteError::IpcDisconnected)
    }

    fn send_and_wait(&self, msg: IpcMessage, timeout: Duration) -> Result<()> {
        let (ack_tx, ack_rx) = bounded(1);
        trace!("ipc send {} (wait {:?})", msg, timeout);
        self.tx
            .send(Envelope {
                msg,
                ack: Some(ack_tx),
            })
            .map_err(|_| RouteError::IpcDisconnected)?;

        match ack_rx.recv_timeout(timeout) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(RouteError::IpcTimeout {
                message: msg.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(RouteError::IpcDisconnected),
        }
    }
}

/// Firmware stand-in running on its own thread
///
/// Records every message it receives and acknowledges those that ask for it,
/// unless acknowledgements are withheld.
pub struct SimulatedFirmware {
    log: Arc<Mutex<Vec<IpcMessage>>>,
    withhold_acks: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimulatedFirmware {
    /// Start the firmware thread and return the IPC handle talking to it
    pub fn spawn() -> (ChannelIpc, Self) {
        let (ipc, rx) = ChannelIpc::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let withhold_acks = Arc::new(AtomicBool::new(false));

        let thread_log = log.clone();
        let thread_withhold = withhold_acks.clone();
        let handle = thread::spawn(move || {
            // Withheld acks are parked here so waiters time out instead of
            // seeing a disconnect.
            let mut parked = Vec::new();
            for envelope in rx.iter() {
                debug!("firmware <- {}", envelope.msg);
                thread_log.lock().push(envelope.msg);
                if let Some(ack) = envelope.ack {
                    if thread_withhold.load(Ordering::SeqCst) {
                        parked.push(ack);
                    } else {
                        let _ = ack.send(());
                    }
                }
            }
            debug!("firmware channel closed, {} acks never sent", parked.len());
        });

        (
            ipc,
            Self {
                log,
                withhold_acks,
                handle: Some(handle),
            },
        )
    }

    /// Stop acknowledging (or resume)
    pub fn set_withhold_acks(&self, withhold: bool) {
        self.withhold_acks.store(withhold, Ordering::SeqCst);
    }

    /// Messages received so far
    pub fn messages(&self) -> Vec<IpcMessage> {
        self.log.lock().clone()
    }

    /// Wait for the thread to exit; every `ChannelIpc` clone must be dropped first
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acked_send() {
        let (ipc, fw) = SimulatedFirmware::spawn();
        let msg = IpcMessage::SetRate {
            slot: SlotId(0),
            rate: 48000,
        };
        ipc.send_and_wait(msg, Duration::from_millis(500)).unwrap();
        assert_eq!(fw.messages(), vec![msg]);
        drop(ipc);
        fw.join();
    }

    #[test]
    fn test_withheld_ack_times_out() {
        let (ipc, fw) = SimulatedFirmware::spawn();
        fw.set_withhold_acks(true);
        let err = ipc
            .send_and_wait(IpcMessage::SetAsrcFactor { factor: 36864 }, Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, RouteError::IpcTimeout { timeout_ms: 20, .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_disconnected_receiver() {
        let (ipc, rx) = ChannelIpc::new();
        drop(rx);
        let err = ipc.send(IpcMessage::SetAsrcFactor { factor: 1 }).unwrap_err();
        assert_eq!(err, RouteError::IpcDisconnected);
    }

    #[test]
    fn test_message_display() {
        let msg = IpcMessage::SetFormat {
            slot: SlotId(2),
            width: 24,
            channels: 2,
        };
        assert_eq!(msg.to_string(), "SET_FORMAT(slot2, 24bit, 2ch)");
    }
}
