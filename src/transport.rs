// Command channel between the safety core and the lower transport, plus the
// indicator outputs. Byte-order handling below this interface is the
// transport's business; message payloads built here are little-endian CIP
// response bodies.

use crate::types::LedState;
use log::info;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Command codes on the transport channel.
#[repr(u16)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum Command {
    // inbound (transport -> core)
    SafetyOpenRequest = 0x0101,
    SafetyCloseRequest = 0x0102,
    // outbound (core -> transport)
    SafetyOpenResponse = 0x0201,
    SafetyCloseResponse = 0x0202,
    /// Safety Network Number for one port; `add_info` carries the port index.
    Snn = 0x0301,
    /// Supervisor state changed; `add_info` carries the new state code.
    DeviceState = 0x0302,
}

/// One message on the command channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub cmd: Command,
    pub add_info: u32,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(cmd: Command, add_info: u32, data: Vec<u8>) -> Self {
        Message { cmd, add_info, data }
    }
}

/// Outbound message channel. `put` returns false when the transport could
/// not accept the message; the caller reports that as a diagnostic.
pub trait Transport {
    fn put(&mut self, msg: Message) -> bool;
}

/// Module-status and network-status indicator outputs.
pub trait Indicators {
    fn module_status(&mut self, led: LedState);
    fn network_status(&mut self, led: LedState);
}

/// Transport and indicator stub that only logs. Useful for bring-up on
/// hardware without a fieldbus attached.
pub struct LogOnly;

impl Transport for LogOnly {
    fn put(&mut self, msg: Message) -> bool {
        info!(
            "tx {:?} add_info={:#x} len={}",
            msg.cmd,
            msg.add_info,
            msg.data.len()
        );
        true
    }
}

impl Indicators for LogOnly {
    fn module_status(&mut self, led: LedState) {
        info!("module status led: {:?}", led);
    }

    fn network_status(&mut self, led: LedState) {
        info!("network status led: {:?}", led);
    }
}
