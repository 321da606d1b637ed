use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Safety Network Number: time/date pair uniquely naming a safety subnet.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Snn {
    pub time: u32,
    pub date: u16,
}

impl Snn {
    pub const UNSET: Snn = Snn { time: 0xFFFF_FFFF, date: 0xFFFF };

    pub fn is_unset(&self) -> bool {
        self.time == 0xFFFF_FFFF || self.date == 0xFFFF
    }
}

/// Unique Node Identifier: (SNN, NodeID). 10 bytes on the wire.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Unid {
    pub snn: Snn,
    pub node_id: u32,
}

impl Unid {
    pub const SIZE: usize = 10;

    /// All 0xFF: no identity assigned (out-of-box), or "owned by a tool"
    /// when used as an owner UNID.
    pub const UNSET: Unid = Unid { snn: Snn::UNSET, node_id: 0xFFFF_FFFF };

    /// All zero: unowned.
    pub const ZERO: Unid = Unid { snn: Snn { time: 0, date: 0 }, node_id: 0 };

    pub fn is_unset(&self) -> bool {
        *self == Self::UNSET
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut b = [0u8; Self::SIZE];
        b[0..4].copy_from_slice(&self.snn.time.to_le_bytes());
        b[4..6].copy_from_slice(&self.snn.date.to_le_bytes());
        b[6..10].copy_from_slice(&self.node_id.to_le_bytes());
        b
    }

    pub fn from_bytes(b: &[u8]) -> Option<Unid> {
        if b.len() < Self::SIZE {
            return None;
        }
        Some(Unid {
            snn: Snn {
                time: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
                date: u16::from_le_bytes([b[4], b[5]]),
            },
            node_id: u32::from_le_bytes([b[6], b[7], b[8], b[9]]),
        })
    }
}

/// Safety Configuration Identifier: CRC + timestamp of the applied
/// configuration. All-zero means the device is unconfigured.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Scid {
    pub sccrc: u32,
    pub scts: Snn,
}

impl Scid {
    pub const SIZE: usize = 10;
    pub const ZERO: Scid = Scid { sccrc: 0, scts: Snn { time: 0, date: 0 } };

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut b = [0u8; Self::SIZE];
        b[0..4].copy_from_slice(&self.sccrc.to_le_bytes());
        b[4..8].copy_from_slice(&self.scts.time.to_le_bytes());
        b[8..10].copy_from_slice(&self.scts.date.to_le_bytes());
        b
    }

    pub fn from_bytes(b: &[u8]) -> Option<Scid> {
        if b.len() < Self::SIZE {
            return None;
        }
        Some(Scid {
            sccrc: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            scts: Snn {
                time: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
                date: u16::from_le_bytes([b[8], b[9]]),
            },
        })
    }
}

/// Electronic key carried in every SafetyOpen. 10 bytes on the wire
/// (2 segment header bytes + 8 key bytes).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ElectronicKey {
    pub vendor_id: u16,
    pub device_type: u16,
    pub product_code: u16,
    pub compat_and_major_rev: u8,
    pub minor_rev: u8,
}

impl ElectronicKey {
    const COMPATIBILITY_BIT: u8 = 0x80;
    const MAJOR_REV_MASK: u8 = 0x7F;

    pub fn major_rev(&self) -> u8 {
        self.compat_and_major_rev & Self::MAJOR_REV_MASK
    }

    pub fn compatibility(&self) -> bool {
        self.compat_and_major_rev & Self::COMPATIBILITY_BIT != 0
    }
}

/// Connection triad: uniquely identifies a connection within an originator.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CnxnTriad {
    pub conn_serial: u16,
    pub orig_vendor: u16,
    pub orig_serial: u32,
}

impl CnxnTriad {
    pub fn is_zero(&self) -> bool {
        self.conn_serial == 0 && self.orig_vendor == 0 && self.orig_serial == 0
    }
}

/// Safety Supervisor device state (Device Status attribute values).
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum DeviceState {
    Undefined = 0,
    SelfTesting = 1,
    Idle = 2,
    SelfTestException = 3,
    Executing = 4,
    Abort = 5,
    CriticalFault = 6,
    Configuring = 7,
    WaitingForTunid = 8,
}

/// Module / network status indicator patterns.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LedState {
    Off,
    Green,
    FlashGreen,
    FlashRed,
    Red,
    FlashRedGreen,
}

/// Identity of this device, matched against received electronic keys.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub device_type: u16,
    pub product_code: u16,
    pub major_rev: u8,
    pub minor_rev: u8,
    pub serial_num: u32,
}

/// NodeID value of a port that has not been assigned an address.
pub const INVALID_NODE_ID: u32 = 0xFFFF_FFFF;
