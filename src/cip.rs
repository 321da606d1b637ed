// CIP wire constants used by the safety core.
//
// Status code values follow Volume 1 of the CIP Networks Library; the
// safety-specific extended status block follows Volume 5.

/// CIP general status codes.
pub mod gstat {
    pub const SUCCESS: u8 = 0x00;
    pub const CNXN_FAILURE: u8 = 0x01;
    pub const RESOURCE_UNAVAIL: u8 = 0x02;
    pub const PATH_SEG_ERROR: u8 = 0x04;
    pub const PATH_DST_UNKNOWN: u8 = 0x05;
    pub const SERVICE_NOT_SUP: u8 = 0x08;
    pub const INVALID_ATTR_VAL: u8 = 0x09;
    pub const OBJ_STATE_CONFLICT: u8 = 0x0C;
    pub const ATTR_NOT_SETTABLE: u8 = 0x0E;
    pub const DEV_STATE_CONFLICT: u8 = 0x10;
    pub const NOT_ENOUGH_DATA: u8 = 0x13;
    pub const ATTR_NOT_SUP: u8 = 0x14;
    pub const TOO_MUCH_DATA: u8 = 0x15;
    pub const OBJ_DOES_NOT_EXIST: u8 = 0x16;
    pub const STORE_OP_FAILURE: u8 = 0x19;
    pub const INVALID_PARAM: u8 = 0x20;

    /// Sentinel used while a handler is still running. Never sent.
    pub const UNDEFINED: u8 = 0xFF;
}

/// Connection Manager extended status codes (first additional status word).
pub mod extstat {
    pub const DUP_FWD_OPEN: u16 = 0x0100;
    pub const TCT: u16 = 0x0103;
    pub const CNXN_NOT_FND: u16 = 0x0107;
    pub const NET_CNXN_PAR: u16 = 0x0108;
    pub const SCNXN_SIZE: u16 = 0x0109;
    pub const RPI_NOT_SUP: u16 = 0x0111;
    pub const CNXN_ALLOC: u16 = 0x0113;
    pub const VID_OR_PRODC: u16 = 0x0114;
    pub const DEV_TYPE: u16 = 0x0115;
    pub const REVISION: u16 = 0x0116;
    pub const CONFIG_PATH: u16 = 0x0128;
    pub const CONS_PATH: u16 = 0x0129;
    pub const PROD_PATH: u16 = 0x012A;
    pub const PARAM_ERR: u16 = 0x0205;
    pub const SEG_INV: u16 = 0x0315;
    pub const MISCELLANEOUS: u16 = 0x031C;

    // Safety extended status block.
    pub const TCCP: u16 = 0x0803;
    pub const PIEM: u16 = 0x0804;
    pub const TCMMM: u16 = 0x0805;
    pub const TEXP_MULT: u16 = 0x0806;
    pub const TOUT_MULT: u16 = 0x0807;
    pub const MAX_CONS_NUM: u16 = 0x0808;
    pub const CPCRC: u16 = 0x0809;
    pub const TCCID: u16 = 0x080A;
    pub const SCID: u16 = 0x080B;
    pub const DEV_NOT_CFG: u16 = 0x080C;
    pub const CFGOP_NOT_AL: u16 = 0x080D;
    pub const TUNID_NOT_SET: u16 = 0x080E;
    pub const TUNID_MISM: u16 = 0x080F;
    pub const OUNID_CFG: u16 = 0x0810;
    pub const OUNID_OUT: u16 = 0x0811;
}

/// CIP service codes.
pub mod srvc {
    pub const GET_ATTR_SINGLE: u8 = 0x0E;
    pub const SET_ATTR_SINGLE: u8 = 0x10;
    pub const FORWARD_CLOSE: u8 = 0x4E;
    pub const FORWARD_OPEN: u8 = 0x54;
    pub const SAFETY_RESET: u8 = 0x54;
    pub const PROPOSE_TUNID: u8 = 0x56;
    pub const APPLY_TUNID: u8 = 0x57;
    pub const PROPOSE_TUNID_LIST: u8 = 0x58;
    pub const APPLY_TUNID_LIST: u8 = 0x59;

    /// Set in the reply service code of a Message Router Response.
    pub const REPLY_BIT: u8 = 0x80;
}

/// Class codes.
pub const ASSEMBLY_CLASS: u16 = 0x0004;
pub const SAFETY_SUPERVISOR_CLASS: u16 = 0x0039;

/// Assembly instance value meaning "no connection point" / NULL
/// configuration instance.
pub const ASM_NULL_INSTANCE: u16 = 0;

/// Safety validator instance value meaning "no instance".
pub const INVALID_INSTANCE: u16 = 0xFFFF;

/// Transport class/trigger values admitted on safety connections.
pub const TCT_CLIENT_APP_CL0: u8 = 0x20;
pub const TCT_SERVER_APP_CL0: u8 = 0xA0;

/// Connection path segment type bytes.
pub mod seg {
    pub const ELECTRONIC_KEY: u8 = 0x34;
    pub const ELECTRONIC_KEY_FORMAT: u8 = 0x04;
    pub const LOGICAL_CLASS_8: u8 = 0x20;
    pub const LOGICAL_CLASS_16: u8 = 0x21;
    pub const LOGICAL_INSTANCE_8: u8 = 0x24;
    pub const LOGICAL_INSTANCE_16: u8 = 0x25;
    pub const DATA_SIMPLE: u8 = 0x80;
    pub const SAFETY_NETWORK: u8 = 0x50;

    /// Safety network segment format byte values (target formats).
    pub const FORMAT_TARGET_BASE: u8 = 0;
    pub const FORMAT_TARGET_EXT: u8 = 2;
}

/// Network connection parameter word encodings.
pub mod ncp {
    /// Size field (bits 0..8).
    pub const SIZE_MASK: u16 = 0x01FF;
    const TYPE_MASK: u16 = 0x6000;
    const TYPE_MULTICAST: u16 = 0x2000;
    const TYPE_POINT_TO_POINT: u16 = 0x4000;
    const PRIO_HIGH: u16 = 0x0400;
    const PRIO_SCHEDULED: u16 = 0x0800;

    /// Length of a Time Coordination / Time Correction message in bytes.
    /// The "tMsgLen" encodings carry it in the size field.
    pub const TCORR_MSG_LEN: u16 = super::IO_MSGLEN_TCORR;

    pub const NOT_USED: u16 = 0x0000;
    pub const PTP_HP_FIX: u16 = TYPE_POINT_TO_POINT | PRIO_HIGH;
    pub const PTP_SP_FIX: u16 = TYPE_POINT_TO_POINT | PRIO_SCHEDULED;
    pub const MC_HP_FIX: u16 = TYPE_MULTICAST | PRIO_HIGH;
    pub const MC_SP_FIX: u16 = TYPE_MULTICAST | PRIO_SCHEDULED;
    pub const PTP_HP_FIX_TMSG_LEN: u16 = PTP_HP_FIX | TCORR_MSG_LEN;
    pub const PTP_SP_FIX_TMSG_LEN: u16 = PTP_SP_FIX | TCORR_MSG_LEN;
    pub const MC_HP_FIX_TMSG_LEN: u16 = MC_HP_FIX | TCORR_MSG_LEN;
    pub const MC_SP_FIX_TMSG_LEN: u16 = MC_SP_FIX | TCORR_MSG_LEN;

    pub fn is_point_to_point(word: u16) -> bool {
        word & TYPE_MASK == TYPE_POINT_TO_POINT
    }

    pub fn is_multicast(word: u16) -> bool {
        word & TYPE_MASK == TYPE_MULTICAST
    }

    pub fn without_size(word: u16) -> u16 {
        word & !SIZE_MASK
    }

    pub fn size(word: u16) -> u16 {
        word & SIZE_MASK
    }
}

// Safety I/O message lengths. Short messages carry 1..=2 payload bytes
// (len = payload + 5), long messages 3..=250 (len = 2 * payload + 7).
pub const IO_MSGLEN_SHORT_MIN: u16 = 6;
pub const IO_MSGLEN_SHORT_MAX: u16 = 7;
pub const IO_MSGLEN_LONG_MIN: u16 = 13;
pub const IO_MSGLEN_LONG_MAX: u16 = 507;
pub const IO_MSGLEN_TCORR: u16 = 6;
pub const IO_PAYLOAD_MAX: u8 = 250;

// RPI limits in microseconds.
pub const MIN_RPI_DATA_US: u32 = 100;
pub const MAX_RPI_DATA_BASE_US: u32 = 100_000;
pub const MAX_RPI_DATA_EXT_US: u32 = 1_000_000;
pub const MIN_RPI_TCOO_US: u32 = 100;
pub const MAX_RPI_TCOO_US: u32 = 100_000_000;

// Safety parameter limits.
pub const MAX_CNXN_TIMEOUT_MULT: u8 = 7;
pub const MIN_PI_TIMEOUT_MULT: u8 = 1;
pub const MAX_PI_TIMEOUT_MULT_BASE: u8 = 4;
pub const MAX_PIEM: u16 = 1000;
pub const MAX_TCOOM_MIN_MULT_128US: u16 = 7813;
pub const MAX_NTE_MULT_128US: u16 = 45313;
pub const MAX_MAX_FAULT_NUM: u16 = 255;
pub const MAX_CONSUMER_NUM_MCAST: u8 = 15;
pub const MAX_CONSUMER_NUM_SCAST: u8 = 1;
pub const PING_COUNT_INTERVAL_MAX_US: u64 = 100_000_000;
pub const TIME_CORR_CNXN_ID_NOT_USED: u32 = 0xFFFF_FFFF;
pub const INITIAL_TIME_STAMP_NOT_USED: u16 = 0xFFFF;
pub const INITIAL_ROLLOVER_NOT_USED: u16 = 0xFFFF;

/// CRC-S4: the 32-bit CRC protecting configuration data (SCCRC) and the
/// SafetyOpen parameter block (CPCRC). Seeded with all ones, no final xor.
pub const CRC_S4: crc::Algorithm<u32> = crc::Algorithm {
    width: 32,
    poly: 0x04C1_1DB7,
    init: 0xFFFF_FFFF,
    refin: true,
    refout: true,
    xorout: 0x0000_0000,
    check: 0x0000_0000,
    residue: 0x0000_0000,
};

/// CRC-S4 over one buffer.
pub fn crc_s4(data: &[u8]) -> u32 {
    let crc = crc::Crc::<u32>::new(&CRC_S4);
    let mut digest = crc.digest();
    digest.update(data);
    digest.finalize()
}

/// CRC-S4 over a split buffer (used for the CPCRC, which excludes its own
/// word from the covered region).
pub fn crc_s4_split(head: &[u8], tail: &[u8]) -> u32 {
    let crc = crc::Crc::<u32>::new(&CRC_S4);
    let mut digest = crc.digest();
    digest.update(head);
    digest.update(tail);
    digest.finalize()
}
