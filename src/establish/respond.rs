// Forward_Open / Forward_Close response assembly. Responses travel to the
// transport as command-channel messages: a short internal header for the
// transport itself, then the CIP Message Router Response bytes.

use crate::cip::{self, extstat, gstat, srvc};
use crate::transport::{Command, Message};
use crate::types::{CnxnTriad, DeviceIdentity};
use crate::validator::CnxnType;
use crate::wire::Writer;

use super::parse::{OpenParams, SegFormat};

/// General + extended status of a response in the making.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RespStatus {
    pub general: u8,
    pub extended: Option<u16>,
    /// Further additional-status words, beyond the extended status code.
    pub more: Vec<u16>,
}

impl RespStatus {
    pub fn success() -> Self {
        RespStatus { general: gstat::SUCCESS, extended: None, more: Vec::new() }
    }

    pub fn error(general: u8, extended: u16) -> Self {
        RespStatus { general, extended: Some(extended), more: Vec::new() }
    }

    pub fn error_plain(general: u8) -> Self {
        RespStatus { general, extended: None, more: Vec::new() }
    }

    pub fn error_with_words(general: u8, extended: u16, more: Vec<u16>) -> Self {
        RespStatus { general, extended: Some(extended), more }
    }

    pub fn is_success(&self) -> bool {
        self.general == gstat::SUCCESS
    }
}

/// Data reported back for an admitted SafetyOpen.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct AppReply {
    pub instance: u16,
    pub consumer_num: u16,
    pub cnxn_type: CnxnType,
    pub cnxn_point: u16,
    pub initial_ts: u16,
    pub initial_rv: u16,
}

const APP_REPLY_WORDS_BASE: u8 = 5;
const APP_REPLY_WORDS_EXT: u8 = 7;

pub(crate) fn open_success(
    params: &OpenParams,
    reply: &AppReply,
    identity: &DeviceIdentity,
    add_info: u32,
) -> Message {
    let mut w = Writer::with_capacity(50);

    // internal header for the transport
    w.u16(reply.instance);
    // CIP encodes the singlecast consumer number as 0xFFFF; the transport
    // wants 1..=15.
    let consumer = if reply.consumer_num <= cip::MAX_CONSUMER_NUM_MCAST as u16 {
        reply.consumer_num as u8
    } else {
        cip::MAX_CONSUMER_NUM_SCAST
    };
    w.u8(consumer);
    w.u8(reply.cnxn_type.into());
    w.u16(reply.cnxn_point);

    // Message Router Response
    w.u8(srvc::FORWARD_OPEN | srvc::REPLY_BIT);
    w.u8(0);
    w.u8(gstat::SUCCESS);
    w.u8(0);

    // Forward_Open success body. Connection IDs are echoed; a zero value
    // is replaced further down the stack.
    w.u32(params.cnxn_id_ot);
    w.u32(params.cnxn_id_to);
    w.u16(params.triad.conn_serial);
    w.u16(params.triad.orig_vendor);
    w.u32(params.triad.orig_serial);
    // APIs equal the requested RPIs on safety connections.
    w.u32(params.rpi_ot_us);
    w.u32(params.rpi_to_us);
    let ext = params.nsd.format == SegFormat::Extended;
    w.u8(if ext { APP_REPLY_WORDS_EXT } else { APP_REPLY_WORDS_BASE });
    w.u8(0);

    // application reply: consumer number and the PID/CID material
    w.u16(reply.consumer_num);
    w.u16(identity.vendor_id);
    w.u32(identity.serial_num);
    w.u16(reply.instance);
    if ext {
        w.u16(reply.initial_ts);
        w.u16(reply.initial_rv);
    }

    Message::new(Command::SafetyOpenResponse, add_info, w.into_vec())
}

pub(crate) fn open_error(triad: &CnxnTriad, status: &RespStatus, add_info: u32) -> Message {
    let mut w = Writer::with_capacity(32);

    // internal header: no instance was allocated
    w.u16(cip::INVALID_INSTANCE);
    w.u8(0xFF);
    w.u8(CnxnType::Invalid.into());
    w.u16(cip::INVALID_INSTANCE);

    mr_error_response(&mut w, srvc::FORWARD_OPEN, status);
    triad_echo(&mut w, triad);

    Message::new(Command::SafetyOpenResponse, add_info, w.into_vec())
}

pub(crate) fn close_success(
    triad: &CnxnTriad,
    instance: u16,
    consumer_num: u8,
    add_info: u32,
) -> Message {
    let mut w = Writer::with_capacity(22);

    w.u16(instance);
    w.u8(consumer_num);
    w.u8(0);

    w.u8(srvc::FORWARD_CLOSE | srvc::REPLY_BIT);
    w.u8(0);
    w.u8(gstat::SUCCESS);
    w.u8(0);

    w.u16(triad.conn_serial);
    w.u16(triad.orig_vendor);
    w.u32(triad.orig_serial);
    w.u8(0); // application reply size
    w.u8(0);

    Message::new(Command::SafetyCloseResponse, add_info, w.into_vec())
}

pub(crate) fn close_error(triad: &CnxnTriad, status: &RespStatus, add_info: u32) -> Message {
    let mut w = Writer::with_capacity(24);

    w.u16(cip::INVALID_INSTANCE);
    w.u8(0xFF);
    w.u8(0);

    mr_error_response(&mut w, srvc::FORWARD_CLOSE, status);
    triad_echo(&mut w, triad);

    Message::new(Command::SafetyCloseResponse, add_info, w.into_vec())
}

/// True for the extended status codes that define additional status words
/// beyond the code itself.
pub(crate) fn ext_status_has_more_words(general: u8, extended: u16) -> bool {
    general == gstat::CNXN_FAILURE && extended == extstat::RPI_NOT_SUP
}

fn mr_error_response(w: &mut Writer, service: u8, status: &RespStatus) {
    w.u8(service | srvc::REPLY_BIT);
    w.u8(0);
    w.u8(status.general);
    match status.extended {
        Some(ext) => {
            let more = if ext_status_has_more_words(status.general, ext) {
                status.more.as_slice()
            } else {
                &[]
            };
            w.u8(1 + more.len() as u8);
            w.u16(ext);
            for &word in more {
                w.u16(word);
            }
        }
        None => {
            w.u8(0);
        }
    }
}

/// Echo the request triad, unless parsing never got that far.
fn triad_echo(w: &mut Writer, triad: &CnxnTriad) {
    if triad.is_zero() {
        return;
    }
    w.u16(triad.conn_serial);
    w.u16(triad.orig_vendor);
    w.u32(triad.orig_serial);
    // Remaining path size plus reserved byte; kept for tooling that cannot
    // cope with their absence.
    w.u8(0);
    w.u8(0);
}
