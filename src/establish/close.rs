// Forward_Close handling: match the connection triad against the existing
// validators and tear the instance down.

use crate::cip::{self, extstat, gstat};
use crate::sapl::ErrorCode;
use crate::types::CnxnTriad;
use crate::validator::SvState;
use crate::wire::Reader;

use super::respond::RespStatus;
use super::EstCtx;

/// Minimum Forward_Close request: tick bytes, triad, path size + reserved.
const FWDC_MIN_SIZE: usize = 12;

const TRIAD_OFFSET: usize = 2;

pub(crate) struct CloseOutcome {
    pub status: RespStatus,
    pub instance: u16,
    pub consumer_num: u8,
}

/// Extract the connection triad from a Forward_Close request. Other data in
/// the connection path is not relevant for matching.
pub(crate) fn fwd_close_parse(buf: &[u8]) -> Result<CnxnTriad, RespStatus> {
    if buf.len() < FWDC_MIN_SIZE {
        return Err(RespStatus::error(gstat::CNXN_FAILURE, extstat::PARAM_ERR));
    }
    let mut r = Reader::at(buf, TRIAD_OFFSET);
    Ok(CnxnTriad {
        conn_serial: r.u16().unwrap_or(0),
        orig_vendor: r.u16().unwrap_or(0),
        orig_serial: r.u32().unwrap_or(0),
    })
}

pub(crate) fn safety_close_proc(triad: &CnxnTriad, ctx: &mut EstCtx) -> CloseOutcome {
    let info = match ctx.validators.find(triad) {
        Some(info) => info,
        None => {
            ctx.sapl.error_report(ErrorCode::ScCnxnNotFound, 0, 0);
            return CloseOutcome {
                status: RespStatus::error(gstat::CNXN_FAILURE, extstat::CNXN_NOT_FND),
                instance: cip::INVALID_INSTANCE,
                consumer_num: 0xFF,
            };
        }
    };

    let state = ctx
        .validators
        .instance_info(info.instance)
        .map(|i| i.state)
        .unwrap_or(info.state);
    ctx.validators.stop(info.instance, info.consumer_num);

    // Idle or already-failed instances have no underlying communications
    // left for the transport to dismantle.
    let (instance, consumer_num) = match state {
        SvState::Initializing | SvState::Established => (info.instance, info.consumer_num),
        SvState::Idle | SvState::Failed => (cip::INVALID_INSTANCE, 0xFF),
    };

    CloseOutcome { status: RespStatus::success(), instance, consumer_num }
}
