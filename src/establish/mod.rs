// Connection establishment engine: the SafetyOpen / SafetyClose entry
// points and everything they need to decide admission.

pub mod parse;

pub(crate) mod close;
pub(crate) mod elkey;
pub(crate) mod respond;
pub(crate) mod validate;

use crate::assembly::Assemblies;
use crate::cip::gstat;
use crate::ids::IdentityStore;
use crate::sapl::{ErrorCode, SafetyApp};
use crate::supervisor::{Event, Outcome, Supervisor, SupvCtx};
use crate::transport::{Indicators, Message, Transport};
use crate::types::{CnxnTriad, DeviceIdentity};
use crate::validator::ValidatorPool;
use log::debug;
use respond::RespStatus;

/// Everything a SafetyOpen / SafetyClose run touches.
pub(crate) struct EstCtx<'a> {
    pub identity: &'a DeviceIdentity,
    pub multi_port: bool,
    pub base_format: bool,
    pub extended_format: bool,
    pub ids: &'a mut IdentityStore,
    pub assemblies: &'a Assemblies,
    pub supervisor: &'a mut Supervisor,
    pub sapl: &'a mut dyn SafetyApp,
    pub transport: &'a mut dyn Transport,
    pub indicators: &'a mut dyn Indicators,
    pub validators: &'a mut dyn ValidatorPool,
    pub node_ids: &'a [u32],
}

impl EstCtx<'_> {
    pub(crate) fn supervisor_event(&mut self, ev: Event) -> Result<Outcome, ErrorCode> {
        let mut sctx = SupvCtx {
            ids: &mut *self.ids,
            sapl: &mut *self.sapl,
            transport: &mut *self.transport,
            indicators: &mut *self.indicators,
            validators: &mut *self.validators,
            node_ids: self.node_ids,
        };
        self.supervisor.process(ev, &mut sctx)
    }
}

/// Handle a SafetyOpen request arriving from the transport.
pub(crate) fn fwd_open_handler(data: &[u8], add_info: u32, ctx: &mut EstCtx) {
    // The supervisor decides whether a connection may be opened at all in
    // the current device state.
    if let Err(code) = ctx.supervisor_event(Event::FwdOpenReq) {
        let status = if code == ErrorCode::FoWaitTunid {
            RespStatus::error(gstat::CNXN_FAILURE, crate::cip::extstat::TUNID_NOT_SET)
        } else {
            RespStatus::error_plain(gstat::DEV_STATE_CONFLICT)
        };
        send_open_response(
            respond::open_error(&CnxnTriad::default(), &status, add_info),
            ctx,
        );
        return;
    }

    let (params, aux) =
        match parse::fwd_open_parse(data, ctx.base_format, ctx.extended_format) {
            Ok(parsed) => parsed,
            Err(err) => {
                ctx.sapl.error_report(err.error_code(), 0, 0);
                debug!("safety open parse failed: {err}");
                let status = RespStatus::error(gstat::CNXN_FAILURE, err.ext_status());
                send_open_response(
                    respond::open_error(&CnxnTriad::default(), &status, add_info),
                    ctx,
                );
                return;
            }
        };

    let outcome = validate::safety_open_proc(&params, &aux, ctx);
    let msg = match outcome.reply {
        Some(reply) => respond::open_success(&params, &reply, ctx.identity, add_info),
        None => respond::open_error(&params.triad, &outcome.status, add_info),
    };
    send_open_response(msg, ctx);
}

/// Handle a SafetyClose request arriving from the transport.
pub(crate) fn fwd_close_handler(data: &[u8], add_info: u32, ctx: &mut EstCtx) {
    let triad = match close::fwd_close_parse(data) {
        Ok(triad) => triad,
        Err(status) => {
            send_close_response(
                respond::close_error(&CnxnTriad::default(), &status, add_info),
                ctx,
            );
            return;
        }
    };

    let outcome = close::safety_close_proc(&triad, ctx);
    let msg = if outcome.status.is_success() {
        respond::close_success(&triad, outcome.instance, outcome.consumer_num, add_info)
    } else {
        respond::close_error(&triad, &outcome.status, add_info)
    };
    send_close_response(msg, ctx);
}

fn send_open_response(msg: Message, ctx: &mut EstCtx) {
    if !ctx.transport.put(msg) {
        ctx.sapl.error_report(ErrorCode::OpenRespSendFailed, 0, 0);
    }
}

fn send_close_response(msg: Message, ctx: &mut EstCtx) {
    if !ctx.transport.put(msg) {
        ctx.sapl.error_report(ErrorCode::CloseRespSendFailed, 0, 0);
    }
}
