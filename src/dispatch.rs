// Explicit services of the Safety Supervisor Object: attribute access,
// Safety_Reset and the Propose/Apply TUNID services. Single-port devices
// serve the single-UNID variants, multi-port devices the list variants;
// the two sets are mutually exclusive.

use crate::assembly::Assemblies;
use crate::cip::{gstat, srvc, ASSEMBLY_CLASS};
use crate::ids::IdentityStore;
use crate::sapl::{
    ErrorCode, NvSlot, SafetyApp, RESET_PASSWORD_SIZE, RESET_TYPE_0, RESET_TYPE_1, RESET_TYPE_2,
};
use crate::supervisor::{Event, Outcome, ProposePhase, Supervisor, SupvCtx};
use crate::transport::{Indicators, Transport};
use crate::types::{Unid, DeviceState};
use crate::unid;
use crate::validator::ValidatorPool;
use crate::wire::Writer;
use log::debug;

// Instance attribute ids.
const IAID_DEV_STATUS: u16 = 11;
const IAID_EXC_STATUS: u16 = 12;
const IAID_AL_ENABLE: u16 = 15;
const IAID_WN_ENABLE: u16 = 16;
const IAID_CFG_UNID: u16 = 25;
const IAID_SCID: u16 = 26;
const IAID_TRG_UNID: u16 = 27;
const IAID_OCPUNID: u16 = 28;
const IAID_PROP_TUNID: u16 = 29;
const IAID_TRG_UNID_LIST: u16 = 30;
const IAID_PROP_TUNID_LIST: u16 = 31;

const CLASS_ATTR_REVISION: u16 = 1;
const CLASS_REVISION: u16 = 1;

const EXC_ALARM_BITS: u8 = 0x07;
const EXC_WARNING_BITS: u8 = 0x70;

const RESET_LEN_TYPE01: usize = 1 + RESET_PASSWORD_SIZE + Unid::SIZE;
const RESET_LEN_TYPE2: usize = RESET_LEN_TYPE01 + 1;

/// Decoded explicit request addressed at the Safety Supervisor Object.
#[derive(Clone, Debug)]
pub struct ExplicitRequest<'a> {
    pub service: u8,
    /// 0 addresses the class; the only instance is 1.
    pub instance: u32,
    pub attribute: Option<u16>,
    pub data: &'a [u8],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExplicitResponse {
    pub general_status: u8,
    pub data: Vec<u8>,
}

impl ExplicitResponse {
    fn status(general_status: u8) -> Self {
        ExplicitResponse { general_status, data: Vec::new() }
    }

    fn ok(data: Vec<u8>) -> Self {
        ExplicitResponse { general_status: gstat::SUCCESS, data }
    }
}

/// Alarm/Warning enable attributes (persistent, default enabled).
#[derive(Copy, Clone, Debug)]
pub(crate) struct SupvAttrs {
    pub alarm_enable: bool,
    pub warning_enable: bool,
}

impl SupvAttrs {
    pub fn restore(sapl: &mut dyn SafetyApp) -> Result<Self, ErrorCode> {
        let mut alarm = [1u8];
        if !sapl.nv_restore(NvSlot::AlarmEnable, &mut alarm) {
            sapl.error_report(ErrorCode::NvRestoreAlarmEnable, 0, 0);
            return Err(ErrorCode::NvRestoreAlarmEnable);
        }
        let mut warning = [1u8];
        if !sapl.nv_restore(NvSlot::WarningEnable, &mut warning) {
            sapl.error_report(ErrorCode::NvRestoreWarnEnable, 0, 0);
            return Err(ErrorCode::NvRestoreWarnEnable);
        }
        Ok(SupvAttrs { alarm_enable: alarm[0] != 0, warning_enable: warning[0] != 0 })
    }
}

pub(crate) struct DispCtx<'a> {
    pub ports: usize,
    pub attrs: &'a mut SupvAttrs,
    pub assemblies: &'a Assemblies,
    pub ids: &'a mut IdentityStore,
    pub supervisor: &'a mut Supervisor,
    pub sapl: &'a mut dyn SafetyApp,
    pub transport: &'a mut dyn Transport,
    pub indicators: &'a mut dyn Indicators,
    pub validators: &'a mut dyn ValidatorPool,
    pub node_ids: &'a [u32],
}

impl DispCtx<'_> {
    fn supervisor_event(&mut self, ev: Event) -> Result<Outcome, ErrorCode> {
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

pub(crate) fn explicit_request(req: &ExplicitRequest, ctx: &mut DispCtx) -> ExplicitResponse {
    if req.instance == 0 {
        return class_service(req);
    }
    if req.instance != 1 {
        return ExplicitResponse::status(gstat::OBJ_DOES_NOT_EXIST);
    }

    let single_port = ctx.ports == 1;
    match req.service {
        srvc::GET_ATTR_SINGLE => inst_get_attr(req, ctx),
        srvc::SET_ATTR_SINGLE => inst_set_attr(req, ctx),
        srvc::SAFETY_RESET => inst_safety_reset(req, ctx),
        srvc::PROPOSE_TUNID if single_port => inst_propose_tunid(req, ctx),
        srvc::APPLY_TUNID if single_port => inst_apply_tunid(req, ctx),
        srvc::PROPOSE_TUNID_LIST if !single_port => inst_propose_tunid_list(req, ctx),
        srvc::APPLY_TUNID_LIST if !single_port => inst_apply_tunid_list(req, ctx),
        _ => ExplicitResponse::status(gstat::SERVICE_NOT_SUP),
    }
}

fn class_service(req: &ExplicitRequest) -> ExplicitResponse {
    if req.service != srvc::GET_ATTR_SINGLE {
        return ExplicitResponse::status(gstat::SERVICE_NOT_SUP);
    }
    let attr = match req.attribute {
        Some(attr) => attr,
        None => return ExplicitResponse::status(gstat::PATH_DST_UNKNOWN),
    };
    if !req.data.is_empty() {
        return ExplicitResponse::status(gstat::TOO_MUCH_DATA);
    }
    match attr {
        CLASS_ATTR_REVISION => {
            ExplicitResponse::ok(CLASS_REVISION.to_le_bytes().to_vec())
        }
        _ => ExplicitResponse::status(gstat::ATTR_NOT_SUP),
    }
}

fn inst_get_attr(req: &ExplicitRequest, ctx: &mut DispCtx) -> ExplicitResponse {
    let attr = match req.attribute {
        Some(attr) => attr,
        None => return ExplicitResponse::status(gstat::PATH_DST_UNKNOWN),
    };
    if !req.data.is_empty() {
        return ExplicitResponse::status(gstat::TOO_MUCH_DATA);
    }
    let single_port = ctx.ports == 1;
    match attr {
        IAID_DEV_STATUS => {
            ExplicitResponse::ok(vec![u8::from(ctx.supervisor.state())])
        }
        IAID_EXC_STATUS => {
            let mut value = ctx.supervisor.exception_status();
            if !ctx.attrs.alarm_enable {
                value &= !EXC_ALARM_BITS;
            }
            if !ctx.attrs.warning_enable {
                value &= !EXC_WARNING_BITS;
            }
            ExplicitResponse::ok(vec![value])
        }
        IAID_AL_ENABLE => ExplicitResponse::ok(vec![ctx.attrs.alarm_enable as u8]),
        IAID_WN_ENABLE => ExplicitResponse::ok(vec![ctx.attrs.warning_enable as u8]),
        IAID_CFG_UNID => ExplicitResponse::ok(ctx.ids.cfunid().to_bytes().to_vec()),
        IAID_SCID => ExplicitResponse::ok(ctx.ids.scid().to_bytes().to_vec()),
        IAID_TRG_UNID if single_port => {
            ExplicitResponse::ok(ctx.ids.tunid_list()[0].to_bytes().to_vec())
        }
        IAID_TRG_UNID_LIST if !single_port => {
            ExplicitResponse::ok(unid_list_attr(ctx.ids.tunid_list()))
        }
        IAID_OCPUNID => {
            let entries = ctx.ids.ocpunid_entries(ctx.assemblies);
            let mut w = Writer::new();
            w.u16(entries.len() as u16);
            for (instance, owner) in entries {
                w.bytes(&owner.to_bytes());
                // EPATH to the owned output assembly instance.
                w.u8(6);
                w.u8(0x20);
                w.u8(ASSEMBLY_CLASS as u8);
                w.u8(0x25);
                w.u8(0);
                w.u16(instance);
            }
            ExplicitResponse::ok(w.into_vec())
        }
        IAID_PROP_TUNID if single_port => {
            ExplicitResponse::ok(ctx.ids.proposed()[0].to_bytes().to_vec())
        }
        IAID_PROP_TUNID_LIST if !single_port => {
            ExplicitResponse::ok(unid_list_attr(ctx.ids.proposed()))
        }
        _ => ExplicitResponse::status(gstat::ATTR_NOT_SUP),
    }
}

fn inst_set_attr(req: &ExplicitRequest, ctx: &mut DispCtx) -> ExplicitResponse {
    let attr = match req.attribute {
        Some(attr) => attr,
        None => return ExplicitResponse::status(gstat::PATH_DST_UNKNOWN),
    };
    match attr {
        IAID_AL_ENABLE | IAID_WN_ENABLE => {
            if req.data.len() > 1 {
                return ExplicitResponse::status(gstat::TOO_MUCH_DATA);
            }
            if req.data.is_empty() {
                return ExplicitResponse::status(gstat::NOT_ENOUGH_DATA);
            }
            let value = req.data[0];
            if value > 1 {
                return ExplicitResponse::status(gstat::INVALID_ATTR_VAL);
            }
            let slot = if attr == IAID_AL_ENABLE {
                NvSlot::AlarmEnable
            } else {
                NvSlot::WarningEnable
            };
            if !ctx.sapl.nv_store(slot, &[value]) {
                return ExplicitResponse::status(gstat::STORE_OP_FAILURE);
            }
            if attr == IAID_AL_ENABLE {
                ctx.attrs.alarm_enable = value != 0;
            } else {
                ctx.attrs.warning_enable = value != 0;
            }
            ExplicitResponse::status(gstat::SUCCESS)
        }
        IAID_DEV_STATUS | IAID_EXC_STATUS | IAID_CFG_UNID | IAID_SCID | IAID_TRG_UNID
        | IAID_TRG_UNID_LIST | IAID_OCPUNID | IAID_PROP_TUNID | IAID_PROP_TUNID_LIST => {
            ExplicitResponse::status(gstat::ATTR_NOT_SETTABLE)
        }
        _ => ExplicitResponse::status(gstat::ATTR_NOT_SUP),
    }
}

fn inst_safety_reset(req: &ExplicitRequest, ctx: &mut DispCtx) -> ExplicitResponse {
    if req.attribute.is_some() {
        return ExplicitResponse::status(gstat::PATH_SEG_ERROR);
    }
    if req.data.len() < RESET_LEN_TYPE01 {
        return ExplicitResponse::status(gstat::NOT_ENOUGH_DATA);
    }
    let reset_type = req.data[0];
    let expected_len = match reset_type {
        RESET_TYPE_0 | RESET_TYPE_1 => RESET_LEN_TYPE01,
        RESET_TYPE_2 => RESET_LEN_TYPE2,
        _ => return ExplicitResponse::status(gstat::INVALID_PARAM),
    };
    if req.data.len() < expected_len {
        return ExplicitResponse::status(gstat::NOT_ENOUGH_DATA);
    }
    if req.data.len() > expected_len {
        return ExplicitResponse::status(gstat::TOO_MUCH_DATA);
    }

    let password = &req.data[1..1 + RESET_PASSWORD_SIZE];
    let target = Unid::from_bytes(&req.data[1 + RESET_PASSWORD_SIZE..]).unwrap_or(Unid::ZERO);
    let attr_bit_map = if reset_type == RESET_TYPE_2 { req.data[RESET_LEN_TYPE01] } else { 0 };

    // An FF target UNID only addresses a device still waiting for its
    // identity; everywhere else it cannot be ours.
    let tunids = ctx.ids.tunid_list();
    if ctx.supervisor.state() != DeviceState::WaitingForTunid
        && unid::device_has_valid_tunid(tunids)
        && target.is_unset()
    {
        return ExplicitResponse::status(gstat::INVALID_PARAM);
    }
    if !target.is_unset() && !unid::list_contains(&target, tunids) {
        return ExplicitResponse::status(gstat::INVALID_PARAM);
    }

    // A reset must not pull a running safety connection away.
    if ctx.validators.established_count() > 0 {
        return ExplicitResponse::status(gstat::OBJ_STATE_CONFLICT);
    }

    if ctx.supervisor_event(Event::ResetReq).is_err() {
        return ExplicitResponse::status(gstat::RESOURCE_UNAVAIL);
    }

    // The application answers with the general status to transmit and
    // performs the actual reset after the response is flushed.
    let status = ctx.sapl.safety_reset(reset_type, attr_bit_map, password);
    debug!("safety reset type {reset_type} -> status {status:#04x}");
    ExplicitResponse::status(status)
}

fn inst_propose_tunid(req: &ExplicitRequest, ctx: &mut DispCtx) -> ExplicitResponse {
    if req.attribute.is_some() {
        return ExplicitResponse::status(gstat::PATH_SEG_ERROR);
    }
    if req.data.len() > Unid::SIZE {
        return ExplicitResponse::status(gstat::TOO_MUCH_DATA);
    }
    if req.data.len() < Unid::SIZE {
        return ExplicitResponse::status(gstat::NOT_ENOUGH_DATA);
    }
    let proposed = Unid::from_bytes(req.data).unwrap_or(Unid::ZERO);

    // An all-FF UNID cancels the proposing sequence.
    let phase = if proposed.is_unset() {
        ProposePhase::Stop
    } else {
        if !unid::tunid_vs_nodeid_check(&[proposed], ctx.node_ids) {
            return ExplicitResponse::status(gstat::INVALID_PARAM);
        }
        ProposePhase::Start
    };

    if ctx.supervisor_event(Event::ProposeTunid(phase)).is_err() {
        return ExplicitResponse::status(gstat::OBJ_STATE_CONFLICT);
    }
    ctx.ids.proposed_set(&[proposed]);
    ExplicitResponse::status(gstat::SUCCESS)
}

fn inst_apply_tunid(req: &ExplicitRequest, ctx: &mut DispCtx) -> ExplicitResponse {
    // Only valid while waiting for a TUNID.
    if ctx.supervisor_event(Event::ApplyTunidCheck).is_err() {
        return ExplicitResponse::status(gstat::OBJ_STATE_CONFLICT);
    }
    if req.attribute.is_some() {
        return ExplicitResponse::status(gstat::PATH_SEG_ERROR);
    }
    if req.data.len() > Unid::SIZE {
        return ExplicitResponse::status(gstat::TOO_MUCH_DATA);
    }
    if req.data.len() < Unid::SIZE {
        return ExplicitResponse::status(gstat::NOT_ENOUGH_DATA);
    }
    let applied = Unid::from_bytes(req.data).unwrap_or(Unid::ZERO);
    if applied != ctx.ids.proposed()[0] || applied.is_unset() {
        return ExplicitResponse::status(gstat::INVALID_PARAM);
    }

    apply_tunid_list(&[applied], ctx)
}

fn inst_propose_tunid_list(req: &ExplicitRequest, ctx: &mut DispCtx) -> ExplicitResponse {
    if req.attribute.is_some() {
        return ExplicitResponse::status(gstat::PATH_SEG_ERROR);
    }
    let list = match parse_unid_list(req.data, ctx.ports) {
        Ok(list) => list,
        Err(status) => return ExplicitResponse::status(status),
    };

    let phase = if list.iter().all(Unid::is_unset) {
        ProposePhase::Stop
    } else {
        if !unid::tunid_vs_nodeid_check(&list, ctx.node_ids) {
            return ExplicitResponse::status(gstat::INVALID_PARAM);
        }
        ProposePhase::Start
    };

    if ctx.supervisor_event(Event::ProposeTunid(phase)).is_err() {
        return ExplicitResponse::status(gstat::OBJ_STATE_CONFLICT);
    }
    ctx.ids.proposed_set(&list);
    ExplicitResponse::status(gstat::SUCCESS)
}

fn inst_apply_tunid_list(req: &ExplicitRequest, ctx: &mut DispCtx) -> ExplicitResponse {
    if ctx.supervisor_event(Event::ApplyTunidCheck).is_err() {
        return ExplicitResponse::status(gstat::OBJ_STATE_CONFLICT);
    }
    if req.attribute.is_some() {
        return ExplicitResponse::status(gstat::PATH_SEG_ERROR);
    }
    let list = match parse_unid_list(req.data, ctx.ports) {
        Ok(list) => list,
        Err(status) => return ExplicitResponse::status(status),
    };
    if list != ctx.ids.proposed() || list.iter().all(Unid::is_unset) {
        return ExplicitResponse::status(gstat::INVALID_PARAM);
    }

    apply_tunid_list(&list, ctx)
}

/// Common tail of both apply services: persist, publish, transition.
fn apply_tunid_list(list: &[Unid], ctx: &mut DispCtx) -> ExplicitResponse {
    if ctx.ids.tunid_list_set(list, &mut *ctx.sapl).is_err() {
        return ExplicitResponse::status(gstat::STORE_OP_FAILURE);
    }
    let _ = ctx.ids.send_snn(&mut *ctx.transport, &mut *ctx.sapl);
    ctx.ids.proposed_reset();

    if ctx.supervisor_event(Event::ApplyTunid).is_err() {
        return ExplicitResponse::status(gstat::RESOURCE_UNAVAIL);
    }
    ExplicitResponse::status(gstat::SUCCESS)
}

fn parse_unid_list(data: &[u8], ports: usize) -> Result<Vec<Unid>, u8> {
    if data.is_empty() {
        return Err(gstat::NOT_ENOUGH_DATA);
    }
    let count = data[0] as usize;
    if count != ports {
        return Err(gstat::INVALID_PARAM);
    }
    let expected = 1 + count * Unid::SIZE;
    if data.len() < expected {
        return Err(gstat::NOT_ENOUGH_DATA);
    }
    if data.len() > expected {
        return Err(gstat::TOO_MUCH_DATA);
    }
    Ok((0..count)
        .map(|i| Unid::from_bytes(&data[1 + i * Unid::SIZE..]).unwrap_or(Unid::ZERO))
        .collect())
}

fn unid_list_attr(list: &[Unid]) -> Vec<u8> {
    let mut w = Writer::with_capacity(1 + list.len() * Unid::SIZE);
    w.u8(list.len() as u8);
    for u in list {
        w.bytes(&u.to_bytes());
    }
    w.into_vec()
}
