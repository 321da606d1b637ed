// SafetyOpen admission. Checks run in a fixed order; the first failure
// terminates the sequence. Persistent side effects happen only in the
// commit block at the end, after the application had its veto.

use crate::cip::{self, extstat, gstat, ncp};
use crate::sapl::ErrorCode;
use crate::supervisor::Event;
use crate::types::Unid;
use crate::unid;
use crate::validator::SvState;
use log::debug;

use super::parse::{msg_len_to_payload_len, Auxiliary, OpenParams, SegFormat};
use super::respond::{AppReply, RespStatus};
use super::{elkey, EstCtx};

type Rejection = (RespStatus, ErrorCode);

pub(crate) struct OpenOutcome {
    pub status: RespStatus,
    pub reply: Option<AppReply>,
}

fn fail(ext: u16, code: ErrorCode) -> Rejection {
    (RespStatus::error(gstat::CNXN_FAILURE, ext), code)
}

/// Run the full admission sequence on a parsed SafetyOpen.
pub(crate) fn safety_open_proc(
    params: &OpenParams,
    aux: &Auxiliary,
    ctx: &mut EstCtx,
) -> OpenOutcome {
    match run_checks(params, aux, ctx) {
        Ok(reply) => OpenOutcome { status: RespStatus::success(), reply: Some(reply) },
        Err((status, code)) => {
            ctx.sapl.error_report(code, 0, 0);
            debug!("safety open rejected: {:?} ext {:04X?}", code, status.extended);
            OpenOutcome { status, reply: None }
        }
    }
}

fn run_checks(
    params: &OpenParams,
    aux: &Auxiliary,
    ctx: &mut EstCtx,
) -> Result<AppReply, Rejection> {
    // Message corrupted? Nothing beyond the CRC-covered bytes may be
    // interpreted before this check.
    if aux.cpcrc_calc != params.nsd.cpcrc {
        return Err(fail(extstat::CPCRC, ErrorCode::SoCpcrcMismatch));
    }

    tunid_match_check(&params.nsd.tunid, ctx)?;

    // Duplicate / reopen detection.
    let existing = ctx.validators.find(&params.triad);
    if let Some(info) = existing {
        let requested_server = params.transport_trigger == cip::TCT_SERVER_APP_CL0;
        if info.state != SvState::Failed && info.is_server != requested_server {
            // The originator was reconfigured without closing first.
            let code = if info.is_server {
                ErrorCode::SoServerExists
            } else {
                ErrorCode::SoClientExists
            };
            return Err(fail(extstat::MISCELLANEOUS, code));
        }
    }

    let identity = ctx.identity;
    let sapl = &mut *ctx.sapl;
    elkey::match_check(&params.el_key, identity, |k| sapl.compatible_key_accept(k))?;

    let payload_size = cnxn_params_validate(params)?;

    app_path_verify(params, ctx)?;

    let mut save_ocpunid = false;
    if params.is_type1() {
        config_data_check(params, ctx)?;
    } else {
        scid_check(params, ctx)?;
    }
    if params.transport_trigger == cip::TCT_SERVER_APP_CL0 {
        save_ocpunid = ocpunid_check(params, ctx)?;
    }

    // Application veto.
    let veto = ctx.sapl.safety_open_validate(params, payload_size);
    if veto != 0 {
        return Err(fail(veto, ErrorCode::SoSaplDeny));
    }

    commit(params, payload_size, save_ocpunid, existing, ctx)
}

fn tunid_match_check(tunid: &Unid, ctx: &mut EstCtx) -> Result<(), Rejection> {
    // Multi-port devices may carry FF entries for unused ports; a received
    // FF TUNID would accidentally match those. Single-port devices resolve
    // this through the not-set check below.
    if ctx.multi_port && tunid.is_unset() {
        return Err(fail(extstat::TUNID_MISM, ErrorCode::SoTunidRxFf));
    }
    if !unid::device_has_valid_tunid(ctx.ids.tunid_list()) {
        return Err(fail(extstat::TUNID_NOT_SET, ErrorCode::SoNoTunid));
    }
    if !unid::list_contains(tunid, ctx.ids.tunid_list()) {
        return Err(fail(extstat::TUNID_MISM, ErrorCode::SoTunidMismatch));
    }
    Ok(())
}

/// Checks 6 through 8: connection parameters, RPIs, safety parameters.
/// Returns the payload size of the data direction.
fn cnxn_params_validate(params: &OpenParams) -> Result<u8, Rejection> {
    if params.cnxn_timeout_mult > cip::MAX_CNXN_TIMEOUT_MULT {
        return Err(fail(extstat::TOUT_MULT, ErrorCode::SoInvTimeoutMult));
    }

    let payload_size = match params.transport_trigger {
        cip::TCT_SERVER_APP_CL0 => cnxn_params_validate_server(params)?,
        cip::TCT_CLIENT_APP_CL0 => cnxn_params_validate_client(params)?,
        _ => return Err(fail(extstat::TCT, ErrorCode::SoInvTct)),
    };

    rpi_check(params)?;
    safety_params_check_1(params)?;
    safety_params_check_2(params)?;
    Ok(payload_size)
}

fn cnxn_params_validate_server(params: &OpenParams) -> Result<u8, Rejection> {
    let ot_no_size = ncp::without_size(params.ncp_ot);
    if ot_no_size != ncp::PTP_HP_FIX && ot_no_size != ncp::PTP_SP_FIX {
        return Err(fail(extstat::NET_CNXN_PAR, ErrorCode::SoInvNcp));
    }
    // T->O carries only fixed-length time coordination messages.
    if params.ncp_to != ncp::PTP_HP_FIX_TMSG_LEN && params.ncp_to != ncp::PTP_SP_FIX_TMSG_LEN {
        return Err(fail(extstat::NET_CNXN_PAR, ErrorCode::SoInvNcp));
    }
    if params.nsd.tcorr_ncp != ncp::NOT_USED {
        return Err(fail(extstat::TCCP, ErrorCode::SoInvTcorrNcp));
    }
    cnxn_size_check(ncp::size(params.ncp_ot), false)
}

fn cnxn_params_validate_client(params: &OpenParams) -> Result<u8, Rejection> {
    if params.ncp_ot != ncp::PTP_HP_FIX_TMSG_LEN && params.ncp_ot != ncp::PTP_SP_FIX_TMSG_LEN {
        return Err(fail(extstat::NET_CNXN_PAR, ErrorCode::SoInvNcp));
    }
    if ncp::is_point_to_point(params.ncp_to) {
        let to_no_size = ncp::without_size(params.ncp_to);
        if to_no_size != ncp::PTP_HP_FIX && to_no_size != ncp::PTP_SP_FIX {
            return Err(fail(extstat::NET_CNXN_PAR, ErrorCode::SoInvNcp));
        }
        if params.nsd.tcorr_ncp != ncp::NOT_USED {
            return Err(fail(extstat::TCCP, ErrorCode::SoInvTcorrNcp));
        }
        cnxn_size_check(ncp::size(params.ncp_to), false)
    } else {
        let to_no_size = ncp::without_size(params.ncp_to);
        if to_no_size != ncp::MC_HP_FIX && to_no_size != ncp::MC_SP_FIX {
            return Err(fail(extstat::NET_CNXN_PAR, ErrorCode::SoInvNcp));
        }
        // Both encodings of the time correction parameters appear on the
        // wire; accept either.
        if params.nsd.tcorr_ncp != ncp::NOT_USED
            && params.nsd.tcorr_ncp != ncp::MC_HP_FIX_TMSG_LEN
            && params.nsd.tcorr_ncp != ncp::MC_SP_FIX_TMSG_LEN
        {
            return Err(fail(extstat::TCCP, ErrorCode::SoInvTcorrNcp));
        }
        cnxn_size_check(ncp::size(params.ncp_to), true)
    }
}

fn cnxn_size_check(requested: u16, multicast: bool) -> Result<u8, Rejection> {
    // A multicast producer additionally transmits the time correction
    // message within the same connection.
    if multicast && requested < cip::IO_MSGLEN_TCORR {
        return Err(fail(extstat::SCNXN_SIZE, ErrorCode::SoMcastLenInv));
    }
    let payload = msg_len_to_payload_len(requested, multicast);
    if payload == 0 {
        return Err(fail(extstat::SCNXN_SIZE, ErrorCode::SoInvLen));
    }
    Ok(payload)
}

fn rpi_check(params: &OpenParams) -> Result<(), Rejection> {
    let max_data_us = match params.nsd.format {
        SegFormat::Base => cip::MAX_RPI_DATA_BASE_US,
        SegFormat::Extended => cip::MAX_RPI_DATA_EXT_US,
    };
    // The data direction depends on the connection kind; the opposite
    // direction carries time coordination messages.
    let (data_rpi, tcoo_rpi) = if params.transport_trigger == cip::TCT_CLIENT_APP_CL0 {
        (params.rpi_to_us, params.rpi_ot_us)
    } else {
        (params.rpi_ot_us, params.rpi_to_us)
    };
    if !(cip::MIN_RPI_DATA_US..=max_data_us).contains(&data_rpi)
        || !(cip::MIN_RPI_TCOO_US..=cip::MAX_RPI_TCOO_US).contains(&tcoo_rpi)
    {
        // One extra status word names the acceptable data RPI ceiling in
        // milliseconds.
        let status = RespStatus::error_with_words(
            gstat::CNXN_FAILURE,
            extstat::RPI_NOT_SUP,
            vec![(max_data_us / 1000) as u16],
        );
        return Err((status, ErrorCode::SoRpiInv));
    }
    Ok(())
}

fn safety_params_check_1(params: &OpenParams) -> Result<(), Rejection> {
    let nsd = &params.nsd;
    let multicast = ncp::is_multicast(params.ncp_to);

    if nsd.tcorr_epi_us != 0 && !multicast {
        return Err(fail(extstat::MISCELLANEOUS, ErrorCode::SoInvTcorrEpi));
    }

    // The ping interval multiplier must cover the slowest consumer of the
    // connection plus the multicast join window.
    let tmult_capped = nsd.safety_timeout_mult.min(cip::MAX_PI_TIMEOUT_MULT_BASE) as u16;
    let piem_min =
        tmult_capped * nsd.max_cons_num as u16 + cip::MAX_CONSUMER_NUM_MCAST as u16;
    if nsd.piem < piem_min || nsd.piem > cip::MAX_PIEM {
        return Err(fail(extstat::PIEM, ErrorCode::SoInvPiem));
    }

    // On a producing target the EPI equals the T->O RPI, on a consuming
    // target the O->T RPI.
    let epi_us = if params.transport_trigger == cip::TCT_CLIENT_APP_CL0 {
        params.rpi_to_us
    } else {
        params.rpi_ot_us
    };
    if epi_us as u64 * nsd.piem as u64 > cip::PING_COUNT_INTERVAL_MAX_US {
        return Err(fail(extstat::PIEM, ErrorCode::SoInvPingInt));
    }

    if nsd.tcoomm_128us > cip::MAX_TCOOM_MIN_MULT_128US {
        return Err(fail(extstat::TCMMM, ErrorCode::SoInvTcmmm));
    }
    if nsd.ntem_128us > cip::MAX_NTE_MULT_128US {
        return Err(fail(extstat::TEXP_MULT, ErrorCode::SoInvNtem));
    }

    if nsd.safety_timeout_mult < cip::MIN_PI_TIMEOUT_MULT
        || (nsd.format == SegFormat::Base
            && nsd.safety_timeout_mult > cip::MAX_PI_TIMEOUT_MULT_BASE)
    {
        return Err(fail(extstat::TOUT_MULT, ErrorCode::SoInvSafetyTmult));
    }
    Ok(())
}

fn safety_params_check_2(params: &OpenParams) -> Result<(), Rejection> {
    let nsd = &params.nsd;
    let multicast = ncp::is_multicast(params.ncp_to);

    let max_cons = if multicast {
        cip::MAX_CONSUMER_NUM_MCAST
    } else {
        cip::MAX_CONSUMER_NUM_SCAST
    };
    if nsd.max_cons_num == 0 || nsd.max_cons_num > max_cons {
        return Err(fail(extstat::MAX_CONS_NUM, ErrorCode::SoInvMaxConsNum));
    }

    if !multicast && nsd.tcorr_cnxn_id != cip::TIME_CORR_CNXN_ID_NOT_USED {
        return Err(fail(extstat::TCCID, ErrorCode::SoInvTccid));
    }

    if nsd.format == SegFormat::Extended {
        if nsd.max_fault_num > cip::MAX_MAX_FAULT_NUM {
            return Err(fail(extstat::MISCELLANEOUS, ErrorCode::SoInvMaxFaultNum));
        }
        // Producers generate the initial timestamp themselves; consumers
        // and multicast producers must receive the "not used" markers.
        let is_server = params.transport_trigger == cip::TCT_SERVER_APP_CL0;
        if (is_server || multicast)
            && (nsd.initial_ts != cip::INITIAL_TIME_STAMP_NOT_USED
                || nsd.initial_rv != cip::INITIAL_ROLLOVER_NOT_USED)
        {
            return Err(fail(extstat::PARAM_ERR, ErrorCode::SoInvInitialTsRv));
        }
    }
    Ok(())
}

fn app_path_verify(params: &OpenParams, ctx: &EstCtx) -> Result<(), Rejection> {
    if params.cfg_class != cip::ASSEMBLY_CLASS {
        return Err(fail(extstat::CONFIG_PATH, ErrorCode::SoInvCfgPath));
    }
    if params.cfg_inst == cip::ASM_NULL_INSTANCE {
        if params.cfg_data.is_some() {
            return Err(fail(extstat::CONFIG_PATH, ErrorCode::SoInvCfgPath));
        }
    } else if params.cfg_data.is_none() {
        return Err(fail(extstat::CONFIG_PATH, ErrorCode::SoInvCfgPath));
    }

    if params.transport_trigger == cip::TCT_SERVER_APP_CL0 {
        if params.prod_point != cip::ASM_NULL_INSTANCE {
            return Err(fail(extstat::PROD_PATH, ErrorCode::SoInvProdPath));
        }
        if !ctx.assemblies.is_output(params.cons_point) {
            return Err(fail(extstat::CONS_PATH, ErrorCode::SoInvConsPath));
        }
    } else {
        if params.cons_point != cip::ASM_NULL_INSTANCE {
            return Err(fail(extstat::CONS_PATH, ErrorCode::SoInvConsPath));
        }
        if !ctx.assemblies.is_input(params.prod_point) {
            return Err(fail(extstat::PROD_PATH, ErrorCode::SoInvProdPath));
        }
    }
    Ok(())
}

/// Type 1: verify the configuration payload and the configuration owner.
fn config_data_check(params: &OpenParams, ctx: &EstCtx) -> Result<(), Rejection> {
    let data = params.cfg_data.unwrap_or(&[]);
    if cip::crc_s4(data) != params.nsd.scid.sccrc {
        return Err(fail(extstat::SCID, ErrorCode::SoSccrcMismatch));
    }

    let cfunid = ctx.ids.cfunid();
    if cfunid.is_zero() {
        // Unowned: the originator becomes the owner during commit.
        Ok(())
    } else if cfunid.is_unset() {
        // Owned by a configuration tool; SafetyOpen configuration is
        // locked out.
        Err(fail(extstat::CFGOP_NOT_AL, ErrorCode::SoToolOwned))
    } else if cfunid != params.nsd.ounid {
        Err(fail(extstat::OUNID_CFG, ErrorCode::SoCfunidMismatch))
    } else {
        Ok(())
    }
}

/// Type 2: the SCID echo must name our configuration, or waive the check.
fn scid_check(params: &OpenParams, ctx: &EstCtx) -> Result<(), Rejection> {
    if ctx.ids.scid_is_zero() {
        return Err(fail(extstat::DEV_NOT_CFG, ErrorCode::SoUnconfigured));
    }
    if params.nsd.scid.is_zero() {
        // The originator takes responsibility for the configuration state.
        return Ok(());
    }
    if params.nsd.scid != ctx.ids.scid() {
        return Err(fail(extstat::SCID, ErrorCode::SoScidMismatch));
    }
    Ok(())
}

/// Output ownership. Returns whether a new OCPUNID must be persisted.
fn ocpunid_check(params: &OpenParams, ctx: &mut EstCtx) -> Result<bool, Rejection> {
    let ocpunid = ctx
        .ids
        .ocpunid_get(params.cons_point, ctx.assemblies, &mut *ctx.sapl)
        .map_err(|_| fail(extstat::CONS_PATH, ErrorCode::SoOcpNotFound))?;

    if ocpunid.is_zero() || ocpunid == params.nsd.ounid {
        Ok(true)
    } else {
        Err(fail(extstat::OUNID_OUT, ErrorCode::SoOcpOwned))
    }
}

fn commit(
    params: &OpenParams,
    payload_size: u8,
    save_ocpunid: bool,
    existing: Option<crate::validator::SvInfo>,
    ctx: &mut EstCtx,
) -> Result<AppReply, Rejection> {
    if params.is_type1() {
        ctx.supervisor_event(Event::Type1SafetyOpen)
            .map_err(|_| fail(extstat::MISCELLANEOUS, ErrorCode::SoStateMachine))?;
        if !ctx.sapl.apply_config() {
            return Err(fail(extstat::MISCELLANEOUS, ErrorCode::SoSaplApplyFail));
        }
        ctx.supervisor_event(Event::ApplyReq)
            .map_err(|_| fail(extstat::MISCELLANEOUS, ErrorCode::SoStateMachine))?;
        // The originator becomes the configuration owner.
        ctx.ids
            .scid_set(params.nsd.scid, &mut *ctx.sapl)
            .map_err(|_| fail(extstat::MISCELLANEOUS, ErrorCode::SoStoreFailed))?;
        ctx.ids
            .cfunid_set(params.nsd.ounid, &mut *ctx.sapl)
            .map_err(|_| fail(extstat::MISCELLANEOUS, ErrorCode::SoStoreFailed))?;
    }

    if save_ocpunid {
        ctx.ids
            .ocpunid_set(params.cons_point, params.nsd.ounid, ctx.assemblies, &mut *ctx.sapl)
            .map_err(|_| fail(extstat::MISCELLANEOUS, ErrorCode::SoStoreFailed))?;
    }

    let instance = match existing {
        None => ctx
            .validators
            .alloc(params)
            .map_err(|_| fail(extstat::CNXN_ALLOC, ErrorCode::SoAllocFailed))?,
        Some(info) if info.multi_producer && info.state != SvState::Failed => {
            // Further consumer joining an established multicast producer.
            ctx.validators
                .alloc(params)
                .map_err(|_| fail(extstat::CNXN_ALLOC, ErrorCode::SoAllocFailed))?
        }
        Some(info) => {
            ctx.validators
                .reinit(params, &info)
                .map_err(|_| fail(extstat::MISCELLANEOUS, ErrorCode::SoStateMachine))?;
            info.instance
        }
    };

    let init = ctx
        .validators
        .target_init(params, payload_size, instance)
        .map_err(|_| fail(extstat::MISCELLANEOUS, ErrorCode::SoInitFailed))?;

    let cnxn_point = if params.transport_trigger == cip::TCT_SERVER_APP_CL0 {
        params.cons_point
    } else {
        params.prod_point
    };

    Ok(AppReply {
        instance,
        consumer_num: init.consumer_num,
        cnxn_type: init.cnxn_type,
        cnxn_point,
        initial_ts: init.initial_ts,
        initial_rv: init.initial_rv,
    })
}
