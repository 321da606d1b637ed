// Forward_Open decoding. The variable-length byte stream is walked with
// bounded reads only; offsets of the CPCRC-relevant regions are collected
// on the way so the checksum can be recomputed without re-parsing.

use crate::cip::{self, seg};
use crate::sapl::ErrorCode;
use crate::types::{CnxnTriad, ElectronicKey, Scid, Snn, Unid};
use crate::wire::Reader;
use thiserror::Error;

/// Offset of the connection path in the Forward_Open data area.
const PATH_OFFSET: usize = 34;

/// Safety network segment sizes: 3 header bytes plus the field block.
const SSEG_CONTENT_BASE: usize = 53;
const SSEG_CONTENT_EXT: usize = 59;
const SSEG_SIZE_BASE: usize = 3 + SSEG_CONTENT_BASE;
const SSEG_SIZE_EXT: usize = 3 + SSEG_CONTENT_EXT;

/// Offset of the CPCRC within the safety segment (header, TUNID, OUNID and
/// SCID echo come first).
const SSEG_CPCRC_OFFSET: usize = 3 + 30;

const EL_KEY_SIZE: usize = 10;

/// Smallest parseable request: fixed fields, electronic key, Base segment.
pub const FWDO_MIN_SIZE: usize = PATH_OFFSET + EL_KEY_SIZE + SSEG_SIZE_BASE;

/// Largest: three 16-bit paths, a full configuration data segment and an
/// Extended format segment.
pub const FWDO_MAX_SIZE: usize =
    PATH_OFFSET + EL_KEY_SIZE + 3 * 8 + 2 + 510 + SSEG_SIZE_EXT;

/// Safety network segment format.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SegFormat {
    Base,
    Extended,
}

/// Network Safety Data segment of a SafetyOpen.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SafetySegment {
    pub format: SegFormat,
    pub tunid: Unid,
    pub ounid: Unid,
    /// The SCID the originator assumes the device carries.
    pub scid: Scid,
    pub cpcrc: u32,
    pub tcorr_cnxn_id: u32,
    pub tcorr_epi_us: u32,
    pub tcorr_ncp: u16,
    /// Echo byte preceding the multiplier block; carried but not validated.
    pub timeout_mult_echo: u8,
    pub piem: u16,
    pub tcoomm_128us: u16,
    pub ntem_128us: u16,
    /// PI timeout multiplier governing the connection watchdog.
    pub safety_timeout_mult: u8,
    pub max_cons_num: u8,
    // Extended format only; zero / "not used" otherwise.
    pub max_fault_num: u16,
    pub initial_ts: u16,
    pub initial_rv: u16,
}

/// Parsed Forward_Open request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenParams<'a> {
    pub cnxn_id_ot: u32,
    pub cnxn_id_to: u32,
    pub triad: CnxnTriad,
    pub cnxn_timeout_mult: u8,
    pub rpi_ot_us: u32,
    pub ncp_ot: u16,
    pub rpi_to_us: u32,
    pub ncp_to: u16,
    pub transport_trigger: u8,
    pub el_key: ElectronicKey,
    pub cfg_class: u16,
    pub cfg_inst: u16,
    /// Configuration data of a Type 1 SafetyOpen, untouched request bytes.
    pub cfg_data: Option<&'a [u8]>,
    pub cons_point: u16,
    pub prod_point: u16,
    pub nsd: SafetySegment,
}

impl OpenParams<'_> {
    pub fn is_type1(&self) -> bool {
        self.cfg_data.is_some()
    }
}

/// Internal pointers produced during parse, needed to locate the
/// CPCRC-covered region.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Auxiliary {
    pub el_key_off: usize,
    pub nsd_off: usize,
    /// Electronic key plus application paths, in bytes.
    pub key_and_paths_size: u16,
    pub cpcrc_calc: u32,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("request shorter than the fixed SafetyOpen fields")]
    TooShort,
    #[error("request exceeds the maximum SafetyOpen size")]
    TooLong,
    #[error("connection path size does not cover the path")]
    ApSize1,
    #[error("configuration data segment exceeds the connection path")]
    ApSize2,
    #[error("invalid segment in connection path")]
    SegInv,
    #[error("safety network segment size mismatch")]
    SsegSize,
    #[error("malformed logical class segment")]
    InvClass,
    #[error("malformed logical instance segment")]
    InvInst,
    #[error("base format not supported")]
    BaseNotSup,
    #[error("extended format not supported")]
    ExtNotSup,
}

impl ParseError {
    /// Extended status word carried in the unsuccessful response.
    pub fn ext_status(&self) -> u16 {
        match self {
            ParseError::TooShort | ParseError::TooLong => cip::extstat::PARAM_ERR,
            ParseError::ApSize1
            | ParseError::ApSize2
            | ParseError::SegInv
            | ParseError::InvClass
            | ParseError::InvInst => cip::extstat::SEG_INV,
            ParseError::SsegSize | ParseError::BaseNotSup | ParseError::ExtNotSup => {
                cip::extstat::CONFIG_PATH
            }
        }
    }

    pub(crate) fn error_code(&self) -> ErrorCode {
        match self {
            ParseError::TooShort => ErrorCode::SoTooShort,
            ParseError::TooLong => ErrorCode::SoTooLong,
            ParseError::ApSize1 => ErrorCode::SoApSize1,
            ParseError::ApSize2 => ErrorCode::SoApSize2,
            ParseError::SegInv => ErrorCode::SoSegInv,
            ParseError::SsegSize => ErrorCode::SoSsegSize,
            ParseError::InvClass => ErrorCode::SoInvClass,
            ParseError::InvInst => ErrorCode::SoInvInst,
            ParseError::BaseNotSup => ErrorCode::SoBaseNotSup,
            ParseError::ExtNotSup => ErrorCode::SoExtNotSup,
        }
    }
}

/// Decode a Forward_Open request.
pub(crate) fn fwd_open_parse(
    buf: &[u8],
    base_supported: bool,
    ext_supported: bool,
) -> Result<(OpenParams<'_>, Auxiliary), ParseError> {
    if buf.len() < FWDO_MIN_SIZE {
        return Err(ParseError::TooShort);
    }
    if buf.len() > FWDO_MAX_SIZE {
        return Err(ParseError::TooLong);
    }

    let mut r = Reader::new(buf);
    let cnxn_id_ot = r.u32().ok_or(ParseError::TooShort)?;
    let cnxn_id_to = r.u32().ok_or(ParseError::TooShort)?;
    let triad = CnxnTriad {
        conn_serial: r.u16().ok_or(ParseError::TooShort)?,
        orig_vendor: r.u16().ok_or(ParseError::TooShort)?,
        orig_serial: r.u32().ok_or(ParseError::TooShort)?,
    };
    let cnxn_timeout_mult = r.u8().ok_or(ParseError::TooShort)?;
    r.skip(3).ok_or(ParseError::TooShort)?;
    let rpi_ot_us = r.u32().ok_or(ParseError::TooShort)?;
    let ncp_ot = r.u16().ok_or(ParseError::TooShort)?;
    let rpi_to_us = r.u32().ok_or(ParseError::TooShort)?;
    let ncp_to = r.u16().ok_or(ParseError::TooShort)?;
    let transport_trigger = r.u8().ok_or(ParseError::TooShort)?;
    let path_size_words = r.u8().ok_or(ParseError::TooShort)? as usize;

    let path_len = buf.len() - PATH_OFFSET;
    if path_len % 2 != 0 || path_size_words * 2 != path_len {
        return Err(ParseError::ApSize1);
    }

    // Electronic key segment, always first in the connection path.
    let el_key_off = r.pos();
    if r.u8() != Some(seg::ELECTRONIC_KEY) || r.u8() != Some(seg::ELECTRONIC_KEY_FORMAT) {
        return Err(ParseError::SegInv);
    }
    let key = ElectronicKey {
        vendor_id: r.u16().ok_or(ParseError::TooShort)?,
        device_type: r.u16().ok_or(ParseError::TooShort)?,
        product_code: r.u16().ok_or(ParseError::TooShort)?,
        compat_and_major_rev: r.u8().ok_or(ParseError::TooShort)?,
        minor_rev: r.u8().ok_or(ParseError::TooShort)?,
    };

    // Up to three application paths: configuration, consumption, production.
    let mut paths: [(u16, u16); 3] = [(0, cip::ASM_NULL_INSTANCE); 3];
    let mut path_count = 0usize;
    let mut cfg_data: Option<&[u8]> = None;

    loop {
        match r.peek_u8() {
            Some(seg::SAFETY_NETWORK) => break,
            Some(_) if path_count == 3 => return Err(ParseError::SegInv),
            Some(_) => {}
            None => return Err(ParseError::SsegSize),
        }

        let class = read_logical(&mut r, seg::LOGICAL_CLASS_8, seg::LOGICAL_CLASS_16)
            .map_err(|e| if e == ParseError::SegInv { e } else { ParseError::InvClass })?;
        let instance = read_logical(&mut r, seg::LOGICAL_INSTANCE_8, seg::LOGICAL_INSTANCE_16)
            .map_err(|e| if e == ParseError::SegInv { e } else { ParseError::InvInst })?;
        paths[path_count] = (class, instance);
        path_count += 1;

        // Configuration data rides a data segment after the first path.
        if r.peek_u8() == Some(seg::DATA_SIMPLE) {
            if path_count != 1 || cfg_data.is_some() {
                return Err(ParseError::SegInv);
            }
            r.u8();
            let words = r.u8().ok_or(ParseError::ApSize2)? as usize;
            cfg_data = Some(r.bytes(words * 2).ok_or(ParseError::ApSize2)?);
        }
    }

    // Safety network segment closes the connection path.
    let nsd_off = r.pos();
    let key_and_paths_size = (nsd_off - el_key_off) as u16;
    r.u8(); // segment type, peeked above
    let sseg_words = r.u8().ok_or(ParseError::SsegSize)? as usize;
    let format = match r.u8() {
        Some(seg::FORMAT_TARGET_BASE) => {
            if !base_supported {
                return Err(ParseError::BaseNotSup);
            }
            SegFormat::Base
        }
        Some(seg::FORMAT_TARGET_EXT) => {
            if !ext_supported {
                return Err(ParseError::ExtNotSup);
            }
            SegFormat::Extended
        }
        Some(_) => return Err(ParseError::SegInv),
        None => return Err(ParseError::SsegSize),
    };
    let expected = match format {
        SegFormat::Base => SSEG_SIZE_BASE,
        SegFormat::Extended => SSEG_SIZE_EXT,
    };
    if sseg_words * 2 != expected || buf.len() - nsd_off != expected {
        return Err(ParseError::SsegSize);
    }

    let tunid = read_unid(&mut r).ok_or(ParseError::SsegSize)?;
    let ounid = read_unid(&mut r).ok_or(ParseError::SsegSize)?;
    let scid = Scid {
        sccrc: r.u32().ok_or(ParseError::SsegSize)?,
        scts: Snn {
            time: r.u32().ok_or(ParseError::SsegSize)?,
            date: r.u16().ok_or(ParseError::SsegSize)?,
        },
    };
    let cpcrc = r.u32().ok_or(ParseError::SsegSize)?;
    let tcorr_cnxn_id = r.u32().ok_or(ParseError::SsegSize)?;
    let tcorr_epi_us = r.u32().ok_or(ParseError::SsegSize)?;
    let tcorr_ncp = r.u16().ok_or(ParseError::SsegSize)?;
    let timeout_mult_echo = r.u8().ok_or(ParseError::SsegSize)?;
    let piem = r.u16().ok_or(ParseError::SsegSize)?;
    let tcoomm_128us = r.u16().ok_or(ParseError::SsegSize)?;
    let ntem_128us = r.u16().ok_or(ParseError::SsegSize)?;
    let safety_timeout_mult = r.u8().ok_or(ParseError::SsegSize)?;
    let max_cons_num = r.u8().ok_or(ParseError::SsegSize)?;
    let (max_fault_num, initial_ts, initial_rv) = match format {
        SegFormat::Base => (0, 0, 0),
        SegFormat::Extended => (
            r.u16().ok_or(ParseError::SsegSize)?,
            r.u16().ok_or(ParseError::SsegSize)?,
            r.u16().ok_or(ParseError::SsegSize)?,
        ),
    };

    let params = OpenParams {
        cnxn_id_ot,
        cnxn_id_to,
        triad,
        cnxn_timeout_mult,
        rpi_ot_us,
        ncp_ot,
        rpi_to_us,
        ncp_to,
        transport_trigger,
        el_key: key,
        cfg_class: paths[0].0,
        cfg_inst: if path_count >= 1 { paths[0].1 } else { cip::ASM_NULL_INSTANCE },
        cfg_data,
        cons_point: if path_count >= 2 { paths[1].1 } else { cip::ASM_NULL_INSTANCE },
        prod_point: if path_count >= 3 { paths[2].1 } else { cip::ASM_NULL_INSTANCE },
        nsd: SafetySegment {
            format,
            tunid,
            ounid,
            scid,
            cpcrc,
            tcorr_cnxn_id,
            tcorr_epi_us,
            tcorr_ncp,
            timeout_mult_echo,
            piem,
            tcoomm_128us,
            ntem_128us,
            safety_timeout_mult,
            max_cons_num,
            max_fault_num,
            initial_ts,
            initial_rv,
        },
    };
    let mut aux = Auxiliary { el_key_off, nsd_off, key_and_paths_size, cpcrc_calc: 0 };
    aux.cpcrc_calc = cpcrc_calc(buf, &aux);
    Ok((params, aux))
}

/// Recompute the CPCRC: everything from offset 0 through the end of the
/// safety segment, excluding the CPCRC word itself.
pub(crate) fn cpcrc_calc(buf: &[u8], aux: &Auxiliary) -> u32 {
    let cpcrc_off = aux.el_key_off + aux.key_and_paths_size as usize + SSEG_CPCRC_OFFSET;
    debug_assert_eq!(cpcrc_off, aux.nsd_off + SSEG_CPCRC_OFFSET);
    cip::crc_s4_split(&buf[..cpcrc_off], &buf[cpcrc_off + 4..])
}

/// Payload bytes transported by a connection of the given total message
/// length. Zero means the length is not valid for a safety connection.
pub(crate) fn msg_len_to_payload_len(msg_len: u16, multicast: bool) -> u8 {
    let len = if multicast {
        match msg_len.checked_sub(cip::IO_MSGLEN_TCORR) {
            Some(l) => l,
            None => return 0,
        }
    } else {
        msg_len
    };
    if (cip::IO_MSGLEN_SHORT_MIN..=cip::IO_MSGLEN_SHORT_MAX).contains(&len) {
        (len - 5) as u8
    } else if (cip::IO_MSGLEN_LONG_MIN..=cip::IO_MSGLEN_LONG_MAX).contains(&len)
        && (len - 7) % 2 == 0
    {
        ((len - 7) / 2) as u8
    } else {
        0
    }
}

fn read_logical(r: &mut Reader, tag8: u8, tag16: u8) -> Result<u16, ParseError> {
    match r.u8() {
        Some(t) if t == tag8 => r.u8().map(u16::from).ok_or(ParseError::TooShort),
        Some(t) if t == tag16 => {
            if r.u8() != Some(0) {
                return Err(ParseError::TooShort);
            }
            r.u16().ok_or(ParseError::TooShort)
        }
        _ => Err(ParseError::SegInv),
    }
}

fn read_unid(r: &mut Reader) -> Option<Unid> {
    Some(Unid {
        snn: Snn { time: r.u32()?, date: r.u16()? },
        node_id: r.u32()?,
    })
}
