// Bring-up daemon for the safety core: loads a device profile, wires the
// core against a logging transport and a small in-process validator pool,
// then optionally replays recorded Forward_Open / Forward_Close frames.

use cipsafe::assembly::{AsmEntry, AsmKind};
use cipsafe::establish::parse::OpenParams;
use cipsafe::sapl::{ErrorCode, NvSlot, SafetyApp};
use cipsafe::transport::{Command, LogOnly, Message};
use cipsafe::types::{CnxnTriad, DeviceIdentity, DeviceState, ElectronicKey};
use cipsafe::validator::{CnxnEvent, CnxnType, InitReply, SvInfo, SvState, ValidatorPool};
use cipsafe::{CoreConfig, SafetyCore};

use clap::Parser;
use log::{info, warn};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Device profile (JSON)
    #[arg(long, env = "CIPSAFE_PROFILE")]
    profile: PathBuf,

    /// Directory for the non-volatile attribute files
    #[arg(long, default_value = "/var/lib/cipsafed")]
    nv_dir: PathBuf,

    /// Replay file: one `open:<hex>` or `close:<hex>` frame per line
    #[arg(long)]
    replay: Option<PathBuf>,

    /// If true, wipe the non-volatile attributes before starting.
    #[arg(long)]
    factory_reset: bool,
}

#[derive(Deserialize, Debug)]
struct DeviceProfile {
    vendor_id: u16,
    device_type: u16,
    product_code: u16,
    major_rev: u8,
    minor_rev: u8,
    serial_num: u32,
    node_ids: Vec<u32>,
    #[serde(default = "default_true")]
    base_format: bool,
    #[serde(default = "default_true")]
    extended_format: bool,
    #[serde(default)]
    input_assemblies: Vec<u16>,
    #[serde(default)]
    output_assemblies: Vec<u16>,
}

fn default_true() -> bool {
    true
}

/// File-backed safety application: every NV slot is one file, everything
/// else is permissive and logged.
struct FileApp {
    nv_dir: PathBuf,
}

impl FileApp {
    fn slot_path(&self, slot: NvSlot) -> PathBuf {
        let name = match slot {
            NvSlot::AlarmEnable => "alarm_enable",
            NvSlot::WarningEnable => "warning_enable",
            NvSlot::Cfunid => "cfunid",
            NvSlot::OcpunidTable => "ocpunid",
            NvSlot::Scid => "scid",
            NvSlot::TunidList => "tunid",
        };
        self.nv_dir.join(name)
    }
}

impl SafetyApp for FileApp {
    fn self_test_result(&mut self) -> bool {
        true
    }

    fn error_report(&mut self, code: ErrorCode, instance: u16, add_info: u32) {
        if code.is_fail_safe() {
            warn!("fail-safe error {code:?} instance={instance} info={add_info:#x}");
        } else {
            info!("protocol event {code:?} instance={instance} info={add_info:#x}");
        }
    }

    fn nv_store(&mut self, slot: NvSlot, data: &[u8]) -> bool {
        fs::write(self.slot_path(slot), data).is_ok()
    }

    fn nv_restore(&mut self, slot: NvSlot, out: &mut [u8]) -> bool {
        match fs::read(self.slot_path(slot)) {
            Ok(bytes) if bytes.len() == out.len() => {
                out.copy_from_slice(&bytes);
                true
            }
            // Factory state: leave the caller's default image untouched.
            Err(_) => true,
            Ok(_) => false,
        }
    }

    fn safety_open_validate(&mut self, _params: &OpenParams, payload_size: u8) -> u16 {
        info!("application accepts safety open, payload {payload_size} bytes");
        0
    }

    fn apply_config(&mut self) -> bool {
        true
    }

    fn compatible_key_accept(&mut self, key: &ElectronicKey) -> bool {
        info!("compatible key offered: major {} minor {}", key.major_rev(), key.minor_rev);
        false
    }

    fn safety_reset(&mut self, reset_type: u8, _attr_bit_map: u8, _password: &[u8]) -> u8 {
        info!("safety reset type {reset_type} requested");
        cipsafe::cip::gstat::SUCCESS
    }

    fn profile_dependent_state_change(
        &mut self,
        _state: DeviceState,
        _event: CnxnEvent,
        established: u16,
    ) -> bool {
        // Run while at least one connection is up.
        established > 0
    }

    fn io_data_rx(&mut self, instance: u16, data: &[u8]) {
        info!("output data on assembly {instance}: {} bytes", data.len());
    }
}

/// Minimal validator pool: enough bookkeeping to demonstrate connection
/// establishment and teardown end to end.
#[derive(Default)]
struct DemoPool {
    next_instance: u16,
    cnxns: Vec<(CnxnTriad, SvInfo)>,
}

impl ValidatorPool for DemoPool {
    fn find(&self, triad: &CnxnTriad) -> Option<SvInfo> {
        self.cnxns.iter().find(|(t, _)| t == triad).map(|(_, i)| *i)
    }

    fn alloc(&mut self, params: &OpenParams) -> Result<u16, ()> {
        self.next_instance += 1;
        let is_server = params.transport_trigger == cipsafe::cip::TCT_SERVER_APP_CL0;
        self.cnxns.push((
            params.triad,
            SvInfo {
                instance: self.next_instance,
                consumer_num: 1,
                is_server,
                multi_producer: cipsafe::cip::ncp::is_multicast(params.ncp_to),
                state: SvState::Initializing,
            },
        ));
        Ok(self.next_instance)
    }

    fn reinit(&mut self, _params: &OpenParams, existing: &SvInfo) -> Result<(), ()> {
        for (_, info) in &mut self.cnxns {
            if info.instance == existing.instance {
                info.state = SvState::Initializing;
            }
        }
        Ok(())
    }

    fn target_init(
        &mut self,
        params: &OpenParams,
        payload_size: u8,
        instance: u16,
    ) -> Result<InitReply, ()> {
        info!("validator {instance} initialised, payload {payload_size} bytes");
        let cnxn_type = if params.transport_trigger == cipsafe::cip::TCT_SERVER_APP_CL0 {
            CnxnType::ConsumerSinglecast
        } else if cipsafe::cip::ncp::is_multicast(params.ncp_to) {
            CnxnType::ProducerMulticast
        } else {
            CnxnType::ProducerSinglecast
        };
        Ok(InitReply { consumer_num: 1, cnxn_type, initial_ts: 0, initial_rv: 0 })
    }

    fn instance_info(&self, instance: u16) -> Option<SvInfo> {
        self.cnxns.iter().find(|(_, i)| i.instance == instance).map(|(_, i)| *i)
    }

    fn stop(&mut self, instance: u16, _consumer_num: u8) {
        self.cnxns.retain(|(_, i)| i.instance != instance);
    }

    fn drop_all(&mut self) {
        self.cnxns.clear();
    }

    fn established_count(&self) -> u16 {
        self.cnxns
            .iter()
            .filter(|(_, i)| i.state == SvState::Established)
            .count() as u16
    }

    fn device_status_changed(&mut self, state: DeviceState) {
        info!("validators see device state {state:?}");
    }
}

fn parse_hex(s: &str) -> Result<Vec<u8>, String> {
    let s: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if s.len() % 2 != 0 {
        return Err("odd number of hex digits".into());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| e.to_string()))
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("INFO"))
        .format_timestamp(Some(env_logger::fmt::TimestampPrecision::Millis))
        .init();

    let profile: DeviceProfile = serde_json::from_slice(&fs::read(&args.profile)?)?;
    info!("device profile: {profile:?}");

    fs::create_dir_all(&args.nv_dir)?;
    if args.factory_reset {
        for entry in fs::read_dir(&args.nv_dir)? {
            fs::remove_file(entry?.path())?;
        }
        info!("non-volatile attributes wiped");
    }

    let mut assemblies: Vec<AsmEntry> = profile
        .input_assemblies
        .iter()
        .map(|&instance| AsmEntry { instance, kind: AsmKind::Input })
        .collect();
    assemblies.extend(
        profile
            .output_assemblies
            .iter()
            .map(|&instance| AsmEntry { instance, kind: AsmKind::Output }),
    );

    let cfg = CoreConfig {
        identity: DeviceIdentity {
            vendor_id: profile.vendor_id,
            device_type: profile.device_type,
            product_code: profile.product_code,
            major_rev: profile.major_rev,
            minor_rev: profile.minor_rev,
            serial_num: profile.serial_num,
        },
        node_ids: profile.node_ids,
        base_format: profile.base_format,
        extended_format: profile.extended_format,
        assemblies,
        target_out_instances: None,
    };

    let mut core = SafetyCore::new(
        cfg,
        Box::new(FileApp { nv_dir: args.nv_dir }),
        Box::new(LogOnly),
        Box::new(LogOnly),
        Box::<DemoPool>::default(),
    )?;
    info!("device state: {:?}", core.device_status());

    if let Some(replay) = args.replay {
        for (lineno, line) in fs::read_to_string(replay)?.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (cmd, hex) = line
                .split_once(':')
                .ok_or_else(|| format!("line {}: expected open:<hex> or close:<hex>", lineno + 1))?;
            let data = parse_hex(hex).map_err(|e| format!("line {}: {e}", lineno + 1))?;
            let command = match cmd {
                "open" => Command::SafetyOpenRequest,
                "close" => Command::SafetyCloseRequest,
                other => return Err(format!("line {}: unknown frame kind {other}", lineno + 1).into()),
            };
            core.command(&Message::new(command, lineno as u32, data));
        }
        info!("replay finished, device state: {:?}", core.device_status());
    }

    Ok(())
}
