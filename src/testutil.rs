// Recording mock implementations of the embedding seams, plus a
// SafetyOpen frame builder. Test-only.

use crate::cip::{self, ncp, seg};
use crate::establish::parse::OpenParams;
use crate::sapl::{ErrorCode, NvSlot, SafetyApp};
use crate::transport::{Message, Transport};
use crate::types::{
    CnxnTriad, DeviceState, ElectronicKey, LedState, Scid, Snn, Unid,
};
use crate::validator::{CnxnEvent, CnxnType, InitReply, SvInfo, ValidatorPool};
use std::collections::HashMap;

pub(crate) struct MockApp {
    pub nv: HashMap<NvSlot, Vec<u8>>,
    pub fail_store: Option<NvSlot>,
    pub fail_restore: Option<NvSlot>,
    pub reported: Vec<ErrorCode>,
    pub self_test_pass: bool,
    pub open_validate_status: u16,
    pub apply_ok: bool,
    pub compat_accept: bool,
    pub compat_queries: usize,
    pub reset_status: u8,
    pub reset_calls: Vec<(u8, u8, Vec<u8>)>,
    pub mode_change_decision: bool,
    pub io_rx: Vec<(u16, Vec<u8>)>,
}

impl MockApp {
    pub fn new() -> Self {
        MockApp {
            nv: HashMap::new(),
            fail_store: None,
            fail_restore: None,
            reported: Vec::new(),
            self_test_pass: true,
            open_validate_status: 0,
            apply_ok: true,
            compat_accept: false,
            compat_queries: 0,
            reset_status: crate::cip::gstat::SUCCESS,
            reset_calls: Vec::new(),
            mode_change_decision: false,
            io_rx: Vec::new(),
        }
    }
}

impl SafetyApp for MockApp {
    fn self_test_result(&mut self) -> bool {
        self.self_test_pass
    }

    fn error_report(&mut self, code: ErrorCode, _instance: u16, _add_info: u32) {
        self.reported.push(code);
    }

    fn nv_store(&mut self, slot: NvSlot, data: &[u8]) -> bool {
        if self.fail_store == Some(slot) {
            return false;
        }
        self.nv.insert(slot, data.to_vec());
        true
    }

    fn nv_restore(&mut self, slot: NvSlot, out: &mut [u8]) -> bool {
        if self.fail_restore == Some(slot) {
            return false;
        }
        if let Some(stored) = self.nv.get(&slot) {
            let n = stored.len().min(out.len());
            out[..n].copy_from_slice(&stored[..n]);
        }
        true
    }

    fn safety_open_validate(&mut self, _params: &OpenParams, _payload_size: u8) -> u16 {
        self.open_validate_status
    }

    fn apply_config(&mut self) -> bool {
        self.apply_ok
    }

    fn compatible_key_accept(&mut self, _key: &ElectronicKey) -> bool {
        self.compat_queries += 1;
        self.compat_accept
    }

    fn safety_reset(&mut self, reset_type: u8, attr_bit_map: u8, password: &[u8]) -> u8 {
        self.reset_calls.push((reset_type, attr_bit_map, password.to_vec()));
        self.reset_status
    }

    fn profile_dependent_state_change(
        &mut self,
        _state: DeviceState,
        _event: CnxnEvent,
        _established_cnxns: u16,
    ) -> bool {
        self.mode_change_decision
    }

    fn io_data_rx(&mut self, instance: u16, data: &[u8]) {
        self.io_rx.push((instance, data.to_vec()));
    }
}

pub(crate) struct MockTransport {
    pub sent: Vec<Message>,
    pub fail: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport { sent: Vec::new(), fail: false }
    }

    pub fn last(&self) -> &Message {
        self.sent.last().expect("no message sent")
    }
}

impl Transport for MockTransport {
    fn put(&mut self, msg: Message) -> bool {
        if self.fail {
            return false;
        }
        self.sent.push(msg);
        true
    }
}

pub(crate) struct MockLeds {
    pub module: Vec<LedState>,
    pub network: Vec<LedState>,
}

impl MockLeds {
    pub fn new() -> Self {
        MockLeds { module: Vec::new(), network: Vec::new() }
    }
}

impl crate::transport::Indicators for MockLeds {
    fn module_status(&mut self, led: LedState) {
        self.module.push(led);
    }

    fn network_status(&mut self, led: LedState) {
        self.network.push(led);
    }
}

pub(crate) struct MockPool {
    pub existing: Vec<(CnxnTriad, SvInfo)>,
    pub fail_alloc: bool,
    pub fail_init: bool,
    pub next_instance: u16,
    pub init_consumer_num: u16,
    pub init_initial_ts: u16,
    pub init_initial_rv: u16,
    pub allocs: Vec<CnxnTriad>,
    pub reinits: Vec<u16>,
    pub inits: Vec<(u16, u8)>,
    pub stopped: Vec<(u16, u8)>,
    pub drop_all_calls: usize,
    pub established: u16,
    pub status_changes: Vec<DeviceState>,
}

impl MockPool {
    pub fn new() -> Self {
        MockPool {
            existing: Vec::new(),
            fail_alloc: false,
            fail_init: false,
            next_instance: 42,
            init_consumer_num: 1,
            init_initial_ts: 0,
            init_initial_rv: 0,
            allocs: Vec::new(),
            reinits: Vec::new(),
            inits: Vec::new(),
            stopped: Vec::new(),
            drop_all_calls: 0,
            established: 0,
            status_changes: Vec::new(),
        }
    }
}

impl ValidatorPool for MockPool {
    fn find(&self, triad: &CnxnTriad) -> Option<SvInfo> {
        self.existing.iter().find(|(t, _)| t == triad).map(|(_, i)| *i)
    }

    fn alloc(&mut self, params: &OpenParams) -> Result<u16, ()> {
        if self.fail_alloc {
            return Err(());
        }
        self.allocs.push(params.triad);
        Ok(self.next_instance)
    }

    fn reinit(&mut self, _params: &OpenParams, existing: &SvInfo) -> Result<(), ()> {
        self.reinits.push(existing.instance);
        Ok(())
    }

    fn target_init(
        &mut self,
        params: &OpenParams,
        payload_size: u8,
        instance: u16,
    ) -> Result<InitReply, ()> {
        if self.fail_init {
            return Err(());
        }
        self.inits.push((instance, payload_size));
        let cnxn_type = if params.transport_trigger == cip::TCT_SERVER_APP_CL0 {
            CnxnType::ConsumerSinglecast
        } else if ncp::is_multicast(params.ncp_to) {
            CnxnType::ProducerMulticast
        } else {
            CnxnType::ProducerSinglecast
        };
        Ok(InitReply {
            consumer_num: self.init_consumer_num,
            cnxn_type,
            initial_ts: self.init_initial_ts,
            initial_rv: self.init_initial_rv,
        })
    }

    fn instance_info(&self, instance: u16) -> Option<SvInfo> {
        self.existing.iter().find(|(_, i)| i.instance == instance).map(|(_, i)| *i)
    }

    fn stop(&mut self, instance: u16, consumer_num: u8) {
        self.stopped.push((instance, consumer_num));
    }

    fn drop_all(&mut self) {
        self.drop_all_calls += 1;
    }

    fn established_count(&self) -> u16 {
        self.established
    }

    fn device_status_changed(&mut self, state: DeviceState) {
        self.status_changes.push(state);
    }
}

/// Shared handle onto a mock, so tests can keep inspecting state that the
/// core owns through a boxed trait object.
pub(crate) struct Shared<T>(pub std::rc::Rc<std::cell::RefCell<T>>);

impl<T> Shared<T> {
    pub fn new(inner: T) -> (Self, std::rc::Rc<std::cell::RefCell<T>>) {
        let rc = std::rc::Rc::new(std::cell::RefCell::new(inner));
        (Shared(rc.clone()), rc)
    }
}

impl SafetyApp for Shared<MockApp> {
    fn self_test_result(&mut self) -> bool {
        self.0.borrow_mut().self_test_result()
    }
    fn error_report(&mut self, code: ErrorCode, instance: u16, add_info: u32) {
        self.0.borrow_mut().error_report(code, instance, add_info)
    }
    fn nv_store(&mut self, slot: NvSlot, data: &[u8]) -> bool {
        self.0.borrow_mut().nv_store(slot, data)
    }
    fn nv_restore(&mut self, slot: NvSlot, out: &mut [u8]) -> bool {
        self.0.borrow_mut().nv_restore(slot, out)
    }
    fn safety_open_validate(&mut self, params: &OpenParams, payload_size: u8) -> u16 {
        self.0.borrow_mut().safety_open_validate(params, payload_size)
    }
    fn apply_config(&mut self) -> bool {
        self.0.borrow_mut().apply_config()
    }
    fn compatible_key_accept(&mut self, key: &ElectronicKey) -> bool {
        self.0.borrow_mut().compatible_key_accept(key)
    }
    fn safety_reset(&mut self, reset_type: u8, attr_bit_map: u8, password: &[u8]) -> u8 {
        self.0.borrow_mut().safety_reset(reset_type, attr_bit_map, password)
    }
    fn profile_dependent_state_change(
        &mut self,
        state: DeviceState,
        event: CnxnEvent,
        established_cnxns: u16,
    ) -> bool {
        self.0
            .borrow_mut()
            .profile_dependent_state_change(state, event, established_cnxns)
    }
    fn io_data_rx(&mut self, instance: u16, data: &[u8]) {
        self.0.borrow_mut().io_data_rx(instance, data)
    }
}

impl Transport for Shared<MockTransport> {
    fn put(&mut self, msg: Message) -> bool {
        self.0.borrow_mut().put(msg)
    }
}

impl crate::transport::Indicators for Shared<MockLeds> {
    fn module_status(&mut self, led: LedState) {
        self.0.borrow_mut().module.push(led)
    }
    fn network_status(&mut self, led: LedState) {
        self.0.borrow_mut().network.push(led)
    }
}

impl ValidatorPool for Shared<MockPool> {
    fn find(&self, triad: &CnxnTriad) -> Option<SvInfo> {
        self.0.borrow().find(triad)
    }
    fn alloc(&mut self, params: &OpenParams) -> Result<u16, ()> {
        self.0.borrow_mut().alloc(params)
    }
    fn reinit(&mut self, params: &OpenParams, existing: &SvInfo) -> Result<(), ()> {
        self.0.borrow_mut().reinit(params, existing)
    }
    fn target_init(
        &mut self,
        params: &OpenParams,
        payload_size: u8,
        instance: u16,
    ) -> Result<InitReply, ()> {
        self.0.borrow_mut().target_init(params, payload_size, instance)
    }
    fn instance_info(&self, instance: u16) -> Option<SvInfo> {
        self.0.borrow().instance_info(instance)
    }
    fn stop(&mut self, instance: u16, consumer_num: u8) {
        self.0.borrow_mut().stop(instance, consumer_num)
    }
    fn drop_all(&mut self) {
        self.0.borrow_mut().drop_all()
    }
    fn established_count(&self) -> u16 {
        self.0.borrow().established_count()
    }
    fn device_status_changed(&mut self, state: DeviceState) {
        self.0.borrow_mut().device_status_changed(state)
    }
}

/// Safety segment format selector for built frames.
#[derive(Copy, Clone, PartialEq, Eq)]
pub(crate) enum Format {
    Base,
    Extended,
}

/// Builds Forward_Open request byte streams. Defaults describe a valid
/// Base-format singlecast server open against the test device.
#[derive(Clone)]
pub(crate) struct OpenBuilder {
    pub cnxn_id_ot: u32,
    pub cnxn_id_to: u32,
    pub triad: CnxnTriad,
    pub cnxn_timeout_mult: u8,
    pub rpi_ot_us: u32,
    pub ncp_ot: u16,
    pub rpi_to_us: u32,
    pub ncp_to: u16,
    pub transport_trigger: u8,
    pub key: ElectronicKey,
    pub cfg_class: u16,
    pub cfg_inst: u16,
    pub cfg_data: Option<Vec<u8>>,
    pub cons_point: u16,
    pub prod_point: u16,
    pub format: Format,
    pub tunid: Unid,
    pub ounid: Unid,
    pub scid_echo: Scid,
    pub tcorr_cnxn_id: u32,
    pub tcorr_epi_us: u32,
    pub tcorr_ncp: u16,
    pub timeout_mult_echo: u8,
    pub piem: u16,
    pub tcoomm_128us: u16,
    pub ntem_128us: u16,
    pub safety_timeout_mult: u8,
    pub max_cons_num: u8,
    pub max_fault_num: u16,
    pub initial_ts: u16,
    pub initial_rv: u16,
    /// Overrides the computed CPCRC when set.
    pub cpcrc: Option<u32>,
}

impl OpenBuilder {
    pub fn server() -> Self {
        OpenBuilder {
            cnxn_id_ot: 0x1000_0001,
            cnxn_id_to: 0x1000_0002,
            triad: CnxnTriad { conn_serial: 0x0001, orig_vendor: 0x00E0, orig_serial: 0x12345678 },
            cnxn_timeout_mult: 2,
            rpi_ot_us: 10_000,
            ncp_ot: ncp::PTP_HP_FIX | 7, // 2 payload bytes, short format
            rpi_to_us: 10_000,
            ncp_to: ncp::PTP_HP_FIX_TMSG_LEN,
            transport_trigger: cip::TCT_SERVER_APP_CL0,
            key: ElectronicKey {
                vendor_id: 0x00E0,
                device_type: 0x0023,
                product_code: 0x0101,
                compat_and_major_rev: 2,
                minor_rev: 1,
            },
            cfg_class: cip::ASSEMBLY_CLASS,
            cfg_inst: cip::ASM_NULL_INSTANCE,
            cfg_data: None,
            cons_point: 101,
            prod_point: cip::ASM_NULL_INSTANCE,
            format: Format::Base,
            tunid: Unid { snn: Snn { time: 0x11223344, date: 0x5566 }, node_id: 0xA0000001 },
            ounid: Unid { snn: Snn { time: 0x11223344, date: 0x5566 }, node_id: 0x0B00_0001 },
            scid_echo: Scid::ZERO,
            tcorr_cnxn_id: cip::TIME_CORR_CNXN_ID_NOT_USED,
            tcorr_epi_us: 0,
            tcorr_ncp: ncp::NOT_USED,
            timeout_mult_echo: 2,
            piem: 100,
            tcoomm_128us: 100,
            ntem_128us: 1000,
            safety_timeout_mult: 2,
            max_cons_num: 1,
            max_fault_num: 1,
            initial_ts: cip::INITIAL_TIME_STAMP_NOT_USED,
            initial_rv: cip::INITIAL_ROLLOVER_NOT_USED,
            cpcrc: None,
        }
    }

    pub fn client() -> Self {
        let mut b = Self::server();
        b.transport_trigger = cip::TCT_CLIENT_APP_CL0;
        b.ncp_ot = ncp::PTP_HP_FIX_TMSG_LEN;
        b.ncp_to = ncp::PTP_HP_FIX | 7;
        b.cons_point = cip::ASM_NULL_INSTANCE;
        b.prod_point = 100;
        b
    }

    pub fn build(&self) -> Vec<u8> {
        let mut path = Vec::new();

        // electronic key
        path.push(seg::ELECTRONIC_KEY);
        path.push(seg::ELECTRONIC_KEY_FORMAT);
        path.extend_from_slice(&self.key.vendor_id.to_le_bytes());
        path.extend_from_slice(&self.key.device_type.to_le_bytes());
        path.extend_from_slice(&self.key.product_code.to_le_bytes());
        path.push(self.key.compat_and_major_rev);
        path.push(self.key.minor_rev);

        // configuration / consumption / production application paths
        push_path(&mut path, self.cfg_class, self.cfg_inst);
        if let Some(data) = &self.cfg_data {
            assert_eq!(data.len() % 2, 0, "config data must be whole words");
            path.push(seg::DATA_SIMPLE);
            path.push((data.len() / 2) as u8);
            path.extend_from_slice(data);
        }
        push_path(&mut path, cip::ASSEMBLY_CLASS, self.cons_point);
        push_path(&mut path, cip::ASSEMBLY_CLASS, self.prod_point);

        // safety network segment
        let sseg_start = path.len();
        path.push(seg::SAFETY_NETWORK);
        path.push(0); // segment size patched below
        path.push(match self.format {
            Format::Base => seg::FORMAT_TARGET_BASE,
            Format::Extended => seg::FORMAT_TARGET_EXT,
        });
        path.extend_from_slice(&self.tunid.to_bytes());
        path.extend_from_slice(&self.ounid.to_bytes());
        path.extend_from_slice(&self.scid_echo.to_bytes());
        let cpcrc_in_path = path.len() - sseg_start;
        path.extend_from_slice(&[0, 0, 0, 0]); // CPCRC patched below
        path.extend_from_slice(&self.tcorr_cnxn_id.to_le_bytes());
        path.extend_from_slice(&self.tcorr_epi_us.to_le_bytes());
        path.extend_from_slice(&self.tcorr_ncp.to_le_bytes());
        path.push(self.timeout_mult_echo);
        path.extend_from_slice(&self.piem.to_le_bytes());
        path.extend_from_slice(&self.tcoomm_128us.to_le_bytes());
        path.extend_from_slice(&self.ntem_128us.to_le_bytes());
        path.push(self.safety_timeout_mult);
        path.push(self.max_cons_num);
        if self.format == Format::Extended {
            path.extend_from_slice(&self.max_fault_num.to_le_bytes());
            path.extend_from_slice(&self.initial_ts.to_le_bytes());
            path.extend_from_slice(&self.initial_rv.to_le_bytes());
        }
        let sseg_len = path.len() - sseg_start;
        path[sseg_start + 1] = (sseg_len / 2) as u8;

        assert_eq!(path.len() % 2, 0, "connection path must be whole words");

        let mut buf = Vec::with_capacity(34 + path.len());
        buf.extend_from_slice(&self.cnxn_id_ot.to_le_bytes());
        buf.extend_from_slice(&self.cnxn_id_to.to_le_bytes());
        buf.extend_from_slice(&self.triad.conn_serial.to_le_bytes());
        buf.extend_from_slice(&self.triad.orig_vendor.to_le_bytes());
        buf.extend_from_slice(&self.triad.orig_serial.to_le_bytes());
        buf.push(self.cnxn_timeout_mult);
        buf.extend_from_slice(&[0, 0, 0]); // reserved
        buf.extend_from_slice(&self.rpi_ot_us.to_le_bytes());
        buf.extend_from_slice(&self.ncp_ot.to_le_bytes());
        buf.extend_from_slice(&self.rpi_to_us.to_le_bytes());
        buf.extend_from_slice(&self.ncp_to.to_le_bytes());
        buf.push(self.transport_trigger);
        buf.push((path.len() / 2) as u8);
        buf.extend_from_slice(&path);

        // CPCRC: everything up to the end of the safety segment except the
        // CPCRC word itself.
        let cpcrc_off = 34 + sseg_start + cpcrc_in_path;
        let cpcrc = self
            .cpcrc
            .unwrap_or_else(|| cip::crc_s4_split(&buf[..cpcrc_off], &buf[cpcrc_off + 4..]));
        buf[cpcrc_off..cpcrc_off + 4].copy_from_slice(&cpcrc.to_le_bytes());
        buf
    }

    /// Byte offset of the CPCRC word in the built frame. The word sits 33
    /// bytes into the safety segment, which ends the frame.
    pub fn cpcrc_offset(&self) -> usize {
        self.build().len()
            - match self.format {
                Format::Base => 23,
                Format::Extended => 29,
            }
    }
}

fn push_path(path: &mut Vec<u8>, class: u16, instance: u16) {
    path.push(seg::LOGICAL_CLASS_16);
    path.push(0);
    path.extend_from_slice(&class.to_le_bytes());
    path.push(seg::LOGICAL_INSTANCE_16);
    path.push(0);
    path.extend_from_slice(&instance.to_le_bytes());
}

/// Forward_Close request bytes for a triad.
pub(crate) fn close_frame(triad: &CnxnTriad) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12);
    buf.extend_from_slice(&[0, 0]); // priority / timeout ticks
    buf.extend_from_slice(&triad.conn_serial.to_le_bytes());
    buf.extend_from_slice(&triad.orig_vendor.to_le_bytes());
    buf.extend_from_slice(&triad.orig_serial.to_le_bytes());
    buf.extend_from_slice(&[0, 0]); // path size + reserved
    buf
}
