// Safety Supervisor state machine. Eight states; every event has a
// per-state action. All other CIP objects in a safety device are
// subservient to this object, so admission decisions for connection
// requests and TUNID services funnel through here.

use crate::ids::IdentityStore;
use crate::sapl::{ErrorCode, SafetyApp};
use crate::transport::{Command, Indicators, Message, Transport};
use crate::types::{DeviceState, LedState, Scid};
use crate::unid;
use crate::validator::{CnxnEvent, ValidatorPool};
use log::{info, warn};

/// Mode Change target.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Executing,
}

/// Whether a Propose_TUNID starts or cancels the proposing sequence.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProposePhase {
    Start,
    Stop,
}

/// Events fed into the state machine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {
    SelfTestPassed,
    SelfTestFailed,
    ExceptionCleared,
    CriticalFault,
    InternalAbort,
    FwdOpenReq,
    Type1SafetyOpen,
    ProposeTunid(ProposePhase),
    /// State pre-check for the Apply_TUNID service.
    ApplyTunidCheck,
    ApplyTunid,
    ApplyReq,
    ModeChange(Mode),
    Cnxn(CnxnEvent, u16),
    ResetReq,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    /// Exception condition cleared: the caller restarts the self test.
    RestartSelfTest,
}

/// Collaborators the state machine drives on transitions.
pub(crate) struct SupvCtx<'a> {
    pub ids: &'a mut IdentityStore,
    pub sapl: &'a mut dyn SafetyApp,
    pub transport: &'a mut dyn Transport,
    pub indicators: &'a mut dyn Indicators,
    pub validators: &'a mut dyn ValidatorPool,
    pub node_ids: &'a [u32],
}

pub struct Supervisor {
    state: DeviceState,
    exception_status: u8,
}

impl Supervisor {
    pub fn new() -> Self {
        Supervisor { state: DeviceState::Undefined, exception_status: 0 }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn exception_status(&self) -> u8 {
        self.exception_status
    }

    pub fn exception_status_set(&mut self, status: u8) {
        self.exception_status = status;
    }

    pub(crate) fn init(&mut self, ctx: &mut SupvCtx) {
        self.transition(DeviceState::SelfTesting, ctx);
    }

    pub(crate) fn process(
        &mut self,
        event: Event,
        ctx: &mut SupvCtx,
    ) -> Result<Outcome, ErrorCode> {
        // Critical Fault applies in any state; repeated faults while already
        // in Critical Fault are ignored.
        if event == Event::CriticalFault {
            if self.state != DeviceState::CriticalFault {
                ctx.validators.drop_all();
                self.transition(DeviceState::CriticalFault, ctx);
            }
            return Ok(Outcome::Handled);
        }

        match self.state {
            DeviceState::SelfTesting => self.in_self_testing(event, ctx),
            DeviceState::Idle => self.in_idle(event, ctx),
            DeviceState::SelfTestException => self.in_self_test_exception(event, ctx),
            DeviceState::Executing => self.in_executing(event, ctx),
            DeviceState::Abort => self.in_abort(event, ctx),
            DeviceState::CriticalFault => self.in_critical_fault(event, ctx),
            DeviceState::Configuring => self.in_configuring(event, ctx),
            DeviceState::WaitingForTunid => self.in_waiting_for_tunid(event, ctx),
            DeviceState::Undefined => {
                // Only reachable when events arrive before initialisation.
                ctx.validators.drop_all();
                self.transition(DeviceState::CriticalFault, ctx);
                self.reject(ErrorCode::UndefinedState, ctx)
            }
        }
    }

    fn reject(&self, code: ErrorCode, ctx: &mut SupvCtx) -> Result<Outcome, ErrorCode> {
        ctx.sapl.error_report(code, 0, u8::from(self.state) as u32);
        Err(code)
    }

    fn in_self_testing(&mut self, event: Event, ctx: &mut SupvCtx) -> Result<Outcome, ErrorCode> {
        match event {
            Event::SelfTestPassed => {
                // Entry branch: network identity, then identity consistency,
                // then configuration decide the successor state.
                if !unid::device_has_valid_tunid(ctx.ids.tunid_list()) {
                    self.transition(DeviceState::WaitingForTunid, ctx);
                } else if !unid::tunid_vs_nodeid_check(ctx.ids.tunid_list(), ctx.node_ids) {
                    self.transition(DeviceState::Abort, ctx);
                } else if ctx.ids.scid_is_zero() {
                    self.transition(DeviceState::Configuring, ctx);
                } else {
                    self.transition(DeviceState::Idle, ctx);
                }
                Ok(Outcome::Handled)
            }
            Event::SelfTestFailed => {
                self.transition(DeviceState::SelfTestException, ctx);
                Ok(Outcome::Handled)
            }
            Event::InternalAbort => self.reject(ErrorCode::AbortNotAllowed, ctx),
            Event::FwdOpenReq => self.reject(ErrorCode::OpenInSelfTest, ctx),
            Event::ProposeTunid(_) => self.reject(ErrorCode::ProposeTunidInSelfTest, ctx),
            Event::ApplyTunidCheck | Event::ApplyTunid => {
                self.reject(ErrorCode::ApplyTunidInSelfTest, ctx)
            }
            Event::ApplyReq => self.reject(ErrorCode::ProgFlow, ctx),
            Event::ModeChange(_) => self.reject(ErrorCode::ModeChangeNotAllowed, ctx),
            Event::Cnxn(CnxnEvent::Established, _) => {
                self.reject(ErrorCode::CnxnEstabNotPossible, ctx)
            }
            Event::ResetReq => self.reject(ErrorCode::ResetInSelfTest, ctx),
            _ => Ok(Outcome::Handled),
        }
    }

    fn in_idle(&mut self, event: Event, ctx: &mut SupvCtx) -> Result<Outcome, ErrorCode> {
        match event {
            Event::ModeChange(Mode::Executing) => {
                self.transition(DeviceState::Executing, ctx);
                Ok(Outcome::Handled)
            }
            Event::ModeChange(Mode::Idle) => Ok(Outcome::Handled),
            Event::InternalAbort => {
                self.transition(DeviceState::Abort, ctx);
                Ok(Outcome::Handled)
            }
            Event::FwdOpenReq => Ok(Outcome::Handled),
            Event::Type1SafetyOpen => {
                self.transition(DeviceState::Configuring, ctx);
                Ok(Outcome::Handled)
            }
            Event::Cnxn(ev, established) => {
                if ctx.sapl.profile_dependent_state_change(self.state, ev, established) {
                    self.transition(DeviceState::Executing, ctx);
                }
                Ok(Outcome::Handled)
            }
            Event::ProposeTunid(_) => self.reject(ErrorCode::ProposeTunidWrongState, ctx),
            Event::ApplyTunidCheck | Event::ApplyTunid => {
                self.reject(ErrorCode::ApplyTunidWrongState, ctx)
            }
            Event::SelfTestPassed => self.reject(ErrorCode::SelfTestPassUnexpected, ctx),
            Event::SelfTestFailed => self.reject(ErrorCode::SelfTestFailUnexpected, ctx),
            _ => Ok(Outcome::Handled),
        }
    }

    fn in_self_test_exception(
        &mut self,
        event: Event,
        ctx: &mut SupvCtx,
    ) -> Result<Outcome, ErrorCode> {
        match event {
            Event::ExceptionCleared => {
                self.transition(DeviceState::SelfTesting, ctx);
                Ok(Outcome::RestartSelfTest)
            }
            Event::InternalAbort => self.reject(ErrorCode::AbortNotAllowed, ctx),
            Event::FwdOpenReq => self.reject(ErrorCode::FoWrongState, ctx),
            Event::ProposeTunid(_) => self.reject(ErrorCode::ProposeTunidWrongState, ctx),
            Event::ApplyTunidCheck | Event::ApplyTunid => {
                self.reject(ErrorCode::ApplyTunidWrongState, ctx)
            }
            Event::ApplyReq => self.reject(ErrorCode::ProgFlow, ctx),
            Event::ModeChange(_) => self.reject(ErrorCode::ModeChangeNotAllowed, ctx),
            Event::Cnxn(CnxnEvent::Established, _) => {
                self.reject(ErrorCode::CnxnEstabNotPossible, ctx)
            }
            Event::Cnxn(CnxnEvent::Deleted, _) => self.reject(ErrorCode::CnxnDelNotPossible, ctx),
            Event::Cnxn(CnxnEvent::Failed, _) => self.reject(ErrorCode::CnxnFailNotPossible, ctx),
            Event::SelfTestPassed => self.reject(ErrorCode::SelfTestPassUnexpected, ctx),
            Event::SelfTestFailed => self.reject(ErrorCode::SelfTestFailUnexpected, ctx),
            _ => Ok(Outcome::Handled),
        }
    }

    fn in_executing(&mut self, event: Event, ctx: &mut SupvCtx) -> Result<Outcome, ErrorCode> {
        match event {
            Event::ModeChange(Mode::Idle) => {
                self.transition(DeviceState::Idle, ctx);
                Ok(Outcome::Handled)
            }
            Event::ModeChange(Mode::Executing) => Ok(Outcome::Handled),
            Event::InternalAbort => {
                self.transition(DeviceState::Abort, ctx);
                Ok(Outcome::Handled)
            }
            Event::FwdOpenReq => Ok(Outcome::Handled),
            Event::Type1SafetyOpen => {
                // Reconfiguration tears down all running connections first.
                ctx.validators.drop_all();
                self.transition(DeviceState::Configuring, ctx);
                Ok(Outcome::Handled)
            }
            Event::Cnxn(ev, established) => {
                if ctx.sapl.profile_dependent_state_change(self.state, ev, established) {
                    self.transition(DeviceState::Idle, ctx);
                }
                Ok(Outcome::Handled)
            }
            Event::ProposeTunid(_) => self.reject(ErrorCode::ProposeTunidWrongState, ctx),
            Event::ApplyTunidCheck | Event::ApplyTunid => {
                self.reject(ErrorCode::ApplyTunidWrongState, ctx)
            }
            Event::SelfTestPassed => self.reject(ErrorCode::SelfTestPassUnexpected, ctx),
            Event::SelfTestFailed => self.reject(ErrorCode::SelfTestFailUnexpected, ctx),
            _ => Ok(Outcome::Handled),
        }
    }

    fn in_abort(&mut self, event: Event, ctx: &mut SupvCtx) -> Result<Outcome, ErrorCode> {
        match event {
            Event::FwdOpenReq => self.reject(ErrorCode::FoWrongState, ctx),
            Event::ProposeTunid(_) => self.reject(ErrorCode::ProposeTunidWrongState, ctx),
            Event::ApplyTunidCheck | Event::ApplyTunid => {
                self.reject(ErrorCode::ApplyTunidWrongState, ctx)
            }
            Event::ModeChange(_) => self.reject(ErrorCode::ModeChangeNotAllowed, ctx),
            Event::Cnxn(CnxnEvent::Established, _) => {
                self.reject(ErrorCode::CnxnEstabNotPossible, ctx)
            }
            // Pre-existing connections drain.
            Event::Cnxn(_, _) => Ok(Outcome::Handled),
            Event::SelfTestPassed => self.reject(ErrorCode::SelfTestPassUnexpected, ctx),
            Event::SelfTestFailed => self.reject(ErrorCode::SelfTestFailUnexpected, ctx),
            _ => Ok(Outcome::Handled),
        }
    }

    fn in_critical_fault(&mut self, event: Event, ctx: &mut SupvCtx) -> Result<Outcome, ErrorCode> {
        match event {
            Event::InternalAbort => self.reject(ErrorCode::AbortNotAllowed, ctx),
            Event::FwdOpenReq => self.reject(ErrorCode::FoWrongState, ctx),
            Event::ProposeTunid(_) => self.reject(ErrorCode::ProposeTunidWrongState, ctx),
            Event::ApplyTunidCheck | Event::ApplyTunid => {
                self.reject(ErrorCode::ApplyTunidWrongState, ctx)
            }
            Event::ModeChange(_) => self.reject(ErrorCode::ModeChangeNotAllowed, ctx),
            Event::Cnxn(CnxnEvent::Established, _) => {
                self.reject(ErrorCode::CnxnEstabNotPossible, ctx)
            }
            Event::Cnxn(_, _) => Ok(Outcome::Handled),
            Event::SelfTestPassed => self.reject(ErrorCode::SelfTestPassUnexpected, ctx),
            Event::SelfTestFailed => self.reject(ErrorCode::SelfTestFailUnexpected, ctx),
            _ => Ok(Outcome::Handled),
        }
    }

    fn in_configuring(&mut self, event: Event, ctx: &mut SupvCtx) -> Result<Outcome, ErrorCode> {
        match event {
            Event::InternalAbort => {
                self.transition(DeviceState::Abort, ctx);
                Ok(Outcome::Handled)
            }
            Event::FwdOpenReq => Ok(Outcome::Handled),
            Event::ApplyReq => {
                self.transition(DeviceState::Idle, ctx);
                Ok(Outcome::Handled)
            }
            Event::ProposeTunid(_) => self.reject(ErrorCode::ProposeTunidWrongState, ctx),
            Event::ApplyTunidCheck | Event::ApplyTunid => {
                self.reject(ErrorCode::ApplyTunidWrongState, ctx)
            }
            Event::ModeChange(_) => self.reject(ErrorCode::ModeChangeNotAllowed, ctx),
            Event::Cnxn(CnxnEvent::Established, _) => {
                self.reject(ErrorCode::CnxnEstabNotPossible, ctx)
            }
            Event::Cnxn(_, _) => Ok(Outcome::Handled),
            Event::SelfTestPassed => self.reject(ErrorCode::SelfTestPassUnexpected, ctx),
            Event::SelfTestFailed => self.reject(ErrorCode::SelfTestFailUnexpected, ctx),
            _ => Ok(Outcome::Handled),
        }
    }

    fn in_waiting_for_tunid(
        &mut self,
        event: Event,
        ctx: &mut SupvCtx,
    ) -> Result<Outcome, ErrorCode> {
        match event {
            Event::ProposeTunid(ProposePhase::Start) => {
                ctx.indicators.network_status(LedState::FlashRedGreen);
                Ok(Outcome::Handled)
            }
            Event::ProposeTunid(ProposePhase::Stop) => {
                ctx.indicators.network_status(LedState::FlashGreen);
                Ok(Outcome::Handled)
            }
            Event::ApplyTunidCheck => Ok(Outcome::Handled),
            Event::ApplyTunid => {
                ctx.indicators.network_status(LedState::FlashGreen);
                self.transition(DeviceState::Configuring, ctx);
                Ok(Outcome::Handled)
            }
            Event::InternalAbort => {
                ctx.indicators.network_status(LedState::FlashGreen);
                self.transition(DeviceState::Abort, ctx);
                Ok(Outcome::Handled)
            }
            Event::FwdOpenReq => self.reject(ErrorCode::FoWaitTunid, ctx),
            Event::ApplyReq => self.reject(ErrorCode::ProgFlow, ctx),
            Event::ModeChange(_) => self.reject(ErrorCode::ModeChangeNotAllowed, ctx),
            // No safety connection can exist in this state.
            Event::Cnxn(CnxnEvent::Established, _) => {
                self.reject(ErrorCode::CnxnEstabNotPossible, ctx)
            }
            Event::Cnxn(CnxnEvent::Deleted, _) => self.reject(ErrorCode::CnxnDelNotPossible, ctx),
            Event::Cnxn(CnxnEvent::Failed, _) => self.reject(ErrorCode::CnxnFailNotPossible, ctx),
            Event::SelfTestPassed => self.reject(ErrorCode::SelfTestPassUnexpected, ctx),
            Event::SelfTestFailed => self.reject(ErrorCode::SelfTestFailUnexpected, ctx),
            _ => Ok(Outcome::Handled),
        }
    }

    fn transition(&mut self, new_state: DeviceState, ctx: &mut SupvCtx) {
        info!("supervisor: {:?} -> {:?}", self.state, new_state);
        self.state = new_state;

        let led = match new_state {
            DeviceState::SelfTesting => LedState::FlashRedGreen,
            DeviceState::Idle => LedState::FlashGreen,
            DeviceState::SelfTestException => LedState::FlashRed,
            DeviceState::Executing => LedState::Green,
            DeviceState::Abort => LedState::FlashRed,
            DeviceState::CriticalFault => LedState::Red,
            DeviceState::Configuring => {
                // SCID is zeroed on entry and stays zero until a
                // configuration is applied. The transition is performed even
                // when the NV write fails; the store reports the fault.
                if ctx.ids.scid_set(Scid::ZERO, &mut *ctx.sapl).is_err() {
                    warn!("supervisor: SCID zeroing failed entering Configuring");
                }
                LedState::FlashRedGreen
            }
            DeviceState::WaitingForTunid => LedState::FlashRedGreen,
            DeviceState::Undefined => LedState::Red,
        };
        ctx.indicators.module_status(led);

        let code: u8 = new_state.into();
        if !ctx
            .transport
            .put(Message::new(Command::DeviceState, code as u32, Vec::new()))
        {
            ctx.sapl.error_report(ErrorCode::DevStateSendFailed, 0, code as u32);
        }
        ctx.validators.device_status_changed(new_state);
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{AsmEntry, AsmKind, Assemblies};
    use crate::testutil::{MockApp, MockLeds, MockPool, MockTransport};
    use crate::types::{Snn, Unid};

    struct Rig {
        ids: IdentityStore,
        app: MockApp,
        tx: MockTransport,
        leds: MockLeds,
        pool: MockPool,
        node_ids: Vec<u32>,
        supv: Supervisor,
    }

    impl Rig {
        fn new() -> Self {
            let asm = Assemblies::new(vec![
                AsmEntry { instance: 100, kind: AsmKind::Input },
                AsmEntry { instance: 101, kind: AsmKind::Output },
            ])
            .unwrap();
            let mut app = MockApp::new();
            let ids = IdentityStore::restore(1, None, &asm, &mut app).unwrap();
            Rig {
                ids,
                app,
                tx: MockTransport::new(),
                leds: MockLeds::new(),
                pool: MockPool::new(),
                node_ids: vec![0xA000_0001],
                supv: Supervisor::new(),
            }
        }

        fn with_tunid(mut self) -> Self {
            let tunid = Unid {
                snn: Snn { time: 0x11223344, date: 0x5566 },
                node_id: 0xA000_0001,
            };
            let mut app = MockApp::new();
            self.ids.tunid_list_set(&[tunid], &mut app).unwrap();
            self
        }

        fn with_scid(mut self) -> Self {
            let mut app = MockApp::new();
            self.ids
                .scid_set(Scid { sccrc: 0xDEAD, scts: Snn { time: 1, date: 2 } }, &mut app)
                .unwrap();
            self
        }

        fn process(&mut self, ev: Event) -> Result<Outcome, ErrorCode> {
            let mut ctx = SupvCtx {
                ids: &mut self.ids,
                sapl: &mut self.app,
                transport: &mut self.tx,
                indicators: &mut self.leds,
                validators: &mut self.pool,
                node_ids: &self.node_ids,
            };
            self.supv.process(ev, &mut ctx)
        }

        fn init(&mut self) {
            let mut ctx = SupvCtx {
                ids: &mut self.ids,
                sapl: &mut self.app,
                transport: &mut self.tx,
                indicators: &mut self.leds,
                validators: &mut self.pool,
                node_ids: &self.node_ids,
            };
            self.supv.init(&mut ctx);
        }
    }

    #[test]
    fn self_test_pass_without_tunid_waits() {
        let mut rig = Rig::new();
        rig.init();
        assert_eq!(rig.supv.state(), DeviceState::SelfTesting);
        rig.process(Event::SelfTestPassed).unwrap();
        assert_eq!(rig.supv.state(), DeviceState::WaitingForTunid);
        assert_eq!(rig.leds.module.last(), Some(&LedState::FlashRedGreen));
    }

    #[test]
    fn self_test_pass_with_mismatched_nodeid_aborts() {
        let mut rig = Rig::new().with_tunid();
        rig.node_ids = vec![0xB000_0000];
        rig.init();
        rig.process(Event::SelfTestPassed).unwrap();
        assert_eq!(rig.supv.state(), DeviceState::Abort);
    }

    #[test]
    fn self_test_pass_unconfigured_goes_configuring() {
        let mut rig = Rig::new().with_tunid();
        rig.init();
        rig.process(Event::SelfTestPassed).unwrap();
        assert_eq!(rig.supv.state(), DeviceState::Configuring);
        // Entering Configuring re-zeroes the SCID through NV.
        assert!(rig.ids.scid_is_zero());
    }

    #[test]
    fn self_test_pass_configured_goes_idle() {
        let mut rig = Rig::new().with_tunid().with_scid();
        rig.init();
        rig.process(Event::SelfTestPassed).unwrap();
        assert_eq!(rig.supv.state(), DeviceState::Idle);
        assert_eq!(rig.leds.module.last(), Some(&LedState::FlashGreen));
    }

    #[test]
    fn self_test_failure_enters_exception_and_clears_back() {
        let mut rig = Rig::new();
        rig.init();
        rig.process(Event::SelfTestFailed).unwrap();
        assert_eq!(rig.supv.state(), DeviceState::SelfTestException);
        assert_eq!(rig.leds.module.last(), Some(&LedState::FlashRed));
        let outcome = rig.process(Event::ExceptionCleared).unwrap();
        assert_eq!(outcome, Outcome::RestartSelfTest);
        assert_eq!(rig.supv.state(), DeviceState::SelfTesting);
    }

    #[test]
    fn critical_fault_drops_connections_from_any_state() {
        let mut rig = Rig::new().with_tunid().with_scid();
        rig.init();
        rig.process(Event::SelfTestPassed).unwrap();
        rig.process(Event::ModeChange(Mode::Executing)).unwrap();
        assert_eq!(rig.supv.state(), DeviceState::Executing);
        rig.process(Event::CriticalFault).unwrap();
        assert_eq!(rig.supv.state(), DeviceState::CriticalFault);
        assert_eq!(rig.pool.drop_all_calls, 1);
        assert_eq!(rig.leds.module.last(), Some(&LedState::Red));
        // A second fault is ignored and does not drop again.
        rig.process(Event::CriticalFault).unwrap();
        assert_eq!(rig.pool.drop_all_calls, 1);
    }

    #[test]
    fn critical_fault_still_drains_connections() {
        let mut rig = Rig::new().with_tunid().with_scid();
        rig.init();
        rig.process(Event::SelfTestPassed).unwrap();
        rig.process(Event::CriticalFault).unwrap();
        assert!(rig.process(Event::Cnxn(CnxnEvent::Deleted, 0)).is_ok());
        assert!(rig.process(Event::Cnxn(CnxnEvent::Failed, 0)).is_ok());
        assert!(rig.process(Event::FwdOpenReq).is_err());
    }

    #[test]
    fn mode_changes_toggle_idle_and_executing() {
        let mut rig = Rig::new().with_tunid().with_scid();
        rig.init();
        rig.process(Event::SelfTestPassed).unwrap();
        rig.process(Event::ModeChange(Mode::Executing)).unwrap();
        assert_eq!(rig.supv.state(), DeviceState::Executing);
        assert_eq!(rig.leds.module.last(), Some(&LedState::Green));
        // Same-mode change is a no-op.
        rig.process(Event::ModeChange(Mode::Executing)).unwrap();
        assert_eq!(rig.supv.state(), DeviceState::Executing);
        rig.process(Event::ModeChange(Mode::Idle)).unwrap();
        assert_eq!(rig.supv.state(), DeviceState::Idle);
    }

    #[test]
    fn type1_open_in_executing_drops_all_then_configures() {
        let mut rig = Rig::new().with_tunid().with_scid();
        rig.init();
        rig.process(Event::SelfTestPassed).unwrap();
        rig.process(Event::ModeChange(Mode::Executing)).unwrap();
        rig.process(Event::Type1SafetyOpen).unwrap();
        assert_eq!(rig.supv.state(), DeviceState::Configuring);
        assert_eq!(rig.pool.drop_all_calls, 1);
        rig.process(Event::ApplyReq).unwrap();
        assert_eq!(rig.supv.state(), DeviceState::Idle);
    }

    #[test]
    fn cnxn_events_delegate_to_the_application() {
        let mut rig = Rig::new().with_tunid().with_scid();
        rig.init();
        rig.process(Event::SelfTestPassed).unwrap();
        rig.process(Event::Cnxn(CnxnEvent::Established, 1)).unwrap();
        assert_eq!(rig.supv.state(), DeviceState::Idle);
        rig.app.mode_change_decision = true;
        rig.process(Event::Cnxn(CnxnEvent::Established, 1)).unwrap();
        assert_eq!(rig.supv.state(), DeviceState::Executing);
        rig.process(Event::Cnxn(CnxnEvent::Deleted, 0)).unwrap();
        assert_eq!(rig.supv.state(), DeviceState::Idle);
    }

    #[test]
    fn waiting_for_tunid_flow() {
        let mut rig = Rig::new();
        rig.init();
        rig.process(Event::SelfTestPassed).unwrap();
        assert_eq!(rig.supv.state(), DeviceState::WaitingForTunid);
        assert!(matches!(
            rig.process(Event::FwdOpenReq),
            Err(ErrorCode::FoWaitTunid)
        ));
        rig.process(Event::ProposeTunid(ProposePhase::Start)).unwrap();
        assert_eq!(rig.leds.network.last(), Some(&LedState::FlashRedGreen));
        rig.process(Event::ApplyTunidCheck).unwrap();
        rig.process(Event::ApplyTunid).unwrap();
        assert_eq!(rig.leds.network.last(), Some(&LedState::FlashGreen));
        assert_eq!(rig.supv.state(), DeviceState::Configuring);
    }

    #[test]
    fn propose_tunid_is_rejected_outside_waiting() {
        let mut rig = Rig::new().with_tunid().with_scid();
        rig.init();
        rig.process(Event::SelfTestPassed).unwrap();
        assert!(rig.process(Event::ProposeTunid(ProposePhase::Start)).is_err());
        assert!(rig.process(Event::ApplyTunidCheck).is_err());
    }

    #[test]
    fn device_state_messages_follow_every_transition() {
        let mut rig = Rig::new().with_tunid().with_scid();
        rig.init();
        rig.process(Event::SelfTestPassed).unwrap();
        let states: Vec<u32> = rig
            .tx
            .sent
            .iter()
            .filter(|m| m.cmd == Command::DeviceState)
            .map(|m| m.add_info)
            .collect();
        assert_eq!(
            states,
            vec![
                u8::from(DeviceState::SelfTesting) as u32,
                u8::from(DeviceState::Idle) as u32,
            ]
        );
        assert_eq!(
            rig.pool.status_changes,
            vec![DeviceState::SelfTesting, DeviceState::Idle]
        );
    }

    #[test]
    fn events_never_leave_the_defined_state_set() {
        // Drive every event from every reachable state; the machine must
        // stay within the eight defined states.
        let all_events = [
            Event::SelfTestPassed,
            Event::SelfTestFailed,
            Event::ExceptionCleared,
            Event::CriticalFault,
            Event::InternalAbort,
            Event::FwdOpenReq,
            Event::Type1SafetyOpen,
            Event::ProposeTunid(ProposePhase::Start),
            Event::ProposeTunid(ProposePhase::Stop),
            Event::ApplyTunidCheck,
            Event::ApplyTunid,
            Event::ApplyReq,
            Event::ModeChange(Mode::Idle),
            Event::ModeChange(Mode::Executing),
            Event::Cnxn(CnxnEvent::Established, 1),
            Event::Cnxn(CnxnEvent::Deleted, 0),
            Event::Cnxn(CnxnEvent::Failed, 0),
            Event::ResetReq,
        ];
        for first in all_events {
            for second in all_events {
                for third in all_events {
                    let mut rig = Rig::new().with_tunid().with_scid();
                    rig.init();
                    let _ = rig.process(first);
                    let _ = rig.process(second);
                    let _ = rig.process(third);
                    assert_ne!(rig.supv.state(), DeviceState::Undefined);
                }
            }
        }
    }
}
