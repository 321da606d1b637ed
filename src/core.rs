// The assembled target core: construction-time wiring of the embedding
// seams, plus the three entry points that drive everything (transport
// commands, explicit requests, application-initiated operations).

use crate::assembly::{AsmConfigError, AsmEntry, Assemblies};
use crate::dispatch::{self, DispCtx, ExplicitRequest, ExplicitResponse, SupvAttrs};
use crate::establish::{self, EstCtx};
use crate::ids::IdentityStore;
use crate::sapl::{ErrorCode, SafetyApp};
use crate::supervisor::{Event, Mode, Outcome, Supervisor, SupvCtx};
use crate::transport::{Command, Indicators, Message, Transport};
use crate::types::{DeviceIdentity, DeviceState};
use crate::validator::{CnxnEvent, ValidatorPool};
use log::{info, warn};
use thiserror::Error;

/// Construction-time parameterisation of the core. Behaviors that the
/// reference stacks select per build (port count, supported formats,
/// assembly layout) are all decided here.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    pub identity: DeviceIdentity,
    /// NodeID per safety port; 0xFFFF_FFFF marks an unassigned port.
    /// Single-port devices use exactly one entry.
    pub node_ids: Vec<u32>,
    pub base_format: bool,
    pub extended_format: bool,
    pub assemblies: Vec<AsmEntry>,
    /// Output connection points owned through the OCPUNID table. When
    /// absent, every output assembly is one.
    pub target_out_instances: Option<Vec<u16>>,
}

impl CoreConfig {
    pub fn ports(&self) -> usize {
        self.node_ids.len()
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("at least one safety port is required")]
    NoPorts,
    #[error("at least one safety segment format must be supported")]
    NoFormats,
    #[error("assembly configuration: {0}")]
    Assemblies(#[from] AsmConfigError),
}

pub struct SafetyCore {
    identity: DeviceIdentity,
    node_ids: Vec<u32>,
    base_format: bool,
    extended_format: bool,
    assemblies: Assemblies,
    ids: IdentityStore,
    supervisor: Supervisor,
    attrs: SupvAttrs,
    restore_ok: bool,
    sapl: Box<dyn SafetyApp>,
    transport: Box<dyn Transport>,
    indicators: Box<dyn Indicators>,
    validators: Box<dyn ValidatorPool>,
}

impl SafetyCore {
    /// Build the core, restore the identity store and run the power-up
    /// self test. The returned core has already settled into its initial
    /// supervisor state.
    pub fn new(
        cfg: CoreConfig,
        mut sapl: Box<dyn SafetyApp>,
        transport: Box<dyn Transport>,
        indicators: Box<dyn Indicators>,
        validators: Box<dyn ValidatorPool>,
    ) -> Result<Self, CoreError> {
        if cfg.node_ids.is_empty() {
            return Err(CoreError::NoPorts);
        }
        if !cfg.base_format && !cfg.extended_format {
            return Err(CoreError::NoFormats);
        }
        let assemblies = Assemblies::new(cfg.assemblies.clone())?;

        let ports = cfg.ports();
        let mut restore_ok = true;
        let ids = match IdentityStore::restore(
            ports,
            cfg.target_out_instances.clone(),
            &assemblies,
            sapl.as_mut(),
        ) {
            Ok(ids) => ids,
            Err(_) => {
                restore_ok = false;
                IdentityStore::defaulted(ports, cfg.target_out_instances.clone(), &assemblies)
            }
        };
        let attrs = match SupvAttrs::restore(sapl.as_mut()) {
            Ok(attrs) => attrs,
            Err(_) => {
                restore_ok = false;
                SupvAttrs { alarm_enable: true, warning_enable: true }
            }
        };

        let mut core = SafetyCore {
            identity: cfg.identity,
            node_ids: cfg.node_ids,
            base_format: cfg.base_format,
            extended_format: cfg.extended_format,
            assemblies,
            ids,
            supervisor: Supervisor::new(),
            attrs,
            restore_ok,
            sapl,
            transport,
            indicators,
            validators,
        };

        if restore_ok {
            // Tell the transport which safety subnets the ports live on.
            let _ = core
                .ids
                .send_snn(core.transport.as_mut(), core.sapl.as_mut());
        }
        {
            let (supervisor, mut ctx) = core.supv_split();
            supervisor.init(&mut ctx);
        }
        core.run_self_test();
        info!("safety core up, state {:?}", core.supervisor.state());
        Ok(core)
    }

    pub fn device_status(&self) -> DeviceState {
        self.supervisor.state()
    }

    pub fn exception_status(&self) -> u8 {
        self.supervisor.exception_status()
    }

    /// Application-initiated update of the Exception Status attribute.
    pub fn exception_status_set(&mut self, status: u8) {
        self.supervisor.exception_status_set(status);
    }

    /// A command message arrived from the transport.
    pub fn command(&mut self, msg: &Message) {
        match msg.cmd {
            Command::SafetyOpenRequest => {
                let mut ctx = self.est_ctx();
                establish::fwd_open_handler(&msg.data, msg.add_info, &mut ctx);
            }
            Command::SafetyCloseRequest => {
                let mut ctx = self.est_ctx();
                establish::fwd_close_handler(&msg.data, msg.add_info, &mut ctx);
            }
            other => {
                self.sapl
                    .error_report(ErrorCode::CmdUnknown, 0, u16::from(other) as u32);
            }
        }
    }

    /// An explicit request addressed at the Safety Supervisor Object.
    pub fn explicit_request(&mut self, req: &ExplicitRequest) -> ExplicitResponse {
        let mut ctx = DispCtx {
            ports: self.node_ids.len(),
            attrs: &mut self.attrs,
            assemblies: &self.assemblies,
            ids: &mut self.ids,
            supervisor: &mut self.supervisor,
            sapl: self.sapl.as_mut(),
            transport: self.transport.as_mut(),
            indicators: self.indicators.as_mut(),
            validators: self.validators.as_mut(),
            node_ids: &self.node_ids,
        };
        dispatch::explicit_request(req, &mut ctx)
    }

    /// Move between Idle and Executing.
    pub fn mode_change(&mut self, executing: bool) {
        let mode = if executing { Mode::Executing } else { Mode::Idle };
        let (supervisor, mut ctx) = self.supv_split();
        let _ = supervisor.process(Event::ModeChange(mode), &mut ctx);
    }

    /// Major fault reported by the safety application. Recoverable faults
    /// abort, unrecoverable ones latch Critical Fault.
    pub fn major_fault(&mut self, recoverable: bool) {
        let event = if recoverable { Event::InternalAbort } else { Event::CriticalFault };
        let (supervisor, mut ctx) = self.supv_split();
        let _ = supervisor.process(event, &mut ctx);
    }

    /// The condition behind a failed self test was removed; re-test.
    pub fn exception_cleared(&mut self) {
        let outcome = {
            let (supervisor, mut ctx) = self.supv_split();
            supervisor.process(Event::ExceptionCleared, &mut ctx)
        };
        match outcome {
            Ok(Outcome::RestartSelfTest) => self.run_self_test(),
            Ok(Outcome::Handled) | Err(_) => {}
        }
    }

    /// Safety connection state change reported by the validator engines.
    pub fn connection_event(&mut self, event: CnxnEvent, established: u16) {
        let (supervisor, mut ctx) = self.supv_split();
        let _ = supervisor.process(Event::Cnxn(event, established), &mut ctx);
    }

    /// Output data arrived on a consuming assembly; forwarded to the
    /// application hook.
    pub fn io_data_received(&mut self, instance: u16, data: &[u8]) {
        if self.assemblies.is_output(instance) {
            self.sapl.io_data_rx(instance, data);
        } else {
            self.sapl.error_report(ErrorCode::AsmNotFoundGet, instance, 0);
        }
    }

    fn run_self_test(&mut self) {
        let mut passed = self.sapl.self_test_result();
        if !self.restore_ok {
            warn!("identity restore failed, failing self test");
            passed = false;
        }
        let event = if passed { Event::SelfTestPassed } else { Event::SelfTestFailed };
        let (supervisor, mut ctx) = self.supv_split();
        let _ = supervisor.process(event, &mut ctx);
    }

    fn supv_split(&mut self) -> (&mut Supervisor, SupvCtx<'_>) {
        (
            &mut self.supervisor,
            SupvCtx {
                ids: &mut self.ids,
                sapl: self.sapl.as_mut(),
                transport: self.transport.as_mut(),
                indicators: self.indicators.as_mut(),
                validators: self.validators.as_mut(),
                node_ids: &self.node_ids,
            },
        )
    }

    fn est_ctx(&mut self) -> EstCtx<'_> {
        EstCtx {
            identity: &self.identity,
            multi_port: self.node_ids.len() > 1,
            base_format: self.base_format,
            extended_format: self.extended_format,
            ids: &mut self.ids,
            assemblies: &self.assemblies,
            supervisor: &mut self.supervisor,
            sapl: self.sapl.as_mut(),
            transport: self.transport.as_mut(),
            indicators: self.indicators.as_mut(),
            validators: self.validators.as_mut(),
            node_ids: &self.node_ids,
        }
    }
}
