// Interface to the external safety validator engines. The core allocates
// and parameterises validator instances during connection establishment;
// producing/consuming the time-stamped safety packets on the EPI schedule
// happens entirely behind this trait.

use crate::establish::parse::OpenParams;
use crate::types::{CnxnTriad, DeviceState};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Validator instance state.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum SvState {
    Idle = 0,
    Initializing = 1,
    Established = 2,
    Failed = 3,
}

/// Connection kind reported back to the transport in open responses.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum CnxnType {
    ConsumerSinglecast = 1,
    ProducerSinglecast = 2,
    ProducerMulticast = 3,
    Invalid = 0xFF,
}

/// Safety connection events emitted by the validator engines.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CnxnEvent {
    Established,
    Deleted,
    Failed,
}

/// Identification of an existing validator matching a connection triad.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SvInfo {
    pub instance: u16,
    pub consumer_num: u8,
    pub is_server: bool,
    pub multi_producer: bool,
    pub state: SvState,
}

/// Result of initialising a validator instance for an admitted SafetyOpen.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InitReply {
    /// Assigned consumer number, 1..=15. Singlecast producers report
    /// 0xFFFF here (the CIP encoding) and the response assembler clamps.
    pub consumer_num: u16,
    pub cnxn_type: CnxnType,
    /// Extended format only; 0 otherwise.
    pub initial_ts: u16,
    pub initial_rv: u16,
}

/// Allocation / parameterisation interface of the validator engines.
pub trait ValidatorPool {
    /// Search all validators for a matching connection triad.
    fn find(&self, triad: &CnxnTriad) -> Option<SvInfo>;

    /// Allocate a fresh instance (or a further consumer on a multicast
    /// producer). Returns the instance id.
    fn alloc(&mut self, params: &OpenParams) -> Result<u16, ()>;

    /// Reinitialise an existing singlecast or failed instance for a reopen.
    fn reinit(&mut self, params: &OpenParams, existing: &SvInfo) -> Result<(), ()>;

    /// Initialise the target-side parameters of an allocated instance.
    fn target_init(
        &mut self,
        params: &OpenParams,
        payload_size: u8,
        instance: u16,
    ) -> Result<InitReply, ()>;

    fn instance_info(&self, instance: u16) -> Option<SvInfo>;

    /// Stop one consumer of an instance (Forward_Close or supervisor-driven
    /// teardown).
    fn stop(&mut self, instance: u16, consumer_num: u8);

    /// Drop every open connection (entering CriticalFault, Type 1 reconfig
    /// while Executing).
    fn drop_all(&mut self);

    /// Number of connections currently in the Established state.
    fn established_count(&self) -> u16;

    /// The supervisor state changed; validators gate their packet
    /// production on it.
    fn device_status_changed(&mut self, state: DeviceState);
}
