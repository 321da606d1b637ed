// Embedding interface of the safety application, and the diagnostic error
// codes reported through it.

use crate::establish::parse::OpenParams;
use crate::types::{DeviceState, ElectronicKey};
use crate::validator::CnxnEvent;

/// Non-volatile storage slots. Data is exchanged in the core's own fixed
/// little-endian layouts; the application treats it as opaque bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NvSlot {
    AlarmEnable,
    WarningEnable,
    Cfunid,
    OcpunidTable,
    Scid,
    TunidList,
}

/// Safety_Reset reset types.
pub const RESET_TYPE_0: u8 = 0;
pub const RESET_TYPE_1: u8 = 1;
pub const RESET_TYPE_2: u8 = 2;

/// Length of the Safety_Reset password field.
pub const RESET_PASSWORD_SIZE: usize = 16;

/// Callbacks the safety application must provide. Passed to
/// `SafetyCore::new` as a trait object; every method is invoked from the
/// single core thread and must not block.
pub trait SafetyApp {
    /// Outcome of the power-up self test. Queried once during start-up and
    /// again after an exception condition is cleared.
    fn self_test_result(&mut self) -> bool;

    /// Diagnostic reporting channel for fail-safe and not-fail-safe errors.
    /// `instance` is a related validator instance or connection point when
    /// one applies, otherwise 0.
    fn error_report(&mut self, code: ErrorCode, instance: u16, add_info: u32);

    fn nv_store(&mut self, slot: NvSlot, data: &[u8]) -> bool;

    fn nv_restore(&mut self, slot: NvSlot, out: &mut [u8]) -> bool;

    /// Application veto on an otherwise admissible SafetyOpen. Zero accepts;
    /// any other value is echoed as the CIP extended status of the refusal.
    fn safety_open_validate(&mut self, params: &OpenParams, payload_size: u8) -> u16;

    /// Apply the configuration data delivered by a Type 1 SafetyOpen.
    fn apply_config(&mut self) -> bool;

    /// Decide whether a not-exactly-matching electronic key with the
    /// compatibility bit set can be serviced.
    fn compatible_key_accept(&mut self, key: &ElectronicKey) -> bool;

    /// Safety_Reset was validated; the returned general status code is
    /// transmitted. The application performs the actual reset after the
    /// response has been flushed.
    fn safety_reset(&mut self, reset_type: u8, attr_bit_map: u8, password: &[u8]) -> u8;

    /// Profile-dependent decision on Idle/Executing changes driven by
    /// safety connection events. Returning true toggles the mode.
    fn profile_dependent_state_change(
        &mut self,
        state: DeviceState,
        event: CnxnEvent,
        established_cnxns: u16,
    ) -> bool;

    /// Output data arrived on a consuming assembly instance.
    fn io_data_rx(&mut self, instance: u16, data: &[u8]);
}

/// Diagnostic codes. The high bit marks fail-safe errors (violated internal
/// invariants); codes without it are protocol-level events kept for
/// observability.
#[repr(u16)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    // fail-safe
    ProgFlow = 0x8001,
    NvRestoreAlarmEnable = 0x8002,
    NvRestoreWarnEnable = 0x8003,
    NvRestoreCfunid = 0x8004,
    NvRestoreScid = 0x8005,
    NvRestoreTunid = 0x8006,
    NvRestoreOcpunid = 0x8007,
    NvStoreScid = 0x8008,
    NvStoreTunid = 0x8009,
    NvStoreCfunid = 0x800A,
    NvStoreOcpunid = 0x800B,
    AsmNotFoundGet = 0x800C,
    AsmNotFoundSet = 0x800D,
    AsmWrongTypeGet = 0x800E,
    AsmWrongTypeSet = 0x800F,
    UndefinedState = 0x8010,
    SelfTestPassUnexpected = 0x8011,
    SelfTestFailUnexpected = 0x8012,
    AbortNotAllowed = 0x8013,
    ModeChangeNotAllowed = 0x8014,
    CnxnEstabNotPossible = 0x8015,
    CnxnDelNotPossible = 0x8016,
    CnxnFailNotPossible = 0x8017,
    ResetInSelfTest = 0x8018,
    OpenInSelfTest = 0x8019,
    ProposeTunidInSelfTest = 0x801A,
    ApplyTunidInSelfTest = 0x801B,

    // not-fail-safe
    CmdUnknown = 0x0001,
    OpenRespSendFailed = 0x0002,
    CloseRespSendFailed = 0x0003,
    SnnSendFailed = 0x0004,
    DevStateSendFailed = 0x0005,
    SoTooShort = 0x0010,
    SoTooLong = 0x0011,
    SoApSize1 = 0x0012,
    SoApSize2 = 0x0013,
    SoSegInv = 0x0014,
    SoSsegSize = 0x0015,
    SoInvClass = 0x0016,
    SoInvInst = 0x0017,
    SoBaseNotSup = 0x0018,
    SoExtNotSup = 0x0019,
    SoCpcrcMismatch = 0x0020,
    SoTunidRxFf = 0x0021,
    SoNoTunid = 0x0022,
    SoTunidMismatch = 0x0023,
    SoServerExists = 0x0024,
    SoClientExists = 0x0025,
    SoKeyWildcardVidPc = 0x0026,
    SoKeyWildcardDevType = 0x0027,
    SoKeyWildcardRev = 0x0028,
    SoKeyVidPcMismatch = 0x0029,
    SoKeyDevTypeMismatch = 0x002A,
    SoKeyRevMismatch = 0x002B,
    SoInvTimeoutMult = 0x002C,
    SoInvTct = 0x002D,
    SoInvNcp = 0x002E,
    SoInvTcorrNcp = 0x002F,
    SoMcastLenInv = 0x0030,
    SoInvLen = 0x0031,
    SoRpiInv = 0x0032,
    SoInvTcorrEpi = 0x0033,
    SoInvPiem = 0x0034,
    SoInvPingInt = 0x0035,
    SoInvTcmmm = 0x0036,
    SoInvNtem = 0x0037,
    SoInvSafetyTmult = 0x0038,
    SoInvMaxConsNum = 0x0039,
    SoInvTccid = 0x003A,
    SoInvMaxFaultNum = 0x003B,
    SoInvInitialTsRv = 0x003C,
    SoInvCfgPath = 0x003D,
    SoInvProdPath = 0x003E,
    SoInvConsPath = 0x003F,
    SoSccrcMismatch = 0x0040,
    SoCfunidMismatch = 0x0041,
    SoToolOwned = 0x0042,
    SoUnconfigured = 0x0043,
    SoScidMismatch = 0x0044,
    SoOcpNotFound = 0x0045,
    SoOcpOwned = 0x0046,
    SoSaplDeny = 0x0047,
    SoSaplApplyFail = 0x0048,
    SoStateMachine = 0x0049,
    SoStoreFailed = 0x004A,
    SoAllocFailed = 0x004B,
    SoInitFailed = 0x004C,
    ScCnxnNotFound = 0x004D,
    FoWaitTunid = 0x0050,
    FoWrongState = 0x0051,
    ProposeTunidWrongState = 0x0052,
    ApplyTunidWrongState = 0x0053,
}

impl ErrorCode {
    pub fn is_fail_safe(&self) -> bool {
        (*self as u16) & 0x8000 != 0
    }

    pub fn code(&self) -> u16 {
        *self as u16
    }
}
