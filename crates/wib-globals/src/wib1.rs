use crate::Error;
use std::fmt::{Display, Formatter};

/// Base UDP port for register writes.
pub const WIB_WR_BASE_PORT: u16 = 32000;
/// Base UDP port for register reads.
pub const WIB_RD_BASE_PORT: u16 = 32001;
/// Base UDP port the firmware uses for unsolicited replies (not used by the driver).
pub const WIB_RPLY_BASE_PORT: u16 = 32002;
/// Largest port offset accepted for one endpoint.
pub const WIB_MAX_PORT_OFFSET: u16 = 128;
/// Port offset between consecutive FEMB endpoints.
pub const FEMB_PORT_STRIDE: u16 = 0x10;

/** Default file name of the DTS jitter cleaner configuration,
 * looked up below `WIB_CONFIG_PATH`.
 */
pub const SI5344_CONFIG_FILENAME: &str = "PDTS_SI5344.txt";

/// Expected value of `DTS.PDTS_STATE` once the timing endpoint runs.
pub const PDTS_STATE_RUN: u32 = 0x8;

/// DAQ flavour the WIB firmware was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaqMode {
    Unknown,
    /// Four FEMBs on four DAQ links
    Rce,
    /// Four FEMBs on two DAQ links
    Felix,
}

impl DaqMode {
    pub fn from_counts(femb_count: u32, daq_link_count: u32) -> Self {
        match (femb_count, daq_link_count) {
            (4, 4) => DaqMode::Rce,
            (4, 2) => DaqMode::Felix,
            _ => DaqMode::Unknown,
        }
    }

    /// Number of DAQ links the firmware drives.
    pub fn link_count(&self) -> u8 {
        match self {
            DaqMode::Felix => 2,
            _ => 4,
        }
    }
}

/// State machine of the PDTS timing endpoint as reported by `DTS.PDTS_STATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PdtsState {
    WaitReset = 0x0,
    WaitLink = 0x1,
    WaitFrequency = 0x2,
    WaitAdjust = 0x3,
    WaitAlign = 0x4,
    WaitLock = 0x5,
    WaitPhase = 0x6,
    WaitReady = 0x7,
    Run = 0x8,
    Reserved9 = 0x9,
    ReservedA = 0xA,
    ReservedB = 0xB,
    ErrorReset = 0xC,
    ErrorTiming = 0xD,
    ErrorPhase = 0xE,
    ReservedF = 0xF,
}

impl PdtsState {
    /// Endpoint is locked and waiting for the phase alignment to settle.
    pub fn is_aligning(&self) -> bool {
        matches!(self, PdtsState::WaitPhase | PdtsState::WaitReady)
    }

    pub fn name(&self) -> &'static str {
        match self {
            PdtsState::WaitReset => "W_RST",
            PdtsState::WaitLink => "W_LINK",
            PdtsState::WaitFrequency => "W_FREQ",
            PdtsState::WaitAdjust => "W_ADJUST",
            PdtsState::WaitAlign => "W_ALIGN",
            PdtsState::WaitLock => "W_LOCK",
            PdtsState::WaitPhase => "W_PHASE",
            PdtsState::WaitReady => "W_RDY",
            PdtsState::Run => "RUN",
            PdtsState::Reserved9 => "0x9",
            PdtsState::ReservedA => "0xA",
            PdtsState::ReservedB => "0xB",
            PdtsState::ErrorReset => "ERR_R",
            PdtsState::ErrorTiming => "ERR_T",
            PdtsState::ErrorPhase => "ERR_P",
            PdtsState::ReservedF => "0xF",
        }
    }
}

impl TryFrom<u32> for PdtsState {
    type Error = Error;
    fn try_from(value: u32) -> crate::Result<Self> {
        let state = match value {
            0x0 => PdtsState::WaitReset,
            0x1 => PdtsState::WaitLink,
            0x2 => PdtsState::WaitFrequency,
            0x3 => PdtsState::WaitAdjust,
            0x4 => PdtsState::WaitAlign,
            0x5 => PdtsState::WaitLock,
            0x6 => PdtsState::WaitPhase,
            0x7 => PdtsState::WaitReady,
            0x8 => PdtsState::Run,
            0x9 => PdtsState::Reserved9,
            0xA => PdtsState::ReservedA,
            0xB => PdtsState::ReservedB,
            0xC => PdtsState::ErrorReset,
            0xD => PdtsState::ErrorTiming,
            0xE => PdtsState::ErrorPhase,
            0xF => PdtsState::ReservedF,
            _ => {
                log::error!("PDTS state {value:#x} does not fit in four bits!");
                return Err(Error::IndexOutOfRange(format!("PDTS state {value:#x}")));
            }
        };
        Ok(state)
    }
}

impl Display for PdtsState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({:#x})", self.name(), *self as u8)
    }
}
