pub mod wib1;

use std::time::Duration;

/// Environment variable holding the search root for register-map files.
pub const WIB_ADDRESS_TABLE_PATH: &str = "WIB_ADDRESS_TABLE_PATH";
/// Environment variable holding the search root for clock chip configurations.
pub const WIB_CONFIG_PATH: &str = "WIB_CONFIG_PATH";

/// Nested register-map includes allowed below the top-level file.
pub const MAX_INCLUDE_DEPTH: usize = 10;

/// Per-attempt receive timeout of the register transport.
pub const TIMEOUT: Duration = Duration::from_secs(2);
/// Attempts made by the `*_with_retry` wrappers unless told otherwise.
pub const DEFAULT_RETRY_COUNT: u32 = 10;
/// Pause between two attempts of a retried operation.
pub const RETRY_DELAY: Duration = Duration::from_micros(10);

/// Number of FEMB slots on one WIB.
pub const FEMB_COUNT: u8 = 4;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O error occurred while opening a socket or a file.
    #[error("io")]
    Io(#[from] std::io::Error),
    /// Send failure, receive timeout, short reply or address mismatch.
    #[error("communication: {0}")]
    Communication(String),
    #[error("unknown register \"{0}\"")]
    UnknownRegister(String),
    #[error("name collision on \"{0}\"")]
    NameCollision(String),
    #[error("bad file: {0}")]
    BadFile(String),
    #[error("bad token: {0}")]
    BadToken(String),
    #[error("include depth exceeded: {0}")]
    MaxIncludeDepth(String),
    #[error("bad mode: {0}")]
    BadMode(String),
    #[error("bad regex: {0}")]
    BadRegex(String),
    /// Block writes need a register owning all 32 bits.
    #[error("block write on masked register \"{0}\"")]
    BadBlockWrite(String),
    /// Caller supplied value outside its legal range.
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
    #[error("{target} firmware version {found:#010x}, expected {expected:#010x}")]
    FirmwareVersionMismatch {
        target: String,
        found: u32,
        expected: u32,
    },
    #[error("ASIC SPI readback mismatch on FEMB {0}")]
    SpiReadbackMismatch(u8),
    #[error("ADC FIFO sync failed on FEMB {femb}: {detail}")]
    AdcSync { femb: u8, detail: String },
    #[error("cannot read registers from FEMB {0}")]
    FembUnreachable(u8),
    #[error("timing: {0}")]
    TimingConfiguration(String),
    #[error("index out of range: {0}")]
    IndexOutOfRange(String),
    #[error("firmware DAQ mode unknown")]
    DaqModeUnknown,
}

impl Error {
    /// Only communication failures are eligible for a retry.
    pub fn is_communication(&self) -> bool {
        matches!(self, Error::Communication(_))
    }
}

/// Result type for operations that may return an `Error`.
pub type Result<T> = std::result::Result<T, Error>;
