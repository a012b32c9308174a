mod dts;
mod fake_data;
mod femb;
mod phase;
mod reset;

pub use dts::{AlignmentPolicy, BringupState, ClockSource, TimingBringup, TimingConfig};
pub use fake_data::FakeData;
pub use femb::{FembSettings, FembStatus, FembTolerance};
pub use phase::{HuntOutcome, PhaseAligner};

use crate::address_table::{AddressTable, Register, RegisterMap};
use crate::hardware::i2c::I2cBridge;
use crate::hardware::{Delay, thread_sleep};
use crate::transport::UdpTransport;
use std::time::Duration;
use wib_globals::wib1::{DaqMode, FEMB_PORT_STRIDE};
use wib_globals::{Error, FEMB_COUNT, Result};

pub(crate) const DND: &str = "SYSTEM.SLOW_CONTROL_DND";
/// Settle time after every FEMB register write.
pub const FEMB_WRITE_SETTLE: Duration = Duration::from_millis(10);

/// A WIB and the register spaces of its four FEMBs.
///
/// The WIB owns one [`AddressTable`] for itself and one per FEMB slot. FEMB
/// slots are numbered 1 to 4.
pub struct Wib {
    wib: AddressTable,
    fembs: Vec<AddressTable>,
    daq_mode: DaqMode,
    femb_count: u32,
    daq_link_count: u32,
    tolerance: FembTolerance,
    delay: Delay,
}

impl std::fmt::Debug for Wib {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wib")
            .field("daq_mode", &self.daq_mode)
            .field("femb_count", &self.femb_count)
            .field("daq_link_count", &self.daq_link_count)
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

impl Wib {
    /// Loads both register maps and opens the WIB endpoint plus one endpoint per FEMB.
    pub fn connect(host: &str, wib_table: &str, femb_table: &str) -> Result<Self> {
        let wib = AddressTable::open(wib_table, host, 0)?;
        let femb_map = RegisterMap::load(femb_table)?;
        let mut fembs = Vec::with_capacity(FEMB_COUNT as usize);
        for i in 1..=FEMB_COUNT as u16 {
            let mut transport = UdpTransport::connect(host, i * FEMB_PORT_STRIDE)?;
            transport.set_write_ack(true);
            fembs.push(AddressTable::new(femb_map.clone(), transport));
        }
        Self::from_parts(wib, fembs)
    }

    /// Builds the device from already bound register spaces and starts it.
    ///
    /// Reads the FEMB and DAQ link counts to find out which DAQ flavour the
    /// firmware was built for and turns on the DC/DC converters.
    pub fn from_parts(wib: AddressTable, fembs: Vec<AddressTable>) -> Result<Self> {
        if fembs.len() != FEMB_COUNT as usize {
            return Err(Error::IndexOutOfRange(format!(
                "{} FEMB register spaces, need {FEMB_COUNT}",
                fembs.len()
            )));
        }
        let femb_count = wib.read("SYSTEM.FEMB_COUNT")?;
        let daq_link_count = wib.read("SYSTEM.DAQ_LINK_COUNT")?;
        let daq_mode = DaqMode::from_counts(femb_count, daq_link_count);
        log::info!("WIB firmware: {femb_count} FEMBs, {daq_link_count} DAQ links ({daq_mode:?})");
        wib.write("POWER.ENABLE.MASTER_BIAS", 1)?;
        Ok(Self {
            wib,
            fembs,
            daq_mode,
            femb_count,
            daq_link_count,
            tolerance: FembTolerance::default(),
            delay: thread_sleep,
        })
    }

    /// Replaces the sleep between hardware steps.
    pub fn with_delay(mut self, delay: Delay) -> Self {
        self.delay = delay;
        self
    }

    pub fn tolerance(&self) -> FembTolerance {
        self.tolerance
    }

    pub fn set_tolerance(&mut self, tolerance: FembTolerance) {
        self.tolerance = tolerance;
    }

    pub fn daq_mode(&self) -> DaqMode {
        self.daq_mode
    }

    pub fn femb_count(&self) -> u32 {
        self.femb_count
    }

    pub fn daq_link_count(&self) -> u32 {
        self.daq_link_count
    }

    pub fn table(&self) -> &AddressTable {
        &self.wib
    }

    pub(crate) fn sleep(&self, duration: Duration) {
        (self.delay)(duration)
    }

    pub(crate) fn delay(&self) -> Delay {
        self.delay
    }

    pub fn read<'a>(&self, register: impl Into<Register<'a>>) -> Result<u32> {
        self.wib.read(register)
    }

    pub fn read_with_retry<'a>(&self, register: impl Into<Register<'a>>) -> Result<u32> {
        self.wib.read_with_retry(register)
    }

    pub fn write<'a>(&self, register: impl Into<Register<'a>>, value: u32) -> Result<()> {
        self.wib.write(register, value)
    }

    pub fn write_with_retry<'a>(&self, register: impl Into<Register<'a>>, value: u32) -> Result<()> {
        self.wib.write_with_retry(register, value)
    }

    pub fn write_block<'a>(&self, register: impl Into<Register<'a>>, values: &[u32]) -> Result<()> {
        self.wib.write_block(register, values)
    }

    /// Register space of FEMB `femb` (1 to 4).
    pub fn femb_table(&self, femb: u8) -> Result<&AddressTable> {
        if !(1..=FEMB_COUNT).contains(&femb) {
            log::error!("FEMB {femb} out of range");
            return Err(Error::IndexOutOfRange(format!("FEMB {femb}")));
        }
        Ok(&self.fembs[femb as usize - 1])
    }

    pub fn read_femb<'a>(&self, femb: u8, register: impl Into<Register<'a>>) -> Result<u32> {
        self.femb_table(femb)?.read(register)
    }

    /// Writes with retry and waits for the FEMB to settle.
    pub fn write_femb<'a>(
        &self,
        femb: u8,
        register: impl Into<Register<'a>>,
        value: u32,
    ) -> Result<()> {
        self.femb_table(femb)?.write_with_retry(register, value)?;
        self.sleep(FEMB_WRITE_SETTLE);
        Ok(())
    }

    /// Replaces `mask << pos` of the word at `address` with `value`.
    pub fn write_femb_bits(
        &self,
        femb: u8,
        address: u16,
        pos: u32,
        mask: u32,
        value: u32,
    ) -> Result<()> {
        let table = self.femb_table(femb)?;
        let field = mask.checked_shl(pos).unwrap_or(0);
        let current = table.read(address)?;
        let shifted = (value & mask).checked_shl(pos).unwrap_or(0);
        table.write_with_retry(address, (current & !field) | shifted)?;
        self.sleep(FEMB_WRITE_SETTLE);
        Ok(())
    }

    /// Turns the ADC outputs of FEMB `femb` on or off.
    pub fn enable_adc(&self, femb: u8, enable: bool) -> Result<()> {
        let value = if enable { 0x00 } else { 0xFF };
        self.femb_table(femb)?.write(0x03u16, value)?;
        self.sleep(FEMB_WRITE_SETTLE);
        Ok(())
    }

    /// Runs `f` with the do-not-disturb flag set and restores its previous value afterwards.
    ///
    /// The restore is attempted on every exit path. A failing restore after `f`
    /// already failed is logged and the error of `f` is returned.
    pub fn with_do_not_disturb<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let saved = self.wib.read(DND)?;
        self.hold_do_not_disturb(saved, f)
    }

    pub(crate) fn hold_do_not_disturb<T>(
        &self,
        saved: u32,
        f: impl FnOnce(&Self) -> Result<T>,
    ) -> Result<T> {
        self.wib.write(DND, 1)?;
        match f(self) {
            Ok(value) => {
                self.wib.write(DND, saved)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(restore) = self.wib.write(DND, saved) {
                    log::warn!("could not restore {DND} to {saved}: {restore}");
                }
                Err(e)
            }
        }
    }

    /// Reads through the I2C master below `base`, e.g. `DTS.SI5344.I2C`.
    pub fn i2c_read(&self, base: &str, address: u16, byte_count: u8) -> Result<u32> {
        I2cBridge::new(&self.wib, base, self.delay).read(address, byte_count)
    }

    pub fn i2c_write(
        &self,
        base: &str,
        address: u16,
        data: u32,
        byte_count: u8,
        ignore_error: bool,
    ) -> Result<()> {
        I2cBridge::new(&self.wib, base, self.delay).write(address, data, byte_count, ignore_error)
    }
}

/// Fails with `IndexOutOfRange` unless `femb` names a FEMB slot.
pub(crate) fn check_femb(femb: u8) -> Result<()> {
    if (1..=FEMB_COUNT).contains(&femb) {
        Ok(())
    } else {
        Err(Error::IndexOutOfRange(format!("FEMB {femb}")))
    }
}
