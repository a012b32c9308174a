use crate::address_table::AddressTable;
use crate::hardware::Delay;
use std::time::Duration;
use wib_globals::{Error, Result};

/// Polls of the DONE flag before a transaction is given up.
const DONE_POLLS: u32 = 1000;
const DONE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// I2C master in the WIB firmware, driven through named registers below `base`.
///
/// `base` is a register-map prefix such as `DTS.SI5344.I2C` owning the fields
/// `RW`, `ADDR`, `BYTE_COUNT`, `WR_DATA`, `RD_DATA`, `RUN`, `DONE`, `ERROR` and `RESET`.
/// All accesses go through the retry wrappers.
pub struct I2cBridge<'a> {
    table: &'a AddressTable,
    base: &'a str,
    delay: Delay,
}

impl<'a> I2cBridge<'a> {
    pub fn new(table: &'a AddressTable, base: &'a str, delay: Delay) -> Self {
        Self { table, base, delay }
    }

    fn field(&self, name: &str) -> String {
        format!("{}.{name}", self.base)
    }

    fn wait_done(&self) -> Result<()> {
        let done = self.field("DONE");
        for _ in 0..DONE_POLLS {
            if self.table.read_with_retry(&done)? != 0 {
                return Ok(());
            }
            (self.delay)(DONE_POLL_INTERVAL);
        }
        log::error!("{done} never set");
        Err(Error::Communication(format!("{done} timeout")))
    }

    /// Runs a read of `byte_count` bytes at `address` and returns `RD_DATA`.
    pub fn read(&self, address: u16, byte_count: u8) -> Result<u32> {
        self.table.write_with_retry(&self.field("RW"), 1)?;
        self.table.write_with_retry(&self.field("ADDR"), address as u32)?;
        self.table
            .write_with_retry(&self.field("BYTE_COUNT"), byte_count as u32)?;
        self.wait_done()?;
        self.table.write_with_retry(&self.field("RUN"), 1)?;
        self.wait_done()?;
        let error = self.table.read_with_retry(&self.field("ERROR"))?;
        if error != 0 {
            log::error!("{}.ERROR {error:#010x}", self.base);
            self.table.write_with_retry(&self.field("RESET"), 1)?;
            return Err(Error::Communication(format!(
                "{}: rd @ {address:#06x}",
                self.base
            )));
        }
        self.table.read_with_retry(&self.field("RD_DATA"))
    }

    /// Runs a write of `data` to `address`. With `ignore_error` the ERROR flag is not checked.
    pub fn write(&self, address: u16, data: u32, byte_count: u8, ignore_error: bool) -> Result<()> {
        self.table.write_with_retry(&self.field("RW"), 0)?;
        self.table.write_with_retry(&self.field("ADDR"), address as u32)?;
        self.table
            .write_with_retry(&self.field("BYTE_COUNT"), byte_count as u32)?;
        self.table.write_with_retry(&self.field("WR_DATA"), data)?;
        self.wait_done()?;
        self.table.write_with_retry(&self.field("RUN"), 1)?;
        self.wait_done()?;
        if !ignore_error && self.table.read_with_retry(&self.field("ERROR"))? != 0 {
            self.table.write_with_retry(&self.field("RESET"), 1)?;
            return Err(Error::Communication(format!(
                "{}: wr {data:#010x} @ {address:#06x}",
                self.base
            )));
        }
        Ok(())
    }

    /// Pulses the reset of the I2C master.
    pub fn reset(&self) -> Result<()> {
        self.table.write(&self.field("RESET"), 1)
    }
}
