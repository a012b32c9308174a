use crate::address_table::AddressTable;
use crate::hardware::Delay;
use crate::hardware::i2c::I2cBridge;
use std::time::Duration;
use wib_globals::Result;

const I2C_BASE: &str = "DTS.CDS.I2C";

/// Low, middle and high byte of the measured data rate.
pub const CDS_FREQ0: u16 = 0x00;
pub const CDS_FREQ1: u16 = 0x01;
pub const CDS_FREQ2: u16 = 0x02;
/// Control register B, bit 5 restarts the frequency measurement.
pub const CDS_CTRLB: u16 = 0x09;
const CTRLB_MEASURE_RESET: u32 = 0x20;

/// Reference clock the rate counter is referred to.
pub const CDS_REFCLK_HZ: f64 = 50.0e6;
const MEASURE_SETTLE: Duration = Duration::from_millis(10);

/// Rate estimate from the three FREQ bytes.
pub fn rate_from_counter(freq0: u32, freq1: u32, freq2: u32) -> f64 {
    let word = (freq0 & 0xFF) | ((freq1 & 0xFF) << 8) | ((freq2 & 0xFF) << 16);
    word as f64 * CDS_REFCLK_HZ / (1u32 << 19) as f64
}

/// Clock and data separator recovering the PDTS clock from the timing line.
pub struct Cds<'a> {
    table: &'a AddressTable,
    delay: Delay,
}

impl<'a> Cds<'a> {
    pub fn new(table: &'a AddressTable, delay: Delay) -> Self {
        Self { table, delay }
    }

    /// Selects the PDTS input (0 backplane, 1 front panel) and measures the recovered rate.
    pub fn configure(&self, source: u8) -> Result<f64> {
        let i2c = I2cBridge::new(self.table, I2C_BASE, self.delay);
        self.table.write_with_retry("DTS.CDS.SOURCE_SELECT", source as u32)?;
        i2c.reset()?;

        i2c.write(CDS_CTRLB, CTRLB_MEASURE_RESET, 1, false)?;
        i2c.write(CDS_CTRLB, 0x00, 1, false)?;
        (self.delay)(MEASURE_SETTLE);

        let freq0 = i2c.read(CDS_FREQ0, 1)?;
        let freq1 = i2c.read(CDS_FREQ1, 1)?;
        let freq2 = i2c.read(CDS_FREQ2, 1)?;
        let rate = rate_from_counter(freq0, freq1, freq2);
        log::debug!("CDS rate counter {freq2:02x}{freq1:02x}{freq0:02x}, {rate:.0} Hz");
        Ok(rate)
    }

    pub fn loss_of_lock(&self) -> Result<bool> {
        Ok(self.table.read("DTS.CDS.LOL")? != 0)
    }

    pub fn loss_of_signal(&self) -> Result<bool> {
        Ok(self.table.read("DTS.CDS.LOS")? != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_counter() {
        assert_eq!(0.0, rate_from_counter(0, 0, 0));
        // 2^19 counts is one reference period
        assert_eq!(CDS_REFCLK_HZ, rate_from_counter(0x00, 0x00, 0x08));
        assert_eq!(CDS_REFCLK_HZ / 2.0, rate_from_counter(0x00, 0x00, 0x04));
    }
}
