use crate::address_table::AddressTable;
use crate::hardware::Delay;
use crate::hardware::i2c::I2cBridge;
use std::path::Path;
use std::time::Duration;
use wib_globals::wib1::SI5344_CONFIG_FILENAME;
use wib_globals::{Error, Result, WIB_CONFIG_PATH};

const BASE: &str = "DTS.SI5344";
const I2C_BASE: &str = "DTS.SI5344.I2C";

/// Page select register, present on every page.
pub const SI5344_PAGE_REGISTER: u16 = 0x01;
/// Soft reset and calibration register on page 0.
pub const SI5344_SOFT_RESET_REGISTER: u16 = 0x1C;

const WRITE_TRIES: u32 = 10;
const PAGE_SETTLE: Duration = Duration::from_millis(100);
/// The preamble of a generated configuration needs time before the fourth write.
const PREAMBLE_SETTLE: Duration = Duration::from_millis(300);
const RESET_SETTLE: Duration = Duration::from_millis(50);

/// Parses a register dump as exported by the vendor tool.
///
/// Every line is `address,data` in hex. Empty lines, comments (`#`) and the
/// `Address,Data` header are skipped, as are lines without a comma.
pub fn parse_config(text: &str) -> Vec<(u16, u8)> {
    let mut writes = Vec::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with('#') || line.starts_with('A') {
            continue;
        }
        let Some((address, data)) = line.split_once(',') else {
            log::warn!("skipping bad line: \"{line}\"");
            continue;
        };
        let address = u16::from_str_radix(address.trim().trim_start_matches("0x"), 16);
        let data = u8::from_str_radix(data.trim().trim_start_matches("0x"), 16);
        match (address, data) {
            (Ok(address), Ok(data)) => writes.push((address, data)),
            _ => log::warn!("skipping unparsable line: \"{line}\""),
        }
    }
    writes
}

/// Page an SI5344 register lives on.
pub fn address_page(address: u16) -> u8 {
    (address >> 8) as u8
}

/// Jitter cleaner in the DTS path.
pub struct Si5344<'a> {
    table: &'a AddressTable,
    delay: Delay,
}

impl<'a> Si5344<'a> {
    pub fn new(table: &'a AddressTable, delay: Delay) -> Self {
        Self { table, delay }
    }

    fn i2c(&self) -> I2cBridge<'a> {
        I2cBridge::new(self.table, I2C_BASE, self.delay)
    }

    pub fn write_register(&self, address: u16, value: u32) -> Result<()> {
        self.i2c().write(address, value, 1, false)
    }

    pub fn read_register(&self, address: u16) -> Result<u32> {
        self.i2c().read(address, 1)
    }

    pub fn page(&self) -> Result<u8> {
        Ok((self.read_register(SI5344_PAGE_REGISTER)? & 0xFF) as u8)
    }

    pub fn set_page(&self, page: u8) -> Result<()> {
        self.write_register(SI5344_PAGE_REGISTER, page as u32)
    }

    pub fn reset_i2c(&self) -> Result<()> {
        self.i2c().reset()
    }

    /// Gates the output and holds the chip in reset.
    pub fn disable(&self) -> Result<()> {
        self.table.write_with_retry("DTS.SI5344.ENABLE", 0)?;
        self.table.write_with_retry("DTS.SI5344.RESET", 1)
    }

    /// Selects the reference, 0 for PDTS and 1 for the local oscillator.
    pub fn select_input(&self, input: u32) -> Result<()> {
        self.table.write_with_retry("DTS.SI5344.INPUT_SELECT", input)
    }

    pub fn enable(&self) -> Result<()> {
        self.table.write_with_retry("DTS.SI5344.ENABLE", 1)
    }

    pub fn loss_of_signal(&self) -> Result<bool> {
        Ok(self.table.read_with_retry(&format!("{BASE}.LOS"))? != 0)
    }

    pub fn loss_of_lock(&self) -> Result<bool> {
        Ok(self.table.read_with_retry(&format!("{BASE}.LOL"))? != 0)
    }

    /// Kicks a soft reset on page 0, used to restart the lock after the PDTS endpoint fell out.
    pub fn soft_reset(&self) -> Result<()> {
        self.table.write("DTS.SI5344.I2C.RESET", 1)?;
        self.set_page(0)?;
        self.table.write("DTS.SI5344.I2C.RESET", 1)?;
        self.write_register(SI5344_SOFT_RESET_REGISTER, 0x1)
    }

    /// Loads `file_name`, or `$WIB_CONFIG_PATH/PDTS_SI5344.txt` if it cannot be read.
    pub fn load_config(&self, file_name: &str) -> Result<()> {
        let text = read_config_file(file_name)?;
        let writes = parse_config(&text);

        if self.table.read("DTS.SI5344.RESET")? != 0 {
            self.table.write("DTS.SI5344.RESET", 0)?;
            (self.delay)(RESET_SETTLE);
        }
        self.reset_i2c()?;
        self.table.write("DTS.SI5344.ENABLE", 0)?;

        let mut page = self.page()?;
        log::info!("loading {} SI5344 register writes", writes.len());
        for (i, (address, data)) in writes.iter().enumerate() {
            let wanted = address_page(*address);
            if wanted != page {
                page = wanted;
                self.set_page(page)?;
                (self.delay)(PAGE_SETTLE);
            }
            if i == 3 {
                (self.delay)(PREAMBLE_SETTLE);
            }
            self.write_with_retry(address & 0xFF, *data as u32)?;
            if (i + 1) % 64 == 0 {
                log::debug!("{}/{} SI5344 writes done", i + 1, writes.len());
            }
        }
        Ok(())
    }

    fn write_with_retry(&self, address: u16, data: u32) -> Result<()> {
        let mut tries = WRITE_TRIES;
        loop {
            match self.write_register(address, data) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.reset_i2c()?;
                    tries -= 1;
                    if tries == 0 {
                        log::error!("SI5344 write {data:#04x} @ {address:#04x} failed: {e}");
                        return Err(e);
                    }
                    log::debug!("SI5344 write @ {address:#04x} failed, {tries} tries left");
                }
            }
        }
    }
}

fn read_config_file(file_name: &str) -> Result<String> {
    if let Ok(text) = std::fs::read_to_string(file_name) {
        return Ok(text);
    }
    if let Ok(root) = std::env::var(WIB_CONFIG_PATH) {
        let fallback = Path::new(&root).join(SI5344_CONFIG_FILENAME);
        if let Ok(text) = std::fs::read_to_string(&fallback) {
            log::debug!("using {}", fallback.display());
            return Ok(text);
        }
    }
    Err(Error::BadFile(format!(
        "SI5344 configuration {file_name} not found (also tried ${WIB_CONFIG_PATH}/{SI5344_CONFIG_FILENAME})"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_lines() {
        let text = "# Si5344 register map\nAddress,Data\n0x0B24,0xC0\n\n0x0B25,00\nbogus\n0x0540,0x01\r\n";
        assert_eq!(
            vec![(0x0B24, 0xC0), (0x0B25, 0x00), (0x0540, 0x01)],
            parse_config(text)
        );
    }

    #[test]
    fn pages() {
        assert_eq!(0x0B, address_page(0x0B24));
        assert_eq!(0, address_page(0x001C));
    }
}
