use crate::board::wib::{DND, Wib};
use std::time::Duration;
use wib_globals::wib1::DaqMode;
use wib_globals::{Error, FEMB_COUNT, Result};

impl Wib {
    /// Resets the control register, the event builder PLL and the DAQ path.
    ///
    /// With `reset_udp` the UDP core is reset first. That reset kills the reply,
    /// so communication failures of those two writes are ignored.
    pub fn reset_wib(&self, reset_udp: bool) -> Result<()> {
        if reset_udp {
            for _ in 0..2 {
                match self.write("SYSTEM.RESET.UDP_RESET", 1) {
                    Err(e) if e.is_communication() => {
                        log::debug!("no reply to UDP reset: {e}");
                    }
                    other => other?,
                }
                self.sleep(Duration::from_millis(10));
            }
        }

        self.write_with_retry("SYSTEM.RESET.CONTROL_REGISTER_RESET", 1)?;
        self.sleep(Duration::from_millis(1));

        if self.daq_mode() == DaqMode::Felix {
            self.write("DAQ.SI5342.RESET", 1)?;
            self.sleep(Duration::from_millis(10));
            self.write("DAQ.SI5342.RESET", 0)?;
            self.sleep(Duration::from_millis(10));
            log::warn!("SI5342 configuration files are not supported, keeping its power-up setup");
            self.write("DAQ.SI5342.INPUT_SELECT", 1)?;
            self.write("DAQ.SI5342.ENABLE", 1)?;
        }

        self.write("SYSTEM.RESET.EB_PLL_RESET", 1)?;
        self.sleep(Duration::from_millis(10));
        self.write("SYSTEM.RESET.DAQ_PATH_RESET", 1)?;
        self.sleep(Duration::from_millis(10));

        self.write("DTS.CMD_COUNT_RESET", 0xFFFF_FFFF)?;
        self.write("DTS.CMD_COUNT_RESET", 0)?;
        self.write("DTS.CONVERT_CONTROL.HALT", 1)?;
        self.write("DTS.CONVERT_CONTROL.ENABLE", 0)?;

        self.write("POWER.ENABLE.MASTER_BIAS", 1)
    }

    pub fn femb_power(&self, femb: u8, on: bool) -> Result<()> {
        let name = format!("POWER.ENABLE.FEMB{}", self.femb_digit(femb)?);
        log::debug!("FEMB {femb} power {}", if on { "on" } else { "off" });
        self.write(&name, if on { 0x1F } else { 0x0 })
    }

    /// Routes clock and commands from the WIB to the FEMBs.
    pub fn enable_femb_cnc(&self) -> Result<()> {
        self.write("FEMB_CNC.CNC_CLOCK_SELECT", 1)?;
        self.write("FEMB_CNC.CNC_COMMAND_SELECT", 1)
    }

    pub fn disable_femb_cnc(&self) -> Result<()> {
        self.write("FEMB_CNC.CNC_CLOCK_SELECT", 0)?;
        self.write("FEMB_CNC.CNC_COMMAND_SELECT", 0)
    }

    /// Selects per stream whether FEMB `femb` sends real (0) or fake (1) data.
    pub fn source_femb(&self, femb: u8, streams: u32) -> Result<()> {
        let name = format!("FEMB{}.DAQ.FAKE_CD.FAKE_SOURCE", self.femb_digit(femb)?);
        self.write(&name, streams)
    }

    /// Enables or disables DAQ link `link` together with all of its CD streams.
    pub fn enable_daq_link(&self, link: u8, enable: bool) -> Result<()> {
        let streams = match self.daq_mode() {
            DaqMode::Rce => 0xF,
            DaqMode::Felix => 0xFF,
            DaqMode::Unknown => {
                log::error!("DAQ link configuration needs RCE or FELIX firmware");
                return Err(Error::DaqModeUnknown);
            }
        };
        if link == 0 || link as u32 > self.daq_link_count() {
            return Err(Error::IndexOutOfRange(format!("DAQ link {link}")));
        }
        let base = format!("DAQ_LINK_{link}.CONTROL");
        self.write(&format!("{base}.ENABLE_CDA_STREAM"), if enable { streams } else { 0 })?;
        self.write(&format!("{base}.ENABLE"), enable as u32)
    }

    /// Restarts the DAQ path, enables all DAQ links and starts the convert stream.
    pub fn start_stream_to_daq(&self) -> Result<()> {
        if self.daq_mode() == DaqMode::Unknown {
            return Err(Error::DaqModeUnknown);
        }
        self.write_with_retry("DTS.CONVERT_CONTROL.HALT", 1)?;
        self.write_with_retry("DTS.CONVERT_CONTROL.ENABLE", 0)?;

        self.with_do_not_disturb(|wib| {
            wib.sleep(Duration::from_secs(1));
            wib.write("FEMB_CNC.FEMB_STOP", 1)?;
            wib.sleep(Duration::from_secs(1));
            wib.write("SYSTEM.RESET.DAQ_PATH_RESET", 1)?;
            wib.sleep(Duration::from_secs(1));

            for link in 1..=wib.daq_mode().link_count() {
                wib.enable_daq_link(link, true)?;
            }
            for femb in 1..=FEMB_COUNT {
                wib.write(&format!("FEMB{femb}.DAQ.ENABLE"), 0xF)?;
            }

            wib.write("FEMB_CNC.ENABLE_DTS_CMDS", 1)?;
            wib.start_sync_dts()
        })?;
        log::info!("streaming to DAQ");
        Ok(())
    }

    /// Disables the DAQ links without touching the rest of the data path.
    pub fn stop_daq_links(&self) -> Result<()> {
        for link in 1..=self.daq_mode().link_count() {
            self.write(&format!("DAQ_LINK_{link}.CONTROL.ENABLE"), 0)?;
        }
        Ok(())
    }

    pub fn start_sync_dts(&self) -> Result<()> {
        self.write_with_retry("DTS.CONVERT_CONTROL.HALT", 0)?;
        self.write_with_retry("DTS.CONVERT_CONTROL.ENABLE", 1)?;
        self.write_with_retry("DTS.CONVERT_CONTROL.START_SYNC", 1)
    }

    pub(crate) fn femb_digit(&self, femb: u8) -> Result<u8> {
        if femb == 0 || femb as u32 > self.femb_count().min(FEMB_COUNT as u32) {
            log::error!("FEMB {femb} out of range");
            return Err(Error::IndexOutOfRange(format!("FEMB {femb}")));
        }
        Ok(femb)
    }

    pub(crate) fn clear_do_not_disturb(&self) -> Result<()> {
        self.write(DND, 0)
    }
}
