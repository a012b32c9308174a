//! Bring-up of the timing distribution path.
//!
//! The WIB either runs from its local oscillator or recovers clock and
//! commands from the PDTS timing line. In both cases the SI5344 jitter cleaner
//! is loaded from a register dump and checked for lock. On the PDTS path the
//! clock and data separator is configured first and the timing endpoint is
//! then polled until it reports RUN.

use crate::board::wib::{DND, Wib};
use crate::hardware::cds::Cds;
use crate::hardware::si5344::Si5344;
use std::time::{Duration, Instant};
use wib_globals::wib1::{DaqMode, PDTS_STATE_RUN, PdtsState};
use wib_globals::{Error, FEMB_COUNT, Result};

const PDTS_ENABLE_SETTLE: Duration = Duration::from_millis(500);
const SI5344_SETTLE: Duration = Duration::from_millis(100);
const STEP_SETTLE: Duration = Duration::from_secs(1);

/// Where the 62.5 MHz system clock comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    /// Local oscillator, timestamps generated on board
    Local,
    /// PDTS timing line, `input` 0 for the backplane or 1 for the front panel
    External { input: u8 },
}

/// Bound of the PDTS alignment loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentPolicy {
    /// Poll until RUN or until the wall-clock timeout elapsed. Zero never times out.
    Timeout(Duration),
    /// Legacy: poll a fixed number of times. Ending in W_PHASE or W_RDY is
    /// reported as [`BringupState::ExternalSourceAligning`] instead of a failure.
    Attempts(u32),
}

impl Default for AlignmentPolicy {
    fn default() -> Self {
        AlignmentPolicy::Timeout(Duration::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringupState {
    NotStarted,
    LocalClockConfigured,
    ExternalSourceWaiting,
    ExternalSourceAligning,
    Running,
    Failed,
}

/// One run of the timing bring-up. Create a new one to try again.
#[derive(Debug)]
pub struct TimingBringup<'a> {
    wib: &'a Wib,
    source: ClockSource,
    policy: AlignmentPolicy,
    si5344_config: String,
    state: BringupState,
}

impl<'a> TimingBringup<'a> {
    pub fn new(wib: &'a Wib, source: ClockSource, policy: AlignmentPolicy) -> Self {
        Self {
            wib,
            source,
            policy,
            si5344_config: String::new(),
            state: BringupState::NotStarted,
        }
    }

    /// SI5344 register dump to load. Falls back to `$WIB_CONFIG_PATH/PDTS_SI5344.txt`.
    pub fn with_si5344_config(mut self, file_name: &str) -> Self {
        self.si5344_config = file_name.to_string();
        self
    }

    pub fn state(&self) -> BringupState {
        self.state
    }

    pub fn policy(&self) -> AlignmentPolicy {
        self.policy
    }

    pub fn source(&self) -> ClockSource {
        self.source
    }

    /// Runs the bring-up and returns the state it ended in.
    ///
    /// `Running` on success. `ExternalSourceAligning` only with
    /// [`AlignmentPolicy::Attempts`]. Every error leaves the state at `Failed`.
    pub fn run(&mut self) -> Result<BringupState> {
        if self.state != BringupState::NotStarted {
            return Err(Error::TimingConfiguration(format!(
                "bring-up already ran, ended in {:?}",
                self.state
            )));
        }
        match self.bring_up() {
            Ok(state) => Ok(state),
            Err(e) => {
                log::error!("timing bring-up failed: {e}");
                self.state = BringupState::Failed;
                Err(e)
            }
        }
    }

    fn bring_up(&mut self) -> Result<BringupState> {
        let wib = self.wib;
        let si5344 = Si5344::new(wib.table(), wib.delay());

        wib.write_with_retry("DTS.PDTS_ENABLE", 0)?;
        si5344.disable()?;
        wib.write_with_retry("DTS.CDS.I2C.RESET", 1)?;

        let input_select = match self.source {
            ClockSource::Local => {
                log::info!("using the local oscillator for timing");
                1
            }
            ClockSource::External { input } => {
                log::info!("using PDTS for timing, configuring the clock and data separator");
                let cds = Cds::new(wib.table(), wib.delay());
                let rate = cds.configure(input)?;
                let lol = cds.loss_of_lock()?;
                let los = cds.loss_of_signal()?;
                log::info!("CDS rate {rate:.0} Hz, LOL={lol} LOS={los}");
                if lol || los {
                    return Err(Error::TimingConfiguration(
                        "clock and data separator not locked".into(),
                    ));
                }
                0
            }
        };

        si5344.select_input(input_select)?;
        if let Err(e) = si5344.load_config(&self.si5344_config) {
            si5344.disable()?;
            return Err(e);
        }
        if self.source == ClockSource::Local {
            self.state = BringupState::LocalClockConfigured;
        }
        wib.sleep(SI5344_SETTLE);
        if si5344.loss_of_signal()? || si5344.loss_of_lock()? {
            si5344.disable()?;
            return Err(Error::TimingConfiguration(
                "SI5344 did not lock after configuration".into(),
            ));
        }
        si5344.enable()?;
        wib.sleep(SI5344_SETTLE);

        match self.source {
            ClockSource::Local => {
                self.state = BringupState::Running;
                Ok(self.state)
            }
            ClockSource::External { .. } => {
                self.state = BringupState::ExternalSourceWaiting;
                self.align(&si5344)
            }
        }
    }

    fn align(&mut self, si5344: &Si5344<'_>) -> Result<BringupState> {
        let wib = self.wib;
        let start = Instant::now();
        let mut slept = Duration::ZERO;
        let mut polls = 0u32;

        loop {
            wib.sleep(PDTS_ENABLE_SETTLE);
            wib.write_with_retry("DTS.PDTS_ENABLE", 1)?;
            wib.sleep(PDTS_ENABLE_SETTLE);
            slept += 2 * PDTS_ENABLE_SETTLE;
            polls += 1;

            // codes beyond the state table take the reset path
            let raw = wib.read_with_retry("DTS.PDTS_STATE")?;
            let pdts = PdtsState::try_from(raw).ok();
            if let Some(pdts) = pdts {
                log::info!("PDTS state: {pdts}");
            }
            if pdts == Some(PdtsState::Run) {
                self.state = BringupState::Running;
                return Ok(self.state);
            } else if pdts.is_some_and(|pdts| pdts.is_aligning()) {
                log::info!("waiting for the PDTS phase alignment");
                self.state = BringupState::ExternalSourceAligning;
            } else {
                self.state = BringupState::ExternalSourceWaiting;
                wib.write_with_retry("DTS.PDTS_ENABLE", 0)?;
                si5344.soft_reset()?;
            }

            match self.policy {
                AlignmentPolicy::Timeout(timeout) => {
                    let elapsed = start.elapsed().max(slept);
                    if !timeout.is_zero() && elapsed > timeout {
                        break;
                    }
                }
                AlignmentPolicy::Attempts(attempts) => {
                    if polls >= attempts {
                        if self.state == BringupState::ExternalSourceAligning {
                            log::warn!("PDTS still aligning after {polls} polls, continuing");
                            return Ok(self.state);
                        }
                        break;
                    }
                }
            }
        }

        si5344.soft_reset()?;
        Err(Error::TimingConfiguration(format!(
            "PDTS did not reach RUN ({:?})",
            self.policy
        )))
    }
}

/// Settings of [`Wib::reset_wib_and_cfg_dts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingConfig {
    pub source: ClockSource,
    /// PDTS timing group, 0 to 15
    pub timing_group: u8,
    pub policy: AlignmentPolicy,
    /// SI5344 register dump, empty for the default below `WIB_CONFIG_PATH`
    pub si5344_config: String,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            source: ClockSource::Local,
            timing_group: 0,
            policy: AlignmentPolicy::default(),
            si5344_config: String::new(),
        }
    }
}

impl TimingConfig {
    pub fn validate(&self) -> Result<()> {
        if let ClockSource::External { input } = self.source {
            if input > 1 {
                return Err(Error::InvalidSetting(format!(
                    "PDTS source {input}, must be 0 (backplane) or 1 (front panel)"
                )));
            }
        }
        if self.timing_group > 15 {
            return Err(Error::InvalidSetting(format!(
                "PDTS timing group {}, must be 0 to 15",
                self.timing_group
            )));
        }
        Ok(())
    }
}

impl Wib {
    /// Runs a timing bring-up with the default SI5344 configuration.
    pub fn initialize_dts(&self, source: ClockSource, policy: AlignmentPolicy) -> Result<BringupState> {
        TimingBringup::new(self, source, policy).run()
    }

    pub fn pdts_state(&self) -> Result<PdtsState> {
        PdtsState::try_from(self.read("DTS.PDTS_STATE")? & 0xF)
    }

    pub fn pdts_in_running_state(&self) -> Result<()> {
        let state = self.read("DTS.PDTS_STATE")?;
        if state != PDTS_STATE_RUN {
            return Err(Error::TimingConfiguration(format!(
                "PDTS state {state:#x}, expected RUN(0x8)"
            )));
        }
        Ok(())
    }

    /// Resets the WIB, powers the FEMBs down and brings the timing up from scratch.
    pub fn reset_wib_and_cfg_dts(&self, config: &TimingConfig) -> Result<()> {
        self.check_timing_args(config)?;
        let saved = self.read(DND)?;
        self.reset_wib(false)?;
        self.hold_do_not_disturb(saved, |wib| {
            wib.sleep(STEP_SETTLE);
            wib.configure_timing(config)?;
            wib.disable_femb_daq()
        })
    }

    /// Like [`Wib::reset_wib_and_cfg_dts`] but leaves a board alone whose timing is already good.
    ///
    /// The DAQ links and FEMB DAQ paths are disabled in either case. Returns
    /// whether the reset was needed.
    pub fn checked_reset_wib_and_cfg_dts(&self, config: &TimingConfig) -> Result<bool> {
        self.check_timing_args(config)?;

        let mut needs_reset = match config.source {
            ClockSource::Local => {
                self.read("DTS.CONVERT_CONTROL.EN_FAKE")? != 1
                    || self.read("DTS.CONVERT_CONTROL.LOCAL_TIMESTAMP")? != 1
                    || self.read("FEMB_CNC.CNC_CLOCK_SELECT")? != 1
                    || self.read("DTS.SI5344.INPUT_SELECT")? != 1
                    || self.read("DTS.SI5344.ENABLE")? != 1
            }
            ClockSource::External { .. } => {
                self.read("DTS.PDTS_TGRP")? != config.timing_group as u32
                    || self.read("FEMB_CNC.CNC_CLOCK_SELECT")? != 1
                    || self.read("DTS.PDTS_ENABLE")? != 1
                    || self.read("DTS.CDS.LOL")? != 0
                    || self.read("DTS.CDS.LOS")? != 0
                    || self.read_with_retry("DTS.SI5344.INPUT_SELECT")? != 0
                    || self.read_with_retry("DTS.SI5344.LOS")? != 0
                    || self.read_with_retry("DTS.SI5344.LOL")? != 0
                    || self.read_with_retry("DTS.SI5344.ENABLE")? != 1
                    || self.read_with_retry("DTS.PDTS_STATE")? != PDTS_STATE_RUN
            }
        };
        if needs_reset {
            log::info!("timing not in a good state, resetting");
        } else {
            log::info!("timing already in a good state");
        }

        if self.daq_mode() == DaqMode::Felix {
            let si5342_bad = self.read("DAQ.SI5342.ENABLE")? == 0
                || self.read("DAQ.SI5342.INPUT_SELECT")? != 1
                || self.read("DAQ.SI5342.LOL")? == 1
                || self.read("DAQ.SI5342.LOS_XAXB")? == 1
                || self.read("DAQ.SI5342.LOS_2")? == 1;
            if si5342_bad {
                log::info!("SI5342 not in a good state, resetting");
                needs_reset = true;
            }
        }

        if needs_reset {
            let saved = self.read(DND)?;
            self.reset_wib(false)?;
            self.hold_do_not_disturb(saved, |wib| wib.configure_timing(config))?;
        }

        log::debug!("resetting DAQ links");
        for link in 1..=self.daq_mode().link_count() {
            self.enable_daq_link(link, false)?;
        }
        self.disable_femb_daq()?;
        Ok(needs_reset)
    }

    fn check_timing_args(&self, config: &TimingConfig) -> Result<()> {
        if self.daq_mode() == DaqMode::Unknown {
            log::error!("WIB firmware DAQ mode unknown");
            return Err(Error::DaqModeUnknown);
        }
        config.validate()
    }

    /// Powers the FEMBs down, halts the convert stream and brings the clock up.
    fn configure_timing(&self, config: &TimingConfig) -> Result<()> {
        for femb in 1..=FEMB_COUNT {
            self.femb_power(femb, false)?;
        }
        self.write("DTS.CONVERT_CONTROL.HALT", 1)?;
        self.write("DTS.CONVERT_CONTROL.ENABLE", 0)?;
        self.write("DTS.CONVERT_CONTROL.START_SYNC", 0)?;
        self.sleep(STEP_SETTLE);

        let mut bringup = TimingBringup::new(self, config.source, config.policy)
            .with_si5344_config(&config.si5344_config);
        match config.source {
            ClockSource::Local => {
                log::info!("configuring the local clock");
                bringup.run()?;
                self.sleep(STEP_SETTLE);
                self.write("DTS.CONVERT_CONTROL.EN_FAKE", 1)?;
                self.write("DTS.CONVERT_CONTROL.LOCAL_TIMESTAMP", 1)?;
                self.write("FEMB_CNC.CNC_CLOCK_SELECT", 1)?;
                self.sleep(STEP_SETTLE);
            }
            ClockSource::External { .. } => {
                log::info!("configuring DTS with timing group {:#x}", config.timing_group);
                self.write("DTS.PDTS_TGRP", config.timing_group as u32)?;
                bringup.run()?;
                self.sleep(STEP_SETTLE);
                self.write("FEMB_CNC.CNC_CLOCK_SELECT", 1)?;
                self.sleep(STEP_SETTLE);
                self.write("DTS.PDTS_ENABLE", 1)?;
                self.sleep(STEP_SETTLE);
            }
        }
        Ok(())
    }

    fn disable_femb_daq(&self) -> Result<()> {
        for femb in 1..=FEMB_COUNT {
            self.write(&format!("FEMB{femb}.DAQ.ENABLE"), 0)?;
        }
        Ok(())
    }
}
