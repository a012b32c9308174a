use crate::board::wib::{Wib, check_femb};
use crate::hardware::asic::{ASIC_REGISTER_COUNT, AsicConfig};
use std::time::Duration;
use wib_globals::{Error, Result};

/// First FEMB register of the ASIC configuration block.
pub const ASIC_SPI_WRITE_BASE: u16 = 0x200;
/// First FEMB register holding what the ASICs shifted back.
pub const ASIC_SPI_READ_BASE: u16 = 0x250;
const SPI_PASSES: usize = 2;
const SPI_READBACKS: usize = 2;
const STREAM_AND_ADC_DATA_ON: u32 = 9;
const ADC_LATCH_LOCATIONS: u32 = 0x0404_0404;

const POWER_SETTLE: Duration = Duration::from_secs(5);
const RESET_SETTLE: Duration = Duration::from_secs(1);
const ASIC_RESET_SETTLE: Duration = Duration::from_millis(5);
const SPI_WORD_SETTLE: Duration = Duration::from_millis(10);
const SPI_SETTLE: Duration = Duration::from_millis(100);

const TEST_PULSE_DELAY: u32 = 219;
const TEST_PULSE_PERIOD: u32 = 497;

/// Requested configuration of one FEMB.
///
/// Fields are kept as plain integers the way they arrive from a configuration
/// file. [`FembSettings::validate`] checks their ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FembSettings {
    /// 0..=3 for 4.7, 7.8, 14 and 25 mV/fC
    pub gain: u32,
    /// 0..=3 for 0.5, 1, 2 and 3 us
    pub shape: u32,
    /// 0 for 200 mV, 1 for 900 mV, 2 for 900 mV on induction and 200 mV on collection
    pub baseline: u32,
    pub leak_high: u32,
    pub leak_10x: u32,
    pub ac_couple: u32,
    pub buffer: u32,
    pub ext_clk: u32,
    /// 0 off, 1 FE ASIC pulser, 2 FPGA pulser
    pub pulse_mode: u32,
    /// 6 bits for the FE ASIC pulser, 5 bits for the FPGA pulser
    pub pulse_dac: u32,
    pub start_frame_mode: u32,
    pub start_frame_swap: u32,
    /// Candidate ADC clock phases, tried in order
    pub clock_phases: Vec<u16>,
    /// Expected content of the FEMB `VERSION_ID` register
    pub expected_firmware: u32,
}

impl Default for FembSettings {
    fn default() -> Self {
        Self {
            gain: 0,
            shape: 0,
            baseline: 0,
            leak_high: 0,
            leak_10x: 0,
            ac_couple: 0,
            buffer: 0,
            ext_clk: 0,
            pulse_mode: 0,
            pulse_dac: 0,
            start_frame_mode: 0,
            start_frame_swap: 0,
            clock_phases: vec![0xFFFF],
            expected_firmware: 0,
        }
    }
}

impl FembSettings {
    /// Fails with `InvalidSetting` on the first value out of range.
    pub fn validate(&self, femb: u8) -> Result<()> {
        let limits = [
            ("gain", self.gain, 3),
            ("shape", self.shape, 3),
            ("baseline", self.baseline, 2),
            ("leak_high", self.leak_high, 1),
            ("leak_10x", self.leak_10x, 1),
            ("ac_couple", self.ac_couple, 1),
            ("buffer", self.buffer, 1),
            ("ext_clk", self.ext_clk, 1),
            ("pulse_mode", self.pulse_mode, 2),
            ("start_frame_mode", self.start_frame_mode, 1),
            ("start_frame_swap", self.start_frame_swap, 1),
        ];
        for (name, value, max) in limits {
            if value > max {
                return Err(Error::InvalidSetting(format!(
                    "FEMB {femb}: {name} is {value}, must be at most {max}"
                )));
            }
        }
        let dac_max = match self.pulse_mode {
            1 => 63,
            2 => 31,
            _ => u32::MAX,
        };
        if self.pulse_dac > dac_max {
            return Err(Error::InvalidSetting(format!(
                "FEMB {femb}: pulse_dac is {}, must be at most {dac_max} in pulse mode {}",
                self.pulse_dac, self.pulse_mode
            )));
        }
        if self.clock_phases.is_empty() {
            return Err(Error::InvalidSetting(format!(
                "FEMB {femb}: at least one clock phase needed"
            )));
        }
        Ok(())
    }

    /// Front-end settings in the form the ASIC bit maps take them.
    pub fn asic_config(&self) -> AsicConfig {
        AsicConfig {
            gain: self.gain as u8,
            shape: self.shape as u8,
            baseline: self.baseline as u8,
            leak_high: self.leak_high != 0,
            leak_10x: self.leak_10x != 0,
            ac_couple: self.ac_couple != 0,
            buffer: self.buffer != 0,
            ext_clk: self.ext_clk != 0,
            pulse_mode: self.pulse_mode as u8,
            pulse_dac: if self.pulse_mode == 1 {
                self.pulse_dac as u8
            } else {
                0
            },
        }
    }
}

/// Which FEMB faults are logged and tolerated instead of failing the configuration.
///
/// Everything is fatal by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FembTolerance {
    /// Unreadable FEMB: power it down and carry on
    pub continue_on_reg_read_error: bool,
    /// ASIC readback mismatch after the last programming pass
    pub continue_on_spi_error: bool,
    /// Phase hunt failed as well
    pub continue_on_sync_error: bool,
    /// No candidate phase synced: hunt instead of failing
    pub continue_if_phases_dont_sync: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FembStatus {
    /// `phase` is the phase left in the FEMB, `synced` tells whether its ADCs are aligned.
    Configured { phase: u16, synced: bool },
    /// Set up to send a synthetic pattern.
    FakeData,
    /// Registers could not be read, the FEMB was left alone.
    Unreachable,
}

impl Wib {
    /// Powers FEMB `femb` up, checks it and configures ASICs and clock phases.
    ///
    /// All settings are validated before the first register access.
    pub fn configure_daughterboard(&self, femb: u8, settings: &FembSettings) -> Result<FembStatus> {
        check_femb(femb)?;
        settings.validate(femb)?;

        self.with_do_not_disturb(|wib| {
            wib.femb_power(femb, true)?;
            wib.sleep(POWER_SETTLE);
            if !wib.femb_reachable(femb)? {
                wib.femb_power(femb, false)?;
                if wib.tolerance().continue_on_reg_read_error {
                    log::warn!("cannot read registers from FEMB {femb}, powered down");
                    return Ok(FembStatus::Unreachable);
                }
                log::error!("cannot read registers from FEMB {femb}");
                return Err(Error::FembUnreachable(femb));
            }
            wib.check_femb_firmware(femb, settings.expected_firmware)?;
            wib.config_powered_femb(femb, settings)
        })
    }

    /// A FEMB whose `VERSION_ID` reads the same as `SYS_RESET` is not answering.
    pub fn femb_reachable(&self, femb: u8) -> Result<bool> {
        Ok(self.read_femb(femb, "VERSION_ID")? != self.read_femb(femb, "SYS_RESET")?)
    }

    pub fn check_femb_firmware(&self, femb: u8, expected: u32) -> Result<()> {
        let found = self.read_femb(femb, "VERSION_ID")?;
        if found != expected {
            log::error!("FEMB {femb} firmware {found:#x}, expected {expected:#x}");
            return Err(Error::FirmwareVersionMismatch {
                target: format!("FEMB{femb}"),
                found,
                expected,
            });
        }
        Ok(())
    }

    /// Configures an already powered FEMB.
    pub fn config_femb(&self, femb: u8, settings: &FembSettings) -> Result<FembStatus> {
        check_femb(femb)?;
        settings.validate(femb)?;
        self.with_do_not_disturb(|wib| {
            if !wib.femb_reachable(femb)? {
                if wib.tolerance().continue_on_reg_read_error {
                    log::warn!("cannot read registers from FEMB {femb}");
                    return Ok(FembStatus::Unreachable);
                }
                return Err(Error::FembUnreachable(femb));
            }
            wib.config_powered_femb(femb, settings)
        })
    }

    /// Body of [`Wib::config_femb`], run inside the caller's do-not-disturb scope.
    fn config_powered_femb(&self, femb: u8, settings: &FembSettings) -> Result<FembStatus> {
        log::info!("configuring FEMB {femb}: {settings:?}");

        self.write_femb(femb, "REG_RESET", 1)?;
        self.sleep(RESET_SETTLE);
        self.write_femb(femb, "START_FRAME_MODE_SELECT", settings.start_frame_mode)?;
        self.sleep(RESET_SETTLE);
        self.write_femb(femb, "START_FRAME_SWAP", settings.start_frame_swap)?;

        if settings.ext_clk != 0 {
            self.setup_femb_ext_clock(femb)?;
        }
        self.sleep(Duration::from_millis(50));

        self.write_femb(femb, "TIME_STAMP_RESET", 1)?;
        self.write_femb(femb, "TIME_STAMP_RESET", 1)?;

        for reset in ["ADC_ASIC_RESET", "ADC_ASIC_RESET", "FE_ASIC_RESET", "FE_ASIC_RESET"] {
            self.sleep(ASIC_RESET_SETTLE);
            self.write_femb(femb, reset, 1)?;
        }
        self.sleep(ASIC_RESET_SETTLE);

        self.write_femb(femb, "ADC_LATCH_LOC_0TO3", ADC_LATCH_LOCATIONS)?;
        self.write_femb(femb, "ADC_LATCH_LOC_4TO7", ADC_LATCH_LOCATIONS)?;

        match settings.pulse_mode {
            1 => self.setup_internal_pulser(femb)?,
            2 => self.setup_fpga_pulser(femb, settings.pulse_dac)?,
            _ => {}
        }

        let sync = self.setup_femb_asics(femb, &settings.asic_config())?;
        log::debug!("FEMB {femb} ADC sync status after SPI {sync:#06x}");

        let status = self.align_femb_phases(femb, &settings.clock_phases)?;

        self.write_femb(femb, "TIME_STAMP_RESET", 1)?;
        self.write_femb(femb, "TIME_STAMP_RESET", 1)?;
        Ok(status)
    }

    fn align_femb_phases(&self, femb: u8, phases: &[u16]) -> Result<FembStatus> {
        let default_phase = [0xFFFF];
        let phases = if phases.is_empty() {
            &default_phase[..]
        } else {
            phases
        };

        if let Some(phase) = self.try_femb_phases(femb, phases)? {
            log::info!("FEMB {femb} ADCs synced with phase {phase:#06x}");
            return Ok(FembStatus::Configured {
                phase,
                synced: true,
            });
        }

        let tolerance = self.tolerance();
        if !tolerance.continue_if_phases_dont_sync {
            log::error!("FEMB {femb}: no clock phase in {phases:04x?} syncs the ADCs");
            return Err(Error::AdcSync {
                femb,
                detail: format!("none of the phases {phases:04x?} synced"),
            });
        }

        log::warn!("FEMB {femb}: listed phases did not sync, hunting from {:#06x}", phases[0]);
        let outcome = self.hunt_femb_phase(femb, phases[0])?;
        if outcome.synced {
            log::info!(
                "FEMB {femb} ADCs synced with phase {:#06x} after {} rounds",
                outcome.phase,
                outcome.rounds
            );
        } else if tolerance.continue_on_sync_error {
            log::error!(
                "FEMB {femb} ADC FIFOs not synced, continuing with phase {:#06x}",
                outcome.phase
            );
        } else {
            return Err(Error::AdcSync {
                femb,
                detail: format!("phase hunt gave up at {:#06x}", outcome.phase),
            });
        }
        Ok(FembStatus::Configured {
            phase: outcome.phase,
            synced: outcome.synced,
        })
    }

    /// Programs the FE and ADC ASICs over SPI and returns the ADC sync status.
    ///
    /// The configuration is shifted in twice. After the second pass the
    /// readback registers are compared with what was written, twice at most.
    pub fn setup_femb_asics(&self, femb: u8, config: &AsicConfig) -> Result<u16> {
        let regs = config.registers();
        debug_assert_eq!(ASIC_REGISTER_COUNT, regs.len());
        let mut sync = 0xFFFF;

        for pass in 0..SPI_PASSES {
            self.write_femb(femb, "STREAM_AND_ADC_DATA_EN", 0)?;
            self.sleep(SPI_SETTLE);

            log::debug!("FEMB {femb}: writing {} ASIC registers", regs.len());
            for (i, value) in regs.iter().enumerate() {
                self.write_femb(femb, ASIC_SPI_WRITE_BASE + i as u16, *value)?;
                self.sleep(SPI_WORD_SETTLE);
            }
            self.sleep(SPI_SETTLE);
            self.write_femb(femb, "WRITE_ASIC_SPI", 1)?;
            self.sleep(SPI_SETTLE);

            if pass == SPI_PASSES - 1 {
                self.verify_asic_readback(femb, &regs)?;
            }
            self.sleep(SPI_SETTLE);

            self.write_femb(femb, "STREAM_AND_ADC_DATA_EN", STREAM_AND_ADC_DATA_ON)?;
            self.sleep(Duration::from_millis(50));
            self.write_femb(femb, "STREAM_AND_ADC_DATA_EN", STREAM_AND_ADC_DATA_ON)?;
            self.sleep(SPI_SETTLE);

            sync = self.read_femb(femb, "ADC_ASIC_SYNC_STATUS")? as u16;
        }
        Ok(sync)
    }

    fn verify_asic_readback(&self, femb: u8, regs: &[u32]) -> Result<()> {
        let mut mismatch = false;
        for _ in 0..SPI_READBACKS {
            mismatch = false;
            for (i, expected) in regs.iter().enumerate() {
                let readback = self.read_femb(femb, ASIC_SPI_READ_BASE + i as u16)?;
                self.sleep(SPI_WORD_SETTLE);
                if readback != *expected {
                    mismatch = true;
                    let chip = i.saturating_sub(1) / 9;
                    log::warn!(
                        "FEMB {femb} ASIC {chip}: register {i} reads {readback:#010x}, wrote {expected:#010x}"
                    );
                }
            }
            if !mismatch {
                return Ok(());
            }
        }
        if mismatch && self.tolerance().continue_on_spi_error {
            log::warn!("FEMB {femb}: ASIC SPI readback mismatch, continuing");
            return Ok(());
        }
        log::error!("FEMB {femb}: ASIC SPI readback mismatch");
        Err(Error::SpiReadbackMismatch(femb))
    }

    /// Test pulses from the FE ASIC DAC, triggered by the FPGA.
    pub fn setup_internal_pulser(&self, femb: u8) -> Result<()> {
        self.write_femb(femb, "DAC_SELECT", 0)?;
        self.write_femb(femb, "TEST_PULSE_AMPLITUDE", 0)?;
        self.write_femb(femb, "TEST_PULSE_DELAY", TEST_PULSE_DELAY)?;
        self.write_femb(femb, "TEST_PULSE_PERIOD", TEST_PULSE_PERIOD)?;
        self.write_femb(femb, "INT_TP_EN", 0)?;
        self.write_femb(femb, "EXT_TP_EN", 1)?;
        self.write_femb(femb, "FPGA_TP_EN", 0)?;
        self.write_femb(femb, "ASIC_TP_EN", 1)
    }

    /// Test pulses from the FPGA DAC with amplitude `dac`.
    pub fn setup_fpga_pulser(&self, femb: u8, dac: u32) -> Result<()> {
        self.write_femb(femb, "ASIC_TP_EN", 0)?;
        self.write_femb(femb, "FPGA_TP_EN", 1)?;
        self.write_femb(femb, "DAC_SELECT", 1)?;
        self.write_femb(femb, "TEST_PULSE_AMPLITUDE", dac)?;
        self.write_femb(femb, "TEST_PULSE_DELAY", TEST_PULSE_DELAY)?;
        self.write_femb(femb, "TEST_PULSE_PERIOD", TEST_PULSE_PERIOD)?;
        self.write_femb(femb, "INT_TP_EN", 0)?;
        self.write_femb(femb, "EXT_TP_EN", 1)
    }

    /// Timing of the reset, read and idle strobes when the FPGA clocks the ADCs.
    pub fn setup_femb_ext_clock(&self, femb: u8) -> Result<()> {
        for (i, value) in ext_clock_timing().iter().enumerate() {
            self.write_femb(femb, EXT_CLOCK_TIMING_BASE + i as u16, *value)?;
        }
        for words in ext_clock_phase_steps() {
            for (i, value) in words.iter().enumerate() {
                self.write_femb(femb, EXT_CLOCK_STEP_BASE + i as u16, *value)?;
            }
        }
        self.sleep(Duration::from_millis(50));
        Ok(())
    }
}

const EXT_CLOCK_TIMING_BASE: u16 = 21;
const EXT_CLOCK_STEP_BASE: u16 = 35;

/// Offset, width and inversion of the strobes for one group of four ADCs.
struct StrobeTiming {
    rst: (u32, u32, u32),
    read: (u32, u32, u32),
    idxm: (u32, u32, u32),
    idxl: (u32, u32, u32),
    idl0: (u32, u32),
    idl1: (u32, u32),
    idl_inv: u32,
}

impl StrobeTiming {
    fn inversion(&self) -> u32 {
        self.rst.2 | (self.read.2 << 1) | (self.idxm.2 << 2) | (self.idxl.2 << 3) | (self.idl_inv << 4)
    }

    fn words(&self) -> [u32; 12] {
        [
            self.rst.0, self.rst.1, self.read.0, self.read.1, self.idxm.0, self.idxm.1,
            self.idxl.0, self.idxl.1, self.idl0.0, self.idl0.1, self.idl1.0, self.idl1.1,
        ]
    }
}

/// Phase steps (step, up/down) of the read, idxm, idxl, idl0 and idl1 strobes.
struct StrobeSteps {
    steps: [(u32, u32); 5],
    phase_en: u32,
}

impl StrobeSteps {
    fn up_down(&self) -> u32 {
        let ud = self
            .steps
            .iter()
            .enumerate()
            .fold(0, |acc, (i, (_, ud))| acc | (ud << i));
        ud | (self.phase_en << 15)
    }

    fn words(&self) -> [u32; 3] {
        let s = |i: usize| self.steps[i].0;
        [
            s(0) + (s(1) << 16),
            s(2) + (s(3) << 16),
            s(4) + (self.up_down() << 16),
        ]
    }
}

const ADC_1_TO_4: StrobeTiming = StrobeTiming {
    rst: (0, 9, 1),
    read: (96, 4, 1),
    idxm: (46, 54, 0),
    idxl: (96, 4, 0),
    idl0: (10, 37),
    idl1: (96, 4),
    idl_inv: 0,
};
const ADC_5_TO_8: StrobeTiming = ADC_1_TO_4;

/// Words for FEMB registers 21 to 33. The high half drives ADCs 1-4, the low half ADCs 5-8.
fn ext_clock_timing() -> Vec<u32> {
    let clk_dis = 0;
    let inversion = ADC_5_TO_8.inversion() + (ADC_1_TO_4.inversion() << 5);
    let mut words = vec![clk_dis + (inversion << 16)];
    let high = ADC_1_TO_4.words();
    let low = ADC_5_TO_8.words();
    words.extend(low.iter().zip(high.iter()).map(|(l, h)| l + (h << 16)));
    words
}

/// Four rounds of words for FEMB registers 35 to 40, toggling the phase enable each round.
fn ext_clock_phase_steps() -> Vec<[u32; 6]> {
    let mut d14 = StrobeSteps {
        steps: [(11, 0), (9, 0), (7, 0), (12, 0), (10, 0)],
        phase_en: 1,
    };
    let mut d58 = StrobeSteps {
        steps: [(0, 0), (5, 0), (4, 1), (3, 0), (4, 0)],
        phase_en: 1,
    };
    let mut rounds = Vec::with_capacity(4);
    for _ in 0..4 {
        d14.phase_en ^= 1;
        d58.phase_en ^= 1;
        let [a, b, c] = d14.words();
        let [d, e, f] = d58.words();
        rounds.push([a, b, c, d, e, f]);
    }
    rounds
}
