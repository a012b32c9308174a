//! Command surface used by a run control framework.
//!
//! A [`WibConfigurator`] walks through `configure`, `apply_settings`,
//! `start`, `stop` and `teardown`. Errors carry the command name as context,
//! the typed [`Error`] stays reachable with `downcast_ref`.

use crate::board::wib::{
    AlignmentPolicy, ClockSource, DND, FakeData, FembSettings, FembStatus, FembTolerance,
    TimingConfig, Wib,
};
use anyhow::{Context, Result, anyhow, bail};
use std::time::Duration;
use wib_globals::wib1::DaqMode;
use wib_globals::{Error, FEMB_COUNT};

const RUN_TRIES: u32 = 5;

/// Where to find the board and its register maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WibConf {
    /// Host name, IPv4 address or `crate.slot`
    pub host: String,
    pub wib_table: String,
    pub femb_table: String,
}

/// Per FEMB part of [`WibSettings`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FembConf {
    pub enabled: bool,
    /// WIB replaces the data of this FEMB
    pub enable_wib_fake_data: bool,
    /// FEMB sends a synthetic pattern, see [`FakeData::from_selector`]
    pub enable_femb_fake_data: bool,
    pub fake_data_select: String,
    pub fake_word: u16,
    pub fake_waveform: Vec<u32>,
    pub settings: FembSettings,
}

impl FembConf {
    /// The pattern this FEMB sends when `enable_femb_fake_data` is set.
    fn fake_data(&self, femb: u8) -> wib_globals::Result<FakeData> {
        FakeData::from_selector(&self.fake_data_select, self.fake_word, &self.fake_waveform, femb)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WibSettings {
    /// PDTS timing group
    pub partition_number: u32,
    /// Time given to monitoring to notice do-not-disturb
    pub dnd_wait_time: Duration,
    pub tolerance: FembTolerance,
    /// `RCE`, `FELIX` or `ANY`, upper or lower case
    pub expected_daq_mode: String,
    pub expected_wib_fw_version: u32,
    pub force_full_reset: bool,
    pub local_clock: bool,
    /// 0 backplane, 1 front panel
    pub dts_source: u8,
    pub alignment: AlignmentPolicy,
    pub si5344_config: String,
    pub use_wib_fake_data_counter: bool,
    pub start_felix_links_at_run_start: bool,
    pub stop_felix_links_at_run_stop: bool,
    pub fembs: [FembConf; 4],
}

impl Default for WibSettings {
    fn default() -> Self {
        Self {
            partition_number: 0,
            dnd_wait_time: Duration::from_secs(10),
            tolerance: FembTolerance::default(),
            expected_daq_mode: "ANY".to_string(),
            expected_wib_fw_version: 0,
            force_full_reset: false,
            local_clock: false,
            dts_source: 0,
            alignment: AlignmentPolicy::default(),
            si5344_config: String::new(),
            use_wib_fake_data_counter: false,
            start_felix_links_at_run_start: false,
            stop_felix_links_at_run_stop: false,
            fembs: Default::default(),
        }
    }
}

impl WibSettings {
    fn timing_config(&self) -> Result<TimingConfig> {
        if self.partition_number > 15 {
            bail!(Error::InvalidSetting(format!(
                "partition number {} larger than 15",
                self.partition_number
            )));
        }
        let source = if self.local_clock {
            ClockSource::Local
        } else {
            ClockSource::External {
                input: self.dts_source,
            }
        };
        let config = TimingConfig {
            source,
            timing_group: self.partition_number as u8,
            policy: self.alignment,
            si5344_config: self.si5344_config.clone(),
        };
        config.validate()?;
        Ok(config)
    }

    fn wib_fake_data(&self) -> [bool; 4] {
        std::array::from_fn(|i| self.fembs[i].enable_wib_fake_data)
    }

    /// Checks every enabled FEMB and the WIB fake data choice for `mode`.
    fn validate_fembs(&self, mode: DaqMode) -> wib_globals::Result<()> {
        for (femb, conf) in (1..=FEMB_COUNT).zip(self.fembs.iter()) {
            if !conf.enabled {
                continue;
            }
            if conf.enable_femb_fake_data {
                conf.fake_data(femb)?;
            } else {
                conf.settings.validate(femb)?;
            }
        }
        FakeData::check_links(mode, self.wib_fake_data())
    }
}

fn daq_mode_accepted(mode: DaqMode, expected: &str) -> bool {
    match mode {
        DaqMode::Rce => matches!(expected, "RCE" | "rce" | "ANY" | "any"),
        DaqMode::Felix => matches!(expected, "FELIX" | "felix" | "ANY" | "any"),
        DaqMode::Unknown => false,
    }
}

#[derive(Debug, Default)]
pub struct WibConfigurator {
    wib: Option<Wib>,
    start_links_at_run_start: bool,
    stop_links_at_run_stop: bool,
}

impl WibConfigurator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the board described by `conf`.
    pub fn configure(&mut self, conf: &WibConf) -> Result<()> {
        log::debug!("opening WIB {}", conf.host);
        let wib = Wib::connect(&conf.host, &conf.wib_table, &conf.femb_table)
            .with_context(|| format!("conf: cannot open WIB {}", conf.host))?;
        self.attach(wib);
        Ok(())
    }

    /// Takes over an already opened board.
    pub fn attach(&mut self, wib: Wib) {
        self.wib = Some(wib);
    }

    pub fn wib(&self) -> Option<&Wib> {
        self.wib.as_ref()
    }

    fn device(&mut self, command: &str) -> Result<&mut Wib> {
        self.wib
            .as_mut()
            .ok_or_else(|| anyhow!("{command}: no WIB, run conf first"))
    }

    /// Resets the board, sets up timing and configures every enabled FEMB.
    pub fn apply_settings(&mut self, settings: &WibSettings) -> Result<()> {
        let timing = settings.timing_config().context("settings")?;
        self.start_links_at_run_start = settings.start_felix_links_at_run_start;
        self.stop_links_at_run_stop = settings.stop_felix_links_at_run_stop;

        let wib = self.device("settings")?;
        settings
            .validate_fembs(wib.daq_mode())
            .context("settings")?;
        wib.write(DND, 1).context("settings: setting do-not-disturb")?;
        wib.sleep(settings.dnd_wait_time);
        wib.set_tolerance(settings.tolerance);
        let wib: &Wib = wib;

        let mode = wib.daq_mode();
        if mode == DaqMode::Unknown {
            return Err(Error::DaqModeUnknown).context("settings");
        }
        if !daq_mode_accepted(mode, &settings.expected_daq_mode) {
            bail!(
                "settings: WIB firmware built for {mode:?} DAQ, expected {}",
                settings.expected_daq_mode
            );
        }

        check_wib_firmware(wib, settings.expected_wib_fw_version).context("settings")?;

        if settings.force_full_reset {
            log::debug!("running full reset on the WIB");
            wib.reset_wib_and_cfg_dts(&timing)
                .context("settings: full reset")?;
        } else {
            log::debug!("running checked reset on the WIB");
            wib.checked_reset_wib_and_cfg_dts(&timing)
                .context("settings: checked reset")?;
        }
        wib.sleep(Duration::from_secs(1));

        if wib.read("FEMB_REPLACE_FEMB_3_N_5_WITH_1_N_2")? != 0 {
            bail!(Error::InvalidSetting(
                "FEMB duplication mode is enabled".into()
            ));
        }

        let fake = settings.wib_fake_data();
        log::debug!("WIB fake data per FEMB: {fake:?}");
        wib.config_wib_fake_data(fake, settings.use_wib_fake_data_counter)
            .context("settings: WIB fake data")?;

        for (femb, conf) in (1..=FEMB_COUNT).zip(settings.fembs.iter()) {
            if !conf.enabled {
                log::debug!("FEMB {femb} not enabled");
                continue;
            }
            let status = configure_femb(wib, femb, conf)
                .with_context(|| format!("settings: FEMB {femb}"))?;
            log::info!("FEMB {femb}: {status:?}");
        }

        if !(mode == DaqMode::Felix && settings.start_felix_links_at_run_start) {
            log::debug!("enabling DAQ links");
            wib.start_stream_to_daq()
                .context("settings: starting the DAQ stream")?;
        }

        wib.write(DND, 0).context("settings: clearing do-not-disturb")?;
        log::info!("WIB configured");
        Ok(())
    }

    /// Enables the FELIX links when they are meant to come up with the run.
    pub fn start(&mut self) -> Result<()> {
        let enabled = self.start_links_at_run_start;
        let wib = self.device("start")?;
        if wib.daq_mode() != DaqMode::Felix || !enabled {
            return Ok(());
        }
        log::debug!("enabling DAQ links");
        retry_run_command(wib, "start", |wib| wib.start_stream_to_daq())
    }

    /// Disables the FELIX links when they are meant to go down with the run.
    pub fn stop(&mut self) -> Result<()> {
        let enabled = self.stop_links_at_run_stop;
        let wib = self.device("stop")?;
        if wib.daq_mode() != DaqMode::Felix || !enabled {
            return Ok(());
        }
        log::debug!("disabling DAQ links");
        retry_run_command(wib, "stop", |wib| wib.stop_daq_links())
    }

    /// Drops the board.
    pub fn teardown(&mut self) {
        self.wib = None;
        log::debug!("WIB released");
    }
}

fn check_wib_firmware(wib: &Wib, expected: u32) -> wib_globals::Result<()> {
    let found = wib.read("SYSTEM.FW_VERSION")?;
    log::debug!(
        "WIB firmware {found:#010x} synthesized {:02x}{:02x}-{:02x}-{:02x} {:02x}:{:02x}:{:02x}",
        wib.read("SYSTEM.SYNTH_DATE.CENTURY")?,
        wib.read("SYSTEM.SYNTH_DATE.YEAR")?,
        wib.read("SYSTEM.SYNTH_DATE.MONTH")?,
        wib.read("SYSTEM.SYNTH_DATE.DAY")?,
        wib.read("SYSTEM.SYNTH_TIME.HOUR")?,
        wib.read("SYSTEM.SYNTH_TIME.MINUTE")?,
        wib.read("SYSTEM.SYNTH_TIME.SECOND")?,
    );
    if found != expected {
        return Err(Error::FirmwareVersionMismatch {
            target: "WIB".into(),
            found,
            expected,
        });
    }
    Ok(())
}

fn configure_femb(wib: &Wib, femb: u8, conf: &FembConf) -> wib_globals::Result<FembStatus> {
    if conf.enable_femb_fake_data {
        let fake = conf.fake_data(femb)?;
        wib.configure_daughterboard_fake_data(femb, conf.settings.expected_firmware, &fake)
    } else {
        wib.configure_daughterboard(femb, &conf.settings)
    }
}

/// Runs `command` with do-not-disturb set, retrying on communication errors.
///
/// Other errors end the loop at once. Do-not-disturb is cleared on the way out
/// whatever happened, failures of that write are ignored.
fn retry_run_command(
    wib: &Wib,
    name: &str,
    command: impl Fn(&Wib) -> wib_globals::Result<()>,
) -> Result<()> {
    let mut done = false;
    for attempt in 1..=RUN_TRIES {
        let result = wib.write(DND, 1).and_then(|_| command(wib));
        match result {
            Ok(()) => {
                done = true;
                break;
            }
            Err(e) if e.is_communication() => {
                log::warn!("{name} try {attempt} failed: {e}");
            }
            Err(e) => {
                let _ = wib.write(DND, 0);
                return Err(e).context(name.to_string());
            }
        }
    }
    let _ = wib.write(DND, 0);
    if !done {
        bail!("{name}: failed after {RUN_TRIES} tries");
    }
    Ok(())
}
