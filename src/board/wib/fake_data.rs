use crate::board::wib::{FembStatus, Wib, check_femb};
use std::time::Duration;
use wib_globals::wib1::DaqMode;
use wib_globals::{Error, FEMB_COUNT, Result};

/// Base of the 256 word fake waveform in FEMB register space.
pub const FAKE_WAVEFORM_BASE: u16 = 0x300;
pub const FAKE_WAVEFORM_SAMPLES: usize = 256;
/// CD streams per FEMB.
const FEMB_STREAM_COUNT: u8 = 4;
/// COLDATA chips per FEMB.
const FEMB_CD_COUNT: u8 = 2;

/// Synthetic pattern a FEMB sends instead of ADC samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeData {
    /// The same 12 bit word on every channel
    Word(u16),
    /// A 256 sample waveform played on every channel
    Waveform(Vec<u32>),
    /// FEMB number, chip and channel id in every sample
    FembChannelId(u8),
    /// Counter, chip and channel id in every sample
    CounterChannelId,
}

impl FakeData {
    /// Value of the FEMB `FEMB_TST_SEL` register.
    pub fn mode(&self) -> u32 {
        match self {
            FakeData::Word(_) => 1,
            FakeData::Waveform(_) => 2,
            FakeData::FembChannelId(_) => 3,
            FakeData::CounterChannelId => 4,
        }
    }

    /// Builds the pattern named by a configuration selector.
    ///
    /// Selectors are `fake_word`, `fake_waveform`, `femb_channel_id` and `counter_channel_id`.
    pub fn from_selector(selector: &str, word: u16, waveform: &[u32], femb_number: u8) -> Result<Self> {
        let fake = match selector {
            "fake_word" => FakeData::Word(word),
            "fake_waveform" => FakeData::Waveform(waveform.to_vec()),
            "femb_channel_id" => FakeData::FembChannelId(femb_number),
            "counter_channel_id" => FakeData::CounterChannelId,
            _ => {
                return Err(Error::InvalidSetting(format!(
                    "fake data selector \"{selector}\", expected fake_word, fake_waveform, \
                     femb_channel_id or counter_channel_id"
                )));
            }
        };
        fake.validate()?;
        Ok(fake)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            FakeData::Word(word) if *word > 0xFFF => Err(Error::InvalidSetting(format!(
                "fake word {word:#x} does not fit 12 bits"
            ))),
            FakeData::Waveform(samples) if samples.len() != FAKE_WAVEFORM_SAMPLES => {
                Err(Error::InvalidSetting(format!(
                    "fake waveform has {} samples, need {FAKE_WAVEFORM_SAMPLES}",
                    samples.len()
                )))
            }
            FakeData::FembChannelId(number) if *number > 0xF => Err(Error::InvalidSetting(
                format!("FEMB number {number} does not fit 4 bits"),
            )),
            _ => Ok(()),
        }
    }

    /// WIB side fake data per FEMB slot. FELIX links carry two FEMBs each, both
    /// have to be fake or both real.
    pub fn check_links(mode: DaqMode, enabled: [bool; 4]) -> Result<()> {
        if mode == DaqMode::Felix && (enabled[0] != enabled[1] || enabled[2] != enabled[3]) {
            log::error!("fake data on half of a FELIX link: {enabled:?}");
            return Err(Error::InvalidSetting(
                "fake data must cover both FEMBs of a FELIX link".into(),
            ));
        }
        Ok(())
    }
}

impl Wib {
    /// Makes FEMB `femb` send `fake` instead of ADC data.
    pub fn config_femb_fake_data(
        &self,
        femb: u8,
        fake: &FakeData,
        start_frame_mode: u32,
        start_frame_swap: u32,
    ) -> Result<()> {
        check_femb(femb)?;
        if start_frame_mode > 1 || start_frame_swap > 1 {
            return Err(Error::InvalidSetting(
                "start_frame_mode and start_frame_swap must be 0 or 1".into(),
            ));
        }
        fake.validate()?;
        self.with_do_not_disturb(|wib| {
            wib.write_fake_data(femb, fake, start_frame_mode, start_frame_swap)
        })
    }

    fn write_fake_data(
        &self,
        femb: u8,
        fake: &FakeData,
        start_frame_mode: u32,
        start_frame_swap: u32,
    ) -> Result<()> {
        self.write_femb(femb, "REG_RESET", 1)?;
        self.sleep(Duration::from_secs(1));
        self.write_femb(femb, "STREAM_AND_ADC_DATA_EN", 0)?;
        self.sleep(Duration::from_secs(1));
        self.write_femb(femb, "START_FRAME_MODE_SELECT", start_frame_mode)?;
        self.sleep(Duration::from_secs(1));
        self.write_femb(femb, "START_FRAME_SWAP", start_frame_swap)?;
        self.sleep(Duration::from_millis(50));

        self.write_femb(femb, "TIME_STAMP_RESET", 1)?;
        self.write_femb(femb, "TIME_STAMP_RESET", 1)?;

        match fake {
            FakeData::Word(word) => self.write_femb(femb, "DATA_TEST_PATTERN", *word as u32)?,
            FakeData::Waveform(samples) => {
                for (i, sample) in samples.iter().enumerate() {
                    self.write_femb(femb, FAKE_WAVEFORM_BASE + i as u16, *sample)?;
                    self.sleep(Duration::from_millis(5));
                }
            }
            FakeData::FembChannelId(number) => {
                self.write_femb(femb, "FEMB_NUMBER", *number as u32)?
            }
            FakeData::CounterChannelId => {}
        }
        self.write_femb(femb, "FEMB_TST_SEL", fake.mode())?;

        self.write_femb(femb, "TIME_STAMP_RESET", 1)?;
        self.write_femb(femb, "TIME_STAMP_RESET", 1)?;
        self.write_femb(femb, "STREAM_AND_ADC_DATA_EN", 9)?;
        log::info!("FEMB {femb} sends fake data mode {}", fake.mode());
        Ok(())
    }

    /// Powers FEMB `femb`, checks it and sets it up to send `fake`.
    pub fn configure_daughterboard_fake_data(
        &self,
        femb: u8,
        expected_firmware: u32,
        fake: &FakeData,
    ) -> Result<FembStatus> {
        check_femb(femb)?;
        fake.validate()?;

        self.with_do_not_disturb(|wib| {
            wib.femb_power(femb, true)?;
            wib.sleep(Duration::from_secs(5));
            if !wib.femb_reachable(femb)? {
                wib.femb_power(femb, false)?;
                if wib.tolerance().continue_on_reg_read_error {
                    log::warn!("cannot read registers from FEMB {femb}, powered down");
                    return Ok(FembStatus::Unreachable);
                }
                return Err(Error::FembUnreachable(femb));
            }
            wib.check_femb_firmware(femb, expected_firmware)?;
            wib.write_fake_data(femb, fake, 0, 0)?;
            Ok(FembStatus::FakeData)
        })
    }

    /// Selects fake or real data per FEMB on the WIB side.
    ///
    /// `counter` replaces the COLDATA frames with a counter. On FELIX firmware
    /// both FEMBs sharing a link have to agree.
    pub fn config_wib_fake_data(&self, enabled: [bool; 4], counter: bool) -> Result<()> {
        FakeData::check_links(self.daq_mode(), enabled)?;

        for femb in 1..=FEMB_COUNT {
            for cd in 1..=FEMB_CD_COUNT {
                self.set_femb_fake_coldata_mode(femb, cd, counter)?;
            }
        }
        for stream in 1..=FEMB_STREAM_COUNT {
            for femb in 1..=FEMB_COUNT {
                self.set_femb_stream_source(femb, stream, !enabled[femb as usize - 1])?;
            }
        }
        for femb in 1..=FEMB_COUNT {
            let word = if enabled[femb as usize - 1] { 0xF } else { 0x0 };
            self.source_femb(femb, word)?;
        }
        Ok(())
    }

    pub fn set_femb_fake_coldata_mode(&self, femb: u8, cd: u8, counter: bool) -> Result<()> {
        if cd == 0 || cd > FEMB_CD_COUNT {
            return Err(Error::IndexOutOfRange(format!("COLDATA {cd}")));
        }
        let name = format!("FEMB{}.DAQ.FAKE_CD.CD{cd}.FAKE_MODE", self.femb_digit(femb)?);
        self.write(&name, counter as u32)
    }

    /// Stream `stream` (1 to 4) of FEMB `femb` carries real data if `real`, fake data otherwise.
    pub fn set_femb_stream_source(&self, femb: u8, stream: u8, real: bool) -> Result<()> {
        let bit = stream_bit(stream)?;
        let name = format!("FEMB{}.DAQ.FAKE_CD.RX_DATA_SOURCE", self.femb_digit(femb)?);
        let current = self.read(&name)?;
        let updated = if real { current & !bit } else { current | bit };
        self.write(&name, updated)
    }

    /// Whether stream `stream` of FEMB `femb` carries real data.
    pub fn femb_stream_source(&self, femb: u8, stream: u8) -> Result<bool> {
        let bit = stream_bit(stream)?;
        let name = format!("FEMB{}.DAQ.FAKE_CD.RX_DATA_SOURCE", self.femb_digit(femb)?);
        Ok(self.read(&name)? & bit == 0)
    }
}

fn stream_bit(stream: u8) -> Result<u32> {
    if stream == 0 || stream > FEMB_STREAM_COUNT {
        return Err(Error::IndexOutOfRange(format!("FEMB stream {stream}")));
    }
    Ok(1 << (stream - 1))
}
