use crate::board::wib::{Wib, check_femb};
use std::time::Duration;
use wib_globals::Result;

/// Word holding the high phase byte in bits 7..0 and the ADC FIFO sync flags in bits 31..16.
pub const PHASE_SELECT_REGISTER: u16 = 6;
/// Word holding the low phase byte.
pub const PHASE_SELECT_REGISTER_2: u16 = 15;

const WRITE_TRIES: u32 = 10;
const PHASE_SETTLE: Duration = Duration::from_millis(1);
/// Failures of one link group after which the hunt gives up.
const GROUP_FAILURE_LIMIT: u32 = 5;

/// Sync flags of the eight two-link groups, first ADC first.
const GROUP_SYNC_MASKS: [u16; 8] = [
    0xc000, 0x3000, 0x0c00, 0x0300, 0x00c0, 0x0030, 0x000c, 0x0003,
];
/// Phase bit belonging to each group, in both phase bytes.
const GROUP_PHASE_BITS: [u8; 8] = [0x80, 0x40, 0x20, 0x10, 0x08, 0x04, 0x02, 0x01];

/// Result of a [`PhaseAligner::hunt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HuntOutcome {
    pub synced: bool,
    /// Phase written last, or the starting phase if nothing was written
    pub phase: u16,
    /// Number of corrected phases written
    pub rounds: u32,
    /// Failures counted per link group
    pub failures: [u32; 8],
}

/// Searches an ADC clock phase for which all 16 ADC FIFOs of a FEMB are in sync.
pub struct PhaseAligner<'a> {
    wib: &'a Wib,
    femb: u8,
}

impl<'a> PhaseAligner<'a> {
    pub fn new(wib: &'a Wib, femb: u8) -> Result<Self> {
        check_femb(femb)?;
        Ok(Self { wib, femb })
    }

    /// Writes both phase bytes, each first inverted and then for real.
    ///
    /// Every step is read back and rewritten up to ten times. A step that never
    /// reads back is only logged.
    pub fn write_phase(&self, phase: u16) -> Result<()> {
        let high = ((phase >> 8) & 0xFF) as u8;
        let low = (phase & 0xFF) as u8;
        self.wib.sleep(PHASE_SETTLE);
        self.write_verified(PHASE_SELECT_REGISTER, !high)?;
        self.write_verified(PHASE_SELECT_REGISTER_2, !low)?;
        self.write_verified(PHASE_SELECT_REGISTER, high)?;
        self.write_verified(PHASE_SELECT_REGISTER_2, low)
    }

    fn write_verified(&self, address: u16, value: u8) -> Result<()> {
        for _ in 0..WRITE_TRIES {
            self.wib.write_femb(self.femb, address, value as u32)?;
            self.wib.sleep(PHASE_SETTLE);
            let readback = self.wib.read_femb(self.femb, address)?;
            self.wib.sleep(PHASE_SETTLE);
            if readback & 0xFF == value as u32 {
                return Ok(());
            }
        }
        log::warn!(
            "FEMB {}: register {address} does not read back {value:#04x}",
            self.femb
        );
        Ok(())
    }

    /// ADC FIFO sync flags, one bit per link. Read twice, the first read may be stale.
    pub fn sync_status(&self) -> Result<u16> {
        self.wib.sleep(PHASE_SETTLE);
        self.wib.read_femb(self.femb, PHASE_SELECT_REGISTER)?;
        self.wib.sleep(PHASE_SETTLE);
        let status = (self.wib.read_femb(self.femb, PHASE_SELECT_REGISTER)? >> 16) as u16;
        self.wib.sleep(PHASE_SETTLE);
        log::debug!("FEMB {} ADC FIFO sync {status:016b}", self.femb);
        Ok(status)
    }

    /// Returns the first of `phases` that syncs all ADC FIFOs.
    pub fn try_candidates(&self, phases: &[u16]) -> Result<Option<u16>> {
        log::info!("FEMB {}: trying {} clock phases", self.femb, phases.len());
        for (i, phase) in phases.iter().enumerate() {
            log::debug!("FEMB {}: phase {i} = {phase:#06x}", self.femb);
            self.write_phase(*phase)?;
            if self.sync_status()? == 0 {
                return Ok(Some(*phase));
            }
        }
        Ok(None)
    }

    /// Flips phase bits of the link groups out of sync until all FIFOs sync.
    ///
    /// The first and third failure of a group flip its bit in the high byte,
    /// the second and fourth in the low byte. The fifth failure of any group
    /// ends the hunt.
    pub fn hunt(&self, start: u16) -> Result<HuntOutcome> {
        let mut high = (start >> 8) as u8;
        let mut low = (start & 0xFF) as u8;
        let mut outcome = HuntOutcome {
            synced: false,
            phase: start,
            rounds: 0,
            failures: [0; 8],
        };

        loop {
            let status = self.sync_status()?;
            if status == 0 {
                log::info!("FEMB {}: ADC FIFOs synced at phase {:#06x}", self.femb, outcome.phase);
                outcome.synced = true;
                return Ok(outcome);
            }

            for (group, mask) in GROUP_SYNC_MASKS.iter().enumerate() {
                if status & mask == 0 {
                    continue;
                }
                outcome.failures[group] += 1;
                let bit = GROUP_PHASE_BITS[group];
                match outcome.failures[group] {
                    1 | 3 => high ^= bit,
                    2 | 4 => low ^= bit,
                    _ => {
                        log::warn!(
                            "FEMB {}: link group {group} failed {GROUP_FAILURE_LIMIT} times",
                            self.femb
                        );
                        return Ok(outcome);
                    }
                }
            }

            outcome.phase = ((high as u16) << 8) | low as u16;
            outcome.rounds += 1;
            self.write_phase(outcome.phase)?;
        }
    }
}

impl Wib {
    pub fn write_femb_phase(&self, femb: u8, phase: u16) -> Result<()> {
        PhaseAligner::new(self, femb)?.write_phase(phase)
    }

    pub fn try_femb_phases(&self, femb: u8, phases: &[u16]) -> Result<Option<u16>> {
        PhaseAligner::new(self, femb)?.try_candidates(phases)
    }

    pub fn hunt_femb_phase(&self, femb: u8, start: u16) -> Result<HuntOutcome> {
        PhaseAligner::new(self, femb)?.hunt(start)
    }
}
