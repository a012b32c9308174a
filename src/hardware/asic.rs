//! Bit layout of the eight FE and eight ADC ASICs on one FEMB.
//!
//! Each chip owns 144 bits: 16 channel bytes followed by a 16 bit global word.
//! Channel `n` sits at byte `15 - n`, so channel 0 ends up in the highest byte.
//! For programming, the ADC and FE halves of a chip are concatenated (ADC
//! first) into 288 bits, i.e. nine 32 bit SPI words per chip.

pub const CHIPS_PER_FEMB: usize = 8;
pub const CHANNELS_PER_CHIP: usize = 16;
pub const WORDS_PER_CHIP: usize = 9;
/// Words written to the SPI bridge for one FEMB.
pub const ASIC_REGISTER_COUNT: usize = CHIPS_PER_FEMB * WORDS_PER_CHIP;

const CHIP_BITS: usize = CHANNELS_PER_CHIP * 8 + 16;
const BOARD_BITS: usize = CHIP_BITS * CHIPS_PER_FEMB;

/// Wire plane read out by each FE channel: 0 and 1 are induction, 2 is collection.
const CHANNEL_WIRE_PLANE: [[u8; CHANNELS_PER_CHIP]; CHIPS_PER_FEMB] = [
    [0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 2],
    [0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 2],
    [2, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0],
    [2, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 2],
    [0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 2],
    [2, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0],
    [2, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0],
];
const COLLECTION_PLANE: u8 = 2;
/// Bit of a FE channel byte selecting the 200 mV baseline.
const SNC_BIT: usize = 6;

#[derive(Clone, PartialEq, Eq)]
struct BoardBits([u32; BOARD_BITS / 32]);

impl Default for BoardBits {
    fn default() -> Self {
        Self([0; BOARD_BITS / 32])
    }
}

impl BoardBits {
    fn get(&self, pos: usize) -> bool {
        self.0[pos / 32] & (1 << (pos % 32)) != 0
    }

    fn set(&mut self, pos: usize, value: bool) {
        if value {
            self.0[pos / 32] |= 1 << (pos % 32);
        } else {
            self.0[pos / 32] &= !(1 << (pos % 32));
        }
    }

    fn set_field(&mut self, pos: usize, width: usize, value: u32) {
        for bit in 0..width {
            self.set(pos + bit, value & (1 << bit) != 0);
        }
    }

    fn channel_pos(chip: usize, chn: usize) -> usize {
        CHIP_BITS * chip + (CHANNELS_PER_CHIP - 1 - chn) * 8
    }

    fn global_pos(chip: usize) -> usize {
        CHIP_BITS * chip + CHANNELS_PER_CHIP * 8
    }
}

/// Per channel FE ASIC settings, already in chip encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeChannel {
    /// Test capacitor enable
    pub sts: bool,
    /// Baseline select, set for 200 mV
    pub snc: bool,
    /// Gain code
    pub sg: u8,
    /// Shaping time code
    pub st: u8,
    /// Output monitor enable
    pub smn: bool,
    /// Output buffer enable
    pub sdf: bool,
}

impl FeChannel {
    pub fn byte(&self) -> u8 {
        (self.sts as u8) << 7
            | (self.snc as u8) << 6
            | (self.sg & 0x3) << 4
            | (self.st & 0x3) << 2
            | (self.smn as u8) << 1
            | self.sdf as u8
    }
}

/// FE ASIC settings shared by all channels of one chip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeGlobal {
    /// Leakage select, set for 100 pA
    pub slk0: bool,
    pub stb1: bool,
    pub stb: bool,
    /// Channel 16 high pass filter
    pub s16: bool,
    /// Leakage x10
    pub slk1: bool,
    /// AC coupling
    pub sdc: bool,
    /// Pulser source, 2 bits
    pub swdac: u8,
    /// Internal pulser amplitude, 6 bits
    pub dac: u8,
}

impl FeGlobal {
    /// Low byte holds the switches, the high byte the pulser DAC with its bit order reversed.
    pub fn word(&self) -> u16 {
        let global = self.slk0 as u16
            | (self.stb1 as u16) << 1
            | (self.stb as u16) << 2
            | (self.s16 as u16) << 3
            | (self.slk1 as u16) << 4
            | (self.sdc as u16) << 5;
        let mut dac = (self.swdac & 0x3) as u16;
        for bit in 0..6 {
            if self.dac & (1 << bit) != 0 {
                dac |= 1 << (7 - bit);
            }
        }
        global | dac << 8
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct FeAsicMap {
    bits: BoardBits,
}

impl FeAsicMap {
    pub fn set_channel(&mut self, chip: usize, chn: usize, channel: &FeChannel) {
        let pos = BoardBits::channel_pos(chip, chn);
        self.bits.set_field(pos, 8, channel.byte() as u32);
    }

    pub fn set_global(&mut self, chip: usize, global: &FeGlobal) {
        self.bits
            .set_field(BoardBits::global_pos(chip), 16, global.word() as u32);
    }

    /// Programs every channel and chip of the board identically.
    pub fn set_board(&mut self, channel: &FeChannel, global: &FeGlobal) {
        for chip in 0..CHIPS_PER_FEMB {
            for chn in 0..CHANNELS_PER_CHIP {
                self.set_channel(chip, chn, channel);
            }
            self.set_global(chip, global);
        }
    }

    /// Overrides the baseline bit of the collection plane channels only.
    pub fn set_collection_baseline(&mut self, snc: bool) {
        for (chip, planes) in CHANNEL_WIRE_PLANE.iter().enumerate() {
            for (chn, plane) in planes.iter().enumerate() {
                if *plane == COLLECTION_PLANE {
                    self.bits
                        .set(BoardBits::channel_pos(chip, chn) + SNC_BIT, snc);
                }
            }
        }
    }

    pub fn channel_byte(&self, chip: usize, chn: usize) -> u8 {
        let pos = BoardBits::channel_pos(chip, chn);
        (0..8).fold(0, |acc, bit| acc | (self.bits.get(pos + bit) as u8) << bit)
    }
}

/// Per channel ADC ASIC settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdcChannel {
    /// Offset current, 4 bits
    pub d: u8,
    pub pcsr: bool,
    pub pdsr: bool,
    /// Sleep
    pub slp: bool,
    /// Test input
    pub tstin: bool,
}

impl AdcChannel {
    /// The offset current nibble is stored bit reversed in bits 7..4.
    pub fn byte(&self) -> u8 {
        let mut d = 0;
        for bit in 0..4 {
            if self.d & (1 << bit) != 0 {
                d |= 1 << (7 - bit);
            }
        }
        d | (self.pcsr as u8) << 3 | (self.pdsr as u8) << 2 | (self.slp as u8) << 1 | self.tstin as u8
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdcGlobal {
    pub res0: bool,
    pub res1: bool,
    pub res2: bool,
    pub res3: bool,
    pub res4: bool,
    pub slsb: bool,
    pub f0: bool,
    pub f1: bool,
    pub f2: bool,
    pub f3: bool,
    pub f4: bool,
    pub f5: bool,
    /// Offset current enable
    pub engr: bool,
    pub frqc: bool,
    pub clk0: bool,
    pub clk1: bool,
}

impl AdcGlobal {
    pub fn word(&self) -> u16 {
        let order = [
            self.res0, self.res1, self.res2, self.res3, self.res4, self.slsb, self.f5, self.f4,
            self.f3, self.f2, self.f1, self.f0, self.engr, self.frqc, self.clk1, self.clk0,
        ];
        order
            .iter()
            .enumerate()
            .fold(0, |acc, (bit, set)| acc | (*set as u16) << bit)
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct AdcAsicMap {
    bits: BoardBits,
}

impl AdcAsicMap {
    pub fn set_channel(&mut self, chip: usize, chn: usize, channel: &AdcChannel) {
        let pos = BoardBits::channel_pos(chip, chn);
        self.bits.set_field(pos, 8, channel.byte() as u32);
    }

    pub fn set_global(&mut self, chip: usize, global: &AdcGlobal) {
        self.bits
            .set_field(BoardBits::global_pos(chip), 16, global.word() as u32);
    }

    pub fn set_board(&mut self, channel: &AdcChannel, global: &AdcGlobal) {
        for chip in 0..CHIPS_PER_FEMB {
            for chn in 0..CHANNELS_PER_CHIP {
                self.set_channel(chip, chn, channel);
            }
            self.set_global(chip, global);
        }
    }
}

/// Interleaves both maps into the SPI word sequence, nine words per chip.
pub fn asic_registers(fe: &FeAsicMap, adc: &AdcAsicMap) -> Vec<u32> {
    let mut regs = Vec::with_capacity(ASIC_REGISTER_COUNT);
    for chip in 0..CHIPS_PER_FEMB {
        let chip_bit = |i: usize| {
            if i < CHIP_BITS {
                adc.bits.get(chip * CHIP_BITS + i)
            } else {
                fe.bits.get(chip * CHIP_BITS + i - CHIP_BITS)
            }
        };
        for word in 0..WORDS_PER_CHIP {
            let value = (0..32).fold(0u32, |acc, bit| {
                acc | (chip_bit(word * 32 + bit) as u32) << bit
            });
            regs.push(value);
        }
    }
    regs
}

/// Front-end settings as requested by the user, before remapping to chip codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AsicConfig {
    /// 0..=3 for 4.7, 7.8, 14 and 25 mV/fC
    pub gain: u8,
    /// 0..=3 for 0.5, 1, 2 and 3 us
    pub shape: u8,
    /// 0 for 200 mV, 1 for 900 mV, 2 for 900 mV on induction and 200 mV on collection
    pub baseline: u8,
    /// 500 pA instead of 100 pA
    pub leak_high: bool,
    pub leak_10x: bool,
    pub ac_couple: bool,
    /// Accepted for completeness, the output buffer stays bypassed.
    pub buffer: bool,
    /// ADC clocked by the FPGA
    pub ext_clk: bool,
    /// 0 off, 1 FE ASIC pulser, 2 FPGA pulser
    pub pulse_mode: u8,
    /// FE ASIC pulser amplitude
    pub pulse_dac: u8,
}

impl AsicConfig {
    fn gain_code(&self) -> u8 {
        match self.gain {
            1 => 2,
            2 => 1,
            g => g,
        }
    }

    fn shape_code(&self) -> u8 {
        match self.shape {
            0 => 2,
            1 => 0,
            2 => 3,
            _ => 1,
        }
    }

    pub fn fe_map(&self) -> FeAsicMap {
        let channel = FeChannel {
            sts: self.pulse_mode != 0,
            snc: self.baseline == 0,
            sg: self.gain_code(),
            st: self.shape_code(),
            smn: false,
            sdf: false,
        };
        let global = FeGlobal {
            slk0: !self.leak_high,
            slk1: self.leak_10x,
            sdc: self.ac_couple,
            swdac: self.pulse_mode,
            dac: self.pulse_dac,
            ..Default::default()
        };
        let mut map = FeAsicMap::default();
        map.set_board(&channel, &global);
        if self.baseline > 1 {
            map.set_collection_baseline(true);
        }
        map
    }

    pub fn adc_map(&self) -> AdcAsicMap {
        let global = AdcGlobal {
            clk0: self.ext_clk,
            ..Default::default()
        };
        let mut map = AdcAsicMap::default();
        map.set_board(&AdcChannel::default(), &global);
        map
    }

    pub fn registers(&self) -> Vec<u32> {
        asic_registers(&self.fe_map(), &self.adc_map())
    }
}
