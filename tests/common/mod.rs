#![allow(dead_code)]
/// This module has been created using mod.rs in a subfolder, instead of just creating a common.rs under tests
/// This is due to the test runner then not searching for runnable tests in mod.rs
/// https://doc.rust-lang.org/rust-by-example/testing/integration_testing.html
use libwib_rs::transport::Transport;
use libwib_rs::{AddressTable, Error, RegisterMap, Result, Wib};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

pub fn logging_init(module: &str) {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Error)
        .filter_module(module, log::LevelFilter::Trace)
        .filter_module("libwib_rs", log::LevelFilter::Debug)
        .try_init();
}

pub fn data_file(name: &str) -> String {
    format!("{}/tests/data/{name}", env!("CARGO_MANIFEST_DIR"))
}

/// Stands in for the hardware sleep.
pub fn no_sleep(_: Duration) {}

pub type ReadHook = Box<dyn FnMut(u16, &HashMap<u16, u32>) -> Option<u32>>;

/// Register file of one simulated endpoint.
#[derive(Default)]
pub struct SimState {
    pub regs: HashMap<u16, u32>,
    pub writes: Vec<(u16, u32)>,
    pub reads: Vec<u16>,
    /// Write calls, failed ones included
    pub write_attempts: u32,
    /// Number of upcoming reads answered with a communication error
    pub fail_reads: u32,
    /// Number of upcoming writes answered with a communication error
    pub fail_writes: u32,
    /// Every write fails with a communication error
    pub dead: bool,
    /// Reads of these addresses always fail with a communication error
    pub unreadable: Vec<u16>,
    /// Failures swallowed by the retry wrappers
    pub retries: u64,
    /// Overrides the value of a read when it returns `Some`
    pub read_hook: Option<ReadHook>,
}

impl SimState {
    pub fn reg(&self, address: u16) -> u32 {
        self.regs.get(&address).copied().unwrap_or(0)
    }

    /// Values written to `address`, oldest first.
    pub fn writes_to(&self, address: u16) -> Vec<u32> {
        self.writes
            .iter()
            .filter(|(a, _)| *a == address)
            .map(|(_, v)| *v)
            .collect()
    }
}

pub type Sim = Rc<RefCell<SimState>>;

pub struct SimTransport(pub Sim);

impl Transport for SimTransport {
    fn read(&self, address: u16) -> Result<u32> {
        let mut state = self.0.borrow_mut();
        state.reads.push(address);
        if state.fail_reads > 0 || state.unreadable.contains(&address) {
            state.fail_reads = state.fail_reads.saturating_sub(1);
            return Err(Error::Communication(format!("no reply for {address:#06x}")));
        }
        if let Some(mut hook) = state.read_hook.take() {
            let value = hook(address, &state.regs);
            state.read_hook = Some(hook);
            if let Some(value) = value {
                return Ok(value);
            }
        }
        Ok(state.reg(address))
    }

    fn write(&self, address: u16, value: u32) -> Result<()> {
        let mut state = self.0.borrow_mut();
        state.write_attempts += 1;
        if state.dead || state.fail_writes > 0 {
            state.fail_writes = state.fail_writes.saturating_sub(1);
            return Err(Error::Communication(format!("no ack for {address:#06x}")));
        }
        state.writes.push((address, value));
        state.regs.insert(address, value);
        Ok(())
    }

    fn retry_count(&self) -> u64 {
        self.0.borrow().retries
    }

    fn note_retry(&self) {
        self.0.borrow_mut().retries += 1;
    }
}

pub fn sim() -> Sim {
    Rc::new(RefCell::new(SimState::default()))
}

pub fn sim_table(map: &RegisterMap, sim: &Sim) -> AddressTable {
    AddressTable::new(map.clone(), SimTransport(sim.clone()))
}

/// Word addresses of the simulated WIB, see `tests/data/wib.adt`.
pub mod wib_reg {
    pub const FW_VERSION: u16 = 0x00;
    pub const RESET: u16 = 0x03;
    pub const DND: u16 = 0x04;
    pub const COUNTS: u16 = 0x05;
    pub const DUPLICATION: u16 = 0x06;
    pub const POWER: u16 = 0x08;
    pub const FEMB_CNC: u16 = 0x0A;
    pub const CONVERT_CONTROL: u16 = 0x10;
    pub const PDTS: u16 = 0x12;
    pub const PDTS_STATE: u16 = 0x13;
    pub const SI5344: u16 = 0x14;
    pub const SI5344_I2C: u16 = 0x18;
    pub const CDS: u16 = 0x20;
    pub const CDS_I2C: u16 = 0x24;
    pub const SI5342: u16 = 0x2C;
    pub const FEMB_DAQ: [u16; 4] = [0x30, 0x34, 0x38, 0x3C];
    pub const DAQ_LINK: [u16; 4] = [0x40, 0x42, 0x44, 0x46];
}

/// Word addresses of a simulated FEMB, see `tests/data/femb.adt`.
pub mod femb_reg {
    pub const RESET: u16 = 0x000;
    pub const PHASE_HIGH: u16 = 0x006;
    pub const TST_SEL: u16 = 0x007;
    pub const TEST_PATTERN: u16 = 0x008;
    pub const STREAM_EN: u16 = 0x009;
    pub const PULSER: u16 = 0x010;
    pub const PULSE_TIMING: u16 = 0x011;
    pub const PHASE_LOW: u16 = 0x00F;
    pub const VERSION_ID: u16 = 0x101;
}

pub const FEMB_FIRMWARE: u32 = 0x0323;

/// A WIB on simulated endpoints plus handles on their register files.
pub struct Bench {
    pub wib: Wib,
    pub board: Sim,
    pub fembs: Vec<Sim>,
}

impl Bench {
    pub fn femb(&self, femb: u8) -> std::cell::Ref<'_, SimState> {
        self.fembs[femb as usize - 1].borrow()
    }
}

/// RCE firmware: four FEMBs on four links.
pub const RCE_COUNTS: u32 = 0x44;
/// FELIX firmware: four FEMBs on two links.
pub const FELIX_COUNTS: u32 = 0x24;

/// Builds a WIB whose FEMBs answer with firmware [`FEMB_FIRMWARE`].
///
/// The I2C masters always report done, FEMB ASIC readbacks echo what was
/// written and the ADC FIFOs report in sync.
pub fn bench(counts: u32) -> Result<Bench> {
    let wib_map = RegisterMap::load(&data_file("wib.adt"))?;
    let femb_map = RegisterMap::load(&data_file("femb.adt"))?;

    let board = sim();
    {
        let mut state = board.borrow_mut();
        state.regs.insert(wib_reg::COUNTS, counts);
        state.regs.insert(wib_reg::SI5344_I2C + 3, 1);
        state.regs.insert(wib_reg::CDS_I2C + 3, 1);
    }

    let mut femb_tables = Vec::new();
    let mut fembs = Vec::new();
    for _ in 0..4 {
        let femb = sim();
        {
            let mut state = femb.borrow_mut();
            state.regs.insert(femb_reg::VERSION_ID, FEMB_FIRMWARE);
            state.read_hook = Some(Box::new(asic_echo));
        }
        femb_tables.push(sim_table(&femb_map, &femb));
        fembs.push(femb);
    }

    let wib = Wib::from_parts(sim_table(&wib_map, &board), femb_tables)?.with_delay(no_sleep);
    Ok(Bench { wib, board, fembs })
}

/// ASIC readback registers mirror the configuration block 0x50 words below.
pub fn asic_echo(address: u16, regs: &HashMap<u16, u32>) -> Option<u32> {
    if (0x250..0x250 + 72).contains(&address) {
        return Some(regs.get(&(address - 0x50)).copied().unwrap_or(0));
    }
    None
}

/// Phase bytes currently written to a FEMB.
pub fn written_phase(regs: &HashMap<u16, u32>) -> u16 {
    let high = regs.get(&femb_reg::PHASE_HIGH).copied().unwrap_or(0) & 0xFF;
    let low = regs.get(&femb_reg::PHASE_LOW).copied().unwrap_or(0) & 0xFF;
    ((high << 8) | low) as u16
}

/// Read hook reporting sync flags computed from the written phase.
pub fn phase_sync_hook(sync: impl Fn(u16) -> u16 + 'static) -> ReadHook {
    Box::new(move |address, regs| {
        if address == femb_reg::PHASE_HIGH {
            let stored = regs.get(&address).copied().unwrap_or(0) & 0xFF;
            return Some(stored | ((sync(written_phase(regs)) as u32) << 16));
        }
        asic_echo(address, regs)
    })
}
