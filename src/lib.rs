//! A Rust native configuration driver for the WIB readout board and its FEMBs.
//!
//! The WIB is reached over UDP. Registers are addressed by dotted names taken
//! from address table files, see [`address_table`]. On top of the register
//! access [`Wib`] implements the board level operations: resets, timing bring-up
//! through the SI5344 jitter cleaner and the PDTS endpoint, FEMB power and ASIC
//! configuration, ADC clock phase alignment, fake data and DAQ link control.
//!
//! ## Usage overview
//!
//! ```no_run
//! use libwib_rs::{AlignmentPolicy, ClockSource, Wib};
//!
//! let wib = Wib::connect("192.168.200.1", "WIB.adt", "FEMB.adt")?;
//! wib.initialize_dts(ClockSource::Local, AlignmentPolicy::default())?;
//! println!("PDTS state: {}", wib.pdts_state()?);
//! # Ok::<(), libwib_rs::Error>(())
//! ```
//!
//! A run control framework drives the board through [`configurator::WibConfigurator`].
//!
//! ## Examples
//! ```bash
//! cargo run --example info -- <host>
//! ```
//!
//! ## Environment
//! - `WIB_ADDRESS_TABLE_PATH`: where relative address table files and includes are searched
//! - `WIB_CONFIG_PATH`: where the default `PDTS_SI5344.txt` is searched
//!
//! ### Missing Features
//! - Flash programming
//! - Spy buffer readout
//! - QSFP and history monitoring

pub mod address_table;
pub mod board;
pub mod configurator;
pub mod hardware;
pub mod transport;

pub use address_table::{AddressTable, Mode, Register, RegisterEntry, RegisterMap};
pub use board::wib::*;
pub use wib_globals::*;
