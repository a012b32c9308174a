//! Named-register namespaces.
//!
//! A [`RegisterMap`] is parsed from a text description where every line reads
//!
//! ```text
//! NAME  ADDRESS  [MASK MODE [key[=value] ...] | INCLUDE_FILENAME]
//! ```
//!
//! Comments start at `#`. A third token that does not start with a digit names a
//! file that is loaded with `NAME` as prefix and `ADDRESS` as offset. Lines with
//! less than four tokens are not registered.
//!
//! An [`AddressTable`] binds a map to a [`Transport`](crate::transport::Transport)
//! and turns symbolic accesses into masked reads and read-modify-writes.

mod access;
mod conversion;
mod entry;
mod parser;
mod search;

pub use access::{AddressTable, Register};
pub use conversion::{Conversion, ConvertedValue};
pub use entry::{Mode, RegisterEntry};
pub use parser::parse_c_integer;

use std::collections::{BTreeMap, HashMap};
use wib_globals::{Error, Result};

/// Owning store of register entries plus name and address indices.
#[derive(Debug, Clone, Default)]
pub struct RegisterMap {
    entries: Vec<RegisterEntry>,
    by_name: HashMap<String, usize>,
    by_address: BTreeMap<u16, Vec<usize>>,
}

impl RegisterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegisterEntry> {
        self.entries.iter()
    }

    /// Entries sharing the word at `address`, in registration order.
    pub fn entries_at(&self, address: u16) -> impl Iterator<Item = &RegisterEntry> {
        self.by_address
            .get(&address)
            .into_iter()
            .flatten()
            .map(|&idx| &self.entries[idx])
    }

    /// Adds `entry` to the map.
    ///
    /// WRITE together with ACTION is refused with [`Error::BadMode`]. A name that
    /// already exists is refused with [`Error::NameCollision`] and leaves the map untouched.
    pub fn register(&mut self, mut entry: RegisterEntry) -> Result<()> {
        if entry.mode.contains(Mode::WRITE) && entry.mode.contains(Mode::ACTION) {
            log::error!("{} has both WRITE and ACTION modes", entry.name);
            return Err(Error::BadMode(entry.name));
        }
        if self.by_name.contains_key(&entry.name) {
            log::error!("{} already existed", entry.name);
            return Err(Error::NameCollision(entry.name));
        }

        for other in self.entries_at(entry.address) {
            if other.mask & entry.mask != 0 {
                log::trace!(
                    "{} overlaps {} at {:#06x} (mask {:#010x} / {:#010x})",
                    entry.name,
                    other.name,
                    entry.address,
                    entry.mask,
                    other.mask
                );
            }
        }

        entry.conversion = Conversion::from_attributes(&entry.name, &entry.attributes);

        let idx = self.entries.len();
        self.by_name.insert(entry.name.clone(), idx);
        self.by_address.entry(entry.address).or_default().push(idx);
        self.entries.push(entry);
        Ok(())
    }

    /// Looks up `name`, ignoring case.
    pub fn lookup_by_name(&self, name: &str) -> Result<&RegisterEntry> {
        let idx = match self.by_name.get(name) {
            Some(idx) => Some(idx),
            None => self.by_name.get(&name.to_uppercase()),
        };
        idx.map(|&idx| &self.entries[idx])
            .ok_or_else(|| Error::UnknownRegister(name.to_string()))
    }
}
