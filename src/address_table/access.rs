use crate::address_table::{ConvertedValue, RegisterEntry, RegisterMap};
use crate::transport::{Transport, UdpTransport};
use wib_globals::{DEFAULT_RETRY_COUNT, Error, Result};

/// Either a symbolic name resolved through the map or a raw word address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register<'a> {
    Name(&'a str),
    Address(u16),
}

impl<'a> From<&'a str> for Register<'a> {
    fn from(value: &'a str) -> Self {
        Register::Name(value)
    }
}

impl<'a> From<&'a String> for Register<'a> {
    fn from(value: &'a String) -> Self {
        Register::Name(value.as_str())
    }
}

impl From<u16> for Register<'_> {
    fn from(value: u16) -> Self {
        Register::Address(value)
    }
}

/// A register map bound to the transport of one endpoint.
///
/// Named reads return `(word & mask) >> offset`. Named writes of partial fields
/// read the word first and only replace the masked bits.
pub struct AddressTable {
    map: RegisterMap,
    transport: Box<dyn Transport>,
    retry_count: u32,
}

impl std::fmt::Debug for AddressTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressTable")
            .field("entries", &self.map.len())
            .field("retry_count", &self.retry_count)
            .finish()
    }
}

impl AddressTable {
    pub fn new(map: RegisterMap, transport: impl Transport + 'static) -> Self {
        Self {
            map,
            transport: Box::new(transport),
            retry_count: DEFAULT_RETRY_COUNT,
        }
    }

    /// Loads `table_file` and connects to `host` at `port_offset` with write acknowledgement on.
    pub fn open(table_file: &str, host: &str, port_offset: u16) -> Result<Self> {
        let map = RegisterMap::load(table_file)?;
        let mut transport = UdpTransport::connect(host, port_offset)?;
        transport.set_write_ack(true);
        Ok(Self::new(map, transport))
    }

    pub fn map(&self) -> &RegisterMap {
        &self.map
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Budget used by the `*_with_retry` accessors.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn set_retry_count(&mut self, retry_count: u32) {
        self.retry_count = retry_count;
    }

    pub fn entry(&self, name: &str) -> Result<&RegisterEntry> {
        self.map.lookup_by_name(name)
    }

    pub fn read<'a>(&self, register: impl Into<Register<'a>>) -> Result<u32> {
        self.read_inner(register.into(), false)
    }

    pub fn read_with_retry<'a>(&self, register: impl Into<Register<'a>>) -> Result<u32> {
        self.read_inner(register.into(), true)
    }

    pub fn write<'a>(&self, register: impl Into<Register<'a>>, value: u32) -> Result<()> {
        self.write_inner(register.into(), value, false)
    }

    pub fn write_with_retry<'a>(&self, register: impl Into<Register<'a>>, value: u32) -> Result<()> {
        self.write_inner(register.into(), value, true)
    }

    /// Writes consecutive words starting at `register`.
    ///
    /// A named start register must own the full 32 bit word.
    pub fn write_block<'a>(&self, register: impl Into<Register<'a>>, values: &[u32]) -> Result<()> {
        let address = match register.into() {
            Register::Address(address) => address,
            Register::Name(name) => {
                let entry = self.entry(name)?;
                if !entry.is_full_word() {
                    log::error!("block write on {} with mask {:#010x}", entry.name, entry.mask);
                    return Err(Error::BadBlockWrite(entry.name.clone()));
                }
                entry.address
            }
        };
        self.transport
            .write_block(address, values, self.retry_count)
    }

    /// Reads a named field and applies its value conversion.
    pub fn read_converted(&self, name: &str) -> Result<ConvertedValue> {
        let entry = self.entry(name)?;
        let raw = self.read(Register::Name(name))?;
        Ok(entry.conversion.convert(raw))
    }

    fn read_word(&self, address: u16, retry: bool) -> Result<u32> {
        if retry {
            self.transport.read_with_retry(address, self.retry_count)
        } else {
            self.transport.read(address)
        }
    }

    fn write_word(&self, address: u16, value: u32, retry: bool) -> Result<()> {
        if retry {
            self.transport
                .write_with_retry(address, value, self.retry_count)
        } else {
            self.transport.write(address, value)
        }
    }

    fn read_inner(&self, register: Register<'_>, retry: bool) -> Result<u32> {
        match register {
            Register::Address(address) => self.read_word(address, retry),
            Register::Name(name) => {
                let entry = self.entry(name)?;
                let word = self.read_word(entry.address, retry)?;
                Ok(extract(entry, word))
            }
        }
    }

    fn write_inner(&self, register: Register<'_>, value: u32, retry: bool) -> Result<()> {
        match register {
            Register::Address(address) => self.write_word(address, value, retry),
            Register::Name(name) => {
                let entry = self.entry(name)?;
                let current = if entry.is_full_word() {
                    0
                } else {
                    self.read_word(entry.address, retry)?
                };
                log::trace!("{} <- {value:#x}", entry.name);
                self.write_word(entry.address, insert(entry, current, value), retry)
            }
        }
    }
}

fn extract(entry: &RegisterEntry, word: u32) -> u32 {
    (word & entry.mask) >> entry.offset
}

/// Replaces the masked bits of `word`. Bits of `value` beyond the field are dropped.
fn insert(entry: &RegisterEntry, word: u32, value: u32) -> u32 {
    let shifted = value.checked_shl(entry.offset as u32).unwrap_or(0);
    (word & !entry.mask) | (entry.mask & shifted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_table::Mode;

    #[test]
    fn field_insert_extract() {
        let entry = RegisterEntry::new("F", 0, 0x0000_FF00, Mode::READ | Mode::WRITE);
        let word = insert(&entry, 0xAAAA_AAAA, 0x1FF);
        assert_eq!(0xAAAA_FFAA, word);
        assert_eq!(0xFF, extract(&entry, word));
    }
}
