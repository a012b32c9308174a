use crate::address_table::Conversion;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::ops::BitOr;

/// Access mode of a register entry. WRITE and ACTION exclude each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mode(u8);

impl Mode {
    pub const NONE: Mode = Mode(0);
    pub const READ: Mode = Mode(1 << 0);
    pub const WRITE: Mode = Mode(1 << 1);
    pub const ACTION: Mode = Mode(1 << 2);

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, other: Mode) -> bool {
        self.0 & other.0 == other.0
    }

    /// Any `r`, `w` or `a` in the token, case-insensitive, sets the matching flag.
    pub fn from_token(token: &str) -> Self {
        let token = token.to_ascii_lowercase();
        let mut mode = Mode::NONE;
        if token.contains('r') {
            mode = mode | Mode::READ;
        }
        if token.contains('w') {
            mode = mode | Mode::WRITE;
        }
        if token.contains('a') {
            mode = mode | Mode::ACTION;
        }
        mode
    }
}

impl BitOr for Mode {
    type Output = Mode;
    fn bitor(self, rhs: Self) -> Self::Output {
        Mode(self.0 | rhs.0)
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let flag = |m: Mode, c: char| if self.contains(m) { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(Mode::READ, 'r'),
            flag(Mode::WRITE, 'w'),
            flag(Mode::ACTION, 'a')
        )
    }
}

/// One named bit-field inside a 32 bit register word.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterEntry {
    /// Upper-case, dot separated path.
    pub name: String,
    pub address: u16,
    pub mask: u32,
    /// Index of the lowest set bit of `mask`.
    pub offset: u8,
    pub mode: Mode,
    pub attributes: HashMap<String, String>,
    pub conversion: Conversion,
}

impl RegisterEntry {
    pub fn new(name: impl Into<String>, address: u16, mask: u32, mode: Mode) -> Self {
        Self {
            name: name.into(),
            address,
            mask,
            offset: mask_offset(mask),
            mode,
            attributes: HashMap::new(),
            conversion: Conversion::Pass,
        }
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Largest value the field can hold.
    pub fn field_max(&self) -> u32 {
        self.mask >> self.offset
    }

    /// The entry owns all 32 bits of its word.
    pub fn is_full_word(&self) -> bool {
        self.mask == u32::MAX
    }

    pub fn is_readable(&self) -> bool {
        self.mode.contains(Mode::READ)
    }

    pub fn is_writable(&self) -> bool {
        self.mode.contains(Mode::WRITE) || self.mode.contains(Mode::ACTION)
    }
}

pub(crate) fn mask_offset(mask: u32) -> u8 {
    if mask == 0 {
        0
    } else {
        mask.trailing_zeros() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_tokens() {
        assert_eq!(Mode::READ | Mode::WRITE, Mode::from_token("rw"));
        assert_eq!(Mode::READ | Mode::WRITE, Mode::from_token("RW"));
        assert_eq!(Mode::ACTION, Mode::from_token("A"));
        assert_eq!(Mode::NONE, Mode::from_token("x"));
        assert_eq!("r-a", (Mode::READ | Mode::ACTION).to_string());
    }

    #[test]
    fn offsets() {
        assert_eq!(0, mask_offset(0));
        assert_eq!(0, mask_offset(0xFFFF_FFFF));
        assert_eq!(4, mask_offset(0xF0));
        assert_eq!(31, mask_offset(0x8000_0000));
        assert_eq!(0xF, RegisterEntry::new("X", 0, 0xF0, Mode::READ).field_max());
    }
}
