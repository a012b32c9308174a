use crate::{WIB_PKT_KEY, WIB_PKT_TRAILER, WIB_REQ_PACKET_SIZE, WIB_RPLY_PACKET_SIZE};
use std::fmt::{Debug, Display, Formatter};
use wib_globals::{Error, Result};

/// Register access request sent from the host to the WIB or a FEMB.
///
///
/// ```text
///                              Request
///                      ----------------------
///
/// +================+=========================================================+
/// |  Byte offset   |                       Description                       |
/// +================+=========================================================+
/// |       3:0      | Key 0xDEADBEEF                                          |
/// +----------------+---------------------------------------------------------+
/// |       5:4      | Register address                                        |
/// +----------------+---------------------------------------------------------+
/// |       7:6      | Data, most significant half (0 for reads)               |
/// +----------------+---------------------------------------------------------+
/// |       9:8      | Data, least significant half (0 for reads)              |
/// +----------------+---------------------------------------------------------+
/// |      11:10     | Trailer 0xFFFF                                          |
/// +----------------+---------------------------------------------------------+
/// ```
///
/// All fields are big endian.
pub struct WibRequest {
    pub buf: Vec<u8>,
}

impl WibRequest {
    pub const IDX_KEY: usize = 0;
    pub const IDX_ADDR: usize = 4;
    pub const IDX_DATA_MSW: usize = 6;
    pub const IDX_DATA_LSW: usize = 8;
    pub const IDX_TRAILER: usize = 10;

    /// Request reading the register at `addr`.
    pub fn read(addr: u16) -> Self {
        Self::new(addr, 0)
    }

    /// Request writing `data` to the register at `addr`.
    pub fn write(addr: u16, data: u32) -> Self {
        Self::new(addr, data)
    }

    pub fn new(addr: u16, data: u32) -> Self {
        let mut pkt: WibRequest = vec![0u8; WIB_REQ_PACKET_SIZE].into();
        pkt.set(addr, data);
        pkt
    }

    pub fn set(&mut self, addr: u16, data: u32) -> &mut Self {
        self.set_key(WIB_PKT_KEY)
            .set_addr(addr)
            .set_data(data)
            .set_trailer(WIB_PKT_TRAILER)
    }

    pub fn key(&self) -> u32 {
        be_u32(&self.buf[Self::IDX_KEY..Self::IDX_KEY + 4])
    }
    pub fn addr(&self) -> u16 {
        be_u16(&self.buf[Self::IDX_ADDR..Self::IDX_ADDR + 2])
    }
    pub fn data(&self) -> u32 {
        let msw = be_u16(&self.buf[Self::IDX_DATA_MSW..Self::IDX_DATA_MSW + 2]) as u32;
        let lsw = be_u16(&self.buf[Self::IDX_DATA_LSW..Self::IDX_DATA_LSW + 2]) as u32;
        (msw << 16) | lsw
    }
    pub fn trailer(&self) -> u16 {
        be_u16(&self.buf[Self::IDX_TRAILER..Self::IDX_TRAILER + 2])
    }

    pub fn set_key(&mut self, key: u32) -> &mut Self {
        self.buf[Self::IDX_KEY..Self::IDX_KEY + 4].copy_from_slice(&key.to_be_bytes());
        self
    }
    pub fn set_addr(&mut self, addr: u16) -> &mut Self {
        self.buf[Self::IDX_ADDR..Self::IDX_ADDR + 2].copy_from_slice(&addr.to_be_bytes());
        self
    }
    pub fn set_data(&mut self, data: u32) -> &mut Self {
        let msw = (data >> 16) as u16;
        let lsw = (data & 0xFFFF) as u16;
        self.buf[Self::IDX_DATA_MSW..Self::IDX_DATA_MSW + 2].copy_from_slice(&msw.to_be_bytes());
        self.buf[Self::IDX_DATA_LSW..Self::IDX_DATA_LSW + 2].copy_from_slice(&lsw.to_be_bytes());
        self
    }
    pub fn set_trailer(&mut self, trailer: u16) -> &mut Self {
        self.buf[Self::IDX_TRAILER..Self::IDX_TRAILER + 2].copy_from_slice(&trailer.to_be_bytes());
        self
    }

    /// Checks key, trailer and length of a request, e.g. one received by a simulator.
    pub fn validate(&self) -> Result<()> {
        if self.buf.len() != WIB_REQ_PACKET_SIZE {
            return Err(Error::Communication(format!(
                "request length {} != {WIB_REQ_PACKET_SIZE}",
                self.buf.len()
            )));
        }
        if self.key() != WIB_PKT_KEY || self.trailer() != WIB_PKT_TRAILER {
            return Err(Error::Communication(format!("malformed request {self}")));
        }
        Ok(())
    }
}

impl From<Vec<u8>> for WibRequest {
    fn from(value: Vec<u8>) -> Self {
        Self { buf: value }
    }
}

impl From<WibRequest> for Vec<u8> {
    fn from(value: WibRequest) -> Self {
        value.buf
    }
}

impl Debug for WibRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WibRequest")
            .field("key", &format_args!("{:#x}", self.key()))
            .field("addr", &format_args!("{:#06x}", self.addr()))
            .field("data", &format_args!("{:#010x}", self.data()))
            .field("trailer", &format_args!("{:#x}", self.trailer()))
            .finish()
    }
}

impl Display for WibRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        hex_dump(&self.buf, f)
    }
}

/// Reply to a read, or to a write when write acknowledgement is on.
///
/// Bytes 1:0 echo the register address, bytes 5:2 carry the register
/// content. Anything past byte 5 is padding.
pub struct WibReply {
    pub buf: Vec<u8>,
}

impl WibReply {
    pub const IDX_ADDR: usize = 0;
    pub const IDX_DATA: usize = 2;

    /// Builds the reply a device sends for `addr` holding `data`.
    pub fn new(addr: u16, data: u32) -> Self {
        let mut buf = vec![0u8; WIB_RPLY_PACKET_SIZE];
        buf[Self::IDX_ADDR..Self::IDX_ADDR + 2].copy_from_slice(&addr.to_be_bytes());
        buf[Self::IDX_DATA..Self::IDX_DATA + 4].copy_from_slice(&data.to_be_bytes());
        Self { buf }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn addr(&self) -> u16 {
        be_u16(&self.buf[Self::IDX_ADDR..Self::IDX_ADDR + 2])
    }

    pub fn data(&self) -> u32 {
        be_u32(&self.buf[Self::IDX_DATA..Self::IDX_DATA + 4])
    }

    /// A reply is only trusted if it has full size and echoes `expected_addr`.
    pub fn validate(&self, expected_addr: u16) -> Result<()> {
        if self.buf.len() < WIB_RPLY_PACKET_SIZE {
            log::debug!("short reply {self}");
            return Err(Error::Communication(format!(
                "bad reply size {} < {WIB_RPLY_PACKET_SIZE}",
                self.buf.len()
            )));
        }
        if self.addr() != expected_addr {
            log::debug!("mismatched reply {self}");
            return Err(Error::Communication(format!(
                "bad reply address {:#06x} != {expected_addr:#06x}",
                self.addr()
            )));
        }
        Ok(())
    }
}

impl From<Vec<u8>> for WibReply {
    fn from(value: Vec<u8>) -> Self {
        Self { buf: value }
    }
}

impl From<WibReply> for Vec<u8> {
    fn from(value: WibReply) -> Self {
        value.buf
    }
}

impl Debug for WibReply {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.buf.len() < 6 {
            return f
                .debug_struct("WibReply")
                .field("len", &self.buf.len())
                .finish();
        }
        f.debug_struct("WibReply")
            .field("addr", &format_args!("{:#06x}", self.addr()))
            .field("data", &format_args!("{:#010x}", self.data()))
            .field("len", &self.buf.len())
            .finish()
    }
}

impl Display for WibReply {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        hex_dump(&self.buf, f)
    }
}

fn hex_dump(buf: &[u8], f: &mut Formatter<'_>) -> std::fmt::Result {
    f.write_str("[")?;
    for elem in buf.iter() {
        f.write_fmt(format_args!("{elem:02x} "))?;
    }
    f.write_str("]")?;
    Ok(())
}

fn be_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
