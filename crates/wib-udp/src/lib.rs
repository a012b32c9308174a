pub mod packet;

pub use wib_globals::wib1::{
    FEMB_PORT_STRIDE, WIB_MAX_PORT_OFFSET, WIB_RD_BASE_PORT, WIB_RPLY_BASE_PORT, WIB_WR_BASE_PORT,
};

/// Magic key opening every request.
pub const WIB_PKT_KEY: u32 = 0xDEAD_BEEF;
/// Marker closing every request.
pub const WIB_PKT_TRAILER: u16 = 0xFFFF;
/// Size of a request in bytes.
pub const WIB_REQ_PACKET_SIZE: usize = 12;
/// Smallest reply the firmware sends back.
pub const WIB_RPLY_PACKET_SIZE: usize = 12;
/// Receive buffer length; replies may carry padding.
pub const WIB_RPLY_BUFFER_SIZE: usize = 1024;

/// Port pair (write, read) used by one endpoint at `port_offset`.
///
/// Offsets above [`WIB_MAX_PORT_OFFSET`] are refused.
pub fn endpoint_ports(port_offset: u16) -> Option<(u16, u16)> {
    if port_offset > WIB_MAX_PORT_OFFSET {
        log::error!("port offset {port_offset} is larger than {WIB_MAX_PORT_OFFSET}");
        return None;
    }
    Some((
        WIB_WR_BASE_PORT + port_offset,
        WIB_RD_BASE_PORT + port_offset,
    ))
}
