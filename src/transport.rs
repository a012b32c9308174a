use crate::address_table::parse_c_integer;
use std::cell::Cell;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use wib_globals::{Error, RETRY_DELAY, Result, TIMEOUT};
use wib_udp::packet::{WibReply, WibRequest};
use wib_udp::{WIB_RPLY_BUFFER_SIZE, endpoint_ports};

/// Raw register access to one endpoint.
///
/// Implementors only provide single attempts. The retry wrappers are built on
/// top and swallow communication failures only.
pub trait Transport {
    fn read(&self, address: u16) -> Result<u32>;
    fn write(&self, address: u16, value: u32) -> Result<()>;

    /// Number of communication failures swallowed by the retry wrappers so far.
    fn retry_count(&self) -> u64 {
        0
    }

    /// Called once for every swallowed failure.
    fn note_retry(&self) {}

    fn read_with_retry(&self, address: u16, retry_count: u32) -> Result<u32> {
        with_retry(retry_count, || self.read(address), || self.note_retry())
    }

    fn write_with_retry(&self, address: u16, value: u32, retry_count: u32) -> Result<()> {
        with_retry(
            retry_count,
            || self.write(address, value),
            || self.note_retry(),
        )
    }

    /// Writes `values` to consecutive registers starting at `address`, one word at a time.
    fn write_block(&self, address: u16, values: &[u32], retry_count: u32) -> Result<()> {
        for (i, value) in values.iter().enumerate() {
            self.write_with_retry(address.wrapping_add(i as u16), *value, retry_count)?;
        }
        Ok(())
    }
}

/// Runs `op` up to `retry_count` times.
///
/// All but the last attempt swallow communication failures, the last attempt's
/// outcome is returned as is. A budget of 0 behaves as 1.
pub fn with_retry<T>(
    retry_count: u32,
    mut op: impl FnMut() -> Result<T>,
    mut on_retry: impl FnMut(),
) -> Result<T> {
    let attempts = retry_count.max(1);
    for attempt in 1..attempts {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_communication() => {
                log::debug!("attempt {attempt}/{attempts} failed: {e}");
                on_retry();
                std::thread::sleep(RETRY_DELAY);
            }
            Err(e) => return Err(e),
        }
    }
    op()
}

/// Turns a host name, an IP or a `crate.slot` shorthand into the board IP.
///
/// `crate.slot` with crate in 1..=6 (or 0xF) and slot in 1..=6 (or 0xF) maps to
/// `192.168.(200+crate).slot`. Crate 0xF gives `192.168.200.x`, slot 0xF gives last octet 50.
pub fn resolve_remote(host: &str) -> Result<IpAddr> {
    if let Some(ip) = crate_slot_address(host) {
        log::debug!("{host} resolved as crate.slot to {ip}");
        return Ok(IpAddr::V4(ip));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let mut addrs = (host, 0u16).to_socket_addrs().map_err(|e| {
        log::error!("cannot resolve {host}: {e}");
        Error::Communication(format!("address {host} could not be resolved"))
    })?;
    addrs
        .find(|a| a.is_ipv4())
        .map(|a| a.ip())
        .ok_or_else(|| Error::Communication(format!("no IPv4 address for {host}")))
}

fn crate_slot_address(host: &str) -> Option<Ipv4Addr> {
    if host.len() > 5 {
        return None;
    }
    let (crate_str, slot_str) = host.split_once('.')?;
    if crate_str.is_empty() || slot_str.is_empty() || slot_str.contains('.') {
        return None;
    }
    let crate_no = parse_c_integer(crate_str).ok()?;
    let slot = parse_c_integer(slot_str).ok()?;
    let valid = |v: u32| (1..=6).contains(&v) || v == 0xF;
    if !valid(crate_no) || !valid(slot) {
        return None;
    }
    let third = if crate_no == 0xF { 200 } else { 200 + crate_no as u8 };
    let fourth = if slot == 0xF { 50 } else { slot as u8 };
    Some(Ipv4Addr::new(192, 168, third, fourth))
}

/// Register transport over a pair of connected UDP sockets.
///
/// Writes go to the write port, reads to the read port. Replies come back on
/// the socket the request left from.
#[derive(Debug)]
pub struct UdpTransport {
    remote: IpAddr,
    write_socket: UdpSocket,
    read_socket: UdpSocket,
    write_ack: bool,
    retries: Cell<u64>,
}

impl UdpTransport {
    /// Opens the endpoint of `host` at `port_offset` (0 for the WIB, `i * 0x10` for FEMB `i`).
    pub fn connect(host: &str, port_offset: u16) -> Result<Self> {
        let (write_port, read_port) = endpoint_ports(port_offset).ok_or_else(|| {
            Error::IndexOutOfRange(format!("port offset {port_offset} larger than 128"))
        })?;
        let remote = resolve_remote(host)?;
        Self::with_ports(remote, write_port, read_port)
    }

    pub fn with_ports(remote: IpAddr, write_port: u16, read_port: u16) -> Result<Self> {
        let write_socket = Self::open_socket(SocketAddr::new(remote, write_port))?;
        let read_socket = Self::open_socket(SocketAddr::new(remote, read_port))?;
        log::info!("UDP transport to {remote} (write {write_port}, read {read_port})");
        Ok(Self {
            remote,
            write_socket,
            read_socket,
            write_ack: true,
            retries: Cell::new(0),
        })
    }

    fn open_socket(target: SocketAddr) -> Result<UdpSocket> {
        let local = if target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local).inspect_err(|e| {
            log::error!("cannot create local UDP socket: {e}");
        })?;
        socket.set_read_timeout(Some(TIMEOUT))?;
        socket.connect(target).inspect_err(|e| {
            log::error!("cannot connect UDP socket to {target}: {e}");
        })?;
        Ok(socket)
    }

    pub fn remote_address(&self) -> IpAddr {
        self.remote
    }

    pub fn write_ack(&self) -> bool {
        self.write_ack
    }

    pub fn set_write_ack(&mut self, enable: bool) {
        self.write_ack = enable;
    }

    /// Drops datagrams left over from earlier timed out requests.
    fn flush(socket: &UdpSocket) -> Result<()> {
        let comm = |e: std::io::Error| Error::Communication(format!("flush failed: {e}"));
        socket.set_nonblocking(true).map_err(comm)?;
        let mut buf = [0u8; WIB_RPLY_BUFFER_SIZE];
        let mut dropped = 0;
        loop {
            match socket.recv(&mut buf) {
                Ok(_) => dropped += 1,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                // e.g. ECONNREFUSED from an earlier ICMP error
                Err(_) => dropped += 1,
            }
            if dropped > 1024 {
                break;
            }
        }
        if dropped > 0 {
            log::debug!("flushed {dropped} stale datagrams");
        }
        socket.set_nonblocking(false).map_err(comm)?;
        Ok(())
    }

    fn send(socket: &UdpSocket, request: WibRequest) -> Result<()> {
        log::trace!("UDP out: {request}");
        let buf: Vec<u8> = request.into();
        let sent = socket
            .send(&buf)
            .map_err(|e| Error::Communication(format!("send failed: {e}")))?;
        if sent != buf.len() {
            return Err(Error::Communication(format!(
                "short send {sent} != {}",
                buf.len()
            )));
        }
        Ok(())
    }

    fn receive(socket: &UdpSocket, address: u16) -> Result<u32> {
        let mut buf = vec![0u8; WIB_RPLY_BUFFER_SIZE];
        let len = socket.recv(&mut buf).map_err(|e| match e.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => {
                Error::Communication(format!("timeout waiting for reply from {address:#06x}"))
            }
            _ => Error::Communication(format!("receive failed: {e}")),
        })?;
        buf.truncate(len);
        let reply = WibReply::from(buf);
        log::trace!("UDP in:  {reply}");
        reply.validate(address)?;
        Ok(reply.data())
    }
}

impl Transport for UdpTransport {
    fn read(&self, address: u16) -> Result<u32> {
        Self::flush(&self.read_socket)?;
        Self::send(&self.read_socket, WibRequest::read(address))?;
        Self::receive(&self.read_socket, address)
    }

    fn write(&self, address: u16, value: u32) -> Result<()> {
        Self::flush(&self.write_socket)?;
        Self::send(&self.write_socket, WibRequest::write(address, value))?;
        if self.write_ack {
            Self::receive(&self.write_socket, address)?;
        }
        Ok(())
    }

    fn retry_count(&self) -> u64 {
        self.retries.get()
    }

    fn note_retry(&self) {
        self.retries.set(self.retries.get() + 1);
    }
}
