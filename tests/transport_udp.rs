mod common;

use crate::common::*;

use libwib_rs::transport::{Transport, UdpTransport};
use libwib_rs::{Error, Result};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use wib_udp::packet::{WibReply, WibRequest};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

type Registers = Arc<Mutex<HashMap<u16, u32>>>;

/// Answers requests on `socket` like the firmware does.
///
/// `write` selects whether requests store data. The first `garble` replies
/// echo a wrong address.
async fn serve(socket: UdpSocket, registers: Registers, write: bool, garble: Arc<AtomicU32>) {
    let mut buf = vec![0u8; 64];
    loop {
        let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
            return;
        };
        let request = WibRequest::from(buf[..len].to_vec());
        if request.validate().is_err() {
            continue;
        }
        let data = {
            let mut regs = registers.lock().unwrap();
            if write {
                regs.insert(request.addr(), request.data());
            }
            regs.get(&request.addr()).copied().unwrap_or(0)
        };
        let mut addr = request.addr();
        if garble.load(Ordering::SeqCst) > 0 {
            garble.fetch_sub(1, Ordering::SeqCst);
            addr = addr.wrapping_add(1);
        }
        let reply: Vec<u8> = WibReply::new(addr, data).into();
        let _ = socket.send_to(&reply, peer).await;
    }
}

async fn device(garble: u32) -> Result<(u16, u16, Registers)> {
    let registers = Registers::default();
    let garble = Arc::new(AtomicU32::new(garble));
    let write_socket = UdpSocket::bind((LOCALHOST, 0)).await?;
    let read_socket = UdpSocket::bind((LOCALHOST, 0)).await?;
    let write_port = write_socket.local_addr()?.port();
    let read_port = read_socket.local_addr()?.port();
    tokio::spawn(serve(write_socket, registers.clone(), true, garble.clone()));
    tokio::spawn(serve(read_socket, registers.clone(), false, garble));
    Ok((write_port, read_port, registers))
}

#[tokio::test(flavor = "multi_thread")]
async fn write_then_read() -> Result<()> {
    logging_init("transport_udp");

    let (write_port, read_port, registers) = device(0).await?;
    let value = tokio::task::spawn_blocking(move || -> Result<u32> {
        let transport = UdpTransport::with_ports(LOCALHOST, write_port, read_port)?;
        transport.write(0x0012, 0xCAFE_F00D)?;
        transport.read(0x0012)
    })
    .await
    .map_err(|e| Error::Communication(e.to_string()))??;

    assert_eq!(0xCAFE_F00D, value);
    assert_eq!(Some(&0xCAFE_F00D), registers.lock().unwrap().get(&0x0012));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn mismatched_reply_is_retried() -> Result<()> {
    logging_init("transport_udp");

    let (write_port, read_port, registers) = device(2).await?;
    registers.lock().unwrap().insert(0x0034, 0x55);
    let (first, retried, retries) = tokio::task::spawn_blocking(move || {
        let transport = UdpTransport::with_ports(LOCALHOST, write_port, read_port)?;
        let first = transport.read(0x0034);
        let retried = transport.read_with_retry(0x0034, 10)?;
        Ok::<_, Error>((first, retried, transport.retry_count()))
    })
    .await
    .map_err(|e| Error::Communication(e.to_string()))??;

    assert!(matches!(first, Err(Error::Communication(_))));
    assert_eq!(0x55, retried);
    assert_eq!(1, retries);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn silent_device_times_out() -> Result<()> {
    logging_init("transport_udp");

    // bound but never answering
    let silent = UdpSocket::bind((LOCALHOST, 0)).await?;
    let port = silent.local_addr()?.port();
    let (read, write) = tokio::task::spawn_blocking(move || {
        let mut transport = UdpTransport::with_ports(LOCALHOST, port, port)?;
        let read = transport.read(0x1);
        transport.set_write_ack(false);
        let write = transport.write(0x1, 1);
        Ok::<_, Error>((read, write))
    })
    .await
    .map_err(|e| Error::Communication(e.to_string()))??;

    assert!(matches!(read, Err(Error::Communication(_))));
    assert!(write.is_ok());
    drop(silent);
    Ok(())
}

#[test]
fn port_offsets() {
    logging_init("transport_udp");

    assert!(matches!(
        UdpTransport::connect("127.0.0.1", 129),
        Err(Error::IndexOutOfRange(_))
    ));
    let transport = UdpTransport::connect("127.0.0.1", 0x30).unwrap();
    assert_eq!(LOCALHOST, transport.remote_address());
    assert!(transport.write_ack());
}
