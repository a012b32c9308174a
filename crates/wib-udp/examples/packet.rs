use wib_udp::packet::{WibReply, WibRequest};

fn main() {
    // Create a request writing 0x1 to register 0x5
    let mut packet = WibRequest::write(0x5, 0x1);

    // Print debug output of a newly created packet
    println!("{packet:#?}");

    // Print display output of a newly created packet
    println!("{packet}");

    // Set individual field of a packet
    packet.set_addr(0x6);

    // Convert a packet into a vector (underlying buffer is reused)
    let packet_vec: Vec<u8> = packet.into();
    println!("{packet_vec:x?}");

    // A reply echoes the address followed by the register content
    let reply = WibReply::new(0x6, 0xDEAD);
    println!("{reply:?} valid={}", reply.validate(0x6).is_ok());
}
