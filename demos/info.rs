use anyhow::{Context, Result};
use libwib_rs::Wib;

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "192.168.200.1".to_string());
    let wib_table = args.next().unwrap_or_else(|| "WIB.adt".to_string());
    let femb_table = args.next().unwrap_or_else(|| "FEMB.adt".to_string());

    let wib = Wib::connect(&host, &wib_table, &femb_table)
        .with_context(|| format!("opening WIB {host}"))?;

    println!("DAQ mode: {:?}", wib.daq_mode());
    println!(
        "FEMBs: {}, DAQ links: {}",
        wib.femb_count(),
        wib.daq_link_count()
    );
    println!("Firmware: {:#010x}", wib.read("SYSTEM.FW_VERSION")?);
    println!("PDTS state: {}", wib.pdts_state()?);

    for femb in 1..=libwib_rs::FEMB_COUNT {
        match wib.read_femb(femb, "VERSION_ID") {
            Ok(version) => println!("FEMB {femb} firmware: {version:#x}"),
            Err(e) => println!("FEMB {femb}: {e}"),
        }
    }
    Ok(())
}
