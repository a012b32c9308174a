mod common;

use crate::common::*;

use libwib_rs::address_table::ConvertedValue;
use libwib_rs::{AddressTable, Error, RegisterMap, Result};

const MAP: &str = "\
WORD      0x0  0xFFFFFFFF rw\n\
LOW       0x1  0x000000FF rw\n\
MID       0x1  0x0000FF00 rw\n\
TOP       0x1  0x80000000 rw\n\
TEMP      0x2  0x0000FFFF r sc_conv=\"linear scale=0.25 offset=-5\"\n\
STATE     0x2  0x00030000 r conv=\"enum 0=IDLE 1=RUN\"\n\
FLAG      0x3  0x00000400 rw\n\
NIBBLE    0x3  0x000000F0 rw\n\
WIDE      0x3  0x0FFF0000 rw\n\
";

fn table() -> Result<(AddressTable, Sim)> {
    let mut map = RegisterMap::new();
    map.parse_str(MAP, "", 0)?;
    let sim = sim();
    Ok((sim_table(&map, &sim), sim))
}

#[test]
fn masked_read() -> Result<()> {
    logging_init("masked_access");

    let (table, sim) = table()?;
    sim.borrow_mut().regs.insert(0x1, 0x8000_A512);
    assert_eq!(0x12, table.read("LOW")?);
    assert_eq!(0xA5, table.read("mid")?);
    assert_eq!(1, table.read("TOP")?);
    assert_eq!(0x8000_A512, table.read(0x1u16)?);
    Ok(())
}

#[test]
fn masked_write_keeps_other_fields() -> Result<()> {
    logging_init("masked_access");

    let (table, sim) = table()?;
    sim.borrow_mut().regs.insert(0x1, 0x8000_A512);
    table.write("MID", 0x3C)?;
    assert_eq!(0x8000_3C12, sim.borrow().reg(0x1));

    // bits beyond the field are dropped
    table.write("LOW", 0x1FF)?;
    assert_eq!(0x8000_3CFF, sim.borrow().reg(0x1));

    table.write("TOP", 0)?;
    assert_eq!(0x0000_3CFF, sim.borrow().reg(0x1));
    Ok(())
}

#[test]
fn full_word_write_skips_read() -> Result<()> {
    logging_init("masked_access");

    let (table, sim) = table()?;
    table.write("WORD", 0xDEAD_BEEF)?;
    let state = sim.borrow();
    assert!(state.reads.is_empty());
    assert_eq!(vec![(0x0, 0xDEAD_BEEF)], state.writes);
    Ok(())
}

#[test]
fn block_writes() -> Result<()> {
    logging_init("masked_access");

    let (table, sim) = table()?;
    table.write_block("WORD", &[1, 2, 3])?;
    assert_eq!(vec![(0, 1), (1, 2), (2, 3)], sim.borrow().writes);

    assert!(matches!(
        table.write_block("MID", &[1]),
        Err(Error::BadBlockWrite(_))
    ));
    table.write_block(0x10u16, &[7, 8])?;
    assert_eq!(8, sim.borrow().reg(0x11));
    Ok(())
}

#[test]
fn unknown_names() -> Result<()> {
    logging_init("masked_access");

    let (table, sim) = table()?;
    assert!(matches!(table.read("NOPE"), Err(Error::UnknownRegister(_))));
    assert!(matches!(
        table.write("NOPE", 1),
        Err(Error::UnknownRegister(_))
    ));
    assert!(sim.borrow().writes.is_empty());
    Ok(())
}

#[test]
fn conversions() -> Result<()> {
    logging_init("masked_access");

    let (table, sim) = table()?;
    sim.borrow_mut().regs.insert(0x2, 0x0001_0064);
    assert_eq!(ConvertedValue::Scaled(20.0), table.read_converted("TEMP")?);
    assert_eq!(
        ConvertedValue::Named("RUN".into()),
        table.read_converted("STATE")?
    );
    Ok(())
}

#[test]
fn retried_access() -> Result<()> {
    logging_init("masked_access");

    let (table, sim) = table()?;
    sim.borrow_mut().regs.insert(0x1, 0x42);
    sim.borrow_mut().fail_reads = 3;
    assert_eq!(0x42, table.read_with_retry("LOW")?);
    assert_eq!(3, table.transport().retry_count());

    sim.borrow_mut().fail_reads = 1;
    assert!(matches!(table.read("LOW"), Err(Error::Communication(_))));

    sim.borrow_mut().fail_writes = 2;
    table.write_with_retry("WORD", 5)?;
    assert_eq!(5, sim.borrow().reg(0));
    Ok(())
}

#[test]
fn every_field_value_round_trips() -> Result<()> {
    logging_init("masked_access");

    let (table, sim) = table()?;
    for (name, mask) in [
        ("FLAG", 0x0000_0400u32),
        ("NIBBLE", 0x0000_00F0),
        ("WIDE", 0x0FFF_0000),
    ] {
        let max = mask >> mask.trailing_zeros();
        for background in [0, 0xFFFF_FFFF, 0xA5A5_5A5A] {
            for value in 0..=max {
                sim.borrow_mut().regs.insert(0x3, background);
                table.write(name, value)?;
                assert_eq!(value, table.read(name)?, "{name} = {value:#x}");
                let word = sim.borrow().reg(0x3);
                assert_eq!(background & !mask, word & !mask, "{name} = {value:#x}");
            }
        }
    }
    Ok(())
}

#[test]
fn retry_budget() -> Result<()> {
    logging_init("masked_access");

    for budget in [1u32, 2, 5, 10] {
        for failures in 0..=budget + 1 {
            let (mut table, sim) = table()?;
            table.set_retry_count(budget);
            sim.borrow_mut().regs.insert(0x0, 0x1234);
            let attempts = budget.min(failures + 1);

            sim.borrow_mut().fail_reads = failures;
            let read = table.read_with_retry("WORD");
            assert_eq!(attempts as usize, sim.borrow().reads.len());
            if budget > failures {
                assert_eq!(0x1234, read?);
            } else {
                assert!(matches!(read, Err(Error::Communication(_))));
            }
            assert_eq!(attempts as u64 - 1, table.transport().retry_count());

            sim.borrow_mut().fail_writes = failures;
            let write = table.write_with_retry("WORD", 0x5678);
            assert_eq!(attempts, sim.borrow().write_attempts);
            if budget > failures {
                write?;
                assert_eq!(0x5678, sim.borrow().reg(0x0));
            } else {
                assert!(matches!(write, Err(Error::Communication(_))));
                assert_eq!(0x1234, sim.borrow().reg(0x0));
            }
        }
    }
    Ok(())
}

#[test]
fn zero_budget_is_a_single_try() -> Result<()> {
    logging_init("masked_access");

    let (mut table, sim) = table()?;
    table.set_retry_count(0);
    sim.borrow_mut().fail_reads = 1;
    assert!(matches!(
        table.read_with_retry("WORD"),
        Err(Error::Communication(_))
    ));
    assert_eq!(1, sim.borrow().reads.len());

    sim.borrow_mut().fail_writes = 1;
    assert!(matches!(
        table.write_with_retry("WORD", 1),
        Err(Error::Communication(_))
    ));
    assert_eq!(1, sim.borrow().write_attempts);
    assert_eq!(0, table.transport().retry_count());
    Ok(())
}
