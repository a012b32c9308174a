mod common;

use crate::common::*;

use libwib_rs::{Error, FembSettings, FembStatus, FembTolerance, Result};

fn settings() -> FembSettings {
    FembSettings {
        gain: 2,
        shape: 1,
        expected_firmware: FEMB_FIRMWARE,
        ..Default::default()
    }
}

#[test]
fn configure_daughterboard() -> Result<()> {
    logging_init("wib_femb");

    let bench = bench(RCE_COUNTS)?;
    let status = bench.wib.configure_daughterboard(1, &settings())?;
    assert_eq!(
        FembStatus::Configured {
            phase: 0xFFFF,
            synced: true
        },
        status
    );

    let board = bench.board.borrow();
    assert_eq!(0x1F, board.reg(wib_reg::POWER) & 0x1F);
    // one do-not-disturb scope for the whole bring-up
    assert_eq!(vec![1, 0], board.writes_to(wib_reg::DND));

    let femb = bench.femb(1);
    assert_eq!(9, femb.reg(femb_reg::STREAM_EN));
    assert_eq!(0xFF, femb.reg(femb_reg::PHASE_HIGH));
    assert_eq!(0xFF, femb.reg(femb_reg::PHASE_LOW));
    // configuration block shifted in twice
    assert_eq!(2, femb.writes_to(0x200).len());
    assert_eq!(0x0404_0404, femb.reg(0x004));
    assert!(bench.femb(2).writes.is_empty());
    Ok(())
}

#[test]
fn settings_checked_before_access() -> Result<()> {
    logging_init("wib_femb");

    let bench = bench(RCE_COUNTS)?;
    let writes = bench.board.borrow().writes.len();

    for bad in [
        FembSettings { gain: 4, ..settings() },
        FembSettings { baseline: 3, ..settings() },
        FembSettings { pulse_mode: 3, ..settings() },
        FembSettings { pulse_mode: 1, pulse_dac: 64, ..settings() },
        FembSettings { clock_phases: vec![], ..settings() },
    ] {
        assert!(matches!(
            bench.wib.configure_daughterboard(1, &bad),
            Err(Error::InvalidSetting(_))
        ));
    }
    assert!(matches!(
        bench.wib.configure_daughterboard(5, &settings()),
        Err(Error::IndexOutOfRange(_))
    ));
    assert_eq!(writes, bench.board.borrow().writes.len());
    assert!(bench.femb(1).writes.is_empty());
    Ok(())
}

#[test]
fn unreachable_femb() -> Result<()> {
    logging_init("wib_femb");

    let mut bench = bench(RCE_COUNTS)?;
    bench.fembs[1].borrow_mut().regs.insert(femb_reg::VERSION_ID, 0);

    assert!(matches!(
        bench.wib.configure_daughterboard(2, &settings()),
        Err(Error::FembUnreachable(2))
    ));
    assert_eq!(0, bench.board.borrow().reg(wib_reg::POWER) & 0x3E0);
    assert_eq!(0, bench.board.borrow().reg(wib_reg::DND));

    bench.wib.set_tolerance(FembTolerance {
        continue_on_reg_read_error: true,
        ..Default::default()
    });
    assert_eq!(
        FembStatus::Unreachable,
        bench.wib.configure_daughterboard(2, &settings())?
    );
    assert_eq!(0, bench.board.borrow().reg(wib_reg::POWER) & 0x3E0);
    Ok(())
}

#[test]
fn firmware_mismatch_restores_dnd() -> Result<()> {
    logging_init("wib_femb");

    let bench = bench(RCE_COUNTS)?;
    let wrong = FembSettings {
        expected_firmware: 0x0101,
        ..settings()
    };
    match bench.wib.configure_daughterboard(3, &wrong) {
        Err(Error::FirmwareVersionMismatch {
            target,
            found,
            expected,
        }) => {
            assert_eq!("FEMB3", target);
            assert_eq!(FEMB_FIRMWARE, found);
            assert_eq!(0x0101, expected);
        }
        other => panic!("expected a firmware mismatch, got {other:?}"),
    }
    assert_eq!(0, bench.board.borrow().reg(wib_reg::DND));
    Ok(())
}

#[test]
fn dnd_keeps_its_previous_value() -> Result<()> {
    logging_init("wib_femb");

    let bench = bench(RCE_COUNTS)?;
    bench.board.borrow_mut().regs.insert(wib_reg::DND, 1);

    bench.wib.configure_daughterboard(1, &settings())?;
    assert_eq!(vec![1, 1], bench.board.borrow().writes_to(wib_reg::DND));

    let wrong = FembSettings {
        expected_firmware: 0x0101,
        ..settings()
    };
    assert!(bench.wib.configure_daughterboard(2, &wrong).is_err());
    assert_eq!(1, bench.board.borrow().reg(wib_reg::DND));

    let failed: Result<()> = bench
        .wib
        .with_do_not_disturb(|_| Err(Error::AdcSync {
            femb: 1,
            detail: "not synced".into(),
        }));
    assert!(matches!(failed, Err(Error::AdcSync { .. })));
    assert_eq!(1, bench.board.borrow().reg(wib_reg::DND));

    bench.board.borrow_mut().regs.insert(wib_reg::DND, 0);
    assert_eq!(1, bench.wib.with_do_not_disturb(|wib| wib.read(wib_reg::DND))?);
    assert_eq!(Some(&0), bench.board.borrow().writes_to(wib_reg::DND).last());
    Ok(())
}

#[test]
fn spi_readback_mismatch() -> Result<()> {
    logging_init("wib_femb");

    let mut bench = bench(RCE_COUNTS)?;
    bench.fembs[2].borrow_mut().read_hook = Some(Box::new(|address, _| {
        (0x250..0x250 + 72)
            .contains(&address)
            .then_some(0xDEAD_0000)
    }));

    assert!(matches!(
        bench.wib.configure_daughterboard(3, &settings()),
        Err(Error::SpiReadbackMismatch(3))
    ));

    bench.wib.set_tolerance(FembTolerance {
        continue_on_spi_error: true,
        ..Default::default()
    });
    assert!(matches!(
        bench.wib.configure_daughterboard(3, &settings())?,
        FembStatus::Configured { synced: true, .. }
    ));
    Ok(())
}

#[test]
fn phases_that_never_sync() -> Result<()> {
    logging_init("wib_femb");

    let mut bench = bench(RCE_COUNTS)?;
    bench.fembs[0].borrow_mut().read_hook = Some(phase_sync_hook(|_| 0xFFFF));
    let listed = FembSettings {
        clock_phases: vec![0x1234, 0xFFFF],
        ..settings()
    };

    assert!(matches!(
        bench.wib.configure_daughterboard(1, &listed),
        Err(Error::AdcSync { femb: 1, .. })
    ));

    bench.wib.set_tolerance(FembTolerance {
        continue_if_phases_dont_sync: true,
        ..Default::default()
    });
    assert!(matches!(
        bench.wib.configure_daughterboard(1, &listed),
        Err(Error::AdcSync { femb: 1, .. })
    ));

    bench.wib.set_tolerance(FembTolerance {
        continue_if_phases_dont_sync: true,
        continue_on_sync_error: true,
        ..Default::default()
    });
    assert_eq!(
        FembStatus::Configured {
            phase: 0x1234,
            synced: false
        },
        bench.wib.configure_daughterboard(1, &listed)?
    );
    Ok(())
}

#[test]
fn hunt_after_listed_phases() -> Result<()> {
    logging_init("wib_femb");

    let mut bench = bench(RCE_COUNTS)?;
    // syncs once the high byte is all ones
    bench.fembs[0].borrow_mut().read_hook = Some(phase_sync_hook(|phase| {
        if phase >> 8 == 0xFF { 0 } else { 0xFFFF }
    }));
    bench.wib.set_tolerance(FembTolerance {
        continue_if_phases_dont_sync: true,
        ..Default::default()
    });

    let status = bench.wib.configure_daughterboard(
        1,
        &FembSettings {
            clock_phases: vec![0x0042],
            ..settings()
        },
    )?;
    assert_eq!(
        FembStatus::Configured {
            phase: 0xFF42,
            synced: true
        },
        status
    );
    Ok(())
}

#[test]
fn pulsers() -> Result<()> {
    logging_init("wib_femb");

    let bench = bench(RCE_COUNTS)?;
    bench.wib.setup_fpga_pulser(1, 17)?;
    {
        let femb = bench.femb(1);
        // DAC_SELECT, EXT_TP_EN and FPGA_TP_EN
        assert_eq!(0x0D, femb.reg(femb_reg::PULSER));
        assert_eq!(17 | (219 << 8) | (497 << 16), femb.reg(femb_reg::PULSE_TIMING));
    }

    bench.wib.setup_internal_pulser(1)?;
    let femb = bench.femb(1);
    // EXT_TP_EN and ASIC_TP_EN
    assert_eq!(0x14, femb.reg(femb_reg::PULSER));
    assert_eq!(219 << 8 | (497 << 16), femb.reg(femb_reg::PULSE_TIMING));
    Ok(())
}

#[test]
fn pulser_mode_in_configuration() -> Result<()> {
    logging_init("wib_femb");

    let bench = bench(RCE_COUNTS)?;
    bench.wib.configure_daughterboard(
        4,
        &FembSettings {
            pulse_mode: 2,
            pulse_dac: 31,
            ext_clk: 1,
            ..settings()
        },
    )?;
    let femb = bench.femb(4);
    assert_eq!(31, femb.reg(femb_reg::PULSE_TIMING) & 0x3F);
    assert_eq!(0x0063 << 16, femb.reg(21));
    assert_eq!(4, femb.writes_to(35).len());
    Ok(())
}

#[test]
fn femb_register_helpers() -> Result<()> {
    logging_init("wib_femb");

    let bench = bench(RCE_COUNTS)?;
    bench.fembs[0].borrow_mut().regs.insert(0x20, 0xAAAA_AAAA);
    bench.wib.write_femb_bits(1, 0x20, 8, 0xFF, 0x1FF)?;
    assert_eq!(0xAAAA_FFAA, bench.femb(1).reg(0x20));

    bench.wib.enable_adc(1, false)?;
    assert_eq!(0xFF, bench.femb(1).reg(0x003));
    bench.wib.enable_adc(1, true)?;
    assert_eq!(0x00, bench.femb(1).reg(0x003));

    assert!(bench.wib.femb_reachable(1)?);
    assert!(matches!(
        bench.wib.read_femb(0, "VERSION_ID"),
        Err(Error::IndexOutOfRange(_))
    ));
    Ok(())
}
