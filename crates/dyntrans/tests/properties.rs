mod common;

use common::{Op, PAGE, TestSystem, asm, cpu, run_to_halt};
use dyntrans::{Config, Handler};

#[test]
fn decode_once() {
    let program = [
        asm::set(1, 50),
        asm::add(2, 1),
        asm::dec_bnz(1, 4),
        asm::halt(),
    ];
    let mut sys = TestSystem::with_program(0, &program);
    let mut cpu = cpu(Config::default());

    run_to_halt(&mut cpu, &mut sys, 4);
    assert_eq!(cpu.regs.r[2], (1..=50).sum::<u32>());
    assert_eq!(cpu.stats.decoded, 4);

    let page = cpu.cache().lookup(0).unwrap();
    let before = cpu.cache().slots(page).to_vec();

    cpu.pc = 0;
    cpu.regs = Default::default();
    cpu.resume();
    run_to_halt(&mut cpu, &mut sys, 4);

    assert_eq!(cpu.stats.decoded, 4);
    assert_eq!(cpu.cache().slots(page), &before[..]);
}

#[test]
fn invalidate_forces_redecode() {
    let program = [asm::set(1, 1), asm::set(2, 2), asm::halt()];
    let mut sys = TestSystem::with_program(0, &program);
    let mut cpu = cpu(Config::default());

    cpu.run(&mut sys).unwrap();
    let page = cpu.cache().lookup(0).unwrap();
    assert_eq!(cpu.cache().slots(page)[0].handler, Handler::Op(Op::Set2));

    sys.load(0, &[asm::set(1, 7), asm::clear(2)]);
    cpu.invalidate_paddr(0);
    assert!(!cpu.cache().header(page).flags.combined());

    cpu.pc = 0;
    cpu.resume();
    cpu.run(&mut sys).unwrap();
    assert_eq!((cpu.regs.r[1], cpu.regs.r[2]), (7, 0));
    assert_eq!(cpu.stats.decoded, 6);
    assert_eq!(cpu.cache().slots(page)[0].handler, Handler::Op(Op::Set));
}

#[test]
fn guest_stores_to_code_are_noticed() {
    let program = [
        asm::set(4, 1),
        asm::set_high(1, 0x0600),
        // loop: the store replaces this add with a halt
        asm::add(2, 4),
        asm::store(1, 8),
        asm::branch(8),
    ];
    let mut sys = TestSystem::with_program(0, &program);
    let mut cpu = cpu(Config::default());

    assert_eq!(cpu.run(&mut sys), Ok(6));
    assert_eq!(cpu.regs.r[2], 1);
    assert!(!cpu.is_running());
    assert_eq!(cpu.pc, 12);
    assert_eq!(sys.ram.read_u32(8), Some(asm::halt()));
}

#[test]
fn page_isolation() {
    let mut sys = TestSystem::new();
    sys.load(0, &[asm::set(1, 1), asm::set(2, 2), asm::branch(PAGE as u32 + 8)]);
    sys.load(PAGE, &[asm::set(3, 3), asm::halt(), asm::add(1, 2), asm::halt()]);

    let mut cpu = cpu(Config::default());
    cpu.pc = PAGE;
    run_to_halt(&mut cpu, &mut sys, 2);

    let b = cpu.cache().lookup(PAGE).unwrap();
    let before = cpu.cache().slots(b).to_vec();
    let header = *cpu.cache().header(b);

    // translating page A, which ends up jumping into B, leaves B alone
    cpu.pc = 0;
    cpu.resume();
    cpu.debug.single_step = true;
    for _ in 0..3 {
        cpu.run(&mut sys).unwrap();
    }

    assert_eq!(cpu.cache().slots(b), &before[..]);
    assert_eq!(cpu.cache().header(b).flags, header.flags);
    assert_eq!(cpu.pc, PAGE + 8);
}

/// A program exercising fusion, loops, stores and page crossings.
fn workload() -> TestSystem {
    let mut sys = TestSystem::new();
    sys.load(
        0,
        &[
            asm::set(1, 10),
            asm::set(2, 3),
            asm::set(3, 0),
            asm::set(4, 0),
            // loop
            asm::add(3, 2),
            asm::set(5, 1),
            asm::set(6, 2),
            asm::add(4, 5),
            asm::add(4, 6),
            asm::store(3, 0x1000),
            asm::dec_bnz(1, 16),
            asm::branch(PAGE as u32 * 2 - 8),
        ],
    );
    sys.load(
        PAGE * 2 - 8,
        &[
            asm::set(7, 9),
            asm::set(0, 8),
            // next page
            asm::store(4, 0x1004),
            asm::halt(),
        ],
    );

    sys
}

#[test]
fn combining_is_invisible() {
    let mut bulk_sys = workload();
    let mut bulk = cpu(Config::default());
    let bulk_executed = run_to_halt(&mut bulk, &mut bulk_sys, 16);
    assert!(bulk.stats.combined > 0);

    let mut step_sys = workload();
    let mut step = cpu(Config {
        combine: false,
        ..Default::default()
    });
    step.debug.single_step = true;
    let step_executed = run_to_halt(&mut step, &mut step_sys, 1000);

    assert_eq!(bulk.regs, step.regs);
    assert_eq!(bulk.pc, step.pc);
    assert_eq!(bulk_executed, step_executed);
    assert_eq!(bulk_sys.ram.slice(0x1000, 8), step_sys.ram.slice(0x1000, 8));
    assert_eq!(bulk_sys.ram.read_u32(0x1000), Some(30));
    assert_eq!(bulk_sys.ram.read_u32(0x1004), Some(30));
    assert_eq!(step.stats.combined, 0);
}

#[test]
fn stepping_after_bulk_matches_bulk() {
    // translate and fuse everything in bulk, then step through the same code
    let mut sys = workload();
    let mut cpu = cpu(Config::default());
    run_to_halt(&mut cpu, &mut sys, 16);
    let expected = cpu.regs.clone();

    let mut sys = workload();
    cpu.regs = Default::default();
    cpu.pc = 0;
    cpu.resume();
    cpu.debug.single_step = true;
    run_to_halt(&mut cpu, &mut sys, 1000);

    assert_eq!(cpu.regs, expected);
    assert!(cpu.stats.reverted > 0);
}
