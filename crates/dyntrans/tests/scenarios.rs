mod common;

use common::{Op, PAGE, TestSystem, Toy, asm, cpu, run_to_halt};
use dyntrans::{
    Config, Handler, PageId,
    cache::TranslationCache,
    system::Access,
    tlb::Tlb,
};

#[test]
fn fresh_page_layout() {
    let mut cache = TranslationCache::<Op>::new(common::GEOMETRY, 16, 8);
    let resolved = cache.resolve(0x1000);

    assert!(!resolved.reset);
    assert_eq!(resolved.page, PageId(0));
    assert_eq!(cache.header(resolved.page).paddr, 0x1000);

    // 32 instruction slots plus the end of page sentinel after them, rather
    // than a sentinel taking the place of the last instruction
    let slots = cache.slots(resolved.page);
    assert_eq!(slots.len(), 33);
    for slot in &slots[..32] {
        assert_eq!(slot.handler, Handler::Stub);
    }
    assert_eq!(slots[32].handler, Handler::EndOfPage);
}

#[test]
fn first_dispatch_translates_and_executes() {
    let mut sys = TestSystem::with_program(0, &[asm::clear(3), asm::halt()]);
    let mut cpu = cpu(Config::default());
    cpu.regs.r[3] = 0xDEAD;
    cpu.debug.single_step = true;

    assert_eq!(cpu.run(&mut sys), Ok(1));
    assert_eq!(cpu.regs.r[3], 0);
    assert_eq!(cpu.pc, 4);

    let page = cpu.cache().lookup(0).unwrap();
    assert_eq!(cpu.cache().slots(page)[0].handler, Handler::Op(Op::Clear));
    assert_eq!(cpu.cache().slots(page)[1].handler, Handler::Stub);
}

#[test]
fn fused_pair_and_single_step_revert() {
    let program = [asm::set(1, 0x11), asm::set(2, 0x22), asm::halt()];
    let mut sys = TestSystem::with_program(0, &program);
    let mut cpu = cpu(Config::default());

    assert_eq!(cpu.run(&mut sys), Ok(3));
    let page = cpu.cache().lookup(0).unwrap();
    assert!(cpu.cache().header(page).flags.combined());
    assert_eq!(cpu.cache().slots(page)[0].handler, Handler::Op(Op::Set2));
    assert_eq!(cpu.stats.combined, 1);

    // the fused call now does both in one dispatch
    cpu.regs = Default::default();
    cpu.pc = 0;
    cpu.resume();
    let decoded = cpu.stats.decoded;
    assert_eq!(cpu.run(&mut sys), Ok(3));
    assert_eq!((cpu.regs.r[1], cpu.regs.r[2]), (0x11, 0x22));
    assert_eq!(cpu.stats.decoded, decoded);

    // stepping reverts the page before dispatching
    cpu.pc = 0;
    cpu.resume();
    cpu.debug.single_step = true;
    assert_eq!(cpu.run(&mut sys), Ok(1));

    let slots = cpu.cache().slots(page);
    assert!(!cpu.cache().header(page).flags.combined());
    assert_eq!(slots[0].handler, Handler::Op(Op::Set));
    assert_eq!(slots[1].handler, Handler::Stub);
    assert_eq!(slots[2].handler, Handler::Stub);
    assert_eq!(cpu.stats.reverted, 1);
    assert_eq!(cpu.pc, 4);
}

#[test]
fn arena_reset_when_full() {
    // each page jumps to the next one
    let mut sys = TestSystem::new();
    for page in 0..4 {
        sys.load(page * PAGE, &[asm::add(1, 2), asm::branch(((page + 1) * PAGE) as u32)]);
    }
    sys.load(4 * PAGE, &[asm::halt()]);

    let mut cpu = cpu(Config {
        cache_pages: 4,
        ..Default::default()
    });
    cpu.regs.r[2] = 1;

    run_to_halt(&mut cpu, &mut sys, 8);
    assert_eq!(cpu.regs.r[1], 4);
    assert_eq!(cpu.cache().stats.resets, 1);
    assert_eq!(cpu.cache().len(), 1);
    assert_eq!(cpu.cache().lookup(4 * PAGE), Some(PageId(0)));
    assert_eq!(cpu.cache().lookup(0), None);

    // only the mapping of the surviving page still knows its page
    let code: Vec<_> = cpu.tlb().entries().iter().filter_map(|e| e.code).collect();
    assert_eq!(code, [PageId(0)]);
}

#[test]
fn tlb_evicts_least_recently_used() {
    let mut sys = TestSystem::new();
    let mut tlb = Tlb::new(common::GEOMETRY, 4, true);

    for page in 0..4 {
        tlb.lookup_or_insert(&mut sys, 0, page * PAGE, Access::Read).unwrap();
    }
    assert_eq!(sys.translations, 4);

    tlb.lookup_or_insert(&mut sys, 0, 4 * PAGE, Access::Read).unwrap();
    assert_eq!(tlb.stats.evictions, 1);
    assert!(tlb.find(0).is_none());
    for page in 1..=4 {
        assert!(tlb.find(page).is_some());
    }

    let lookup = tlb.lookup_or_insert(&mut sys, 0, 0, Access::Read).unwrap();
    assert!(lookup.filled);
    assert_eq!(sys.translations, 6);

    // that evicted page 1, the next oldest
    assert!(tlb.find(1).is_none());
}

#[test]
fn run_is_usable_from_toy() {
    // sanity check of the toy architecture itself
    let mut sys = TestSystem::with_program(0, &[asm::set(0, 5), asm::set_high(1, 1), asm::halt()]);
    let mut cpu = dyntrans::Cpu::<Toy>::new(0, Config::default());

    assert_eq!(cpu.run(&mut sys), Ok(3));
    assert_eq!(cpu.regs.r[0], 5);
    assert_eq!(cpu.regs.r[1], 0x1_0000);
    assert!(!cpu.is_running());
}
