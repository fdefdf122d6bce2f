//! A toy architecture and a test system for the engine tests.
#![allow(dead_code)]

use dyntrans::{
    Arch, Config, Cpu, Ctx, DecodeCtx, DecodeError, ExecError, Geometry, InstrCall, Operand,
    Pattern, Ram, SlotRef,
    system::{Access, CacheKind, Diagnostic, Direction, HostPage, System, Translation},
};

/// 128 byte pages of 32 four byte instructions.
pub const GEOMETRY: Geometry = Geometry::new(7, 2);
pub const PAGE: u64 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Set,
    SetHigh,
    Clear,
    Add,
    Store,
    Branch,
    BranchSamePage,
    DecBnz,
    DecBnzSamePage,
    Halt,
    /// Stores a register eight times over, more than a single access
    /// can move.
    StoreWide,
    /// Two `Set`s in a row.
    Set2,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Regs {
    pub r: [u32; 8],
}

pub struct Toy;

/// Instruction encoders. Every instruction is a little endian word with the
/// opcode in the top byte, a register in the next one and a 16 bit
/// immediate below.
pub mod asm {
    fn encode(op: u32, rd: u32, imm: u32) -> u32 {
        (op << 24) | ((rd & 7) << 16) | (imm & 0xFFFF)
    }

    pub fn set(rd: u32, imm: u32) -> u32 {
        encode(0x01, rd, imm)
    }

    pub fn clear(rd: u32) -> u32 {
        encode(0x02, rd, 0)
    }

    pub fn add(rd: u32, rs: u32) -> u32 {
        encode(0x03, rd, rs)
    }

    pub fn store(rs: u32, addr: u32) -> u32 {
        encode(0x04, rs, addr)
    }

    pub fn branch(target: u32) -> u32 {
        encode(0x05, 0, target)
    }

    pub fn halt() -> u32 {
        encode(0x06, 0, 0)
    }

    pub fn dec_bnz(rd: u32, target: u32) -> u32 {
        encode(0x07, rd, target)
    }

    pub fn set_high(rd: u32, imm: u32) -> u32 {
        encode(0x08, rd, imm)
    }

    pub fn store_wide(rs: u32, addr: u32) -> u32 {
        encode(0x09, rs, addr)
    }

    pub fn illegal() -> u32 {
        0xFF00_0000
    }
}

fn fuse_set_2(window: &[InstrCall<Op>], _: SlotRef) -> Option<InstrCall<Op>> {
    match window {
        [a, b] if a.op() == Some(&Op::Set) && b.op() == Some(&Op::Set) => {
            Some(InstrCall::new(Op::Set2, a.args))
        }
        _ => None,
    }
}

const PATTERNS: &[Pattern<Toy>] = &[Pattern {
    name: "set_2",
    len: 2,
    fuse: fuse_set_2,
}];

impl Arch for Toy {
    type Registers = Regs;
    type Op = Op;

    const NAME: &'static str = "toy";
    const GEOMETRY: Geometry = GEOMETRY;

    fn decode(ctx: &DecodeCtx<'_, Self>, raw: &[u8]) -> Result<InstrCall<Op>, DecodeError> {
        let word = u32::from_le_bytes(raw.try_into().unwrap());
        let rd = Operand::Reg(((word >> 16) & 7) as u8);
        let imm = word & 0xFFFF;

        let ic = match word >> 24 {
            0x01 => InstrCall::new(Op::Set, [rd, Operand::Imm(imm as u64), Operand::None]),
            0x02 => InstrCall::new(Op::Clear, [rd, Operand::None, Operand::None]),
            0x03 => InstrCall::new(Op::Add, [rd, Operand::Reg(imm as u8 & 7), Operand::None]),
            0x04 => InstrCall::new(Op::Store, [rd, Operand::Imm(imm as u64), Operand::None]),
            0x05 => match ctx.same_page(imm as u64) {
                Some(slot) => InstrCall::new(Op::BranchSamePage, [slot, Operand::None, Operand::None]),
                None => InstrCall::new(Op::Branch, [Operand::Imm(imm as u64), Operand::None, Operand::None]),
            },
            0x06 => InstrCall::new(Op::Halt, Default::default()),
            0x07 => match ctx.same_page(imm as u64) {
                Some(slot) => InstrCall::new(Op::DecBnzSamePage, [rd, slot, Operand::None]),
                None => InstrCall::new(Op::DecBnz, [rd, Operand::Imm(imm as u64), Operand::None]),
            },
            0x08 => InstrCall::new(Op::SetHigh, [rd, Operand::Imm(imm as u64), Operand::None]),
            0x09 => InstrCall::new(Op::StoreWide, [rd, Operand::Imm(imm as u64), Operand::None]),
            _ => return Err(DecodeError::Illegal { raw: word as u64 }),
        };

        Ok(ic)
    }

    fn execute(ctx: &mut Ctx<'_, Self>, op: Op, ic: &InstrCall<Op>) {
        let [a, b, _] = ic.args;
        match op {
            Op::Set => ctx.regs().r[a.reg()] = b.imm() as u32,
            Op::SetHigh => ctx.regs().r[a.reg()] = (b.imm() as u32) << 16,
            Op::Clear => ctx.regs().r[a.reg()] = 0,
            Op::Add => {
                let value = ctx.regs().r[b.reg()];
                let rd = &mut ctx.regs().r[a.reg()];
                *rd = rd.wrapping_add(value);
            }
            Op::Store => {
                let value = ctx.regs().r[a.reg()];
                if !ctx.store(b.imm(), &value.to_le_bytes()) {
                    ctx.fault(ExecError::DataAccess { vaddr: b.imm() });
                }
            }
            Op::StoreWide => {
                let bytes = ctx.regs().r[a.reg()].to_le_bytes().repeat(8);
                if !ctx.store(b.imm(), &bytes) {
                    ctx.fault(ExecError::DataAccess { vaddr: b.imm() });
                }
            }
            Op::Branch => ctx.jump(a.imm()),
            Op::BranchSamePage => ctx.jump_same_page(a.slot()),
            Op::DecBnz | Op::DecBnzSamePage => {
                let rd = &mut ctx.regs().r[a.reg()];
                *rd = rd.wrapping_sub(1);
                if *rd != 0 {
                    match b {
                        Operand::Slot(slot) => ctx.jump_same_page(slot),
                        _ => ctx.jump(b.imm()),
                    }
                }
            }
            Op::Halt => ctx.halt(),
            Op::Set2 => {
                ctx.regs().r[a.reg()] = b.imm() as u32;

                let [c, d, _] = ctx.peek(1).args;
                ctx.regs().r[c.reg()] = d.imm() as u32;
                ctx.skip(1);
                ctx.count(1);
            }
        }
    }

    fn patterns() -> &'static [Pattern<Self>] {
        PATTERNS
    }

    fn disassemble(raw: &[u8], _: u64) -> String {
        let word = u32::from_le_bytes(raw.try_into().unwrap());
        format!("op{:02x} r{}, {:#x}", word >> 24, (word >> 16) & 7, word & 0xFFFF)
    }
}

/// RAM with instrumentation and an unreadable page.
pub struct TestSystem {
    pub ram: Ram,
    /// A page that is mapped but cannot be read.
    pub hole: Option<u64>,
    pub translations: usize,
    pub diagnostics: Vec<String>,
    pub traces: Vec<(u64, String)>,
}

impl TestSystem {
    pub fn new() -> Self {
        Self {
            ram: Ram::new(0, 0x4000, GEOMETRY.page_shift),
            hole: None,
            translations: 0,
            diagnostics: Vec::new(),
            traces: Vec::new(),
        }
    }

    pub fn with_program(addr: u64, program: &[u32]) -> Self {
        let mut sys = Self::new();
        sys.load(addr, program);
        sys
    }

    /// Writes instructions behind the CPU's back.
    pub fn load(&mut self, addr: u64, program: &[u32]) {
        let bytes: Vec<u8> = program.iter().flat_map(|w| w.to_le_bytes()).collect();
        assert!(self.ram.load(addr, &bytes));
    }

    fn in_hole(&self, addr: u64) -> bool {
        self.hole
            .is_some_and(|h| GEOMETRY.page_base(h) == GEOMETRY.page_base(addr))
    }
}

impl System for TestSystem {
    fn rw(
        &mut self,
        cpu: usize,
        vaddr: u64,
        buf: &mut [u8],
        direction: Direction,
        kind: CacheKind,
    ) -> bool {
        !self.in_hole(vaddr) && self.ram.rw(cpu, vaddr, buf, direction, kind)
    }

    fn translate(&mut self, cpu: usize, vaddr: u64, access: Access) -> Option<Translation> {
        self.translations += 1;
        if self.in_hole(vaddr) {
            return Some(Translation {
                paddr: vaddr,
                writable: false,
            });
        }

        self.ram.translate(cpu, vaddr, access)
    }

    fn host_page(&self, paddr: u64) -> Option<HostPage> {
        if self.in_hole(paddr) {
            return None;
        }

        self.ram.host_page(paddr)
    }

    fn host_memory(&self) -> &[u8] {
        self.ram.host_memory()
    }

    fn host_memory_mut(&mut self) -> &mut [u8] {
        self.ram.host_memory_mut()
    }

    fn on_trace(&mut self, _: usize, pc: u64, disassembly: &str) {
        self.traces.push((pc, disassembly.to_owned()));
    }

    fn diagnostic(&mut self, diagnostic: &Diagnostic<'_>) {
        self.diagnostics.push(format!(
            "{} {}\n{}",
            diagnostic.error, diagnostic.disassembly, diagnostic.registers
        ));
    }
}

pub fn cpu(config: Config) -> Cpu<Toy> {
    Cpu::new(0, config)
}

/// Runs until the CPU halts or faults, at most `batches` times.
pub fn run_to_halt(cpu: &mut Cpu<Toy>, sys: &mut TestSystem, batches: usize) -> u64 {
    let mut executed = 0;
    for _ in 0..batches {
        if !cpu.is_running() {
            break;
        }

        executed += cpu.run(sys).unwrap();
    }

    executed
}
