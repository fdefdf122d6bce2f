//! A 32-bit little endian ARM subset for the dyntrans engine.
//!
//! Covers data processing, multiplies, single and block transfers, branches
//! and `swi`, which halts the CPU. Thumb, coprocessors, halfword transfers
//! and processor modes are not implemented and decode as unimplemented
//! instructions.

pub mod combine;
pub mod decode;
pub mod disasm;
pub mod exec;
pub mod ins;

use bitos::bitos;
use dyntrans::{Arch, Ctx, DecodeCtx, DecodeError, Geometry, InstrCall, Pattern};
use std::fmt::Write;
use strum::{Display, FromRepr};

/// Current program status register. Only the condition flags are modeled.
#[bitos(32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cpsr {
    #[bits(28)]
    pub overflow: bool,
    #[bits(29)]
    pub carry: bool,
    #[bits(30)]
    pub zero: bool,
    #[bits(31)]
    pub negative: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registers {
    /// General purpose registers. `r[15]` is unused: the program counter is
    /// owned by the engine.
    pub r: [u32; 16],
    pub cpsr: Cpsr,
}

/// Register indices with special meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, Display)]
#[repr(u8)]
pub enum Special {
    #[strum(to_string = "sp")]
    Sp = 13,
    #[strum(to_string = "lr")]
    Lr = 14,
    #[strum(to_string = "pc")]
    Pc = 15,
}

pub const PC: usize = 15;
pub const LR: usize = 14;

/// Translated ARM operations.
pub use exec::Op;

pub struct Arm;

impl Arch for Arm {
    type Registers = Registers;
    type Op = Op;

    const NAME: &'static str = "arm";
    const GEOMETRY: Geometry = Geometry::new(12, 2);

    fn decode(ctx: &DecodeCtx<'_, Self>, raw: &[u8]) -> Result<InstrCall<Op>, DecodeError> {
        decode::decode(ctx, raw)
    }

    fn execute(ctx: &mut Ctx<'_, Self>, op: Op, ic: &InstrCall<Op>) {
        exec::execute(ctx, op, ic);
    }

    fn patterns() -> &'static [Pattern<Self>] {
        combine::PATTERNS
    }

    fn disassemble(raw: &[u8], addr: u64) -> String {
        match <[u8; 4]>::try_from(raw) {
            Ok(bytes) => disasm::disassemble(u32::from_le_bytes(bytes), addr as u32),
            Err(_) => String::from("(truncated)"),
        }
    }

    fn dump_registers(regs: &Registers) -> String {
        let mut out = String::new();
        for (index, value) in regs.r[..15].iter().enumerate() {
            let sep = if index % 4 == 3 { "\n" } else { "  " };
            let _ = write!(out, "{:>3} = {value:#010x}{sep}", disasm::reg_name(index as u8));
        }

        let flag = |set: bool, c: char| if set { c } else { '-' };
        let _ = write!(
            out,
            " cpsr = {}{}{}{}",
            flag(regs.cpsr.negative(), 'N'),
            flag(regs.cpsr.zero(), 'Z'),
            flag(regs.cpsr.carry(), 'C'),
            flag(regs.cpsr.overflow(), 'V'),
        );

        out
    }
}
