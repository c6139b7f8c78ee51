//! RISC-V 64 register table.

use gimli::RunTimeEndian;

use super::{Arch, Reg, RegisterInfo};

/// RISC-V 64 architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiscV64;

const REGISTERS: &[RegisterInfo] = &[
    RegisterInfo::new("zero", 0),
    RegisterInfo::new("ra", 1),
    RegisterInfo::new("sp", 2),
    RegisterInfo::new("gp", 3),
    RegisterInfo::new("tp", 4),
    RegisterInfo::new("t0", 5),
    RegisterInfo::new("t1", 6),
    RegisterInfo::new("t2", 7),
    RegisterInfo::new("s0", 8),
    RegisterInfo::new("s1", 9),
    RegisterInfo::new("a0", 10),
    RegisterInfo::new("a1", 11),
    RegisterInfo::new("a2", 12),
    RegisterInfo::new("a3", 13),
    RegisterInfo::new("a4", 14),
    RegisterInfo::new("a5", 15),
    RegisterInfo::new("a6", 16),
    RegisterInfo::new("a7", 17),
    RegisterInfo::new("s2", 18),
    RegisterInfo::new("s3", 19),
    RegisterInfo::new("s4", 20),
    RegisterInfo::new("s5", 21),
    RegisterInfo::new("s6", 22),
    RegisterInfo::new("s7", 23),
    RegisterInfo::new("s8", 24),
    RegisterInfo::new("s9", 25),
    RegisterInfo::new("s10", 26),
    RegisterInfo::new("s11", 27),
    RegisterInfo::new("t3", 28),
    RegisterInfo::new("t4", 29),
    RegisterInfo::new("t5", 30),
    RegisterInfo::new("t6", 31),
    // No DWARF number; the caller's pc comes from `ra`.
    RegisterInfo::unnumbered("pc"),
];

impl Arch for RiscV64 {
    const BYTE_ORDER: RunTimeEndian = RunTimeEndian::Little;
    const FP: Reg = Reg(8);
    const IP: Reg = Reg(32);
    const NAME: &'static str = "riscv64";
    const POINTER_WIDTH: usize = 8;
    const REGISTERS: &'static [RegisterInfo] = REGISTERS;
    const RETURN_ADDRESS_COLUMN: u32 = 1;
    const SP: Reg = Reg(2);
}
