//! AArch64 register table.

use gimli::RunTimeEndian;

use super::{Arch, Reg, RegisterInfo};

/// AArch64 architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AArch64;

const REGISTERS: &[RegisterInfo] = &[
    RegisterInfo::new("x0", 0),
    RegisterInfo::new("x1", 1),
    RegisterInfo::new("x2", 2),
    RegisterInfo::new("x3", 3),
    RegisterInfo::new("x4", 4),
    RegisterInfo::new("x5", 5),
    RegisterInfo::new("x6", 6),
    RegisterInfo::new("x7", 7),
    RegisterInfo::new("x8", 8),
    RegisterInfo::new("x9", 9),
    RegisterInfo::new("x10", 10),
    RegisterInfo::new("x11", 11),
    RegisterInfo::new("x12", 12),
    RegisterInfo::new("x13", 13),
    RegisterInfo::new("x14", 14),
    RegisterInfo::new("x15", 15),
    RegisterInfo::new("x16", 16),
    RegisterInfo::new("x17", 17),
    RegisterInfo::new("x18", 18),
    RegisterInfo::new("x19", 19),
    RegisterInfo::new("x20", 20),
    RegisterInfo::new("x21", 21),
    RegisterInfo::new("x22", 22),
    RegisterInfo::new("x23", 23),
    RegisterInfo::new("x24", 24),
    RegisterInfo::new("x25", 25),
    RegisterInfo::new("x26", 26),
    RegisterInfo::new("x27", 27),
    RegisterInfo::new("x28", 28),
    RegisterInfo::new("fp", 29),
    RegisterInfo::new("lr", 30),
    RegisterInfo::new("sp", 31),
    RegisterInfo::new("pc", 32),
];

impl Arch for AArch64 {
    const BYTE_ORDER: RunTimeEndian = RunTimeEndian::Little;
    const FP: Reg = Reg(29);
    const IP: Reg = Reg(32);
    const NAME: &'static str = "aarch64";
    const POINTER_WIDTH: usize = 8;
    const REGISTERS: &'static [RegisterInfo] = REGISTERS;
    const RETURN_ADDRESS_COLUMN: u32 = 30;
    const SP: Reg = Reg(31);
}
