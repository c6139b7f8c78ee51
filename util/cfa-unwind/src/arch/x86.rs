//! 32-bit x86 register table.

use gimli::RunTimeEndian;

use super::{Arch, Reg, RegisterInfo};

/// 32-bit x86 architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct X86;

const REGISTERS: &[RegisterInfo] = &[
    RegisterInfo::new("eax", 0),
    RegisterInfo::new("ecx", 1),
    RegisterInfo::new("edx", 2),
    RegisterInfo::new("ebx", 3),
    RegisterInfo::new("esp", 4),
    RegisterInfo::new("ebp", 5),
    RegisterInfo::new("esi", 6),
    RegisterInfo::new("edi", 7),
    RegisterInfo::new("eip", 8),
];

impl Arch for X86 {
    const BYTE_ORDER: RunTimeEndian = RunTimeEndian::Little;
    const FP: Reg = Reg(5);
    const IP: Reg = Reg(8);
    const NAME: &'static str = "x86";
    const POINTER_WIDTH: usize = 4;
    const REGISTERS: &'static [RegisterInfo] = REGISTERS;
    const RETURN_ADDRESS_COLUMN: u32 = 8;
    const SP: Reg = Reg(4);
}
