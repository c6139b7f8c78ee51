//! x86_64 register table.

use gimli::RunTimeEndian;

use super::{Arch, Reg, RegisterInfo};

/// x86_64 architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct X86_64;

const REGISTERS: &[RegisterInfo] = &[
    RegisterInfo::new("rax", 0),
    RegisterInfo::new("rdx", 1),
    RegisterInfo::new("rcx", 2),
    RegisterInfo::new("rbx", 3),
    RegisterInfo::new("rsi", 4),
    RegisterInfo::new("rdi", 5),
    RegisterInfo::new("rbp", 6),
    RegisterInfo::new("rsp", 7),
    RegisterInfo::new("r8", 8),
    RegisterInfo::new("r9", 9),
    RegisterInfo::new("r10", 10),
    RegisterInfo::new("r11", 11),
    RegisterInfo::new("r12", 12),
    RegisterInfo::new("r13", 13),
    RegisterInfo::new("r14", 14),
    RegisterInfo::new("r15", 15),
    // DWARF numbers the return-address column 16.
    RegisterInfo::new("rip", 16),
];

impl Arch for X86_64 {
    const BYTE_ORDER: RunTimeEndian = RunTimeEndian::Little;
    const FP: Reg = Reg(6);
    const IP: Reg = Reg(16);
    const NAME: &'static str = "x86_64";
    const POINTER_WIDTH: usize = 8;
    const REGISTERS: &'static [RegisterInfo] = REGISTERS;
    const RETURN_ADDRESS_COLUMN: u32 = 16;
    const SP: Reg = Reg(7);
}
