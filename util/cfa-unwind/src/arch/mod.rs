//! Architecture register tables.
//!
//! Each architecture lists its registers once; the position in that list is
//! the architecture-neutral [`Reg`] index used by
//! [`FrameState`](crate::FrameState), and the entry carries the DWARF
//! register number, if DWARF assigns one.

use core::fmt;

use gimli::RunTimeEndian;

mod aarch64;
mod riscv64;
mod x86;
mod x86_64;

pub use aarch64::AArch64;
pub use riscv64::RiscV64;
pub use x86::X86;
pub use x86_64::X86_64;

/// Most registers any architecture table may list.
pub const MAX_FRAME_REGISTERS: usize = 64;

/// Architecture-neutral register index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reg(pub u8);

/// One row of a register table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterInfo {
    /// Conventional register name.
    pub name: &'static str,
    /// DWARF register number.
    pub dwarf: Option<u16>,
}

impl RegisterInfo {
    pub(crate) const fn new(name: &'static str, dwarf: u16) -> Self {
        Self {
            name,
            dwarf: Some(dwarf),
        }
    }

    pub(crate) const fn unnumbered(name: &'static str) -> Self {
        Self { name, dwarf: None }
    }
}

/// Register layout of a target architecture.
pub trait Arch: Copy + Eq + fmt::Debug + 'static {
    /// Architecture name.
    const NAME: &'static str;

    /// Width of a register and of a target address, in bytes.
    const POINTER_WIDTH: usize;

    /// Byte order of target memory.
    const BYTE_ORDER: RunTimeEndian;

    /// Register table, indexed by [`Reg`].
    const REGISTERS: &'static [RegisterInfo];

    /// Instruction pointer.
    const IP: Reg;

    /// Stack pointer.
    const SP: Reg;

    /// Frame pointer.
    const FP: Reg;

    /// Default DWARF return-address column.
    const RETURN_ADDRESS_COLUMN: u32;

    /// Number of registers in the table.
    fn register_count() -> usize {
        Self::REGISTERS.len()
    }

    /// Maps a DWARF register number to its register.
    fn from_dwarf(regnum: u32) -> Option<Reg> {
        Self::REGISTERS
            .iter()
            .position(|info| info.dwarf.map(u32::from) == Some(regnum))
            .map(|idx| Reg(idx as u8))
    }

    /// Maps a register to its DWARF register number.
    fn to_dwarf(reg: Reg) -> Option<u32> {
        Self::REGISTERS
            .get(reg.0 as usize)
            .and_then(|info| info.dwarf)
            .map(u32::from)
    }

    /// Conventional name of `reg`.
    fn register_name(reg: Reg) -> Option<&'static str> {
        Self::REGISTERS.get(reg.0 as usize).map(|info| info.name)
    }

    /// Mask selecting the bits of a register value.
    fn value_mask() -> u64 {
        if Self::POINTER_WIDTH >= 8 {
            u64::MAX
        } else {
            (1u64 << (Self::POINTER_WIDTH * 8)) - 1
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        /// Architecture of the running process.
        pub type CurrentArch = X86_64;
    } else if #[cfg(target_arch = "x86")] {
        /// Architecture of the running process.
        pub type CurrentArch = X86;
    } else if #[cfg(target_arch = "aarch64")] {
        /// Architecture of the running process.
        pub type CurrentArch = AArch64;
    } else if #[cfg(target_arch = "riscv64")] {
        /// Architecture of the running process.
        pub type CurrentArch = RiscV64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_table<A: Arch>() {
        assert!(A::register_count() <= MAX_FRAME_REGISTERS, "{}", A::NAME);
        for (idx, info) in A::REGISTERS.iter().enumerate() {
            let reg = Reg(idx as u8);
            assert_eq!(A::register_name(reg), Some(info.name));
            if let Some(dwarf) = info.dwarf {
                assert_eq!(A::from_dwarf(dwarf as u32), Some(reg), "{} {}", A::NAME, info.name);
                assert_eq!(A::to_dwarf(reg), Some(dwarf as u32));
            }
        }
        for reg in [A::IP, A::SP, A::FP] {
            assert!((reg.0 as usize) < A::register_count());
        }
        assert!(A::from_dwarf(A::RETURN_ADDRESS_COLUMN).is_some(), "{}", A::NAME);
    }

    #[test]
    fn test_tables_are_consistent() {
        check_table::<X86_64>();
        check_table::<X86>();
        check_table::<AArch64>();
        check_table::<RiscV64>();
    }

    #[test]
    fn test_well_known_numbers() {
        assert_eq!(X86_64::from_dwarf(6), Some(X86_64::FP));
        assert_eq!(X86_64::from_dwarf(7), Some(X86_64::SP));
        assert_eq!(X86_64::from_dwarf(16), Some(X86_64::IP));
        assert_eq!(X86::from_dwarf(4), Some(X86::SP));
        assert_eq!(X86::from_dwarf(5), Some(X86::FP));
        assert_eq!(AArch64::from_dwarf(31), Some(AArch64::SP));
        assert_eq!(AArch64::from_dwarf(29), Some(AArch64::FP));
        assert_eq!(RiscV64::from_dwarf(2), Some(RiscV64::SP));
        assert_eq!(RiscV64::to_dwarf(RiscV64::IP), None);
        assert_eq!(X86_64::from_dwarf(200), None);
    }

    #[test]
    fn test_value_mask() {
        assert_eq!(X86::value_mask(), 0xffff_ffff);
        assert_eq!(X86_64::value_mask(), u64::MAX);
    }
}
