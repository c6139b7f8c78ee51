//! Register values of one stack frame.

use core::{fmt, marker::PhantomData};

use crate::{
    arch::{Arch, MAX_FRAME_REGISTERS, Reg},
    error::{CfaError, Result},
};

/// Register values of one frame, each either known or unavailable.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FrameState<A: Arch> {
    values: [u64; MAX_FRAME_REGISTERS],
    valid: u64,
    _arch: PhantomData<A>,
}

impl<A: Arch> Default for FrameState<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Arch> FrameState<A> {
    /// Creates a frame with every register unavailable.
    pub const fn new() -> Self {
        Self {
            values: [0; MAX_FRAME_REGISTERS],
            valid: 0,
            _arch: PhantomData,
        }
    }

    /// Value of `reg`, if known.
    pub fn get(&self, reg: Reg) -> Option<u64> {
        self.has(reg).then(|| self.values[reg.0 as usize])
    }

    /// Records `value` for `reg`, truncated to the register width.
    ///
    /// Registers outside the architecture table are ignored.
    pub fn set(&mut self, reg: Reg, value: u64) {
        let idx = reg.0 as usize;
        if idx < A::register_count() {
            self.values[idx] = value & A::value_mask();
            self.valid |= 1 << idx;
        }
    }

    /// Marks `reg` unavailable.
    pub fn clear(&mut self, reg: Reg) {
        if (reg.0 as usize) < MAX_FRAME_REGISTERS {
            self.valid &= !(1 << reg.0);
        }
    }

    /// Whether `reg` holds a known value.
    pub fn has(&self, reg: Reg) -> bool {
        (reg.0 as usize) < MAX_FRAME_REGISTERS && self.valid & (1 << reg.0) != 0
    }

    /// Value of the register with DWARF number `regnum`.
    pub fn get_dwarf(&self, regnum: u32) -> Result<u64> {
        let reg = A::from_dwarf(regnum).ok_or(CfaError::UnknownRegister { regnum })?;
        self.get(reg).ok_or(CfaError::MissingRegister { regnum })
    }

    /// Records `value` for the register with DWARF number `regnum`.
    pub fn set_dwarf(&mut self, regnum: u32, value: u64) -> Result<()> {
        let reg = A::from_dwarf(regnum).ok_or(CfaError::UnknownRegister { regnum })?;
        self.set(reg, value);
        Ok(())
    }

    /// Instruction pointer, if known.
    pub fn ip(&self) -> Option<u64> {
        self.get(A::IP)
    }

    /// Stack pointer, if known.
    pub fn sp(&self) -> Option<u64> {
        self.get(A::SP)
    }

    /// Frame pointer, if known.
    pub fn fp(&self) -> Option<u64> {
        self.get(A::FP)
    }

    /// Iterates over the known registers and their values.
    pub fn iter(&self) -> impl Iterator<Item = (Reg, u64)> + '_ {
        (0..A::register_count())
            .map(|idx| Reg(idx as u8))
            .filter_map(|reg| self.get(reg).map(|value| (reg, value)))
    }
}

impl<A: Arch> fmt::Debug for FrameState<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.iter()
                    .map(|(reg, value)| (A::register_name(reg).unwrap_or("?"), value)),
            )
            .finish()
    }
}

impl<A: Arch> fmt::Display for FrameState<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = A::POINTER_WIDTH * 2 + 2;
        for (i, (reg, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(
                f,
                "{}={:#0width$x}",
                A::register_name(reg).unwrap_or("?"),
                value,
                width = width
            )?;
        }
        Ok(())
    }
}
