//! Single-frame unwinding from CIE and FDE instructions.

use async_alloc::{Allocator, AsyncBox};

use crate::{
    apply::apply,
    arch::Arch,
    error::{CfaError, Result},
    frame::FrameState,
    memory::MemoryView,
    program::{CieInfo, FdeInfo, PointerBases, evaluate_program_with},
    state::CfaState,
};

/// Recovers a caller's registers one frame at a time.
pub struct Unwinder<'a, M: MemoryView + ?Sized> {
    memory: &'a M,
}

impl<'a, M: MemoryView + ?Sized> Unwinder<'a, M> {
    /// Creates an unwinder reading instructions and stack through `memory`.
    pub const fn new(memory: &'a M) -> Self {
        Self { memory }
    }

    /// Computes the caller of `frame`, keeping the rule set on the stack.
    pub fn step<A: Arch>(
        &self,
        cie: &CieInfo,
        fde: &FdeInfo,
        frame: &FrameState<A>,
    ) -> Result<FrameState<A>> {
        let mut state = CfaState::new();
        let mut initial = CfaState::new();
        self.step_with(cie, fde, frame, &mut state, &mut initial)
    }

    /// Computes the caller of `frame`, drawing the rule set from `allocator`.
    ///
    /// The copy of the rules that restore instructions go back to is drawn
    /// from `allocator` too, so no [`CfaState`] is kept on the stack.
    pub fn step_in<A: Arch>(
        &self,
        allocator: &Allocator,
        cie: &CieInfo,
        fde: &FdeInfo,
        frame: &FrameState<A>,
    ) -> Result<FrameState<A>> {
        let mut state = AsyncBox::new_with(allocator, CfaState::new)?;
        let mut initial = AsyncBox::new_with(allocator, CfaState::new)?;
        self.step_with(cie, fde, frame, &mut state, &mut initial)
    }

    fn step_with<A: Arch>(
        &self,
        cie: &CieInfo,
        fde: &FdeInfo,
        frame: &FrameState<A>,
        state: &mut CfaState,
        initial: &mut CfaState,
    ) -> Result<FrameState<A>> {
        let result = self.unwind_frame(cie, fde, frame, state, initial);
        if let Err(err) = &result {
            log::debug!(
                "unwind step at {:#x?} (fde {:#x}) failed: {}",
                frame.ip(),
                fde.initial_location,
                err
            );
        }
        result
    }

    fn unwind_frame<A: Arch>(
        &self,
        cie: &CieInfo,
        fde: &FdeInfo,
        frame: &FrameState<A>,
        state: &mut CfaState,
        initial: &mut CfaState,
    ) -> Result<FrameState<A>> {
        let pc = frame.ip().ok_or(CfaError::MissingRegister {
            regnum: A::to_dwarf(A::IP).unwrap_or(cie.return_address_register),
        })?;
        let pc_offset = fde.pc_offset(pc).ok_or(CfaError::PcOutOfRange { pc })?;
        let cie = &CieInfo {
            bases: PointerBases {
                function: Some(fde.initial_location),
                ..cie.bases
            },
            ..*cie
        };

        evaluate_program_with(
            self.memory,
            0,
            cie,
            A::BYTE_ORDER,
            cie.initial_instructions_address,
            cie.initial_instructions_length,
            state,
            initial,
        )?;
        // At the function entry the CIE rules already describe the frame; a
        // zero offset would otherwise run the whole FDE program.
        if pc_offset != 0 {
            evaluate_program_with(
                self.memory,
                pc_offset,
                cie,
                A::BYTE_ORDER,
                fde.instructions_address,
                fde.instructions_length,
                state,
                initial,
            )?;
        }

        let mut caller = apply(self.memory, frame, state)?;
        let ra = cie.return_address_register;
        match A::from_dwarf(ra) {
            Some(reg) => match caller.get(reg) {
                Some(ip) => caller.set(A::IP, ip),
                None => caller.clear(A::IP),
            },
            None => return Err(CfaError::UnknownRegister { regnum: ra }),
        }
        log::trace!("unwound {:#x} -> {:#x?}", pc, caller.ip());
        Ok(caller)
    }
}
