//! Recovery of the calling frame's registers from evaluated rules.

use crate::{
    arch::Arch,
    error::{CfaError, Result},
    expr::{evaluate_expression, read_block},
    frame::FrameState,
    memory::MemoryView,
    state::{CfaRule, CfaState, RegisterRule},
};

/// Resolves the canonical frame address described by `state`.
pub fn resolve_cfa<A: Arch, M: MemoryView + ?Sized>(
    memory: &M,
    frame: &FrameState<A>,
    state: &CfaState,
) -> Result<u64> {
    let cfa = match state.cfa_rule() {
        CfaRule::Undefined => return Err(CfaError::UndefinedCfa),
        CfaRule::Register { regnum, offset } => frame.get_dwarf(regnum)?.wrapping_add(offset),
        CfaRule::RegisterSigned { regnum, offset } => {
            frame.get_dwarf(regnum)?.wrapping_add_signed(offset)
        }
        CfaRule::Expression { address, length } => {
            evaluate_expression(memory, frame, address, length, None)?
        }
    };
    Ok(cfa & A::value_mask())
}

/// Computes the calling frame's registers.
///
/// The stack pointer of the new frame is the CFA unless a rule says
/// otherwise. Registers without a rule are unavailable in the new frame.
/// Any failure aborts the whole step; no partial frame is returned.
pub fn apply<A: Arch, M: MemoryView + ?Sized>(
    memory: &M,
    frame: &FrameState<A>,
    state: &CfaState,
) -> Result<FrameState<A>> {
    let cfa = resolve_cfa(memory, frame, state)?;
    let mask = A::value_mask();
    let width = A::POINTER_WIDTH;

    let mut caller = FrameState::<A>::new();
    caller.set(A::SP, cfa);

    for (regnum, rule, value) in state {
        let dest = A::from_dwarf(regnum).ok_or(CfaError::UnknownRegister { regnum })?;
        let recovered = match rule {
            RegisterRule::Offset => {
                let address = cfa.wrapping_add_signed(value) & mask;
                memory.read_sized(address, width, A::BYTE_ORDER)?
            }
            RegisterRule::ValOffset => cfa.wrapping_add_signed(value),
            RegisterRule::Register => {
                let source = u32::try_from(value)
                    .map_err(|_| CfaError::UnknownRegister { regnum: u32::MAX })?;
                frame.get_dwarf(source)?
            }
            RegisterRule::Expression => {
                let (address, length) = read_block(memory, value as u64)?;
                let address = evaluate_expression(memory, frame, address, length, Some(cfa))?;
                memory.read_sized(address, width, A::BYTE_ORDER)?
            }
            RegisterRule::ValExpression => {
                let (address, length) = read_block(memory, value as u64)?;
                evaluate_expression(memory, frame, address, length, Some(cfa))?
            }
            RegisterRule::SameValue => match frame.get(dest) {
                Some(current) => current,
                None => continue,
            },
        };
        log::trace!("recovered dwarf register {} = {:#x}", regnum, recovered);
        caller.set(dest, recovered);
    }

    Ok(caller)
}
