//! Call frame instruction interpreter.

use bitflags::bitflags;
use gimli::{DwCfa, DwEhPe, EndianSlice, Reader, RunTimeEndian};

use crate::{
    error::{CfaError, Result, read_error},
    memory::MemoryView,
    state::{CfaRule, CfaState, RegisterRule},
};

bitflags! {
    /// Augmentation string characters present in a CIE.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Augmentation: u8 {
        /// `z`: augmentation data length is present.
        const DATA = 1 << 0;
        /// `L`: FDEs carry an LSDA pointer.
        const LSDA = 1 << 1;
        /// `P`: a personality routine is present.
        const PERSONALITY = 1 << 2;
        /// `R`: FDE pointer encoding is present.
        const FDE_ENCODING = 1 << 3;
        /// `S`: frames are signal handler frames.
        const SIGNAL_FRAME = 1 << 4;
    }
}

/// Parameters of a Common Information Entry needed to run its programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CieInfo {
    /// Factor applied to `advance_loc` deltas.
    pub code_alignment_factor: u64,
    /// Factor applied to factored offsets.
    pub data_alignment_factor: i64,
    /// Column holding the return address.
    pub return_address_register: u32,
    /// Augmentations the CIE declares.
    pub augmentation: Augmentation,
    /// Size of a target address in bytes.
    pub address_size: u8,
    /// Address of the CIE's initial instructions.
    pub initial_instructions_address: u64,
    /// Length of the CIE's initial instructions.
    pub initial_instructions_length: u64,
    /// Encoding of addresses in FDEs, from the `R` augmentation.
    /// `.debug_frame` entries use `DW_EH_PE_absptr`.
    pub fde_encoding: DwEhPe,
    /// Bases for relative `fde_encoding` values.
    pub bases: PointerBases,
}

/// Base addresses for `DW_EH_PE_*` relative pointer encodings.
///
/// `DW_EH_PE_pcrel` needs no entry: it is relative to the encoded value's
/// own address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PointerBases {
    /// Base for `DW_EH_PE_textrel`.
    pub text: Option<u64>,
    /// Base for `DW_EH_PE_datarel`.
    pub data: Option<u64>,
    /// Start of the function the FDE describes. `DW_CFA_set_loc` targets
    /// are made relative to it, and `DW_EH_PE_funcrel` is based on it.
    pub function: Option<u64>,
}

impl CieInfo {
    /// Whether frames described by this CIE are signal handler frames.
    pub fn is_signal_frame(&self) -> bool {
        self.augmentation.contains(Augmentation::SIGNAL_FRAME)
    }
}

/// Parameters of a Frame Description Entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdeInfo {
    /// First program counter value covered.
    pub initial_location: u64,
    /// Number of bytes of code covered.
    pub address_range: u64,
    /// Address of the FDE's instructions.
    pub instructions_address: u64,
    /// Length of the FDE's instructions.
    pub instructions_length: u64,
}

impl FdeInfo {
    /// Offset of `pc` from the start of the function, if it is covered.
    pub fn pc_offset(&self, pc: u64) -> Option<u64> {
        pc.checked_sub(self.initial_location)
            .filter(|&offset| offset < self.address_range)
    }
}

/// Cursor over the instruction bytes that keeps their target address.
struct Program<'a> {
    reader: EndianSlice<'a, RunTimeEndian>,
    base: u64,
    length: usize,
}

impl<'a> Program<'a> {
    fn address(&self) -> u64 {
        self.base + (self.length - self.reader.len()) as u64
    }

    fn is_empty(&self) -> bool {
        self.reader.is_empty()
    }

    fn read<T>(
        &mut self,
        f: impl FnOnce(&mut EndianSlice<'a, RunTimeEndian>) -> gimli::Result<T>,
    ) -> Result<T> {
        let at = self.address();
        f(&mut self.reader).map_err(|err| read_error(err, at))
    }

    fn u8(&mut self) -> Result<u8> {
        self.read(|r| r.read_u8())
    }

    fn uleb(&mut self) -> Result<u64> {
        self.read(|r| r.read_uleb128())
    }

    fn sleb(&mut self) -> Result<i64> {
        self.read(|r| r.read_sleb128())
    }

    fn register(&mut self) -> Result<u32> {
        let at = self.address();
        let regnum = self.uleb()?;
        u32::try_from(regnum).map_err(|_| CfaError::BadOperand { address: at })
    }

    /// Decodes an address in `cie.fde_encoding`.
    fn pointer(&mut self, cie: &CieInfo) -> Result<u64> {
        let at = self.address();
        let encoding = cie.fde_encoding;
        let unsupported = CfaError::UnsupportedPointerEncoding {
            encoding: encoding.0,
            address: at,
        };
        if encoding == gimli::DW_EH_PE_omit || encoding.0 & gimli::DW_EH_PE_indirect.0 != 0 {
            return Err(unsupported);
        }

        let base = match DwEhPe(encoding.0 & 0x70) {
            gimli::DW_EH_PE_absptr => 0,
            gimli::DW_EH_PE_pcrel => at,
            gimli::DW_EH_PE_textrel => cie.bases.text.ok_or(unsupported)?,
            gimli::DW_EH_PE_datarel => cie.bases.data.ok_or(unsupported)?,
            gimli::DW_EH_PE_funcrel => cie.bases.function.ok_or(unsupported)?,
            _ => return Err(unsupported),
        };
        let value = match DwEhPe(encoding.0 & 0x0f) {
            gimli::DW_EH_PE_absptr => {
                if !matches!(cie.address_size, 1 | 2 | 4 | 8) {
                    return Err(CfaError::BadOperand { address: at });
                }
                self.read(|r| r.read_address(cie.address_size))?
            }
            gimli::DW_EH_PE_uleb128 => self.uleb()?,
            gimli::DW_EH_PE_udata2 => self.read(|r| r.read_u16())? as u64,
            gimli::DW_EH_PE_udata4 => self.read(|r| r.read_u32())? as u64,
            gimli::DW_EH_PE_udata8 => self.read(|r| r.read_u64())?,
            gimli::DW_EH_PE_sleb128 => self.sleb()? as u64,
            gimli::DW_EH_PE_sdata2 => self.read(|r| r.read_i16())? as i64 as u64,
            gimli::DW_EH_PE_sdata4 => self.read(|r| r.read_i32())? as i64 as u64,
            gimli::DW_EH_PE_sdata8 => self.read(|r| r.read_i64())? as u64,
            _ => return Err(unsupported),
        };
        // Signed and pc-relative values wrap onto the base.
        Ok(base.wrapping_add(value))
    }

    /// Skips a ULEB128-prefixed block, returning the address of its first
    /// byte after the prefix and its length.
    fn block(&mut self) -> Result<(u64, u64)> {
        let length = self.uleb()?;
        let address = self.address();
        let skip = usize::try_from(length).map_err(|_| CfaError::Truncated { address })?;
        self.read(|r| r.skip(skip))?;
        Ok((address, length))
    }
}

fn factored(value: u64, factor: i64, address: u64) -> Result<i64> {
    i64::try_from(value)
        .ok()
        .and_then(|value| value.checked_mul(factor))
        .ok_or(CfaError::Overflow { address })
}

fn factored_signed(value: i64, factor: i64, address: u64) -> Result<i64> {
    value.checked_mul(factor).ok_or(CfaError::Overflow { address })
}

/// Interprets the call frame instructions at `address` against `state`.
///
/// Evaluation stops at the end of the instructions, or once `pc_offset` is
/// non-zero and the location counter has reached it; the check is made
/// before each opcode is read. Restore instructions consult the rules that
/// `state` held on entry.
///
/// `DW_CFA_set_loc` operands are decoded with `cie.fde_encoding` and made
/// relative to `cie.bases.function`, or taken as-is when that is unset.
pub fn evaluate_program<M: MemoryView + ?Sized>(
    memory: &M,
    pc_offset: u64,
    cie: &CieInfo,
    byte_order: RunTimeEndian,
    address: u64,
    length: u64,
    state: &mut CfaState,
) -> Result<()> {
    let mut initial = CfaState::new();
    evaluate_program_with(memory, pc_offset, cie, byte_order, address, length, state, &mut initial)
}

/// [`evaluate_program`] with caller-provided storage for the rules that
/// restore instructions go back to.
#[allow(clippy::too_many_arguments)]
pub(crate) fn evaluate_program_with<M: MemoryView + ?Sized>(
    memory: &M,
    pc_offset: u64,
    cie: &CieInfo,
    byte_order: RunTimeEndian,
    address: u64,
    length: u64,
    state: &mut CfaState,
    initial: &mut CfaState,
) -> Result<()> {
    let len = usize::try_from(length).map_err(|_| CfaError::BadAddress {
        address,
        len: usize::MAX,
    })?;
    let bytes = memory.read(address, len)?;
    state.snapshot_into(initial)?;
    let initial = &*initial;
    let mut program = Program {
        reader: EndianSlice::new(bytes, byte_order),
        base: address,
        length: len,
    };

    let mut location: u64 = 0;
    while !program.is_empty() {
        if pc_offset != 0 && location >= pc_offset {
            break;
        }
        let at = program.address();
        let byte = program.u8()?;
        let (opcode, operand) = match byte & 0xc0 {
            0 => (DwCfa(byte), 0),
            high => (DwCfa(high), byte & 0x3f),
        };
        log::trace!("{:#x}: {} {:#x}", at, opcode, operand);

        match opcode {
            gimli::DW_CFA_set_loc => {
                let target = program.pointer(cie)?;
                let origin = cie.bases.function.unwrap_or(0);
                location = target
                    .checked_sub(origin)
                    .ok_or(CfaError::BadOperand { address: at })?;
            }
            gimli::DW_CFA_advance_loc => {
                location = advance(location, operand as u64, cie, at)?;
            }
            gimli::DW_CFA_advance_loc1 => {
                let delta = program.u8()?;
                location = advance(location, delta as u64, cie, at)?;
            }
            gimli::DW_CFA_advance_loc2 => {
                let delta = program.read(|r| r.read_u16())?;
                location = advance(location, delta as u64, cie, at)?;
            }
            gimli::DW_CFA_advance_loc4 => {
                let delta = program.read(|r| r.read_u32())?;
                location = advance(location, delta as u64, cie, at)?;
            }

            gimli::DW_CFA_def_cfa => {
                let regnum = program.register()?;
                let offset = program.uleb()?;
                state.set_cfa_register(regnum, offset);
            }
            gimli::DW_CFA_def_cfa_sf => {
                let regnum = program.register()?;
                let offset = factored_signed(program.sleb()?, cie.data_alignment_factor, at)?;
                state.set_cfa_register_signed(regnum, offset);
            }
            gimli::DW_CFA_def_cfa_register => {
                let regnum = program.register()?;
                let rule = match state.cfa_rule() {
                    CfaRule::Register { offset, .. } => CfaRule::Register { regnum, offset },
                    CfaRule::RegisterSigned { offset, .. } => {
                        CfaRule::RegisterSigned { regnum, offset }
                    }
                    _ => return Err(CfaError::CfaRuleMismatch),
                };
                state.set_cfa_rule(rule);
            }
            gimli::DW_CFA_def_cfa_offset => {
                let offset = program.uleb()?;
                let regnum = state.cfa_rule().regnum().ok_or(CfaError::CfaRuleMismatch)?;
                state.set_cfa_register(regnum, offset);
            }
            gimli::DW_CFA_def_cfa_offset_sf => {
                let offset = factored_signed(program.sleb()?, cie.data_alignment_factor, at)?;
                let regnum = state.cfa_rule().regnum().ok_or(CfaError::CfaRuleMismatch)?;
                state.set_cfa_register_signed(regnum, offset);
            }
            gimli::DW_CFA_def_cfa_expression => {
                let (address, length) = program.block()?;
                state.set_cfa_expression(address, length);
            }

            gimli::DW_CFA_undefined => {
                let regnum = program.register()?;
                state.remove_register(regnum);
            }
            gimli::DW_CFA_same_value => {
                let regnum = program.register()?;
                state.set_register(regnum, RegisterRule::SameValue, 0)?;
            }
            gimli::DW_CFA_offset => {
                let offset = factored(program.uleb()?, cie.data_alignment_factor, at)?;
                state.set_register(operand as u32, RegisterRule::Offset, offset)?;
            }
            gimli::DW_CFA_offset_extended => {
                let regnum = program.register()?;
                let offset = factored(program.uleb()?, cie.data_alignment_factor, at)?;
                state.set_register(regnum, RegisterRule::Offset, offset)?;
            }
            gimli::DW_CFA_offset_extended_sf => {
                let regnum = program.register()?;
                let offset = factored_signed(program.sleb()?, cie.data_alignment_factor, at)?;
                state.set_register(regnum, RegisterRule::Offset, offset)?;
            }
            gimli::DW_CFA_GNU_negative_offset_extended => {
                let regnum = program.register()?;
                let offset = factored(program.uleb()?, cie.data_alignment_factor, at)?;
                state.set_register(regnum, RegisterRule::Offset, offset.wrapping_neg())?;
            }
            gimli::DW_CFA_val_offset => {
                let regnum = program.register()?;
                let offset = factored(program.uleb()?, cie.data_alignment_factor, at)?;
                state.set_register(regnum, RegisterRule::ValOffset, offset)?;
            }
            gimli::DW_CFA_val_offset_sf => {
                let regnum = program.register()?;
                let offset = factored_signed(program.sleb()?, cie.data_alignment_factor, at)?;
                state.set_register(regnum, RegisterRule::ValOffset, offset)?;
            }
            gimli::DW_CFA_register => {
                let regnum = program.register()?;
                let source = program.register()?;
                state.set_register(regnum, RegisterRule::Register, source as i64)?;
            }
            gimli::DW_CFA_expression | gimli::DW_CFA_val_expression => {
                let regnum = program.register()?;
                // The rule keeps the address of the length prefix.
                let block = program.address();
                program.block()?;
                let rule = if opcode == gimli::DW_CFA_expression {
                    RegisterRule::Expression
                } else {
                    RegisterRule::ValExpression
                };
                state.set_register(regnum, rule, block as i64)?;
            }

            gimli::DW_CFA_restore => restore(state, initial, operand as u32)?,
            gimli::DW_CFA_restore_extended => {
                let regnum = program.register()?;
                restore(state, initial, regnum)?;
            }
            gimli::DW_CFA_remember_state => state.push_state()?,
            gimli::DW_CFA_restore_state => state.pop_state()?,

            gimli::DW_CFA_GNU_args_size => {
                program.uleb()?;
            }
            gimli::DW_CFA_nop | gimli::DW_CFA_GNU_window_save => {}

            _ => {
                log::debug!("unsupported CFA opcode {:#04x} at {:#x}", byte, at);
                return Err(CfaError::UnsupportedOpcode { opcode: byte, address: at });
            }
        }
    }
    Ok(())
}

fn advance(location: u64, delta: u64, cie: &CieInfo, address: u64) -> Result<u64> {
    delta
        .checked_mul(cie.code_alignment_factor)
        .and_then(|delta| location.checked_add(delta))
        .ok_or(CfaError::Overflow { address })
}

fn restore(state: &mut CfaState, initial: &CfaState, regnum: u32) -> Result<()> {
    match initial.get_register_rule(regnum) {
        Some((rule, value)) => state.set_register(regnum, rule, value),
        None => {
            state.remove_register(regnum);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SliceMemory;

    const BASE: u64 = 0x4000;

    fn cie(code_alignment_factor: u64, data_alignment_factor: i64) -> CieInfo {
        CieInfo {
            code_alignment_factor,
            data_alignment_factor,
            return_address_register: 16,
            augmentation: Augmentation::DATA,
            address_size: 8,
            initial_instructions_address: 0,
            initial_instructions_length: 0,
            fde_encoding: gimli::DW_EH_PE_absptr,
            bases: PointerBases::default(),
        }
    }

    fn run(program: &[u8], pc_offset: u64, cie: &CieInfo, state: &mut CfaState) -> Result<()> {
        let memory = SliceMemory::new(BASE, program);
        evaluate_program(
            &memory,
            pc_offset,
            cie,
            RunTimeEndian::Little,
            BASE,
            program.len() as u64,
            state,
        )
    }

    #[test]
    fn test_def_cfa_and_offset() {
        let mut state = CfaState::new();
        // def_cfa r7+16; offset r6, 2
        run(&[0x0c, 7, 16, 0x86, 2], 0, &cie(1, -4), &mut state).unwrap();
        assert_eq!(state.cfa_rule(), CfaRule::Register { regnum: 7, offset: 16 });
        assert_eq!(state.get_register_rule(6), Some((RegisterRule::Offset, -8)));
    }

    #[test]
    fn test_advance_loc_stops_at_pc() {
        let cie = cie(4, -8);
        // advance_loc1 5; offset r3, 1
        let program = [0x02, 5, 0x83, 1];

        // Location reaches 20, which is still below 21.
        let mut state = CfaState::new();
        run(&program, 21, &cie, &mut state).unwrap();
        assert_eq!(state.get_register_rule(3), Some((RegisterRule::Offset, -8)));

        let mut state = CfaState::new();
        run(&program, 20, &cie, &mut state).unwrap();
        assert_eq!(state.get_register_rule(3), None);

        let mut state = CfaState::new();
        run(&program, 19, &cie, &mut state).unwrap();
        assert_eq!(state.get_register_rule(3), None);

        let mut state = CfaState::new();
        run(&program, 0, &cie, &mut state).unwrap();
        assert_eq!(state.get_register_rule(3), Some((RegisterRule::Offset, -8)));
    }

    #[test]
    fn test_rules_before_the_first_advance_apply() {
        let cie = cie(1, -8);
        // offset r3, 1; advance_loc 4; offset r12, 2
        let program = [0x83, 1, 0x44, 0x8c, 2];

        let mut state = CfaState::new();
        run(&program, 2, &cie, &mut state).unwrap();
        assert_eq!(state.get_register_rule(3), Some((RegisterRule::Offset, -8)));
        assert_eq!(state.get_register_rule(12), None);

        let mut state = CfaState::new();
        run(&program, 5, &cie, &mut state).unwrap();
        assert_eq!(state.get_register_rule(12), Some((RegisterRule::Offset, -16)));
    }

    #[test]
    fn test_advance_widths() {
        let cie = cie(1, -8);
        // advance_loc2 0x100; advance_loc4 0x10000; offset r3, 1
        let program = [0x03, 0x00, 0x01, 0x04, 0x00, 0x00, 0x01, 0x00, 0x83, 1];

        let mut state = CfaState::new();
        run(&program, 0x10100, &cie, &mut state).unwrap();
        assert_eq!(state.get_register_rule(3), None);

        let mut state = CfaState::new();
        run(&program, 0x10101, &cie, &mut state).unwrap();
        assert_eq!(state.get_register_rule(3), Some((RegisterRule::Offset, -8)));
    }

    #[test]
    fn test_restore_uses_initial_rules() {
        let cie = cie(1, -8);
        // offset r6, 2; restore r6
        let program = [0x86, 2, 0xc6];

        let mut state = CfaState::new();
        run(&program, 0, &cie, &mut state).unwrap();
        assert_eq!(state.get_register_rule(6), None);

        let mut state = CfaState::new();
        state.set_register(6, RegisterRule::Offset, -24).unwrap();
        run(&program, 0, &cie, &mut state).unwrap();
        assert_eq!(state.get_register_rule(6), Some((RegisterRule::Offset, -24)));

        // restore_extended r6
        let mut state = CfaState::new();
        state.set_register(6, RegisterRule::SameValue, 0).unwrap();
        run(&[0x86, 2, 0x06, 6], 0, &cie, &mut state).unwrap();
        assert_eq!(state.get_register_rule(6), Some((RegisterRule::SameValue, 0)));
    }

    #[test]
    fn test_remember_restore_state() {
        let cie = cie(1, -8);
        // def_cfa r7+8; offset r3,1; remember; def_cfa r7+32; offset r12,2; restore_state
        let program = [0x0c, 7, 8, 0x83, 1, 0x0a, 0x0c, 7, 32, 0x8c, 2, 0x0b];
        let mut state = CfaState::new();
        run(&program, 0, &cie, &mut state).unwrap();
        assert_eq!(state.cfa_rule(), CfaRule::Register { regnum: 7, offset: 8 });
        assert_eq!(state.get_register_rule(3), Some((RegisterRule::Offset, -8)));
        assert_eq!(state.get_register_rule(12), None);
        assert_eq!(state.depth(), 0);

        // A remembered snapshot starts without a CFA rule.
        let mut state = CfaState::new();
        assert_eq!(
            run(&[0x0c, 7, 8, 0x0a, 0x0e, 32], 0, &cie, &mut state),
            Err(CfaError::CfaRuleMismatch)
        );

        let mut state = CfaState::new();
        assert_eq!(run(&[0x0b], 0, &cie, &mut state), Err(CfaError::StateUnderflow));
    }

    #[test]
    fn test_def_cfa_offset_needs_register_rule() {
        let mut state = CfaState::new();
        assert_eq!(
            run(&[0x0e, 8], 0, &cie(1, -8), &mut state),
            Err(CfaError::CfaRuleMismatch)
        );
        assert_eq!(
            run(&[0x0d, 6], 0, &cie(1, -8), &mut state),
            Err(CfaError::CfaRuleMismatch)
        );
    }

    #[test]
    fn test_def_cfa_variants() {
        let cie = cie(1, -8);
        let mut state = CfaState::new();
        // def_cfa_sf r7, -2; def_cfa_register r6
        run(&[0x12, 7, 0x7e, 0x0d, 6], 0, &cie, &mut state).unwrap();
        assert_eq!(state.cfa_rule(), CfaRule::RegisterSigned { regnum: 6, offset: 16 });

        // def_cfa_offset 24 turns the rule unsigned again
        run(&[0x0e, 24], 0, &cie, &mut state).unwrap();
        assert_eq!(state.cfa_rule(), CfaRule::Register { regnum: 6, offset: 24 });

        // def_cfa_offset_sf 1 is scaled by the data alignment factor
        run(&[0x13, 1], 0, &cie, &mut state).unwrap();
        assert_eq!(state.cfa_rule(), CfaRule::RegisterSigned { regnum: 6, offset: -8 });
    }

    #[test]
    fn test_expression_rules() {
        let cie = cie(1, -8);
        // def_cfa_expression [breg7 8]; expression r6 [lit0]; val_expression r3 [lit1 lit2]
        let program = [0x0f, 2, 0x77, 8, 0x10, 6, 1, 0x30, 0x16, 3, 2, 0x31, 0x32];
        let mut state = CfaState::new();
        run(&program, 0, &cie, &mut state).unwrap();
        assert_eq!(state.cfa_rule(), CfaRule::Expression { address: BASE + 2, length: 2 });
        assert_eq!(
            state.get_register_rule(6),
            Some((RegisterRule::Expression, (BASE + 6) as i64))
        );
        assert_eq!(
            state.get_register_rule(3),
            Some((RegisterRule::ValExpression, (BASE + 10) as i64))
        );
    }

    #[test]
    fn test_register_rules() {
        let cie = cie(1, -8);
        // register r3 <- r5; same_value r12; val_offset r6, 2; undefined r3
        let program = [0x09, 3, 5, 0x08, 12, 0x14, 6, 2, 0x07, 3];
        let mut state = CfaState::new();
        run(&program[..3], 0, &cie, &mut state).unwrap();
        assert_eq!(state.get_register_rule(3), Some((RegisterRule::Register, 5)));

        let mut state = CfaState::new();
        run(&program, 0, &cie, &mut state).unwrap();
        assert_eq!(state.get_register_rule(3), None);
        assert_eq!(state.get_register_rule(12), Some((RegisterRule::SameValue, 0)));
        assert_eq!(state.get_register_rule(6), Some((RegisterRule::ValOffset, -16)));
    }

    #[test]
    fn test_gnu_extensions() {
        let cie = cie(1, -8);
        // GNU_args_size 16; GNU_negative_offset_extended r3, 2; GNU_window_save; nop
        let program = [0x2e, 16, 0x2f, 3, 2, 0x2d, 0x00];
        let mut state = CfaState::new();
        run(&program, 0, &cie, &mut state).unwrap();
        assert_eq!(state.get_register_rule(3), Some((RegisterRule::Offset, 16)));
        assert_eq!(state.register_count(), 1);
    }

    #[test]
    fn test_unknown_opcode_is_rejected() {
        let mut state = CfaState::new();
        assert_eq!(
            run(&[0x00, 0x3f], 0, &cie(1, -8), &mut state),
            Err(CfaError::UnsupportedOpcode { opcode: 0x3f, address: BASE + 1 })
        );
    }

    #[test]
    fn test_set_loc_absolute_address() {
        let mut cie = cie(1, -8);
        cie.bases.function = Some(0x1000);
        // set_loc 0x1010; offset r3, 1
        let mut program = [0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0x83, 1];
        program[1..9].copy_from_slice(&0x1010u64.to_le_bytes());

        let mut state = CfaState::new();
        run(&program, 0x11, &cie, &mut state).unwrap();
        assert_eq!(state.get_register_rule(3), Some((RegisterRule::Offset, -8)));

        let mut state = CfaState::new();
        run(&program, 0x10, &cie, &mut state).unwrap();
        assert_eq!(state.get_register_rule(3), None);

        // Without a function start the target is the location itself.
        cie.bases.function = None;
        let mut state = CfaState::new();
        run(&program, 0x1010, &cie, &mut state).unwrap();
        assert_eq!(state.get_register_rule(3), None);
        run(&program, 0x1011, &cie, &mut state).unwrap();
        assert_eq!(state.get_register_rule(3), Some((RegisterRule::Offset, -8)));
    }

    #[test]
    fn test_set_loc_relative_encodings() {
        let mut cie = cie(1, -8);
        cie.bases.function = Some(BASE);

        // pcrel|sdata4: the operand sits at BASE + 1, the target is BASE + 0x20.
        cie.fde_encoding = DwEhPe(gimli::DW_EH_PE_pcrel.0 | gimli::DW_EH_PE_sdata4.0);
        let mut program = [0x01, 0, 0, 0, 0, 0x83, 1];
        program[1..5].copy_from_slice(&0x1fi32.to_le_bytes());
        let mut state = CfaState::new();
        run(&program, 0x20, &cie, &mut state).unwrap();
        assert_eq!(state.get_register_rule(3), None);
        run(&program, 0x21, &cie, &mut state).unwrap();
        assert_eq!(state.get_register_rule(3), Some((RegisterRule::Offset, -8)));

        // textrel|udata2
        cie.fde_encoding = DwEhPe(gimli::DW_EH_PE_textrel.0 | gimli::DW_EH_PE_udata2.0);
        cie.bases.text = Some(BASE - 0x100);
        let program = [0x01, 0x30, 0x01, 0x83, 1];
        let mut state = CfaState::new();
        run(&program, 0x30, &cie, &mut state).unwrap();
        assert_eq!(state.get_register_rule(3), None);
        run(&program, 0x31, &cie, &mut state).unwrap();
        assert_eq!(state.get_register_rule(3), Some((RegisterRule::Offset, -8)));

        // funcrel|uleb128
        cie.fde_encoding = DwEhPe(gimli::DW_EH_PE_funcrel.0 | gimli::DW_EH_PE_uleb128.0);
        let program = [0x01, 0x08, 0x83, 1];
        let mut state = CfaState::new();
        run(&program, 0x09, &cie, &mut state).unwrap();
        assert_eq!(state.get_register_rule(3), Some((RegisterRule::Offset, -8)));

        // pcrel|sleb128 landing before the function start.
        cie.fde_encoding = DwEhPe(gimli::DW_EH_PE_pcrel.0 | gimli::DW_EH_PE_sleb128.0);
        let mut state = CfaState::new();
        assert_eq!(
            run(&[0x01, 0x7e], 0, &cie, &mut state),
            Err(CfaError::BadOperand { address: BASE })
        );
    }

    #[test]
    fn test_set_loc_unsupported_encodings() {
        let mut cie = cie(1, -8);
        let mut state = CfaState::new();

        // datarel with no data base
        cie.fde_encoding = DwEhPe(gimli::DW_EH_PE_datarel.0 | gimli::DW_EH_PE_udata4.0);
        assert_eq!(
            run(&[0x01, 0, 0, 0, 0], 0, &cie, &mut state),
            Err(CfaError::UnsupportedPointerEncoding { encoding: 0x33, address: BASE + 1 })
        );

        cie.fde_encoding = DwEhPe(gimli::DW_EH_PE_indirect.0 | gimli::DW_EH_PE_udata4.0);
        assert_eq!(
            run(&[0x01, 0, 0, 0, 0], 0, &cie, &mut state),
            Err(CfaError::UnsupportedPointerEncoding { encoding: 0x83, address: BASE + 1 })
        );

        cie.fde_encoding = gimli::DW_EH_PE_omit;
        assert!(matches!(
            run(&[0x01, 0, 0, 0, 0], 0, &cie, &mut state),
            Err(CfaError::UnsupportedPointerEncoding { encoding: 0xff, .. })
        ));

        cie.fde_encoding = gimli::DW_EH_PE_absptr;
        assert_eq!(
            run(&[0x01, 0, 0, 0], 0, &cie, &mut state),
            Err(CfaError::Truncated { address: BASE + 1 })
        );
    }

    #[test]
    fn test_truncated_operands() {
        let mut state = CfaState::new();
        assert_eq!(
            run(&[0x0c, 7], 0, &cie(1, -8), &mut state),
            Err(CfaError::Truncated { address: BASE + 2 })
        );
        assert_eq!(
            run(&[0x03, 0x01], 0, &cie(1, -8), &mut state),
            Err(CfaError::Truncated { address: BASE + 1 })
        );
        // expression block longer than the program
        assert!(matches!(
            run(&[0x10, 6, 9, 0x30], 0, &cie(1, -8), &mut state),
            Err(CfaError::Truncated { .. })
        ));
    }

    #[test]
    fn test_program_outside_memory() {
        let bytes = [0u8; 4];
        let memory = SliceMemory::new(BASE, &bytes);
        let mut state = CfaState::new();
        assert_eq!(
            evaluate_program(&memory, 0, &cie(1, -8), RunTimeEndian::Little, BASE, 8, &mut state),
            Err(CfaError::BadAddress { address: BASE, len: 8 })
        );
    }

    #[test]
    fn test_fde_pc_offset() {
        let fde = FdeInfo {
            initial_location: 0x1000,
            address_range: 0x40,
            instructions_address: 0,
            instructions_length: 0,
        };
        assert_eq!(fde.pc_offset(0x1000), Some(0));
        assert_eq!(fde.pc_offset(0x103f), Some(0x3f));
        assert_eq!(fde.pc_offset(0x1040), None);
        assert_eq!(fde.pc_offset(0xfff), None);
    }
}
