//! DWARF expression evaluation for call frame information.
//!
//! Only the operations that are meaningful inside CFI are accepted; location
//! descriptions, calls, TLS and object-relative operations are rejected as
//! unsupported. All arithmetic is done at the target register width.

use gimli::{DwOp, EndianSlice, Reader};
use heapless::Vec;

use crate::{
    arch::Arch,
    config::{EXPR_STACK_DEPTH, max_expression_steps},
    error::{CfaError, Result, read_error},
    frame::FrameState,
    memory::MemoryView,
};

struct Machine<'a, A: Arch> {
    stack: Vec<u64, EXPR_STACK_DEPTH>,
    frame: &'a FrameState<A>,
    mask: u64,
}

impl<A: Arch> Machine<'_, A> {
    fn push(&mut self, value: u64, at: u64) -> Result<()> {
        self.stack
            .push(value & self.mask)
            .map_err(|_| CfaError::StackOverflow { address: at })
    }

    fn pop(&mut self, at: u64) -> Result<u64> {
        self.stack.pop().ok_or(CfaError::StackUnderflow { address: at })
    }

    fn pick(&mut self, index: usize, at: u64) -> Result<()> {
        let len = self.stack.len();
        let value = len
            .checked_sub(index + 1)
            .map(|idx| self.stack[idx])
            .ok_or(CfaError::StackUnderflow { address: at })?;
        self.push(value, at)
    }

    fn signed(&self, value: u64) -> i64 {
        let shift = 64 - A::POINTER_WIDTH as u32 * 8;
        ((value << shift) as i64) >> shift
    }

    fn register(&self, regnum: u64, at: u64) -> Result<u64> {
        let regnum = u32::try_from(regnum).map_err(|_| CfaError::BadOperand { address: at })?;
        self.frame.get_dwarf(regnum)
    }

    fn binary(&mut self, at: u64, f: impl FnOnce(u64, u64) -> Result<u64>) -> Result<()> {
        let top = self.pop(at)?;
        let second = self.pop(at)?;
        let value = f(second, top)?;
        self.push(value, at)
    }
}

/// Reads a DWARF block (ULEB128 length followed by that many bytes) at
/// `address` and returns the address and length of its bytes.
pub fn read_block<M: MemoryView + ?Sized>(memory: &M, address: u64) -> Result<(u64, u64)> {
    let mut length = 0u64;
    let mut shift = 0;
    let mut at = address;
    loop {
        let byte = memory.read_u8(at)?;
        at = at.checked_add(1).ok_or(CfaError::Overflow { address: at })?;
        if shift == 63 && byte > 1 {
            return Err(CfaError::BadLeb128 { address });
        }
        length |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok((at, length));
        }
        shift += 7;
        if shift > 63 {
            return Err(CfaError::BadLeb128 { address });
        }
    }
}

/// Evaluates the `length` expression bytes at `address` against `frame`.
///
/// `initial` is pushed before the first operation; register rules start
/// with the CFA on the stack, the CFA expression starts empty. The result is
/// the value left on top of the stack.
pub fn evaluate_expression<A: Arch, M: MemoryView + ?Sized>(
    memory: &M,
    frame: &FrameState<A>,
    address: u64,
    length: u64,
    initial: Option<u64>,
) -> Result<u64> {
    let len = usize::try_from(length).map_err(|_| CfaError::BadAddress {
        address,
        len: usize::MAX,
    })?;
    let bytes = memory.read(address, len)?;
    let endian = A::BYTE_ORDER;
    let width = A::POINTER_WIDTH;
    let max_steps = max_expression_steps();

    let mut machine = Machine {
        stack: Vec::new(),
        frame,
        mask: A::value_mask(),
    };
    if let Some(value) = initial {
        machine.push(value, address)?;
    }

    let mut reader = EndianSlice::new(bytes, endian);
    let mut steps = 0;
    while !reader.is_empty() {
        steps += 1;
        if steps > max_steps {
            log::debug!("expression at {:#x} exceeded {} steps", address, max_steps);
            return Err(CfaError::StepLimit { steps: max_steps });
        }

        let at = address + (len - reader.len()) as u64;
        macro_rules! read {
            ($method:ident $(, $arg:expr)?) => {
                reader.$method($($arg)?).map_err(|err| read_error(err, at))?
            };
        }

        let byte = read!(read_u8);
        let op = DwOp(byte);
        log::trace!("{:#x}: {}", at, op);

        match op {
            DwOp(b) if (gimli::DW_OP_lit0.0..=gimli::DW_OP_lit31.0).contains(&b) => {
                machine.push((b - gimli::DW_OP_lit0.0) as u64, at)?;
            }
            gimli::DW_OP_addr => {
                let value = read!(read_address, width as u8);
                machine.push(value, at)?;
            }
            gimli::DW_OP_const1u => machine.push(read!(read_u8) as u64, at)?,
            gimli::DW_OP_const1s => machine.push(read!(read_i8) as i64 as u64, at)?,
            gimli::DW_OP_const2u => machine.push(read!(read_u16) as u64, at)?,
            gimli::DW_OP_const2s => machine.push(read!(read_i16) as i64 as u64, at)?,
            gimli::DW_OP_const4u => machine.push(read!(read_u32) as u64, at)?,
            gimli::DW_OP_const4s => machine.push(read!(read_i32) as i64 as u64, at)?,
            gimli::DW_OP_const8u => machine.push(read!(read_u64), at)?,
            gimli::DW_OP_const8s => machine.push(read!(read_i64) as u64, at)?,
            gimli::DW_OP_constu => machine.push(read!(read_uleb128), at)?,
            gimli::DW_OP_consts => machine.push(read!(read_sleb128) as u64, at)?,

            DwOp(b) if (gimli::DW_OP_breg0.0..=gimli::DW_OP_breg31.0).contains(&b) => {
                let offset = read!(read_sleb128);
                let base = machine.register((b - gimli::DW_OP_breg0.0) as u64, at)?;
                machine.push(base.wrapping_add_signed(offset), at)?;
            }
            gimli::DW_OP_bregx => {
                let regnum = read!(read_uleb128);
                let offset = read!(read_sleb128);
                let base = machine.register(regnum, at)?;
                machine.push(base.wrapping_add_signed(offset), at)?;
            }

            gimli::DW_OP_dup => machine.pick(0, at)?,
            gimli::DW_OP_over => machine.pick(1, at)?,
            gimli::DW_OP_pick => {
                let index = read!(read_u8);
                machine.pick(index as usize, at)?;
            }
            gimli::DW_OP_drop => {
                machine.pop(at)?;
            }
            gimli::DW_OP_swap => {
                let top = machine.pop(at)?;
                let second = machine.pop(at)?;
                machine.push(top, at)?;
                machine.push(second, at)?;
            }
            gimli::DW_OP_rot => {
                let top = machine.pop(at)?;
                let second = machine.pop(at)?;
                let third = machine.pop(at)?;
                machine.push(top, at)?;
                machine.push(third, at)?;
                machine.push(second, at)?;
            }

            gimli::DW_OP_deref | gimli::DW_OP_xderef => {
                if op == gimli::DW_OP_xderef {
                    // Single address space: drop the address space identifier.
                    let addr = machine.pop(at)?;
                    machine.pop(at)?;
                    machine.push(addr, at)?;
                }
                let addr = machine.pop(at)?;
                let value = memory.read_sized(addr, width, endian)?;
                machine.push(value, at)?;
            }
            gimli::DW_OP_deref_size | gimli::DW_OP_xderef_size => {
                let size = read!(read_u8) as usize;
                if op == gimli::DW_OP_xderef_size {
                    let addr = machine.pop(at)?;
                    machine.pop(at)?;
                    machine.push(addr, at)?;
                }
                if size > width {
                    return Err(CfaError::BadOperand { address: at });
                }
                let addr = machine.pop(at)?;
                let value = memory
                    .read_sized(addr, size, endian)
                    .map_err(|err| match err {
                        CfaError::BadOperand { .. } => CfaError::BadOperand { address: at },
                        other => other,
                    })?;
                machine.push(value, at)?;
            }

            gimli::DW_OP_abs => {
                let value = machine.pop(at)?;
                let value = machine.signed(value).unsigned_abs();
                machine.push(value, at)?;
            }
            gimli::DW_OP_neg => {
                let value = machine.pop(at)?;
                machine.push(value.wrapping_neg(), at)?;
            }
            gimli::DW_OP_not => {
                let value = machine.pop(at)?;
                machine.push(!value, at)?;
            }
            gimli::DW_OP_plus_uconst => {
                let addend = read!(read_uleb128);
                let value = machine.pop(at)?;
                machine.push(value.wrapping_add(addend), at)?;
            }
            gimli::DW_OP_and => machine.binary(at, |a, b| Ok(a & b))?,
            gimli::DW_OP_or => machine.binary(at, |a, b| Ok(a | b))?,
            gimli::DW_OP_xor => machine.binary(at, |a, b| Ok(a ^ b))?,
            gimli::DW_OP_plus => machine.binary(at, |a, b| Ok(a.wrapping_add(b)))?,
            gimli::DW_OP_minus => machine.binary(at, |a, b| Ok(a.wrapping_sub(b)))?,
            gimli::DW_OP_mul => machine.binary(at, |a, b| Ok(a.wrapping_mul(b)))?,
            gimli::DW_OP_div => {
                let divisor = machine.pop(at)?;
                let dividend = machine.pop(at)?;
                let (divisor, dividend) = (machine.signed(divisor), machine.signed(dividend));
                if divisor == 0 {
                    return Err(CfaError::DivideByZero { address: at });
                }
                machine.push(dividend.wrapping_div(divisor) as u64, at)?;
            }
            gimli::DW_OP_mod => machine.binary(at, |a, b| {
                a.checked_rem(b).ok_or(CfaError::DivideByZero { address: at })
            })?,
            gimli::DW_OP_shl => machine.binary(at, |a, b| {
                Ok(u32::try_from(b).ok().and_then(|b| a.checked_shl(b)).unwrap_or(0))
            })?,
            gimli::DW_OP_shr => machine.binary(at, |a, b| {
                Ok(u32::try_from(b).ok().and_then(|b| a.checked_shr(b)).unwrap_or(0))
            })?,
            gimli::DW_OP_shra => {
                let shift = machine.pop(at)?.min(63) as u32;
                let value = machine.pop(at)?;
                let value = machine.signed(value);
                machine.push((value >> shift) as u64, at)?;
            }

            gimli::DW_OP_eq
            | gimli::DW_OP_ne
            | gimli::DW_OP_lt
            | gimli::DW_OP_le
            | gimli::DW_OP_gt
            | gimli::DW_OP_ge => {
                let top = machine.pop(at)?;
                let second = machine.pop(at)?;
                let (a, b) = (machine.signed(second), machine.signed(top));
                let result = match op {
                    gimli::DW_OP_eq => a == b,
                    gimli::DW_OP_ne => a != b,
                    gimli::DW_OP_lt => a < b,
                    gimli::DW_OP_le => a <= b,
                    gimli::DW_OP_gt => a > b,
                    _ => a >= b,
                };
                machine.push(result as u64, at)?;
            }

            gimli::DW_OP_skip | gimli::DW_OP_bra => {
                let offset = read!(read_i16);
                let taken = op == gimli::DW_OP_skip || machine.pop(at)? != 0;
                if taken {
                    let pos = (len - reader.len()) as i64 + offset as i64;
                    let pos = usize::try_from(pos)
                        .ok()
                        .filter(|&pos| pos <= len)
                        .ok_or(CfaError::BadBranch { address: at })?;
                    reader = EndianSlice::new(&bytes[pos..], endian);
                }
            }

            gimli::DW_OP_nop => {}

            _ => {
                log::debug!("unsupported expression opcode {:#04x} at {:#x}", byte, at);
                return Err(CfaError::UnsupportedOperation { opcode: byte, address: at });
            }
        }
    }

    machine.pop(address + len as u64)
}
