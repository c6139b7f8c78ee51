//! Error types for CFA evaluation and frame recovery.

use core::fmt;

use async_alloc::AllocError;
use uwerrno::UwErrorKind;

/// Errors that can occur while evaluating call frame information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfaError {
    /// A read ran past the end of the instruction or expression bytes.
    Truncated { address: u64 },

    /// A LEB128 value does not fit in 64 bits.
    BadLeb128 { address: u64 },

    /// Target memory at `address` is not readable.
    BadAddress { address: u64, len: usize },

    /// Location or address arithmetic overflowed.
    Overflow { address: u64 },

    /// Unknown or unsupported call frame instruction.
    UnsupportedOpcode { opcode: u8, address: u64 },

    /// A `DW_EH_PE_*` pointer encoding that cannot be decoded, or whose
    /// base address was not supplied.
    UnsupportedPointerEncoding { encoding: u8, address: u64 },

    /// Unknown or unsupported DWARF expression operation.
    UnsupportedOperation { opcode: u8, address: u64 },

    /// Every register rule entry is in use.
    RegisterLimit,

    /// `DW_CFA_remember_state` nested too deeply.
    StateOverflow,

    /// `DW_CFA_restore_state` with nothing remembered.
    StateUnderflow,

    /// A CFA update that needs a register-based rule found another kind.
    CfaRuleMismatch,

    /// No CFA rule was defined.
    UndefinedCfa,

    /// DWARF register number with no mapping on this architecture.
    UnknownRegister { regnum: u32 },

    /// The current frame does not hold a value for the register.
    MissingRegister { regnum: u32 },

    /// An expression popped or picked beyond its stack.
    StackUnderflow { address: u64 },

    /// An expression pushed beyond its stack.
    StackOverflow { address: u64 },

    /// `DW_OP_div` or `DW_OP_mod` with a zero divisor.
    DivideByZero { address: u64 },

    /// A branch left the expression bytes.
    BadBranch { address: u64 },

    /// An operand is outside its valid range.
    BadOperand { address: u64 },

    /// An expression ran for more steps than allowed.
    StepLimit { steps: usize },

    /// The program counter lies outside the described function.
    PcOutOfRange { pc: u64 },

    /// Register-state storage could not be allocated.
    Alloc(AllocError),
}

impl CfaError {
    /// Returns the shared error kind for this error.
    pub fn kind(&self) -> UwErrorKind {
        match self {
            Self::Truncated { .. } => UwErrorKind::UnexpectedEof,
            Self::BadLeb128 { .. }
            | Self::StateUnderflow
            | Self::UndefinedCfa
            | Self::StackUnderflow { .. }
            | Self::DivideByZero { .. }
            | Self::BadBranch { .. }
            | Self::BadOperand { .. } => UwErrorKind::InvalidData,
            Self::BadAddress { .. } => UwErrorKind::BadAddress,
            Self::Overflow { .. } | Self::StepLimit { .. } => UwErrorKind::OutOfRange,
            Self::UnsupportedOpcode { .. }
            | Self::UnsupportedOperation { .. }
            | Self::UnsupportedPointerEncoding { .. }
            | Self::UnknownRegister { .. } => UwErrorKind::Unsupported,
            Self::RegisterLimit | Self::StateOverflow | Self::StackOverflow { .. } => {
                UwErrorKind::NoMemory
            }
            Self::CfaRuleMismatch => UwErrorKind::InvalidInput,
            Self::MissingRegister { .. } | Self::PcOutOfRange { .. } => UwErrorKind::NotFound,
            Self::Alloc(err) => UwErrorKind::from(*err),
        }
    }
}

impl fmt::Display for CfaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { address } => write!(f, "Truncated read at {:#x}", address),
            Self::BadLeb128 { address } => write!(f, "LEB128 value at {:#x} overflows", address),
            Self::BadAddress { address, len } => {
                write!(f, "Cannot read {} bytes at {:#x}", len, address)
            }
            Self::Overflow { address } => write!(f, "Arithmetic overflow at {:#x}", address),
            Self::UnsupportedOpcode { opcode, address } => {
                write!(f, "Unsupported CFA opcode {:#04x} at {:#x}", opcode, address)
            }
            Self::UnsupportedPointerEncoding { encoding, address } => {
                write!(f, "Unsupported pointer encoding {:#04x} at {:#x}", encoding, address)
            }
            Self::UnsupportedOperation { opcode, address } => {
                write!(f, "Unsupported expression opcode {:#04x} at {:#x}", opcode, address)
            }
            Self::RegisterLimit => write!(f, "Register rule limit reached"),
            Self::StateOverflow => write!(f, "Too many remembered states"),
            Self::StateUnderflow => write!(f, "No remembered state to restore"),
            Self::CfaRuleMismatch => write!(f, "CFA rule is not register based"),
            Self::UndefinedCfa => write!(f, "CFA rule is undefined"),
            Self::UnknownRegister { regnum } => {
                write!(f, "DWARF register {} has no mapping", regnum)
            }
            Self::MissingRegister { regnum } => {
                write!(f, "DWARF register {} is not available", regnum)
            }
            Self::StackUnderflow { address } => {
                write!(f, "Expression stack underflow at {:#x}", address)
            }
            Self::StackOverflow { address } => {
                write!(f, "Expression stack overflow at {:#x}", address)
            }
            Self::DivideByZero { address } => write!(f, "Division by zero at {:#x}", address),
            Self::BadBranch { address } => write!(f, "Branch target out of range at {:#x}", address),
            Self::BadOperand { address } => write!(f, "Invalid operand at {:#x}", address),
            Self::StepLimit { steps } => write!(f, "Expression exceeded {} steps", steps),
            Self::PcOutOfRange { pc } => write!(f, "PC {:#x} is outside the FDE range", pc),
            Self::Alloc(err) => write!(f, "Cannot allocate register state: {:?}", err),
        }
    }
}

impl From<AllocError> for CfaError {
    fn from(err: AllocError) -> Self {
        Self::Alloc(err)
    }
}

impl From<CfaError> for UwErrorKind {
    fn from(err: CfaError) -> Self {
        err.kind()
    }
}

/// Result type for CFA operations.
pub type Result<T> = core::result::Result<T, CfaError>;

/// Maps a `gimli` read failure at `address` to a [`CfaError`].
pub(crate) fn read_error(err: gimli::Error, address: u64) -> CfaError {
    match err {
        gimli::Error::BadUnsignedLeb128 | gimli::Error::BadSignedLeb128 => {
            CfaError::BadLeb128 { address }
        }
        _ => CfaError::Truncated { address },
    }
}
