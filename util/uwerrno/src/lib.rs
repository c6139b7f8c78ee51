// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

#![cfg_attr(not(test), no_std)]

//! Error codes shared by the async-safe allocator and the CFA unwinder.
//!
//! An [`UwError`] carries either one of the [`UwErrorKind`] values or a raw
//! host `errno` reported by a failed system call.

use core::fmt;

use strum::EnumCount;

/// The error kind type used by the unwinder crates.
///
/// Similar to [`std::io::ErrorKind`].
///
/// [`std::io::ErrorKind`]: https://doc.rust-lang.org/std/io/enum.ErrorKind.html
#[repr(i32)]
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, EnumCount)]
pub enum UwErrorKind {
    /// Target memory at the requested address could not be read.
    BadAddress = 1,
    /// Bad internal state.
    BadState,
    /// Data not valid for the operation were encountered.
    ///
    /// Unlike [`InvalidInput`], this means the operation parameters were
    /// valid, but the bytes being decoded were malformed.
    ///
    /// [`InvalidInput`]: UwErrorKind::InvalidInput
    InvalidData,
    /// Invalid parameter/argument.
    InvalidInput,
    /// Not enough space/cannot allocate memory.
    NoMemory,
    /// The requested entity is not found.
    NotFound,
    /// Result out of range.
    OutOfRange,
    /// A lock could not be acquired within its spin limit.
    ResourceBusy,
    /// A read ran past the end of the supplied bytes.
    UnexpectedEof,
    /// This operation is unsupported or unimplemented.
    Unsupported,
}

impl UwErrorKind {
    /// Returns the error description.
    pub fn as_str(&self) -> &'static str {
        use UwErrorKind::*;
        match *self {
            BadAddress => "Bad address",
            BadState => "Bad internal state",
            InvalidData => "Invalid data",
            InvalidInput => "Invalid input parameter",
            NoMemory => "Out of memory",
            NotFound => "Entity not found",
            OutOfRange => "Result out of range",
            ResourceBusy => "Resource busy",
            UnexpectedEof => "Unexpected end of data",
            Unsupported => "Operation not supported",
        }
    }

    /// Returns the error code value in `i32`.
    pub const fn code(self) -> i32 {
        self as i32
    }

    fn from_errno(errno: i32) -> Option<Self> {
        use UwErrorKind::*;
        Some(match errno {
            libc::EFAULT => BadAddress,
            libc::EINVAL => InvalidInput,
            libc::ENOMEM => NoMemory,
            libc::ENOENT => NotFound,
            libc::ERANGE => OutOfRange,
            libc::EBUSY => ResourceBusy,
            libc::ENOTSUP => Unsupported,
            _ => return None,
        })
    }
}

impl TryFrom<i32> for UwErrorKind {
    type Error = i32;

    #[inline]
    fn try_from(value: i32) -> Result<Self, Self::Error> {
        if value > 0 && value <= UwErrorKind::COUNT as i32 {
            Ok(unsafe { core::mem::transmute::<i32, UwErrorKind>(value) })
        } else {
            Err(value)
        }
    }
}

impl fmt::Display for UwErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The error type used by the unwinder crates.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct UwError(i32);

enum UwErrorData {
    Kind(UwErrorKind),
    Os(i32),
}

/// Largest raw `errno` accepted by [`UwError::from_errno`].
const MAX_ERRNO: i32 = 4095;

impl UwError {
    const fn new_kind(kind: UwErrorKind) -> Self {
        UwError(kind.code())
    }

    /// Wraps a raw `errno` returned by a failed system call.
    ///
    /// Values outside `1..=4095` are not valid errnos and become
    /// [`UwErrorKind::BadState`].
    pub const fn from_errno(errno: i32) -> Self {
        if errno > 0 && errno <= MAX_ERRNO {
            UwError(-errno)
        } else {
            Self::new_kind(UwErrorKind::BadState)
        }
    }

    fn data(&self) -> UwErrorData {
        match UwErrorKind::try_from(self.0) {
            Ok(kind) => UwErrorData::Kind(kind),
            Err(code) => UwErrorData::Os(-code),
        }
    }

    /// Returns the error code value in `i32`.
    pub const fn code(self) -> i32 {
        self.0
    }

    /// Returns the error kind, translating raw `errno` values where a kind
    /// exists for them.
    pub fn kind(self) -> Option<UwErrorKind> {
        match self.data() {
            UwErrorData::Kind(kind) => Some(kind),
            UwErrorData::Os(errno) => UwErrorKind::from_errno(errno),
        }
    }
}

impl<E: Into<UwErrorKind>> From<E> for UwError {
    fn from(e: E) -> Self {
        UwError::new_kind(e.into())
    }
}

impl fmt::Debug for UwError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data() {
            UwErrorData::Kind(kind) => write!(f, "UwErrorKind::{:?}", kind),
            UwErrorData::Os(errno) => write!(f, "Errno({})", errno),
        }
    }
}

impl fmt::Display for UwError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data() {
            UwErrorData::Kind(kind) => write!(f, "{}", kind),
            UwErrorData::Os(errno) => write!(f, "OS error {}", errno),
        }
    }
}

macro_rules! uwerror_consts {
    ($($name:ident),*) => {
        #[allow(non_upper_case_globals)]
        impl UwError {
            $(
                #[doc = concat!("An [`UwError`] with kind [`UwErrorKind::", stringify!($name), "`].")]
                pub const $name: Self = Self::new_kind(UwErrorKind::$name);
            )*
        }
    };
}

uwerror_consts!(
    BadAddress,
    BadState,
    InvalidData,
    InvalidInput,
    NoMemory,
    NotFound,
    OutOfRange,
    ResourceBusy,
    UnexpectedEof,
    Unsupported
);

/// A specialized [`Result`] type with [`UwError`] as the error type.
pub type UwResult<T = ()> = Result<T, UwError>;

/// Convenience method to construct an [`UwError`] type while printing a
/// warning message.
///
/// # Examples
///
/// ```
/// # use uwerrno::{uw_err_type, UwError};
/// #
/// // Also print "[UwErrorKind::NotFound]" if a logger is installed.
/// assert_eq!(uw_err_type!(NotFound), UwError::NotFound);
///
/// // Also print "[UwErrorKind::BadAddress] the address is 0!" if a logger
/// // is installed.
/// assert_eq!(
///     uw_err_type!(BadAddress, "the address is 0!"),
///     UwError::BadAddress,
/// );
/// ```
#[macro_export]
macro_rules! uw_err_type {
    ($err:ident) => {{
        use $crate::UwErrorKind::*;
        let err = $crate::UwError::from($err);
        $crate::__priv::warn!("[{:?}]", err);
        err
    }};
    ($err:ident, $msg:expr) => {{
        use $crate::UwErrorKind::*;
        let err = $crate::UwError::from($err);
        $crate::__priv::warn!("[{:?}] {}", err, $msg);
        err
    }};
}

/// Ensure a condition is true. If it is not, return from the function
/// with an error.
///
/// ## Examples
///
/// ```rust
/// # use uwerrno::{ensure, uw_err, UwError, UwResult};
///
/// fn example(width: usize) -> UwResult {
///     ensure!(width == 4 || width == 8, uw_err!(Unsupported));
///     Ok(())
/// }
/// ```
#[macro_export]
macro_rules! ensure {
    ($predicate:expr, $context_selector:expr $(,)?) => {
        if !$predicate {
            return $context_selector;
        }
    };
}

/// Convenience method to construct an [`Err(UwError)`] type while printing a
/// warning message.
///
/// # Examples
///
/// ```
/// # use uwerrno::{uw_err, UwResult, UwError};
/// #
/// assert_eq!(uw_err!(NoMemory), UwResult::<()>::Err(UwError::NoMemory));
/// assert_eq!(
///     uw_err!(BadAddress, "the address is 0!"),
///     UwResult::<()>::Err(UwError::BadAddress),
/// );
/// ```
/// [`Err(UwError)`]: Err
#[macro_export]
macro_rules! uw_err {
    ($err:ident) => {
        Err($crate::uw_err_type!($err))
    };
    ($err:ident, $msg:expr) => {
        Err($crate::uw_err_type!($err, $msg))
    };
}

/// Throws an error of type [`UwError`] with the given error code, optionally
/// with a message.
#[macro_export]
macro_rules! uw_bail {
    ($($t:tt)*) => {
        return $crate::uw_err!($($t)*);
    };
}

#[doc(hidden)]
pub mod __priv {
    pub use log::warn;
}

#[cfg(test)]
mod tests {
    use strum::EnumCount;

    use crate::{UwError, UwErrorKind, UwResult};

    #[test]
    fn test_codes() {
        let max_code = UwErrorKind::COUNT as i32;
        assert_eq!(max_code, 10);
        assert_eq!(max_code, UwError::Unsupported.code());
        assert_eq!(UwError::BadAddress.code(), 1);

        assert_eq!(UwErrorKind::try_from(2), Ok(UwErrorKind::BadState));
        assert_eq!(UwErrorKind::try_from(max_code), Ok(UwErrorKind::Unsupported));
        assert_eq!(UwErrorKind::try_from(max_code + 1), Err(max_code + 1));
        assert_eq!(UwErrorKind::try_from(0), Err(0));
        assert_eq!(UwErrorKind::try_from(-libc::EIO), Err(-libc::EIO));
    }

    #[test]
    fn test_errno_conversion() {
        let os = UwError::from_errno(libc::ENOMEM);
        assert_eq!(os.code(), -libc::ENOMEM);
        assert_eq!(os.kind(), Some(UwErrorKind::NoMemory));
        assert_ne!(os, UwError::NoMemory);
        assert_eq!(UwError::from_errno(libc::EINVAL).kind(), Some(UwErrorKind::InvalidInput));
        assert_eq!(UwError::from_errno(libc::EIO).kind(), None);

        assert_eq!(UwError::from_errno(0), UwError::BadState);
        assert_eq!(UwError::from_errno(-5), UwError::BadState);
        assert_eq!(UwError::from_errno(4096), UwError::BadState);
    }

    #[test]
    fn test_display() {
        assert_eq!(UwError::NoMemory.to_string(), "Out of memory");
        assert_eq!(
            format!("{:?}", UwError::ResourceBusy),
            "UwErrorKind::ResourceBusy"
        );
        assert_eq!(UwError::from_errno(libc::EIO).to_string(), format!("OS error {}", libc::EIO));
    }

    #[test]
    fn test_macros() {
        fn check(width: usize) -> UwResult<usize> {
            ensure!(width == 4 || width == 8, uw_err!(Unsupported, "odd width"));
            Ok(width)
        }
        fn bail() -> UwResult {
            uw_bail!(NotFound);
        }

        assert_eq!(check(8), Ok(8));
        assert_eq!(check(3), Err(UwError::Unsupported));
        assert_eq!(bail(), Err(UwError::NotFound));
    }
}
