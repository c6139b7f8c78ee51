// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Async-signal-safe memory allocation.
//!
//! The crate exposes three layers:
//!
//! - [`PageAllocator`]: one anonymous mapping bracketed by optional
//!   inaccessible guard pages. Its bookkeeping lives inside the mapping.
//! - [`Allocator`]: a free-list pool allocator carved out of
//!   [`PageAllocator`] regions. Like the regions it draws from, it places
//!   its own control structure inside the first region.
//! - [`AsyncAllocatable`] and [`AsyncBox`]: placement of typed values into
//!   an [`Allocator`] instead of the global heap.
//!
//! Nothing here calls into the global allocator, blocks in the kernel, or
//! iterates without a bound, so every operation except region creation and
//! destruction may run inside a signal handler.

#![cfg_attr(not(test), no_std)]

mod boxed;
pub mod config;
mod page;
mod pool;

pub use boxed::{AsyncAllocatable, AsyncBox};
pub use config::{PoolOptions, page_size};
pub use page::{PageAllocator, PageOptions};
pub use pool::{Allocator, OwnedAllocator};
use uwerrno::{UwError, UwErrorKind};

/// Alignment of every block handed out by an [`Allocator`].
pub const NATURAL_ALIGN: usize = 16;

/// The error type used for allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Invalid `size`, or a type whose alignment the pool cannot honor.
    InvalidInput,
    /// No enough memory to allocate.
    NoMemory,
    /// The pool lock or a free-list walk exceeded its bound.
    Busy,
}

impl From<AllocError> for UwErrorKind {
    fn from(value: AllocError) -> Self {
        match value {
            AllocError::NoMemory => UwErrorKind::NoMemory,
            AllocError::Busy => UwErrorKind::ResourceBusy,
            AllocError::InvalidInput => UwErrorKind::InvalidInput,
        }
    }
}

impl From<UwError> for AllocError {
    fn from(value: UwError) -> Self {
        match value.kind() {
            Some(UwErrorKind::InvalidInput) => AllocError::InvalidInput,
            Some(UwErrorKind::ResourceBusy) => AllocError::Busy,
            _ => AllocError::NoMemory,
        }
    }
}

/// A [`Result`] type with [`AllocError`] as the error type.
pub type AllocResult<T = ()> = Result<T, AllocError>;

#[inline]
const fn align_down(pos: usize, align: usize) -> usize {
    pos & !(align - 1)
}

#[inline]
const fn align_up(pos: usize, align: usize) -> usize {
    (pos + (align - 1)) & !(align - 1)
}

/// Like [`align_up`], but `None` on overflow.
#[inline]
const fn checked_align_up(pos: usize, align: usize) -> Option<usize> {
    match pos.checked_add(align - 1) {
        Some(end) => Some(end & !(align - 1)),
        None => None,
    }
}

/// Checks whether the address has the demanded alignment.
///
/// Equivalent to `addr % align == 0`, but the alignment must be a power of two.
#[inline]
const fn is_aligned(base_addr: usize, align: usize) -> bool {
    base_addr & (align - 1) == 0
}
