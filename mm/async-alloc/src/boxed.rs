// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Typed placement into an [`Allocator`].

use core::{
    fmt,
    marker::PhantomData,
    mem::{align_of, size_of},
    ops::{Deref, DerefMut},
    ptr::{self, NonNull},
};

use crate::{AllocError, AllocResult, NATURAL_ALIGN, pool::Allocator};

/// Marker for types that must be placed in an [`Allocator`] rather than on
/// the global heap.
///
/// Implementors are constructed through [`AsyncBox`], which draws storage
/// from an explicit allocator and returns it there on drop.
pub trait AsyncAllocatable {}

/// An owning pointer to a `T` stored in an [`Allocator`].
pub struct AsyncBox<'a, T: AsyncAllocatable> {
    ptr: NonNull<T>,
    allocator: &'a Allocator,
    _owns: PhantomData<T>,
}

impl<'a, T: AsyncAllocatable> AsyncBox<'a, T> {
    /// Moves `value` into storage drawn from `allocator`.
    pub fn new_in(value: T, allocator: &'a Allocator) -> AllocResult<Self> {
        Self::new_with(allocator, || value)
    }

    /// Allocates storage from `allocator` and writes the value produced by
    /// `init` into it.
    ///
    /// Types aligned beyond [`NATURAL_ALIGN`] are rejected with
    /// [`AllocError::InvalidInput`].
    pub fn new_with(allocator: &'a Allocator, init: impl FnOnce() -> T) -> AllocResult<Self> {
        if align_of::<T>() > NATURAL_ALIGN {
            return Err(AllocError::InvalidInput);
        }
        let ptr = allocator.alloc(size_of::<T>())?.cast::<T>();
        unsafe { ptr.as_ptr().write(init()) };
        Ok(Self {
            ptr,
            allocator,
            _owns: PhantomData,
        })
    }

    /// Consumes the box without dropping the value or freeing its storage.
    pub fn into_raw(this: Self) -> NonNull<T> {
        let ptr = this.ptr;
        core::mem::forget(this);
        ptr
    }

    /// Rebuilds a box from a pointer returned by [`into_raw`](Self::into_raw).
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`into_raw`](Self::into_raw) on a box drawn from
    /// `allocator`, and must not be owned by another box.
    pub unsafe fn from_raw_in(ptr: NonNull<T>, allocator: &'a Allocator) -> Self {
        Self {
            ptr,
            allocator,
            _owns: PhantomData,
        }
    }

    /// The allocator this box draws from.
    pub fn allocator(this: &Self) -> &'a Allocator {
        this.allocator
    }
}

impl<T: AsyncAllocatable> Deref for AsyncBox<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: AsyncAllocatable> DerefMut for AsyncBox<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }
}

impl<T: AsyncAllocatable> Drop for AsyncBox<'_, T> {
    fn drop(&mut self) {
        unsafe { ptr::drop_in_place(self.ptr.as_ptr()) };
        if let Err(err) = self.allocator.dealloc(self.ptr.cast()) {
            log::warn!(
                "leaking {} bytes at {:#x}: {:?}",
                size_of::<T>(),
                self.ptr.as_ptr() as usize,
                err
            );
        }
    }
}

impl<T: AsyncAllocatable + fmt::Debug> fmt::Debug for AsyncBox<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
