// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Guarded page regions obtained directly from the OS.

use core::{
    mem::size_of,
    ptr::{self, NonNull},
};

use bitflags::bitflags;
use uwerrno::{UwError, UwResult, ensure, uw_bail, uw_err, uw_err_type};

use crate::{AllocError, AllocResult, NATURAL_ALIGN, align_up, checked_align_up, config::page_size};

bitflags! {
    /// Guard pages requested for a [`PageAllocator`] region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageOptions: u32 {
        /// Inaccessible page immediately below the usable region.
        const GUARD_LOW = 1 << 0;
        /// Inaccessible page immediately above the usable region.
        const GUARD_HIGH = 1 << 1;
    }
}

impl PageOptions {
    /// Number of guard pages these options add to a mapping.
    pub const fn guard_pages(self) -> usize {
        self.bits().count_ones() as usize
    }
}

/// One anonymous mapping with optional guard pages.
///
/// The descriptor lives in the first bytes of its own mapping, so a
/// `PageAllocator` is only ever handled through the pointer returned by
/// [`PageAllocator::create`] and released with [`PageAllocator::destroy`].
///
/// ```text
/// base_address
/// | guard | PageAllocator | usable ............................ | guard |
///         ^ first usable page
///                         ^ usable_address
/// ```
#[derive(Debug)]
pub struct PageAllocator {
    base_address: usize,
    total_size: usize,
    usable_address: usize,
    usable_size: usize,
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "emscripten"))] {
        fn errno() -> i32 {
            unsafe { *libc::__errno_location() }
        }
    } else if #[cfg(target_os = "android")] {
        fn errno() -> i32 {
            unsafe { *libc::__errno() }
        }
    } else if #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))] {
        fn errno() -> i32 {
            unsafe { *libc::__error() }
        }
    } else {
        fn errno() -> i32 {
            0
        }
    }
}

/// The error left by the last failed system call on this thread.
fn last_os_error() -> UwError {
    UwError::from_errno(errno())
}

/// Bytes reserved in front of the usable region for the descriptor.
const DESCRIPTOR_SIZE: usize = align_up(size_of::<PageAllocator>(), NATURAL_ALIGN);

impl PageAllocator {
    /// Maps a region with at least `size` usable bytes.
    ///
    /// The usable part is rounded up to whole pages, one extra page is
    /// mapped per requested guard, and the guards are made inaccessible. If
    /// any step fails the whole mapping is released again and
    /// [`AllocError::NoMemory`] is returned. A zero or overflowing `size` is
    /// [`AllocError::InvalidInput`].
    pub fn create(size: usize, options: PageOptions) -> AllocResult<NonNull<PageAllocator>> {
        Self::map(size, options).map_err(AllocError::from)
    }

    fn map(size: usize, options: PageOptions) -> UwResult<NonNull<PageAllocator>> {
        ensure!(size != 0, uw_err!(InvalidInput, "empty region"));
        let page = page_size();
        let (usable_span, total_size) = size
            .checked_add(DESCRIPTOR_SIZE)
            .and_then(|bytes| checked_align_up(bytes, page))
            .and_then(|span| Some((span, (options.guard_pages() * page).checked_add(span)?)))
            .ok_or_else(|| uw_err_type!(InvalidInput, "region size overflows"))?;

        let mapping = unsafe {
            libc::mmap(
                ptr::null_mut(),
                total_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if mapping == libc::MAP_FAILED {
            log::debug!("mmap of {:#x} bytes failed: {}", total_size, last_os_error());
            uw_bail!(NoMemory, "cannot map region");
        }
        let base_address = mapping as usize;

        let usable_page = if options.contains(PageOptions::GUARD_LOW) {
            base_address + page
        } else {
            base_address
        };
        let mut guards = [None; 2];
        if options.contains(PageOptions::GUARD_LOW) {
            guards[0] = Some(base_address);
        }
        if options.contains(PageOptions::GUARD_HIGH) {
            guards[1] = Some(usable_page + usable_span);
        }
        for guard in guards.into_iter().flatten() {
            if unsafe { libc::mprotect(guard as *mut libc::c_void, page, libc::PROT_NONE) } != 0 {
                log::debug!("mprotect of guard page {:#x} failed: {}", guard, last_os_error());
                unsafe { libc::munmap(mapping, total_size) };
                uw_bail!(NoMemory, "cannot protect guard page");
            }
        }

        let this = usable_page as *mut PageAllocator;
        unsafe {
            this.write(PageAllocator {
                base_address,
                total_size,
                usable_address: usable_page + DESCRIPTOR_SIZE,
                usable_size: usable_span - DESCRIPTOR_SIZE,
            });
        }
        log::debug!(
            "mapped region {:#x}..{:#x} ({:?})",
            base_address,
            base_address + total_size,
            options
        );
        // SAFETY: `usable_page` lies inside a mapping that just succeeded.
        Ok(unsafe { NonNull::new_unchecked(this) })
    }

    /// Releases the whole mapping, guard pages included.
    ///
    /// # Safety
    ///
    /// `this` must come from [`PageAllocator::create`] and must not be used
    /// afterwards. Everything stored in the region, including the
    /// descriptor itself, is gone once this returns.
    pub unsafe fn destroy(this: NonNull<PageAllocator>) {
        let (base_address, total_size) = {
            let region = unsafe { this.as_ref() };
            (region.base_address, region.total_size)
        };
        if unsafe { libc::munmap(base_address as *mut libc::c_void, total_size) } != 0 {
            log::debug!("munmap of region {:#x} failed: {}", base_address, last_os_error());
        } else {
            log::debug!("unmapped region {:#x}", base_address);
        }
    }

    /// Start of the mapping, guard pages included.
    pub fn base_address(&self) -> usize {
        self.base_address
    }

    /// Size of the mapping, guard pages included.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// First byte available to the owner of the region.
    pub fn usable_address(&self) -> usize {
        self.usable_address
    }

    /// Bytes available from [`usable_address`](Self::usable_address) on.
    pub fn usable_size(&self) -> usize {
        self.usable_size
    }

    /// Whether `addr` falls inside the usable bytes.
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.usable_address && addr - self.usable_address < self.usable_size
    }
}
