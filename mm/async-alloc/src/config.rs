// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Configuration for pool creation.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::page::PageOptions;

/// Default bound on lock acquisition attempts.
pub const DEFAULT_MAX_SPINS: usize = uwspin::DEFAULT_MAX_SPINS;

/// Default bound on the number of free blocks visited by one walk.
pub const DEFAULT_MAX_SCAN: usize = 1 << 16;

const FALLBACK_PAGE_SIZE: usize = 4096;

/// Options for [`Allocator::create`](crate::Allocator::create).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    /// Guard pages placed around every region of the pool.
    pub guards: PageOptions,

    /// Lock acquisition attempts before an operation fails with
    /// [`AllocError::Busy`](crate::AllocError::Busy).
    pub max_spins: usize,

    /// Free blocks visited by one `alloc` before it gives up.
    pub max_scan: usize,
}

impl PoolOptions {
    /// Options with both guard pages and the default bounds.
    pub const fn new() -> Self {
        Self {
            guards: PageOptions::GUARD_LOW.union(PageOptions::GUARD_HIGH),
            max_spins: DEFAULT_MAX_SPINS,
            max_scan: DEFAULT_MAX_SCAN,
        }
    }

    /// Replaces the guard page selection.
    pub const fn with_guards(mut self, guards: PageOptions) -> Self {
        self.guards = guards;
        self
    }

    /// Replaces the spin bound. Zero is treated as a single attempt.
    pub const fn with_max_spins(mut self, max_spins: usize) -> Self {
        self.max_spins = max_spins;
        self
    }

    /// Replaces the scan bound. Zero is ignored.
    pub const fn with_max_scan(mut self, max_scan: usize) -> Self {
        if max_scan > 0 {
            self.max_scan = max_scan;
        }
        self
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Cached host page size, zero until first queried.
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Returns the host page size.
///
/// The first call queries `sysconf`; later calls read the cached value.
pub fn page_size() -> usize {
    let cached = PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    let queried = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let size = match usize::try_from(queried) {
        Ok(size) if size.is_power_of_two() => size,
        _ => {
            log::debug!("sysconf(_SC_PAGESIZE) returned {}, assuming 4 KiB", queried);
            FALLBACK_PAGE_SIZE
        }
    };
    PAGE_SIZE.store(size, Ordering::Relaxed);
    size
}
