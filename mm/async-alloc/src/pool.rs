// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Free-list pool allocator.
//!
//! Free blocks form a circular singly linked list sorted by address. Each
//! block starts with a [`ControlBlock`] header; an allocated block keeps its
//! header with `next` set to null so `dealloc` can recover its size and
//! catch double frees. Allocation splits from the tail of a free block,
//! deallocation merges with both physical neighbours.

use core::{
    mem::size_of,
    ops::Deref,
    ptr::{self, NonNull},
};

use uwspin::{SpinLock, SpinLockGuard};

use crate::{
    AllocError, AllocResult, NATURAL_ALIGN, align_down, align_up, checked_align_up,
    config::PoolOptions, is_aligned, page::PageAllocator,
};

cfg_if::cfg_if! {
    if #[cfg(feature = "mask-signals")] {
        type PoolGuard = uwspin::SignalMask;
    } else {
        type PoolGuard = uwspin::NoOp;
    }
}

/// Header in front of every block, free or allocated.
#[repr(C)]
struct ControlBlock {
    /// Next free block, or null while the block is allocated.
    next: *mut ControlBlock,
    /// Size of the whole block, header included.
    size: usize,
}

/// Bytes taken by a block header.
const HEADER_SIZE: usize = align_up(size_of::<ControlBlock>(), NATURAL_ALIGN);

/// Remainders smaller than this stay with the allocation instead of
/// becoming a free block of their own.
const MIN_SPLIT: usize = 2 * HEADER_SIZE;

/// Largest request that can be rounded up without overflowing.
const MAX_REQUEST: usize = usize::MAX - HEADER_SIZE - (NATURAL_ALIGN - 1);

/// Bookkeeping for a region added after creation. Lives at the start of
/// the region it describes.
struct PageControl {
    region: NonNull<PageAllocator>,
    next: *mut PageControl,
}

const PAGE_CONTROL_SIZE: usize = align_up(size_of::<PageControl>(), NATURAL_ALIGN);

struct PoolState {
    /// Search cursor into the circular free list, null when it is empty.
    free_list: *mut ControlBlock,
    /// Regions added by [`Allocator::add_region`].
    extra_regions: *mut PageControl,
    /// Bytes handed to the free list over the pool's lifetime.
    total_bytes: usize,
    /// Bytes in allocated blocks, headers included.
    used_bytes: usize,
}

// The raw pointers only ever refer to memory owned by the pool.
unsafe impl Send for PoolState {}

/// Allocator whose control structure lives inside the first region it
/// manages.
///
/// Obtain one with [`Allocator::create`]. All operations take `&self`; a
/// bounded spinlock serializes them.
pub struct Allocator {
    first_region: NonNull<PageAllocator>,
    options: PoolOptions,
    state: SpinLock<PoolGuard, PoolState>,
}

unsafe impl Send for Allocator {}
unsafe impl Sync for Allocator {}

const ALLOCATOR_SIZE: usize = align_up(size_of::<Allocator>(), NATURAL_ALIGN);

#[inline]
fn data_of(block: *mut ControlBlock) -> NonNull<u8> {
    // SAFETY: blocks are never at address zero.
    unsafe { NonNull::new_unchecked((block as usize + HEADER_SIZE) as *mut u8) }
}

/// Carves the first free block out of `[start, end)` and returns it.
///
/// # Safety
///
/// The range must be writable memory owned by the caller.
unsafe fn make_block(start: usize, end: usize) -> Option<*mut ControlBlock> {
    let start = align_up(start, NATURAL_ALIGN);
    let end = align_down(end, NATURAL_ALIGN);
    if end <= start || end - start < MIN_SPLIT {
        return None;
    }
    let block = start as *mut ControlBlock;
    unsafe {
        block.write(ControlBlock {
            next: ptr::null_mut(),
            size: end - start,
        });
    }
    Some(block)
}

impl PoolState {
    /// Removes a block of `needed` bytes from the free list.
    fn take_block(&mut self, needed: usize, max_scan: usize) -> AllocResult<*mut ControlBlock> {
        let start = self.free_list;
        if start.is_null() {
            return Err(AllocError::NoMemory);
        }

        // SAFETY: every pointer reached from `free_list` is a live free block.
        unsafe {
            let mut prev = start;
            let mut cur = (*start).next;
            let mut scanned = 0;
            loop {
                scanned += 1;
                if scanned > max_scan {
                    log::warn!("free-list scan gave up after {} blocks", max_scan);
                    return Err(AllocError::NoMemory);
                }

                let size = (*cur).size;
                if size >= needed {
                    if size - needed < MIN_SPLIT {
                        if cur == prev {
                            self.free_list = ptr::null_mut();
                        } else {
                            (*prev).next = (*cur).next;
                            self.free_list = prev;
                        }
                        (*cur).next = ptr::null_mut();
                        log::trace!("alloc: whole block {:#x} ({:#x} bytes)", cur as usize, size);
                        return Ok(cur);
                    }

                    (*cur).size = size - needed;
                    let split = (cur as usize + (*cur).size) as *mut ControlBlock;
                    split.write(ControlBlock {
                        next: ptr::null_mut(),
                        size: needed,
                    });
                    self.free_list = prev;
                    log::trace!("alloc: split {:#x} off block {:#x}", split as usize, cur as usize);
                    return Ok(split);
                }

                if cur == start {
                    return Err(AllocError::NoMemory);
                }
                prev = cur;
                cur = (*cur).next;
            }
        }
    }

    /// Links `block` into the free list at its address-ordered position and
    /// merges it with adjacent free blocks.
    ///
    /// Returns `false` without touching the list if the position was not
    /// found within `max_scan` steps.
    fn insert_block(&mut self, block: *mut ControlBlock, max_scan: usize) -> bool {
        // SAFETY: `block` is owned by the caller and every pointer reached
        // from `free_list` is a live free block.
        unsafe {
            if self.free_list.is_null() {
                (*block).next = block;
                self.free_list = block;
                return true;
            }

            let mut parent = self.free_list;
            let mut scanned = 0;
            loop {
                let next = (*parent).next;
                let between = parent < block && block < next;
                let at_wrap = next <= parent && (block > parent || block < next);
                if between || at_wrap {
                    break;
                }
                scanned += 1;
                if scanned > max_scan {
                    log::warn!("free-list insert gave up after {} blocks", max_scan);
                    return false;
                }
                parent = next;
            }

            let next = (*parent).next;
            if block as usize + (*block).size == next as usize {
                (*block).size += (*next).size;
                if next == parent {
                    // The only free block was absorbed.
                    (*block).next = block;
                    self.free_list = block;
                    log::trace!("dealloc: {:#x} absorbed the last free block", block as usize);
                    return true;
                }
                (*block).next = (*next).next;
                log::trace!("dealloc: merged {:#x} into {:#x}", next as usize, block as usize);
            } else {
                (*block).next = next;
            }

            if parent as usize + (*parent).size == block as usize {
                (*parent).size += (*block).size;
                (*parent).next = (*block).next;
                log::trace!("dealloc: merged {:#x} into {:#x}", block as usize, parent as usize);
            } else {
                (*parent).next = block;
            }

            self.free_list = parent;
            true
        }
    }

    /// Calls `f(address, size)` for each free block, lowest address first.
    fn for_each_free(&self, mut f: impl FnMut(usize, usize)) {
        if self.free_list.is_null() {
            return;
        }
        // SAFETY: every pointer reached from `free_list` is a live free block.
        unsafe {
            let mut lowest = self.free_list;
            let mut cur = (*self.free_list).next;
            while cur != self.free_list {
                if cur < lowest {
                    lowest = cur;
                }
                cur = (*cur).next;
            }

            let mut cur = lowest;
            loop {
                f(cur as usize, (*cur).size);
                cur = (*cur).next;
                if cur == lowest {
                    break;
                }
            }
        }
    }
}

impl Allocator {
    /// Creates a pool able to serve at least `initial_size` bytes at once.
    ///
    /// The returned handle releases every region of the pool when dropped.
    pub fn create(initial_size: usize, options: PoolOptions) -> AllocResult<OwnedAllocator> {
        let request = checked_align_up(initial_size, NATURAL_ALIGN)
            .and_then(|bytes| bytes.checked_add(NATURAL_ALIGN + ALLOCATOR_SIZE + HEADER_SIZE))
            .ok_or(AllocError::InvalidInput)?;
        let region = PageAllocator::create(request, options.guards)?;

        let (usable, usable_end) = {
            let info = unsafe { region.as_ref() };
            (info.usable_address(), info.usable_address() + info.usable_size())
        };
        let this_addr = align_up(usable, NATURAL_ALIGN);
        let Some(block) = (unsafe { make_block(this_addr + ALLOCATOR_SIZE, usable_end) }) else {
            unsafe { PageAllocator::destroy(region) };
            return Err(AllocError::NoMemory);
        };

        let this = this_addr as *mut Allocator;
        unsafe {
            (*block).next = block;
            this.write(Allocator {
                first_region: region,
                options,
                state: SpinLock::new(PoolState {
                    free_list: block,
                    extra_regions: ptr::null_mut(),
                    total_bytes: (*block).size,
                    used_bytes: 0,
                }),
            });
            log::debug!(
                "created pool at {:#x} with {:#x} free bytes",
                this_addr,
                (*block).size
            );
            Ok(OwnedAllocator(NonNull::new_unchecked(this)))
        }
    }

    fn lock(&self) -> AllocResult<SpinLockGuard<'_, PoolGuard, PoolState>> {
        self.state.lock_bounded(self.options.max_spins).ok_or_else(|| {
            log::warn!("pool lock still held after {} spins", self.options.max_spins);
            AllocError::Busy
        })
    }

    /// Allocates `size` bytes aligned to [`NATURAL_ALIGN`].
    ///
    /// Fails with [`AllocError::InvalidInput`] if `size` cannot be rounded
    /// up without overflowing, with [`AllocError::NoMemory`] if no free
    /// block is large enough, and with [`AllocError::Busy`] if the lock
    /// could not be taken. A zero-byte request returns a unique pointer.
    pub fn alloc(&self, size: usize) -> AllocResult<NonNull<u8>> {
        if size > MAX_REQUEST {
            return Err(AllocError::InvalidInput);
        }
        let needed = checked_align_up(HEADER_SIZE + size.max(1), NATURAL_ALIGN)
            .ok_or(AllocError::InvalidInput)?;

        let mut state = self.lock()?;
        let block = state.take_block(needed, self.options.max_scan)?;
        state.used_bytes += unsafe { (*block).size };
        Ok(data_of(block))
    }

    /// Returns a block obtained from [`alloc`](Self::alloc) to the pool.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` does not point into this pool or its block is not
    /// currently allocated. Both indicate memory corruption or a double
    /// free in the caller.
    pub fn dealloc(&self, ptr: NonNull<u8>) -> AllocResult {
        let addr = ptr.as_ptr() as usize;
        let mut state = self.lock()?;
        assert!(
            is_aligned(addr, NATURAL_ALIGN) && self.owns(&state, addr),
            "pointer {:#x} was not allocated from this pool",
            addr
        );

        let block = (addr - HEADER_SIZE) as *mut ControlBlock;
        let size = unsafe {
            assert!((*block).next.is_null(), "block {:#x} is not allocated", block as usize);
            (*block).size
        };
        if !state.insert_block(block, self.options.max_scan) {
            return Err(AllocError::Busy);
        }
        state.used_bytes -= size;
        Ok(())
    }

    /// Maps another region of at least `size` bytes and hands it to the
    /// free list.
    ///
    /// The pool never grows on its own; `alloc` fails with
    /// [`AllocError::NoMemory`] until a caller adds a region.
    pub fn add_region(&self, size: usize) -> AllocResult {
        let request = checked_align_up(size, NATURAL_ALIGN)
            .and_then(|bytes| bytes.checked_add(NATURAL_ALIGN + PAGE_CONTROL_SIZE + HEADER_SIZE))
            .ok_or(AllocError::InvalidInput)?;
        let region = PageAllocator::create(request, self.options.guards)?;

        let (usable, usable_end) = {
            let info = unsafe { region.as_ref() };
            (info.usable_address(), info.usable_address() + info.usable_size())
        };
        let control_addr = align_up(usable, NATURAL_ALIGN);
        let Some(block) = (unsafe { make_block(control_addr + PAGE_CONTROL_SIZE, usable_end) })
        else {
            unsafe { PageAllocator::destroy(region) };
            return Err(AllocError::NoMemory);
        };

        let mut state = match self.lock() {
            Ok(state) => state,
            Err(err) => {
                unsafe { PageAllocator::destroy(region) };
                return Err(err);
            }
        };
        let control = control_addr as *mut PageControl;
        unsafe {
            control.write(PageControl {
                region,
                next: state.extra_regions,
            });
        }
        state.extra_regions = control;
        state.total_bytes += unsafe { (*block).size };
        state.insert_block(block, usize::MAX);
        Ok(())
    }

    fn owns(&self, state: &PoolState, addr: usize) -> bool {
        if unsafe { self.first_region.as_ref() }.contains(addr) {
            return true;
        }
        let mut control = state.extra_regions;
        while !control.is_null() {
            // SAFETY: page controls live until the pool is destroyed.
            unsafe {
                if (*control).region.as_ref().contains(addr) {
                    return true;
                }
                control = (*control).next;
            }
        }
        false
    }

    /// Runs `f` on the pool state, retrying the lock until it is free.
    ///
    /// Statistics wait without a bound, so they are not meant for the
    /// signal path.
    fn inspect<R>(&self, f: impl FnOnce(&PoolState) -> R) -> R {
        loop {
            if let Some(state) = self.state.lock_bounded(self.options.max_spins) {
                return f(&state);
            }
        }
    }

    /// Bytes handed to the free list, headers included.
    pub fn total_bytes(&self) -> usize {
        self.inspect(|state| state.total_bytes)
    }

    /// Bytes in live allocations, headers and rounding included.
    pub fn used_bytes(&self) -> usize {
        self.inspect(|state| state.used_bytes)
    }

    /// Bytes currently on the free list, headers included.
    pub fn available_bytes(&self) -> usize {
        self.inspect(|state| state.total_bytes - state.used_bytes)
    }

    /// Number of blocks on the free list.
    pub fn free_block_count(&self) -> usize {
        let mut count = 0;
        self.inspect(|state| state.for_each_free(|_, _| count += 1));
        count
    }

    /// Largest `size` that [`alloc`](Self::alloc) can currently serve.
    pub fn largest_allocation(&self) -> usize {
        let mut largest = 0;
        self.inspect(|state| state.for_each_free(|_, size| largest = largest.max(size)));
        largest.saturating_sub(HEADER_SIZE)
    }

    /// Copies `(address, size)` of the free blocks into `out`, lowest
    /// address first, and returns how many blocks exist.
    ///
    /// Blocks beyond `out.len()` are counted but not copied.
    pub fn free_blocks(&self, out: &mut [(usize, usize)]) -> usize {
        let mut count = 0;
        self.inspect(|state| {
            state.for_each_free(|addr, size| {
                if let Some(slot) = out.get_mut(count) {
                    *slot = (addr, size);
                }
                count += 1;
            })
        });
        count
    }

    /// Releases every region of the pool, the one holding `this` last.
    ///
    /// # Safety
    ///
    /// `this` must come from [`Allocator::create`], no other reference to it
    /// may exist, and it must not be used afterwards.
    unsafe fn destroy(this: NonNull<Allocator>) {
        let (first_region, mut control) = {
            let pool = unsafe { &mut *this.as_ptr() };
            let state = pool.state.get_mut();

            let mut free_bytes = 0;
            state.for_each_free(|_, size| free_bytes += size);
            if state.used_bytes != 0 {
                log::warn!(
                    "async allocator destroyed with {} bytes still allocated",
                    state.used_bytes
                );
            }
            if free_bytes + state.used_bytes != state.total_bytes {
                log::warn!(
                    "async allocator free list holds {} bytes, expected {}",
                    free_bytes,
                    state.total_bytes - state.used_bytes
                );
            }
            (pool.first_region, state.extra_regions)
        };

        while !control.is_null() {
            // SAFETY: read the link before its region is unmapped.
            unsafe {
                let PageControl { region, next } = control.read();
                PageAllocator::destroy(region);
                control = next;
            }
        }
        // The allocator itself lives in this region.
        unsafe { PageAllocator::destroy(first_region) };
    }
}

/// Owning handle returned by [`Allocator::create`].
///
/// Dereferences to the [`Allocator`] and destroys the pool when dropped.
pub struct OwnedAllocator(NonNull<Allocator>);

unsafe impl Send for OwnedAllocator {}
unsafe impl Sync for OwnedAllocator {}

impl OwnedAllocator {
    /// Gives up ownership without destroying the pool.
    ///
    /// Useful for publishing the pool to a signal handler through an
    /// atomic pointer.
    pub fn into_raw(self) -> NonNull<Allocator> {
        let ptr = self.0;
        core::mem::forget(self);
        ptr
    }

    /// Takes back ownership of a pool released by
    /// [`into_raw`](Self::into_raw).
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`into_raw`](Self::into_raw) and must not be
    /// owned by another handle.
    pub unsafe fn from_raw(ptr: NonNull<Allocator>) -> Self {
        Self(ptr)
    }
}

impl Deref for OwnedAllocator {
    type Target = Allocator;

    fn deref(&self) -> &Allocator {
        unsafe { self.0.as_ref() }
    }
}

impl Drop for OwnedAllocator {
    fn drop(&mut self) {
        unsafe { Allocator::destroy(self.0) }
    }
}
