//! Bounded spinlock.
//!
//! There is no unbounded `lock`: every acquisition states how many attempts
//! it may make, so a handler that interrupts the holder gives up instead of
//! spinning forever.

use core::{
    cell::UnsafeCell,
    fmt,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

use crate::guard::CriticalSection;

/// A non-reentrant spinlock whose critical section is wrapped by `G`.
///
/// # Examples
///
/// ```rust
/// use uwspin::SpinRaw;
///
/// let lock = SpinRaw::new(42);
/// let held = lock.try_lock().unwrap();
/// assert!(lock.lock_bounded(16).is_none());
/// drop(held);
/// assert_eq!(*lock.lock_bounded(16).unwrap(), 42);
/// ```
pub struct SpinLock<G: CriticalSection, T: ?Sized> {
    held: AtomicBool,
    _section: PhantomData<G>,
    data: UnsafeCell<T>,
}

/// Access to the data of a held [`SpinLock`]; releases it on drop.
pub struct SpinLockGuard<'a, G: CriticalSection, T: ?Sized> {
    lock: &'a SpinLock<G, T>,
    saved: G::Saved,
}

unsafe impl<G: CriticalSection, T: ?Sized + Send> Sync for SpinLock<G, T> {}
unsafe impl<G: CriticalSection, T: ?Sized + Send> Send for SpinLock<G, T> {}

impl<G: CriticalSection, T> SpinLock<G, T> {
    /// Creates an unlocked spinlock holding `data`.
    pub const fn new(data: T) -> Self {
        Self {
            held: AtomicBool::new(false),
            _section: PhantomData,
            data: UnsafeCell::new(data),
        }
    }

    /// Consumes the lock, returning the data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<G: CriticalSection, T: ?Sized> SpinLock<G, T> {
    #[inline]
    fn acquire(&self) -> bool {
        !self.held.load(Ordering::Relaxed)
            && self
                .held
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
    }

    /// Makes a single acquisition attempt.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, G, T>> {
        self.lock_bounded(1)
    }

    /// Makes up to `max_spins` acquisition attempts, at least one.
    ///
    /// `G` is entered before the first attempt and left again if every
    /// attempt fails.
    pub fn lock_bounded(&self, max_spins: usize) -> Option<SpinLockGuard<'_, G, T>> {
        let saved = G::enter();
        for attempt in 0..max_spins.max(1) {
            if attempt > 0 {
                core::hint::spin_loop();
            }
            if self.acquire() {
                return Some(SpinLockGuard { lock: self, saved });
            }
        }
        G::exit(saved);
        None
    }

    /// Whether some thread holds the lock. The answer may be stale.
    pub fn is_locked(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }

    /// Borrows the data through exclusive access to the lock.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<G: CriticalSection, T: ?Sized + fmt::Debug> fmt::Debug for SpinLock<G, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("SpinLock");
        match self.try_lock() {
            Some(guard) => out.field("data", &&*guard),
            None => out.field("data", &format_args!("<locked>")),
        };
        out.finish()
    }
}

impl<G: CriticalSection, T: ?Sized> Deref for SpinLockGuard<'_, G, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<G: CriticalSection, T: ?Sized> DerefMut for SpinLockGuard<'_, G, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<G: CriticalSection, T: ?Sized + fmt::Debug> fmt::Debug for SpinLockGuard<'_, G, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<G: CriticalSection, T: ?Sized> Drop for SpinLockGuard<'_, G, T> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
        G::exit(self.saved);
    }
}
