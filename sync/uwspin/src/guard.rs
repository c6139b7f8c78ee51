//! Critical-section guards entered around a held lock.

use core::mem::MaybeUninit;

/// Work done when a lock is taken and undone when it is released.
///
/// `enter` runs before the first acquisition attempt and `exit` runs after
/// the lock is released, or right away if acquisition gives up.
pub trait CriticalSection {
    /// What `enter` saved for `exit` to restore.
    type Saved: Copy;

    /// Enters the critical section.
    fn enter() -> Self::Saved;

    /// Leaves the critical section.
    fn exit(saved: Self::Saved);
}

/// Guard that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOp;

impl CriticalSection for NoOp {
    type Saved = ();

    #[inline(always)]
    fn enter() {}

    #[inline(always)]
    fn exit(_saved: ()) {}
}

/// Guard that blocks every maskable signal for the calling thread.
///
/// The previous mask is restored on exit. `SIGKILL` and `SIGSTOP` cannot be
/// blocked, and a synchronous fault raised while the mask is in place still
/// terminates the process.
#[derive(Clone, Copy, Default)]
pub struct SignalMask;

impl CriticalSection for SignalMask {
    /// `None` if the mask could not be changed.
    type Saved = Option<libc::sigset_t>;

    fn enter() -> Self::Saved {
        let mut all = MaybeUninit::<libc::sigset_t>::uninit();
        let mut previous = MaybeUninit::<libc::sigset_t>::uninit();
        unsafe {
            if libc::sigfillset(all.as_mut_ptr()) != 0
                || libc::pthread_sigmask(libc::SIG_SETMASK, all.as_ptr(), previous.as_mut_ptr())
                    != 0
            {
                return None;
            }
            Some(previous.assume_init())
        }
    }

    fn exit(saved: Self::Saved) {
        if let Some(previous) = saved {
            unsafe {
                libc::pthread_sigmask(libc::SIG_SETMASK, &previous, core::ptr::null_mut());
            }
        }
    }
}
