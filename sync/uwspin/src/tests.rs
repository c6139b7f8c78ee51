use std::{
    cell::Cell,
    mem::MaybeUninit,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use super::*;

thread_local! {
    static DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Counts how many critical sections the current thread is inside.
struct Counted;

impl CriticalSection for Counted {
    type Saved = ();

    fn enter() {
        DEPTH.with(|depth| depth.set(depth.get() + 1));
    }

    fn exit(_: ()) {
        DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

fn depth() -> u32 {
    DEPTH.with(Cell::get)
}

fn blocked(signal: i32) -> bool {
    let mut current = MaybeUninit::<libc::sigset_t>::uninit();
    unsafe {
        assert_eq!(
            libc::pthread_sigmask(libc::SIG_SETMASK, std::ptr::null(), current.as_mut_ptr()),
            0
        );
        libc::sigismember(current.as_ptr(), signal) == 1
    }
}

#[test]
fn test_try_lock_is_exclusive() {
    let lock = SpinRaw::new(5);
    let held = lock.try_lock().unwrap();
    assert!(lock.is_locked());
    assert!(lock.try_lock().is_none());
    drop(held);
    assert!(!lock.is_locked());
    assert_eq!(lock.try_lock().as_deref(), Some(&5));
}

#[test]
fn test_bounded_lock_gives_up() {
    let lock = SpinRaw::new(());
    let _held = lock.try_lock().unwrap();
    assert!(lock.lock_bounded(1000).is_none());
    // Zero still makes one attempt.
    assert!(lock.lock_bounded(0).is_none());
}

#[test]
fn test_guard_left_on_failure() {
    let lock = SpinLock::<Counted, _>::new(0u8);
    {
        let _held = lock.try_lock().unwrap();
        assert_eq!(depth(), 1);
        assert!(lock.lock_bounded(8).is_none());
        assert_eq!(depth(), 1);
    }
    assert_eq!(depth(), 0);
}

#[test]
fn test_threads_serialize() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 2000;

    let lock = Arc::new(SpinRaw::new(0usize));
    let gave_up = Arc::new(AtomicUsize::new(0));
    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let gave_up = Arc::clone(&gave_up);
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    match lock.lock_bounded(DEFAULT_MAX_SPINS) {
                        Some(mut count) => *count += 1,
                        None => {
                            gave_up.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let done = *lock.try_lock().unwrap();
    assert_eq!(done + gave_up.load(Ordering::Relaxed), THREADS * ROUNDS);
}

#[test]
fn test_signal_mask_while_held() {
    let lock = SpinNoSignal::new(());
    assert!(!blocked(libc::SIGUSR2));
    {
        let _held = lock.try_lock().unwrap();
        assert!(blocked(libc::SIGUSR2));
        assert!(blocked(libc::SIGTERM));
        assert!(lock.lock_bounded(4).is_none());
        assert!(blocked(libc::SIGUSR2));
    }
    assert!(!blocked(libc::SIGUSR2));
}

#[test]
fn test_slices_and_inner() {
    let mut lock: SpinRaw<[u16; 3]> = SpinRaw::new([1, 2, 3]);
    lock.get_mut()[1] = 20;
    {
        let slice: &SpinRaw<[u16]> = &lock;
        let mut held = slice.try_lock().unwrap();
        held[2] = 30;
    }
    assert_eq!(lock.into_inner(), [1, 20, 30]);
}

#[test]
fn test_debug_hides_locked_data() {
    let lock = SpinRaw::new(99);
    assert!(format!("{:?}", lock).contains("99"));
    let _held = lock.try_lock();
    assert!(format!("{:?}", lock).contains("<locked>"));
}
