// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

#![cfg_attr(not(test), no_std)]
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![allow(rustdoc::broken_intra_doc_links)]

//! # Usage
//!
//! ```rust
//! use uwspin::SpinNoSignal;
//!
//! static COUNTER: SpinNoSignal<u32> = SpinNoSignal::new(0);
//!
//! fn increment() -> bool {
//!     match COUNTER.lock_bounded(uwspin::DEFAULT_MAX_SPINS) {
//!         Some(mut count) => {
//!             *count += 1;
//!             true
//!         }
//!         None => false,
//!     }
//! }
//! # assert!(increment());
//! ```

mod guard;
mod lock;
#[cfg(test)]
mod tests;

pub use guard::{CriticalSection, NoOp, SignalMask};
pub use lock::{SpinLock, SpinLockGuard};

/// Acquisition attempts for callers that have no better estimate.
pub const DEFAULT_MAX_SPINS: usize = 1 << 20;

/// Spinlock with no critical-section guard.
///
/// A signal handler that takes the same lock on the thread already holding
/// it spins until its bound runs out.
pub type SpinRaw<T> = SpinLock<NoOp, T>;

/// Spinlock that blocks asynchronous signals while held.
pub type SpinNoSignal<T> = SpinLock<SignalMask, T>;
