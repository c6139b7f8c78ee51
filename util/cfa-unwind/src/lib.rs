// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

#![cfg_attr(not(test), no_std)]

//! # cfa-unwind - DWARF call frame evaluation for crash handlers
//!
//! This crate recovers the registers of a calling frame from DWARF call
//! frame information (`.debug_frame` / `.eh_frame`), without allocating from
//! the global heap and without unbounded loops, so it can run inside a
//! signal handler.
//!
//! ## Layers
//!
//! - [`CfaState`]: the register rule set with its bounded
//!   remember/restore stack.
//! - [`evaluate_program`]: the `DW_CFA_*` interpreter, run up to a program
//!   counter offset.
//! - [`evaluate_expression`]: the CFI subset of `DW_OP_*`.
//! - [`apply`]: turns the rules into the caller's [`FrameState`].
//! - [`Unwinder`]: the whole sequence for one frame, given the CIE and FDE.
//!
//! Locating the CIE and FDE for a program counter is left to the caller.
//!
//! ## Example
//!
//! ```
//! use cfa_unwind::{
//!     Arch, Augmentation, CieInfo, FdeInfo, FrameState, PointerBases, SliceMemory, Unwinder,
//!     arch::X86_64,
//! };
//!
//! // def_cfa rsp+8; offset rip at cfa-8
//! let code = [0x0c, 7, 8, 0x90, 1];
//! let stack = 0x40_1234u64.to_le_bytes();
//! let memory = (SliceMemory::new(0x1000, &code), SliceMemory::new(0x7000, &stack));
//!
//! let cie = CieInfo {
//!     code_alignment_factor: 1,
//!     data_alignment_factor: -8,
//!     return_address_register: 16,
//!     augmentation: Augmentation::empty(),
//!     address_size: 8,
//!     initial_instructions_address: 0x1000,
//!     initial_instructions_length: code.len() as u64,
//!     fde_encoding: gimli::DW_EH_PE_absptr,
//!     bases: PointerBases::default(),
//! };
//! let fde = FdeInfo {
//!     initial_location: 0x40_0000,
//!     address_range: 0x100,
//!     instructions_address: 0x1005,
//!     instructions_length: 0,
//! };
//!
//! let mut frame = FrameState::<X86_64>::new();
//! frame.set(X86_64::IP, 0x40_0000);
//! frame.set(X86_64::SP, 0x7000);
//!
//! let caller = Unwinder::new(&memory).step(&cie, &fde, &frame).unwrap();
//! assert_eq!(caller.sp(), Some(0x7008));
//! assert_eq!(caller.ip(), Some(0x40_1234));
//! ```

mod apply;
pub mod arch;
pub mod config;
mod error;
mod expr;
mod frame;
mod memory;
mod program;
mod state;
mod unwinder;

pub use apply::{apply, resolve_cfa};
pub use arch::{Arch, Reg};
#[cfg(any(
    target_arch = "x86_64",
    target_arch = "x86",
    target_arch = "aarch64",
    target_arch = "riscv64"
))]
pub use arch::CurrentArch;
pub use config::{max_expression_steps, set_max_expression_steps};
pub use error::{CfaError, Result};
pub use expr::{evaluate_expression, read_block};
pub use frame::FrameState;
pub use memory::{MemoryView, SliceMemory};
pub use program::{Augmentation, CieInfo, FdeInfo, PointerBases, evaluate_program};
pub use state::{CfaRule, CfaState, Iter, RegisterRule};
pub use unwinder::Unwinder;
