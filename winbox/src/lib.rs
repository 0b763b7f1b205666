// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! # winbox
//!
//! > A user-mode Windows x86-64 process emulator core.
//!
//! winbox loads an unmodified PE executable together with `ntdll.dll`,
//! rebuilds the in-memory process image the Windows loader would produce
//! (stack, GS segment with TEB/PEB/process parameters, KUSER_SHARED_DATA,
//! both modules with section protections and resolved exports), and drives
//! execution through a pluggable CPU emulator, intercepting every `SYSCALL`
//! instruction at the kernel-simulation boundary.
//!
//! The CPU itself and the kernel simulation are collaborators: anything
//! implementing [`cpu::X64Emulator`] can host a process, and anything
//! implementing [`syscall::HandleSyscall`] can be its kernel.

pub mod cpu;
pub mod guest;
pub mod loader;
pub mod process;
pub mod reflect;
pub mod run;
pub mod syscall;
pub mod trace;

#[cfg(test)]
pub(crate) mod testutil;

pub use loader::MappedBinary;
pub use process::{ProcessConfig, ProcessContext, build_process};
pub use run::launch;
