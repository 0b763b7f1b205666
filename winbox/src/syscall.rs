// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The kernel-simulation boundary.
//!
//! The emulator core knows exactly one thing about syscalls: when the guest
//! executes `SYSCALL`, control passes to a [`HandleSyscall`] implementation,
//! which may read and write guest registers and memory before the guest
//! resumes. What each system call actually does lives behind this trait, in
//! whatever kernel simulation the embedder supplies.

use crate::cpu::CpuState;
use crate::process::ProcessContext;

/// A kernel simulation invoked on every guest `SYSCALL` instruction.
pub trait HandleSyscall {
    fn handle_syscall(&mut self, cpu: &mut dyn CpuState, context: &ProcessContext);
}

impl<F> HandleSyscall for F
where
    F: FnMut(&mut dyn CpuState, &ProcessContext),
{
    fn handle_syscall(&mut self, cpu: &mut dyn CpuState, context: &ProcessContext) {
        self(cpu, context);
    }
}
