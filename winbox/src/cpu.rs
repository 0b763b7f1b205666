// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The CPU emulator upon which winbox drives a guest process.
//!
//! The emulator itself lives in a backend crate; this module only defines
//! the traits winbox consumes. The split mirrors the rest of the workspace:
//! the core stays backend-agnostic, and anything that can satisfy
//! [`X64Emulator`] (including the test mock) can host a process.
//!
//! Hook callbacks run synchronously on the emulating thread, between guest
//! instructions. They receive a [`CpuState`] so they can inspect registers
//! and guest memory; tracing hooks must treat that access as read-only.

#[cfg(test)]
pub(crate) mod mock;

use bitflags::bitflags;
use thiserror::Error;
use zerocopy::{Immutable, IntoBytes};

bitflags! {
    /// Guest page protections.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct MemoryPermission: u32 {
        const NONE = 0;
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;

        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
        const READ_EXEC = Self::READ.bits() | Self::EXEC.bits();
    }
}

/// General-purpose and control registers of the emulated CPU.
///
/// `Msr` is the model-specific-register pseudo-register: it is written with
/// a packed [`MsrValue`] through
/// [`CpuRegisters::write_register_bytes`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum X64Register {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Rip,
    Rflags,
    Msr,
}

/// Wire format of an MSR write: register id followed by the value.
#[repr(C)]
#[derive(Clone, Copy, Debug, IntoBytes, Immutable)]
pub struct MsrValue {
    pub id: u32,
    _pad: [u8; 4],
    pub value: u64,
}

impl MsrValue {
    pub fn new(id: u32, value: u64) -> Self {
        Self {
            id,
            _pad: [0; 4],
            value,
        }
    }
}

/// Instructions that can be hooked individually, ahead of decode.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HookableInstruction {
    /// The x86-64 `SYSCALL` opcode; the kernel-simulation boundary.
    Syscall,
}

/// Raw guest memory access.
pub trait GuestMemory {
    /// Read `buf.len()` bytes from guest address `addr`.
    fn read_memory(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), EmulatorError>;

    /// Write `buf` to guest address `addr`.
    fn write_memory(&mut self, addr: u64, buf: &[u8]) -> Result<(), EmulatorError>;
}

/// Register-file access.
pub trait CpuRegisters {
    /// Read a general-purpose register.
    fn reg(&mut self, reg: X64Register) -> Result<u64, EmulatorError>;

    /// Write a general-purpose register.
    fn set_reg(&mut self, reg: X64Register, value: u64) -> Result<(), EmulatorError>;

    /// Write a register wider than 64 bits from its packed byte encoding.
    fn write_register_bytes(&mut self, reg: X64Register, bytes: &[u8])
    -> Result<(), EmulatorError>;

    /// Write a model-specific register.
    fn write_msr(&mut self, id: u32, value: u64) -> Result<(), EmulatorError> {
        let msr = MsrValue::new(id, value);
        self.write_register_bytes(X64Register::Msr, msr.as_bytes())
    }
}

/// The state a hook callback may inspect.
pub trait CpuState: GuestMemory + CpuRegisters {}

impl<T: GuestMemory + CpuRegisters + ?Sized> CpuState for T {}

/// Callback for memory-access hooks: `(cpu, accessed address, access size)`.
pub type MemoryAccessHook = Box<dyn FnMut(&mut dyn CpuState, u64, usize)>;

/// Callback for execution hooks: `(cpu, instruction address, size)`.
pub type ExecutionHook = Box<dyn FnMut(&mut dyn CpuState, u64, usize)>;

/// Callback for per-instruction hooks.
pub type InstructionHook = Box<dyn FnMut(&mut dyn CpuState)>;

/// The full emulator contract winbox needs from a backend.
pub trait X64Emulator: GuestMemory + CpuRegisters {
    /// Map a page-aligned range. Fails if any page is already mapped.
    fn allocate_memory(
        &mut self,
        addr: u64,
        size: u64,
        perms: MemoryPermission,
    ) -> Result<(), EmulatorError>;

    /// Change protection on an existing range.
    fn protect_memory(
        &mut self,
        addr: u64,
        size: u64,
        perms: MemoryPermission,
    ) -> Result<(), EmulatorError>;

    /// Return an unused, aligned base address able to hold `size` bytes.
    fn find_free_allocation_base(&mut self, size: u64) -> Result<u64, EmulatorError>;

    /// Install a read hook over `[addr, addr + size)`.
    fn hook_memory_read(
        &mut self,
        addr: u64,
        size: u64,
        hook: MemoryAccessHook,
    ) -> Result<(), EmulatorError>;

    /// Install an execution hook.
    ///
    /// `size == 0` hooks the single instruction at `addr`; `size == u64::MAX`
    /// hooks the entire address space.
    fn hook_memory_execution(
        &mut self,
        addr: u64,
        size: u64,
        hook: ExecutionHook,
    ) -> Result<(), EmulatorError>;

    /// Install a hook that fires whenever `instruction` is about to execute.
    fn hook_instruction(
        &mut self,
        instruction: HookableInstruction,
        hook: InstructionHook,
    ) -> Result<(), EmulatorError>;

    /// Run the guest from `entry` until it halts or faults.
    fn start(&mut self, entry: u64) -> Result<(), EmulatorError>;
}

/// Errors surfaced by an emulator backend.
#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("cannot map {size:#x} bytes at {addr:#x}: range occupied or invalid")]
    AllocationFailed { addr: u64, size: u64 },

    #[error("cannot protect {size:#x} bytes at {addr:#x}")]
    ProtectFailed { addr: u64, size: u64 },

    #[error("no free region of {size:#x} bytes in the guest address space")]
    NoFreeRegion { size: u64 },

    #[error("invalid guest memory access at {addr:#x} ({size:#x} bytes)")]
    InvalidMemoryAccess { addr: u64, size: u64 },

    #[error("register {register:?} is not writable with {len} bytes")]
    InvalidRegisterWrite { register: X64Register, len: usize },

    #[error("unsupported model-specific register {id:#x}")]
    UnsupportedMsr { id: u32 },

    #[error("emulation stopped with a fault: {0}")]
    Fault(String),

    #[error("emulator backend error: {0}")]
    Backend(String),
}

const _: () = {
    assert!(core::mem::size_of::<MsrValue>() == 16);
};
