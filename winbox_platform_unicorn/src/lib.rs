// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Unicorn-engine backend for winbox.
//!
//! Implements the [`winbox::cpu`] traits directly on
//! [`Unicorn<'static, ()>`], so a Unicorn instance *is* the emulator the
//! core drives. Hook callbacks receive the same `Unicorn` handle Unicorn
//! hands its native callbacks, coerced to the core's `CpuState` view.

use unicorn_engine::unicorn_const::{Arch, Mode, Permission, X86Insn, uc_error};
use unicorn_engine::{HookType, RegisterX86, Unicorn};
use winbox::cpu::{
    CpuRegisters, EmulatorError, ExecutionHook, GuestMemory, HookableInstruction, InstructionHook,
    MemoryAccessHook, MemoryPermission, X64Emulator, X64Register,
};

/// Lowest base `find_free_allocation_base` will hand out.
const ALLOCATION_FLOOR: u64 = 0x0001_0000;
/// One past the highest canonical user-mode address.
const ADDRESS_CEILING: u64 = 0x8000_0000_0000;

const PAGE_SIZE: u64 = 0x1000;

/// Create a 64-bit x86 Unicorn instance ready for [`winbox`] to drive.
pub fn create_x64_emulator() -> Result<Unicorn<'static, ()>, EmulatorError> {
    Unicorn::new(Arch::X86, Mode::MODE_64).map_err(backend)
}

fn backend(err: uc_error) -> EmulatorError {
    EmulatorError::Backend(format!("{err:?}"))
}

fn permission(perms: MemoryPermission) -> Permission {
    let mut out = Permission::NONE;
    if perms.contains(MemoryPermission::READ) {
        out |= Permission::READ;
    }
    if perms.contains(MemoryPermission::WRITE) {
        out |= Permission::WRITE;
    }
    if perms.contains(MemoryPermission::EXEC) {
        out |= Permission::EXEC;
    }
    out
}

fn register(reg: X64Register) -> Option<RegisterX86> {
    Some(match reg {
        X64Register::Rax => RegisterX86::RAX,
        X64Register::Rbx => RegisterX86::RBX,
        X64Register::Rcx => RegisterX86::RCX,
        X64Register::Rdx => RegisterX86::RDX,
        X64Register::Rsi => RegisterX86::RSI,
        X64Register::Rdi => RegisterX86::RDI,
        X64Register::Rbp => RegisterX86::RBP,
        X64Register::Rsp => RegisterX86::RSP,
        X64Register::R8 => RegisterX86::R8,
        X64Register::R9 => RegisterX86::R9,
        X64Register::R10 => RegisterX86::R10,
        X64Register::R11 => RegisterX86::R11,
        X64Register::R12 => RegisterX86::R12,
        X64Register::R13 => RegisterX86::R13,
        X64Register::R14 => RegisterX86::R14,
        X64Register::R15 => RegisterX86::R15,
        X64Register::Rip => RegisterX86::RIP,
        X64Register::Rflags => RegisterX86::EFLAGS,
        X64Register::Msr => return None,
    })
}

/// Translate a `[addr, addr + size)` range into Unicorn's inclusive
/// `begin`/`end` pair, where `begin > end` means the whole address space.
fn hook_range(addr: u64, size: u64) -> (u64, u64) {
    match size {
        0 => (addr, addr),
        u64::MAX => (1, 0),
        size => (addr, addr + size - 1),
    }
}

impl GuestMemory for Unicorn<'static, ()> {
    fn read_memory(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), EmulatorError> {
        self.mem_read(addr, buf)
            .map_err(|_| EmulatorError::InvalidMemoryAccess {
                addr,
                size: buf.len() as u64,
            })
    }

    fn write_memory(&mut self, addr: u64, buf: &[u8]) -> Result<(), EmulatorError> {
        self.mem_write(addr, buf)
            .map_err(|_| EmulatorError::InvalidMemoryAccess {
                addr,
                size: buf.len() as u64,
            })
    }
}

impl CpuRegisters for Unicorn<'static, ()> {
    fn reg(&mut self, reg: X64Register) -> Result<u64, EmulatorError> {
        let id = register(reg).ok_or(EmulatorError::InvalidRegisterWrite {
            register: reg,
            len: 8,
        })?;
        self.reg_read(id).map_err(backend)
    }

    fn set_reg(&mut self, reg: X64Register, value: u64) -> Result<(), EmulatorError> {
        let id = register(reg).ok_or(EmulatorError::InvalidRegisterWrite {
            register: reg,
            len: 8,
        })?;
        self.reg_write(id, value).map_err(backend)
    }

    fn write_register_bytes(
        &mut self,
        reg: X64Register,
        bytes: &[u8],
    ) -> Result<(), EmulatorError> {
        if reg != X64Register::Msr || bytes.len() != 16 {
            return Err(EmulatorError::InvalidRegisterWrite {
                register: reg,
                len: bytes.len(),
            });
        }

        // Unicorn exposes the segment-base MSRs as registers; anything else
        // has no backing state to write.
        let id = u32::from_le_bytes(bytes[0..4].try_into().expect("length checked above"));
        let value = u64::from_le_bytes(bytes[8..16].try_into().expect("length checked above"));
        let target = match id {
            0xC000_0101 => RegisterX86::GS_BASE,
            0xC000_0100 => RegisterX86::FS_BASE,
            _ => return Err(EmulatorError::UnsupportedMsr { id }),
        };
        self.reg_write(target, value).map_err(backend)
    }
}

impl X64Emulator for Unicorn<'static, ()> {
    fn allocate_memory(
        &mut self,
        addr: u64,
        size: u64,
        perms: MemoryPermission,
    ) -> Result<(), EmulatorError> {
        self.mem_map(addr, size as usize, permission(perms))
            .map_err(|_| EmulatorError::AllocationFailed { addr, size })
    }

    fn protect_memory(
        &mut self,
        addr: u64,
        size: u64,
        perms: MemoryPermission,
    ) -> Result<(), EmulatorError> {
        self.mem_protect(addr, size as usize, permission(perms))
            .map_err(|_| EmulatorError::ProtectFailed { addr, size })
    }

    fn find_free_allocation_base(&mut self, size: u64) -> Result<u64, EmulatorError> {
        let mut regions = self.mem_regions().map_err(backend)?;
        regions.sort_by_key(|r| r.begin);

        let mut candidate = ALLOCATION_FLOOR;
        for region in &regions {
            if candidate + size <= region.begin {
                break;
            }
            // `end` is the last byte of the region.
            candidate = candidate.max((region.end + 1).next_multiple_of(PAGE_SIZE));
        }
        if candidate + size > ADDRESS_CEILING {
            return Err(EmulatorError::NoFreeRegion { size });
        }
        Ok(candidate)
    }

    fn hook_memory_read(
        &mut self,
        addr: u64,
        size: u64,
        hook: MemoryAccessHook,
    ) -> Result<(), EmulatorError> {
        let (begin, end) = hook_range(addr, size);
        self.add_mem_hook(
            HookType::MEM_READ,
            begin,
            end,
            move |uc, _kind, address, size, _value| {
                hook(uc, address, size);
                true
            },
        )
        .map(|_| ())
        .map_err(backend)
    }

    fn hook_memory_execution(
        &mut self,
        addr: u64,
        size: u64,
        hook: ExecutionHook,
    ) -> Result<(), EmulatorError> {
        let (begin, end) = hook_range(addr, size);
        self.add_code_hook(begin, end, move |uc, address, size| {
            hook(uc, address, size as usize);
        })
        .map(|_| ())
        .map_err(backend)
    }

    fn hook_instruction(
        &mut self,
        instruction: HookableInstruction,
        hook: InstructionHook,
    ) -> Result<(), EmulatorError> {
        let insn = match instruction {
            HookableInstruction::Syscall => X86Insn::SYSCALL,
        };
        // begin > end: fire wherever the instruction executes.
        self.add_insn_sys_hook(insn, 1, 0, move |uc| hook(uc))
            .map(|_| ())
            .map_err(backend)
    }

    fn start(&mut self, entry: u64) -> Result<(), EmulatorError> {
        self.emu_start(entry, 0, 0, 0)
            .map_err(|err| EmulatorError::Fault(format!("{err:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_round_trips_through_the_guest() {
        let mut emu = create_x64_emulator().unwrap();
        emu.allocate_memory(0x10000, 0x1000, MemoryPermission::READ_WRITE)
            .unwrap();

        emu.write_memory(0x10010, b"winbox").unwrap();
        let mut buf = [0u8; 6];
        emu.read_memory(0x10010, &mut buf).unwrap();
        assert_eq!(&buf, b"winbox");
    }

    #[test]
    fn overlapping_allocation_fails() {
        let mut emu = create_x64_emulator().unwrap();
        emu.allocate_memory(0x10000, 0x2000, MemoryPermission::READ)
            .unwrap();
        assert!(matches!(
            emu.allocate_memory(0x11000, 0x1000, MemoryPermission::READ),
            Err(EmulatorError::AllocationFailed { .. })
        ));
    }

    #[test]
    fn free_base_skips_existing_regions() {
        let mut emu = create_x64_emulator().unwrap();
        emu.allocate_memory(ALLOCATION_FLOOR, 0x4000, MemoryPermission::READ)
            .unwrap();

        let base = emu.find_free_allocation_base(0x2000).unwrap();
        assert_eq!(base, ALLOCATION_FLOOR + 0x4000);

        emu.allocate_memory(base, 0x2000, MemoryPermission::READ)
            .unwrap();
    }

    #[test]
    fn gs_base_msr_lands_in_the_segment_register() {
        let mut emu = create_x64_emulator().unwrap();
        emu.write_msr(0xC000_0101, 0x0600_0000).unwrap();
        assert_eq!(emu.reg_read(RegisterX86::GS_BASE).unwrap(), 0x0600_0000);

        assert!(matches!(
            emu.write_msr(0x1234, 1),
            Err(EmulatorError::UnsupportedMsr { id: 0x1234 })
        ));
    }

    #[test]
    fn registers_round_trip() {
        let mut emu = create_x64_emulator().unwrap();
        emu.set_reg(X64Register::Rcx, 0x1122_3344_5566_7788)
            .unwrap();
        assert_eq!(emu.reg(X64Register::Rcx).unwrap(), 0x1122_3344_5566_7788);
    }
}
