// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Observability hooks over a running guest.
//!
//! Everything here is a pure observer: callbacks decode what the guest is
//! touching and emit `tracing` events, but never alter register or memory
//! state. The full instruction trace in particular costs a callback per
//! guest instruction, so callers keep it behind a switch.

use std::collections::BTreeMap;

use tracing::{debug, trace};
use winbox_common_nt::layout::StructLayout;

use crate::cpu::{EmulatorError, X64Emulator, X64Register};
use crate::guest::GuestRef;
use crate::reflect::TypeInfo;

/// Log every guest read of the structure behind `object`, decoded to the
/// field being accessed.
pub fn watch_object<T: StructLayout>(
    emu: &mut dyn X64Emulator,
    object: GuestRef<T>,
) -> Result<(), EmulatorError> {
    let info = TypeInfo::of::<T>();
    let base = object.value();
    emu.hook_memory_read(
        base,
        object.size() as u64,
        Box::new(move |_cpu, address, _size| {
            let offset = (address - base) as usize;
            trace!(
                structure = info.type_name(),
                offset = format_args!("{offset:#x}"),
                field = %info.field_name(offset),
                "guest read"
            );
        }),
    )
}

/// Pick one canonical name per exported address.
///
/// Aliases are resolved to the lexicographically smallest name so traces are
/// reproducible across runs.
pub(crate) fn canonical_exports(exports: &BTreeMap<String, u64>) -> BTreeMap<u64, String> {
    let mut reverse = BTreeMap::new();
    for (name, address) in exports {
        reverse.entry(*address).or_insert_with(|| name.clone());
    }
    reverse
}

/// Log every call into a named `ntdll` export.
///
/// `RtlImageNtHeaderEx` additionally logs its second argument, the image
/// base being inspected, which makes loader progress legible in the trace.
pub fn trace_exports(
    emu: &mut dyn X64Emulator,
    exports: &BTreeMap<String, u64>,
) -> Result<(), EmulatorError> {
    for (address, name) in canonical_exports(exports) {
        emu.hook_memory_execution(
            address,
            0,
            Box::new(move |cpu, hit, _size| {
                debug!(
                    function = %name,
                    address = format_args!("{hit:#x}"),
                    "executing export"
                );
                if name == "RtlImageNtHeaderEx" {
                    let base = cpu.reg(X64Register::Rdx).unwrap_or(0);
                    debug!(base = format_args!("{base:#x}"), "image header lookup");
                }
            }),
        )?;
    }
    Ok(())
}

/// Log every executed instruction with the general-purpose register file.
pub fn trace_execution(emu: &mut dyn X64Emulator) -> Result<(), EmulatorError> {
    emu.hook_memory_execution(
        0,
        u64::MAX,
        Box::new(|cpu, address, _size| {
            let mut read = |reg| cpu.reg(reg).unwrap_or(0);
            let rax = read(X64Register::Rax);
            let rbx = read(X64Register::Rbx);
            let rcx = read(X64Register::Rcx);
            let rdx = read(X64Register::Rdx);
            let r8 = read(X64Register::R8);
            let r9 = read(X64Register::R9);
            let rdi = read(X64Register::Rdi);
            let rsi = read(X64Register::Rsi);
            trace!(
                "inst {address:16x} rax {rax:16x} rbx {rbx:16x} rcx {rcx:16x} rdx {rdx:16x} r8 {r8:16x} r9 {r9:16x} rdi {rdi:16x} rsi {rsi:16x}"
            );
        }),
    )
}

#[cfg(test)]
mod tests {
    use winbox_common_nt::nt::Teb;

    use super::*;
    use crate::cpu::mock::MockCpu;
    use crate::cpu::{CpuRegisters, MemoryPermission};

    #[test]
    fn canonical_name_is_lexicographically_smallest() {
        let mut exports = BTreeMap::new();
        exports.insert("ZwClose".to_string(), 0x1000u64);
        exports.insert("NtClose".to_string(), 0x1000);
        exports.insert("NtOpenFile".to_string(), 0x2000);

        let reverse = canonical_exports(&exports);
        assert_eq!(reverse[&0x1000], "NtClose");
        assert_eq!(reverse[&0x2000], "NtOpenFile");
    }

    #[test]
    fn watch_hook_covers_the_object_and_fires() {
        let mut cpu = MockCpu::new();
        cpu.allocate_memory(0x10000, 0x2000, MemoryPermission::READ_WRITE)
            .unwrap();

        let teb: GuestRef<Teb> = GuestRef::new(0x10000);
        watch_object(&mut cpu, teb).unwrap();

        // Reads inside and around the object; the hook must only decode,
        // never touch state, so this simply must not panic.
        cpu.simulate_read(0x10000 + 0x60, 8);
        cpu.simulate_read(0x10000 + 0x1837, 1);
    }

    #[test]
    fn export_hooks_are_installed_per_address() {
        let mut cpu = MockCpu::new();
        let mut exports = BTreeMap::new();
        exports.insert("NtClose".to_string(), 0x1000u64);
        exports.insert("ZwClose".to_string(), 0x1000);
        exports.insert("RtlImageNtHeaderEx".to_string(), 0x3000);
        trace_exports(&mut cpu, &exports).unwrap();

        // One hook per unique address; firing them must read, not write.
        cpu.set_reg(X64Register::Rdx, 0x1_8000_0000).unwrap();
        cpu.simulate_exec(0x1000);
        cpu.simulate_exec(0x3000);
        assert_eq!(cpu.reg(X64Register::Rdx).unwrap(), 0x1_8000_0000);
    }

    #[test]
    fn global_trace_sees_every_address() {
        let mut cpu = MockCpu::new();
        cpu.set_reg(X64Register::Rax, 7).unwrap();
        trace_execution(&mut cpu).unwrap();
        cpu.simulate_exec(0x1234);
        cpu.simulate_exec(0xFFFF_FFFF_0000);
        assert_eq!(cpu.reg(X64Register::Rax).unwrap(), 7);
    }
}
