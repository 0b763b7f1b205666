// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Process construction.
//!
//! Builds the in-memory image a freshly created Windows process presents to
//! `LdrInitializeThunk`: stack, KUSER_SHARED_DATA, the GS segment holding
//! TEB / PEB / process parameters, and the two mapped modules (the
//! executable and `ntdll`).

use core::mem::offset_of;

use thiserror::Error;
use tracing::debug;
use winbox_common_nt::nt::{KuserSharedData, Peb, RtlUserProcessParameters, Teb};
use winbox_common_nt::{IMAGE_FILE_MACHINE_AMD64, IMAGE_FILE_MACHINE_I386};

use crate::cpu::{EmulatorError, MemoryPermission, X64Emulator, X64Register};
use crate::guest::{GuestAllocError, GuestAllocator, GuestRef};
use crate::loader::{MappedBinary, PeError, map_binary, page_align_up};

/// Stack size of the initial thread.
pub const STACK_SIZE: u64 = 0x40000;
/// The stack ends right below the canonical user-space ceiling.
pub const STACK_ADDRESS: u64 = 0x8000_0000_0000 - STACK_SIZE;
/// Base of the GS segment (TEB and friends).
pub const GS_SEGMENT_ADDR: u64 = 0x0600_0000;
/// Size of the GS segment.
pub const GS_SEGMENT_SIZE: u64 = 20 << 20;
/// Fixed address of KUSER_SHARED_DATA in every Windows process.
pub const KUSD_ADDRESS: u64 = 0x7FFE_0000;
/// MSR holding the GS segment base.
pub const IA32_GS_BASE: u32 = 0xC000_0101;

/// Startup strings recorded into the process parameters.
#[derive(Clone, Debug)]
pub struct ProcessConfig {
    /// `RTL_USER_PROCESS_PARAMETERS.ImagePathName`.
    pub image_path: String,
    /// `RTL_USER_PROCESS_PARAMETERS.CommandLine`.
    pub command_line: String,
}

/// Everything the emulated process owns besides raw guest memory.
///
/// Outlives the emulation run; hooks hold read-only views into it.
pub struct ProcessContext {
    pub gs_segment: GuestAllocator,
    pub executable: MappedBinary,
    pub ntdll: MappedBinary,
    pub teb: GuestRef<Teb>,
    pub peb: GuestRef<Peb>,
    pub process_params: GuestRef<RtlUserProcessParameters>,
    pub kusd: GuestRef<KuserSharedData>,
}

/// Errors from process construction.
#[derive(Debug, Error)]
pub enum ProcessBuildError {
    #[error("failed to map {module}")]
    Map {
        module: &'static str,
        #[source]
        source: PeError,
    },

    #[error(transparent)]
    Alloc(#[from] GuestAllocError),

    #[error(transparent)]
    Emulator(#[from] EmulatorError),
}

/// Build a runnable process from the raw bytes of its executable and of
/// `ntdll.dll`.
pub fn build_process(
    emu: &mut dyn X64Emulator,
    executable_data: &[u8],
    ntdll_data: &[u8],
    config: &ProcessConfig,
) -> Result<ProcessContext, ProcessBuildError> {
    setup_stack(emu, STACK_ADDRESS, STACK_SIZE)?;
    let kusd = setup_kusd(emu)?;
    let mut gs_segment = setup_gs_segment(emu, GS_SEGMENT_ADDR, GS_SEGMENT_SIZE)?;

    let teb = gs_segment.reserve::<Teb>()?;
    let peb = gs_segment.reserve::<Peb>()?;
    let process_params = gs_segment.reserve::<RtlUserProcessParameters>()?;

    teb.access(emu, |block| {
        block.NtTib.StackLimit = STACK_ADDRESS;
        block.NtTib.StackBase = STACK_ADDRESS + STACK_SIZE;
        block.NtTib.Self_ = teb.value() + offset_of!(Teb, NtTib) as u64;
        block.ProcessEnvironmentBlock = peb.value();
    })?;

    peb.access(emu, |block| {
        block.ImageBaseAddress = 0;
        block.ProcessHeap = 0;
        block.ProcessHeaps = 0;
        block.ProcessParameters = process_params.value();
    })?;

    // The string buffers are carved out of the GS segment, so this cannot go
    // through `access`: the allocator is needed while the value is open.
    let mut params = process_params.read(emu)?;
    params.Flags = 0x6001;
    gs_segment.make_unicode_string(emu, &mut params.ImagePathName, &config.image_path)?;
    gs_segment.make_unicode_string(emu, &mut params.CommandLine, &config.command_line)?;
    process_params.write(emu, &params)?;

    let executable = map_binary(emu, executable_data, "executable").map_err(|source| {
        ProcessBuildError::Map {
            module: "executable",
            source,
        }
    })?;

    peb.access(emu, |block| {
        block.ImageBaseAddress = executable.image_base;
    })?;

    let ntdll =
        map_binary(emu, ntdll_data, "ntdll").map_err(|source| ProcessBuildError::Map {
            module: "ntdll",
            source,
        })?;

    Ok(ProcessContext {
        gs_segment,
        executable,
        ntdll,
        teb,
        peb,
        process_params,
        kusd,
    })
}

fn setup_stack(
    emu: &mut dyn X64Emulator,
    stack_base: u64,
    stack_size: u64,
) -> Result<(), EmulatorError> {
    emu.allocate_memory(stack_base, stack_size, MemoryPermission::READ_WRITE)?;
    emu.set_reg(X64Register::Rsp, stack_base + stack_size)
}

fn setup_gs_segment(
    emu: &mut dyn X64Emulator,
    segment_base: u64,
    size: u64,
) -> Result<GuestAllocator, EmulatorError> {
    emu.write_msr(IA32_GS_BASE, segment_base)?;
    emu.allocate_memory(segment_base, size, MemoryPermission::READ_WRITE)?;
    Ok(GuestAllocator::new(segment_base, size))
}

fn setup_kusd(
    emu: &mut dyn X64Emulator,
) -> Result<GuestRef<KuserSharedData>, ProcessBuildError> {
    emu.allocate_memory(
        KUSD_ADDRESS,
        page_align_up(size_of::<KuserSharedData>() as u64),
        MemoryPermission::READ,
    )?;

    let kusd_ref: GuestRef<KuserSharedData> = GuestRef::new(KUSD_ADDRESS);
    let mut kusd = initial_kusd();
    kusd.ImageNumberLow = IMAGE_FILE_MACHINE_I386;
    kusd.ImageNumberHigh = IMAGE_FILE_MACHINE_AMD64;
    kusd.ProcessorFeatures = [0; 64];
    kusd_ref.write(emu, &kusd)?;

    debug!(base = format_args!("{KUSD_ADDRESS:#x}"), "seeded KUSER_SHARED_DATA");
    Ok(kusd_ref)
}

/// On a Windows host, start from the live page the kernel shares with this
/// very process.
#[cfg(windows)]
fn initial_kusd() -> KuserSharedData {
    // SAFETY: KUSER_SHARED_DATA is mapped read-only at this fixed address in
    // every user-mode Windows process, and our layout matches its prefix.
    unsafe { core::ptr::read_volatile(KUSD_ADDRESS as *const KuserSharedData) }
}

/// On other hosts there is no page to copy; synthesize one that looks like a
/// current 64-bit Windows 10 system.
#[cfg(not(windows))]
fn initial_kusd() -> KuserSharedData {
    use zerocopy::FromZeros;

    let mut kusd = KuserSharedData::new_zeroed();

    // 15.6 ms per tick, the classic multiplier.
    kusd.TickCountMultiplier = 0x0FA0_0000;
    kusd.InterruptTime.LowPart = 0x0040_0000;
    kusd.SystemTime.High1Time = 0x01DC_0000;
    kusd.SystemTime.High2Time = 0x01DC_0000;
    kusd.TickCount.LowPart = 0x0001_0000;

    let root: &[u8] = b"C\0:\0\\\0W\0i\0n\0d\0o\0w\0s\0";
    for (slot, unit) in kusd.NtSystemRoot.iter_mut().zip(
        root.chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]])),
    ) {
        *slot = unit;
    }

    kusd.NtMajorVersion = 10;
    kusd.NtMinorVersion = 0;
    kusd.NtBuildNumber = 19045;
    kusd.NtProductType = 1; // NtProductWinNt
    kusd.ProductTypeIsValid = 1;
    kusd.NativeProcessorArchitecture = 9; // PROCESSOR_ARCHITECTURE_AMD64
    kusd.NumberOfPhysicalPages = 0x0010_0000;
    kusd.QpcFrequency = 10_000_000;
    kusd.ActiveProcessorCount = 1;
    kusd.ActiveGroupCount = 1;
    kusd
}
