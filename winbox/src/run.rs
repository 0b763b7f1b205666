// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The run loop: wire the syscall boundary, hand the CPU its first thread,
//! and surface how it ended.

use std::rc::Rc;

use thiserror::Error;
use tracing::info;
use winbox_common_nt::nt::ThreadContext;

use crate::cpu::{EmulatorError, HookableInstruction, X64Emulator, X64Register};
use crate::guest::GuestAllocError;
use crate::loader::MappedBinary;
use crate::process::ProcessContext;
use crate::syscall::HandleSyscall;

/// The two `ntdll` entry points a new process can start through.
#[derive(Clone, Copy, Debug)]
pub struct EntryPoints {
    /// Runs the user-mode loader; where Windows starts every new process.
    pub ldr_initialize_thunk: u64,
    /// Thread-start trampoline; resolved now, used once threads exist.
    pub rtl_user_thread_start: u64,
}

/// Errors from preparing or running the initial thread.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("required ntdll export {name} not found")]
    ExportNotFound { name: &'static str },

    #[error(transparent)]
    Alloc(#[from] GuestAllocError),

    #[error(transparent)]
    Emulator(#[from] EmulatorError),

    #[error("emulation failed at {rip:#x}")]
    EmulationFault {
        rip: u64,
        #[source]
        source: EmulatorError,
    },
}

/// Resolve the fixed entry points out of the mapped `ntdll`.
pub fn resolve_entry_points(ntdll: &MappedBinary) -> Result<EntryPoints, LaunchError> {
    let resolve = |name: &'static str| {
        ntdll
            .exports
            .get(name)
            .copied()
            .ok_or(LaunchError::ExportNotFound { name })
    };
    Ok(EntryPoints {
        ldr_initialize_thunk: resolve("LdrInitializeThunk")?,
        rtl_user_thread_start: resolve("RtlUserThreadStart")?,
    })
}

/// Run the constructed process to completion.
///
/// `LdrInitializeThunk(context, ntdll_base)` receives a fresh `CONTEXT`
/// record in RCX and the `ntdll` base in RDX. Every `SYSCALL` the guest
/// issues is forwarded to `handler` together with a shared view of the
/// process context. On an emulator fault, the faulting instruction pointer
/// is captured into the error.
pub fn launch(
    emu: &mut dyn X64Emulator,
    mut context: ProcessContext,
    mut handler: Box<dyn HandleSyscall>,
) -> Result<Rc<ProcessContext>, LaunchError> {
    let entries = resolve_entry_points(&context.ntdll)?;

    let thread_context = context.gs_segment.reserve::<ThreadContext>()?;
    emu.set_reg(X64Register::Rcx, thread_context.value())?;
    emu.set_reg(X64Register::Rdx, context.ntdll.image_base)?;

    let context = Rc::new(context);
    let syscall_context = Rc::clone(&context);
    emu.hook_instruction(
        HookableInstruction::Syscall,
        Box::new(move |cpu| handler.handle_syscall(cpu, &syscall_context)),
    )?;

    info!(
        entry = format_args!("{:#x}", entries.ldr_initialize_thunk),
        "starting emulation"
    );
    match emu.start(entries.ldr_initialize_thunk) {
        Ok(()) => {
            info!("emulation done");
            Ok(context)
        }
        Err(source) => {
            let rip = emu.reg(X64Register::Rip).unwrap_or(0);
            Err(LaunchError::EmulationFault { rip, source })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::cpu::mock::MockCpu;
    use crate::cpu::{CpuRegisters, CpuState};
    use crate::process::{ProcessConfig, build_process};
    use crate::testutil::PeBuilder;

    const EXE_BASE: u64 = 0x1_4000_0000;
    const NTDLL_BASE: u64 = 0x1_8000_0000;

    fn built_process(cpu: &mut MockCpu, with_entries: bool) -> ProcessContext {
        let exe = PeBuilder::new(EXE_BASE).build();
        let mut ntdll = PeBuilder::new(NTDLL_BASE);
        if with_entries {
            ntdll = ntdll.with_exports(&[
                ("LdrInitializeThunk", 0x1000),
                ("RtlUserThreadStart", 0x1100),
            ]);
        }
        let config = ProcessConfig {
            image_path: "C:\\app.exe".to_string(),
            command_line: "C:\\app.exe".to_string(),
        };
        build_process(cpu, &exe, &ntdll.build(), &config).unwrap()
    }

    fn ignore_syscalls() -> Box<dyn HandleSyscall> {
        Box::new(|_cpu: &mut dyn CpuState, _context: &ProcessContext| {})
    }

    #[test]
    fn launch_prepares_the_initial_thread() {
        let mut cpu = MockCpu::new();
        let context = built_process(&mut cpu, true);

        let context = launch(&mut cpu, context, ignore_syscalls()).unwrap();

        assert_eq!(cpu.started, vec![NTDLL_BASE + 0x1000]);

        let rcx = cpu.reg(X64Register::Rcx).unwrap();
        assert_ne!(rcx, 0);
        assert_eq!(rcx % 16, 0, "CONTEXT must be 16-byte aligned");
        assert_eq!(
            cpu.reg(X64Register::Rdx).unwrap(),
            context.ntdll.image_base
        );
        assert_eq!(cpu.instruction_hook_count(), 1);
    }

    #[test]
    fn syscalls_reach_the_handler_with_the_shared_context() {
        let mut cpu = MockCpu::new();
        let context = built_process(&mut cpu, true);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let handler = Box::new(move |cpu: &mut dyn CpuState, context: &ProcessContext| {
            let number = cpu.reg(X64Register::Rax).unwrap_or(0);
            sink.borrow_mut().push((number, context.ntdll.image_base));
        });

        launch(&mut cpu, context, handler).unwrap();

        cpu.set_reg(X64Register::Rax, 0x55).unwrap();
        cpu.simulate_instruction(HookableInstruction::Syscall);
        cpu.set_reg(X64Register::Rax, 0x18).unwrap();
        cpu.simulate_instruction(HookableInstruction::Syscall);

        assert_eq!(
            *seen.borrow(),
            vec![(0x55, NTDLL_BASE), (0x18, NTDLL_BASE)]
        );
    }

    #[test]
    fn missing_entry_export_is_fatal() {
        let mut cpu = MockCpu::new();
        let context = built_process(&mut cpu, false);

        assert!(matches!(
            launch(&mut cpu, context, ignore_syscalls()),
            Err(LaunchError::ExportNotFound {
                name: "LdrInitializeThunk"
            })
        ));
    }

    #[test]
    fn fault_reports_the_instruction_pointer() {
        let mut cpu = MockCpu::new();
        let context = built_process(&mut cpu, true);

        cpu.set_reg(X64Register::Rip, 0x1_8000_2222).unwrap();
        cpu.fault_on_start = Some(EmulatorError::Fault("invalid opcode".to_string()));

        match launch(&mut cpu, context, ignore_syscalls()) {
            Err(LaunchError::EmulationFault { rip, .. }) => assert_eq!(rip, 0x1_8000_2222),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected a fault"),
        }
    }
}
