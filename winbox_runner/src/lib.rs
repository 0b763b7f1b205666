// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Command-line runner: load an executable and `ntdll.dll`, build the
//! process image, install the tracing hooks, and emulate until the guest
//! halts or faults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use winbox::cpu::{CpuRegisters, CpuState, X64Register};
use winbox::process::{ProcessConfig, ProcessContext, build_process};
use winbox::syscall::HandleSyscall;
use winbox::trace::{trace_execution, trace_exports, watch_object};
use winbox_common_nt::STATUS_NOT_IMPLEMENTED;

/// Run unmodified Windows x86-64 executables under emulation
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    /// The Windows executable to emulate
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub executable: PathBuf,
    /// The ntdll.dll image to map beside the executable
    #[arg(long = "ntdll", default_value = "ntdll.dll", value_hint = clap::ValueHint::FilePath)]
    pub ntdll: PathBuf,
    /// Windows-style image path recorded in the process parameters
    #[arg(long = "image-path")]
    pub image_path: Option<String>,
    /// Command line handed to the guest (defaults to the image path)
    #[arg(long = "command-line")]
    pub command_line: Option<String>,
    /// Log every executed instruction with its register file (very slow)
    #[arg(long = "trace-execution")]
    pub trace_execution: bool,
    /// Increase verbosity (pass multiple times to increase)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// The Windows path the guest believes it was started from, derived from the
/// host path when the user does not override it.
fn default_image_path(executable: &Path) -> String {
    let name = executable
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "app.exe".to_string());
    format!("C:\\{name}")
}

/// Kernel stub standing in for the syscall layer: every syscall is logged
/// and answered with `STATUS_NOT_IMPLEMENTED`.
struct UnimplementedSyscalls;

impl HandleSyscall for UnimplementedSyscalls {
    fn handle_syscall(&mut self, cpu: &mut dyn CpuState, _context: &ProcessContext) {
        let number = cpu.reg(X64Register::Rax).unwrap_or(0);
        debug!(number = format_args!("{number:#x}"), "unimplemented syscall");
        let _ = cpu.set_reg(X64Register::Rax, u64::from(STATUS_NOT_IMPLEMENTED));
    }
}

pub fn run(cli_args: CliArgs) -> Result<()> {
    tracing_subscriber::fmt()
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_level(true)
        .with_max_level(match cli_args.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        })
        .init();

    let executable_data = std::fs::read(&cli_args.executable).with_context(|| {
        format!("could not read executable {}", cli_args.executable.display())
    })?;
    let ntdll_data = std::fs::read(&cli_args.ntdll)
        .with_context(|| format!("could not read ntdll {}", cli_args.ntdll.display()))?;

    let image_path = cli_args
        .image_path
        .clone()
        .unwrap_or_else(|| default_image_path(&cli_args.executable));
    let command_line = cli_args
        .command_line
        .clone()
        .unwrap_or_else(|| image_path.clone());

    let mut emu = winbox_platform_unicorn::create_x64_emulator()?;
    let context = build_process(
        &mut emu,
        &executable_data,
        &ntdll_data,
        &ProcessConfig {
            image_path,
            command_line,
        },
    )?;

    watch_object(&mut emu, context.teb)?;
    watch_object(&mut emu, context.peb)?;
    watch_object(&mut emu, context.process_params)?;
    watch_object(&mut emu, context.kusd)?;
    trace_exports(&mut emu, &context.ntdll.exports)?;
    if cli_args.trace_execution {
        trace_execution(&mut emu)?;
    }

    winbox::launch(&mut emu, context, Box::new(UnimplementedSyscalls))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_path_defaults_to_drive_c() {
        assert_eq!(
            default_image_path(Path::new("/home/user/bin/app.exe")),
            "C:\\app.exe"
        );
        assert_eq!(default_image_path(Path::new("hello.exe")), "C:\\hello.exe");
    }
}
