//! Process lifecycle system calls

use alloc::string::String;
use alloc::vec::Vec;

use crate::bootstrap::Kernel;
use crate::error::{KernelError, KernelResult};
use crate::irq::TrapFrame;
use crate::mm::user_validation;
use crate::process::lifecycle::{self, WaitOutcome};
use crate::process::pcb::ProcessState;
use crate::process::fork;

use super::Outcome;

/// Size in bytes of the `int 0x80` instruction, used to rewind a
/// blocking call so it re-executes on resume.
const SYSCALL_INSN_LEN: u32 = 2;

/// Most argv entries `exec` accepts.
const ARGV_MAX: usize = 32;

/// Longest single argument string.
const ARG_MAX: usize = 256;

pub fn sys_exit(kernel: &mut Kernel, frame: &mut TrapFrame, status: u32) -> Outcome {
    if lifecycle::exit_current(kernel, frame, status as i32).is_none() {
        // Last runnable process is gone; there is nothing to return to.
        crate::arch::idle_forever();
    }
    Outcome::FrameReplaced
}

pub fn sys_fork(kernel: &mut Kernel, frame: &mut TrapFrame) -> KernelResult<usize> {
    let child = fork::fork(kernel, frame)?;
    Ok(child.0 as usize)
}

pub fn sys_exec(kernel: &mut Kernel, frame: &mut TrapFrame, path_ptr: u32, argv_ptr: u32) -> Outcome {
    let (path, argv) = match read_exec_arguments(kernel, path_ptr, argv_ptr) {
        Ok(parts) => parts,
        Err(err) => return Outcome::Value(err.errno()),
    };
    match lifecycle::exec(kernel, frame, &path, &argv) {
        Ok(()) => Outcome::FrameReplaced,
        Err(err) => Outcome::Value(err.errno()),
    }
}

pub fn sys_wait(kernel: &mut Kernel, frame: &mut TrapFrame, status_ptr: u32) -> Outcome {
    // Validate the out-pointer before any child is consumed.
    if status_ptr != 0 {
        let check = {
            let proc = match kernel.processes.current_process() {
                Some(p) => p,
                None => return Outcome::Value(KernelError::NotFound.errno()),
            };
            user_validation::validate_range(&proc.space, &kernel.window, status_ptr, 4, true)
        };
        if let Err(err) = check {
            return Outcome::Value(err.errno());
        }
    }

    match lifecycle::wait(kernel) {
        WaitOutcome::Reaped { pid, status } => {
            if status_ptr != 0 {
                let proc = kernel
                    .processes
                    .current_process()
                    .expect("caller still current after reap");
                let _ = user_validation::copy_to_user(
                    &proc.space,
                    &kernel.window,
                    status_ptr,
                    &status.to_le_bytes(),
                );
            }
            Outcome::Value(pid.0 as isize)
        }
        WaitOutcome::NoChildren => Outcome::Value(KernelError::NotFound.errno()),
        WaitOutcome::Blocked => {
            // Rewind so the call re-executes when the caller resumes.
            frame.eip -= SYSCALL_INSN_LEN;
            let current = kernel.processes.current();
            if let Some(pid) = current {
                if let Some(proc) = kernel.processes.get_mut(pid) {
                    proc.state = ProcessState::Blocked;
                }
            }
            if let Some(next) = kernel.sched.next(&kernel.processes) {
                lifecycle::switch_to(kernel, next, frame);
            } else if let Some(pid) = current {
                // Nothing else can run; keep the caller live so the
                // rewound call retries instead of deadlocking the CPU.
                if let Some(proc) = kernel.processes.get_mut(pid) {
                    proc.state = ProcessState::Running;
                }
            }
            Outcome::FrameReplaced
        }
    }
}

pub fn sys_getpid(kernel: &mut Kernel) -> KernelResult<usize> {
    kernel
        .processes
        .current()
        .map(|pid| pid.0 as usize)
        .ok_or(KernelError::NotFound)
}

fn read_exec_arguments(
    kernel: &mut Kernel,
    path_ptr: u32,
    argv_ptr: u32,
) -> KernelResult<(String, Vec<String>)> {
    let proc = kernel
        .processes
        .current_process()
        .ok_or(KernelError::NotFound)?;
    let space = &proc.space;
    let window = &kernel.window;

    let path = user_validation::copy_str_from_user(space, window, path_ptr, crate::fs::PATH_MAX)?;

    let mut argv = Vec::new();
    if argv_ptr != 0 {
        for index in 0..ARGV_MAX {
            let mut raw = [0u8; 4];
            user_validation::copy_from_user(
                space,
                window,
                argv_ptr + (index * 4) as u32,
                &mut raw,
            )?;
            let entry = u32::from_le_bytes(raw);
            if entry == 0 {
                break;
            }
            argv.push(user_validation::copy_str_from_user(
                space, window, entry, ARG_MAX,
            )?);
        }
    }
    Ok((path, argv))
}
