//! Signal system calls
//!
//! `signal` records a handler for the caller; `kill` records the signal
//! as pending on the target and applies the default action when no
//! handler is registered. KILL and TERM cannot be caught; their default
//! forces the target to exit with `128 + signum`.

use crate::bootstrap::Kernel;
use crate::error::{KernelError, KernelResult};
use crate::irq::TrapFrame;
use crate::process::lifecycle;
use crate::process::pcb::Pid;
use crate::process::signal::{can_be_handled, default_action, DefaultAction, SIGNAL_COUNT};

use super::Outcome;

pub fn sys_signal(kernel: &mut Kernel, signum: u32, handler: u32) -> KernelResult<usize> {
    if signum as usize >= SIGNAL_COUNT {
        return Err(KernelError::InvalidArgument);
    }
    if !can_be_handled(signum) {
        return Err(KernelError::NotPermitted);
    }
    let proc = kernel
        .processes
        .current_process_mut()
        .ok_or(KernelError::NotFound)?;
    proc.signals.register(signum, handler, 0);
    Ok(0)
}

pub fn sys_kill(kernel: &mut Kernel, frame: &mut TrapFrame, pid: u32, signum: u32) -> Outcome {
    if signum as usize >= SIGNAL_COUNT {
        return Outcome::Value(KernelError::InvalidArgument.errno());
    }
    let target = Pid(pid);
    let Some(target_proc) = kernel.processes.get_mut(target) else {
        return Outcome::Value(KernelError::NotFound.errno());
    };

    // Bookkeeping first: the signal is pending on the target whatever
    // happens next.
    target_proc.signals.set_pending(signum);

    if target_proc.signals.handler(signum).is_some() {
        // A registered handler defers actual delivery to a future
        // revision; the pending bit is the record.
        return Outcome::Value(0);
    }

    match default_action(signum) {
        DefaultAction::Ignore => Outcome::Value(0),
        DefaultAction::Terminate => {
            let status = 128 + signum as i32;
            if kernel.processes.current() == Some(target) {
                if lifecycle::exit_current(kernel, frame, status).is_none() {
                    crate::arch::idle_forever();
                }
                Outcome::FrameReplaced
            } else {
                lifecycle::terminate_other(kernel, target, status);
                Outcome::Value(0)
            }
        }
    }
}
