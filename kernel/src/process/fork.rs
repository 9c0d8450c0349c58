//! Fork: eager deep copy of the calling process
//!
//! Every present user-half page of the parent is duplicated into a
//! fresh frame at the same virtual address in the child; the kernel
//! half is shared, not copied (copy-on-write is an explicit non-goal).
//! The return-value split is arranged at creation time: the child's
//! saved accumulator is rewritten to 0 before its first dispatch, while
//! the parent's syscall returns the child's pid.

use crate::bootstrap::Kernel;
use crate::error::KernelResult;
use crate::irq::TrapFrame;
use crate::mm::AddressSpace;
use crate::sched::QUANTUM_TICKS;

use super::lifecycle::insert_linked;
use super::pcb::{Pid, Process, ProcessState, RegisterFrame};

/// Fork the current process. `frame` is the parent's syscall entry
/// frame; the child resumes from the same point with `eax` forced to 0.
pub fn fork(kernel: &mut Kernel, frame: &TrapFrame) -> KernelResult<Pid> {
    let Kernel {
        frames,
        window,
        processes,
        ..
    } = kernel;

    let parent_pid = processes
        .current()
        .ok_or(crate::error::KernelError::NotFound)?;

    let space = {
        let parent = processes
            .get(parent_pid)
            .ok_or(crate::error::KernelError::NotFound)?;
        AddressSpace::fork_from(frames, window, &parent.space)?
    };

    let pid = processes.allocate_pid();
    let parent = processes
        .get(parent_pid)
        .expect("parent exists during fork");

    let mut regs = RegisterFrame::capture(frame);
    regs.eax = 0;

    let child = Process {
        pid,
        ppid: parent_pid,
        name: parent.name.clone(),
        state: ProcessState::Ready,
        regs,
        space,
        stack_bottom: parent.stack_bottom,
        stack_top: parent.stack_top,
        kernel_stack_top: parent.kernel_stack_top,
        heap_start: parent.heap_start,
        heap_end: parent.heap_end,
        time_slice: QUANTUM_TICKS,
        priority: parent.priority,
        exit_code: 0,
        parent: Some(parent_pid),
        first_child: None,
        next_sibling: None,
        files: parent.files.clone(),
        signals: parent.signals.clone(),
    };

    insert_linked(frames, window, processes, child, Some(parent_pid))?;
    log::debug!("forked {parent_pid} -> {pid}");
    Ok(pid)
}
