//! Process lifecycle and context switch
//!
//! Creation, exec, exit, wait/reap, the user heap break, and the
//! context-switch bookkeeping. The switch itself is a data operation:
//! save the outgoing register file from the kernel-entry frame, restore
//! the target's into it, and point the MMU at the target's root; the
//! `iret` at the end of the trap path then lands in the target.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::bootstrap::Kernel;
use crate::elf;
use crate::error::{KernelError, KernelResult};
use crate::fs::{file::FileTable, OpenFlags};
use crate::irq::TrapFrame;
use crate::mm::{user_validation, AddressSpace, PageFlags, VirtAddr, PAGE_SIZE};
use crate::sched::QUANTUM_TICKS;

use super::pcb::{Pid, Process, ProcessState, RegisterFrame};
use super::signal::SignalState;
use super::{DEFAULT_STACK_SIZE, USER_EFLAGS, USER_HEAP_MAX, USER_STACK_BASE};

/// Longest accepted process name.
const NAME_MAX: usize = 31;

/// Outcome of a `wait` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A terminated child was reaped.
    Reaped { pid: Pid, status: i32 },
    /// Children exist but none has terminated; the caller blocks and
    /// retries.
    Blocked,
    /// The caller has no children to wait for.
    NoChildren,
}

/// Create a process that will enter user mode at `entry` with a fresh
/// stack. `stack_size` 0 means the 64 KiB default.
pub fn create(
    kernel: &mut Kernel,
    name: &str,
    entry: u32,
    stack_size: usize,
) -> KernelResult<Pid> {
    let Kernel {
        frames,
        window,
        vmm,
        processes,
        vfs,
        ..
    } = kernel;

    let mut space = AddressSpace::new(frames, window)?;
    space.share_kernel_half(window, vmm.kernel_space());

    let stack_size = if stack_size == 0 {
        DEFAULT_STACK_SIZE
    } else {
        (stack_size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
    };
    let stack_bottom = USER_STACK_BASE;
    let stack_top = stack_bottom + stack_size as u32;

    for page in (0..stack_size).step_by(PAGE_SIZE) {
        let virt = VirtAddr::new(stack_bottom + page as u32);
        match space.alloc_page(frames, window, virt, PageFlags::USER_RW) {
            Ok(frame) => window.zero(frame, PAGE_SIZE),
            Err(err) => {
                space.destroy(frames, window);
                return Err(err);
            }
        }
    }

    let mut regs = RegisterFrame {
        eip: entry,
        cs: crate::arch::USER_CODE_SELECTOR,
        eflags: USER_EFLAGS,
        esp: stack_top - 16,
        ss: crate::arch::USER_DATA_SELECTOR,
        ds: crate::arch::USER_DATA_SELECTOR,
        es: crate::arch::USER_DATA_SELECTOR,
        fs: crate::arch::USER_DATA_SELECTOR,
        gs: crate::arch::USER_DATA_SELECTOR,
        ..Default::default()
    };
    regs.eax = 0;

    let pid = processes.allocate_pid();
    let parent = processes.current();
    let process = Process {
        pid,
        ppid: parent.unwrap_or(Pid(0)),
        name: truncate_name(name),
        state: ProcessState::Ready,
        regs,
        space,
        stack_bottom,
        stack_top,
        kernel_stack_top: crate::arch::KERNEL_STACK_TOP,
        heap_start: stack_top,
        heap_end: stack_top,
        time_slice: QUANTUM_TICKS,
        priority: 0,
        exit_code: 0,
        parent,
        first_child: None,
        next_sibling: None,
        files: FileTable::new(vfs.console()),
        signals: SignalState::new(),
    };

    insert_linked(frames, window, processes, process, parent)?;
    log::debug!("created process {pid} ({name})");
    Ok(pid)
}

/// Insert a PCB into the table and the parent's child list, tearing the
/// address space down if the table is full.
pub(super) fn insert_linked(
    frames: &mut crate::mm::FrameBitmap,
    window: &crate::mm::PhysWindow,
    processes: &mut super::table::ProcessTable,
    mut process: Process,
    parent: Option<Pid>,
) -> KernelResult<Pid> {
    if let Some(parent_pid) = parent {
        process.next_sibling = processes.get(parent_pid).and_then(|p| p.first_child);
    }
    match processes.insert(process) {
        Ok(pid) => {
            if let Some(parent_pid) = parent {
                if let Some(parent_proc) = processes.get_mut(parent_pid) {
                    parent_proc.first_child = Some(pid);
                }
            }
            Ok(pid)
        }
        Err(rejected) => {
            rejected.space.destroy(frames, window);
            Err(KernelError::TooManyProcesses)
        }
    }
}

/// Switch execution to `next`: save the outgoing context, restore the
/// target's, reset its slice, and load its address space.
pub fn switch_to(kernel: &mut Kernel, next: Pid, frame: &mut TrapFrame) {
    let current = kernel.processes.current();
    if current == Some(next) {
        return;
    }

    if let Some(current_pid) = current {
        if let Some(proc) = kernel.processes.get_mut(current_pid) {
            proc.regs = RegisterFrame::capture(frame);
            if proc.state == ProcessState::Running {
                proc.state = ProcessState::Ready;
            }
        }
    }

    let root = {
        let Some(proc) = kernel.processes.get_mut(next) else {
            return;
        };
        proc.state = ProcessState::Running;
        proc.time_slice = QUANTUM_TICKS;
        proc.regs.restore_into(frame);
        proc.space.root()
    };
    kernel.processes.set_current(Some(next));
    kernel.vmm.switch(root);
}

/// Voluntarily give up the CPU if another process is ready.
pub fn yield_now(kernel: &mut Kernel, frame: &mut TrapFrame) {
    if let Some(next) = kernel.sched.next(&kernel.processes) {
        switch_to(kernel, next, frame);
    }
}

/// Terminate the current process with `code`: mark it, wake a waiting
/// parent, and hand the CPU to the next ready process. The PCB stays in
/// the table until the parent reaps it. Returns the process switched to.
pub fn exit_current(kernel: &mut Kernel, frame: &mut TrapFrame, code: i32) -> Option<Pid> {
    let current = kernel.processes.current()?;

    let parent = {
        let proc = kernel.processes.get_mut(current)?;
        proc.state = ProcessState::Terminated;
        proc.exit_code = code;
        proc.parent
    };
    log::debug!("process {current} exited with status {code}");

    if let Some(parent_pid) = parent {
        let parent_blocked = kernel
            .processes
            .get(parent_pid)
            .map(|p| p.state == ProcessState::Blocked)
            .unwrap_or(false);
        if parent_blocked {
            kernel.sched.schedule(&mut kernel.processes, parent_pid);
        }
    }

    kernel.processes.set_current(None);
    let next = kernel.sched.next(&kernel.processes)?;
    switch_to(kernel, next, frame);
    Some(next)
}

/// Kill the current process after a CPU fault. Same path as a normal
/// exit, with the fault's distinguished exit code.
pub fn fault_exit(kernel: &mut Kernel, frame: &mut TrapFrame, code: i32) -> Option<Pid> {
    exit_current(kernel, frame, code)
}

/// Terminate a process other than the current one (a fatal signal).
/// The target keeps its PCB until reaped; a parent blocked in `wait` is
/// woken.
pub fn terminate_other(kernel: &mut Kernel, target: Pid, code: i32) {
    let parent = {
        let Some(proc) = kernel.processes.get_mut(target) else {
            return;
        };
        proc.state = ProcessState::Terminated;
        proc.exit_code = code;
        proc.parent
    };
    log::debug!("process {target} terminated by signal (status {code})");
    if let Some(parent_pid) = parent {
        let parent_blocked = kernel
            .processes
            .get(parent_pid)
            .map(|p| p.state == ProcessState::Blocked)
            .unwrap_or(false);
        if parent_blocked {
            kernel.sched.schedule(&mut kernel.processes, parent_pid);
        }
    }
}

/// One `wait` attempt for the current process.
pub fn wait(kernel: &mut Kernel) -> WaitOutcome {
    let Some(current) = kernel.processes.current() else {
        return WaitOutcome::NoChildren;
    };
    let children = kernel.processes.children_of(current);
    if children.is_empty() {
        return WaitOutcome::NoChildren;
    }
    for child in children {
        let terminated = kernel
            .processes
            .get(child)
            .map(|p| p.is_terminated())
            .unwrap_or(false);
        if terminated {
            let status = reap(kernel, current, child);
            return WaitOutcome::Reaped { pid: child, status };
        }
    }
    WaitOutcome::Blocked
}

/// Reap a terminated child: unlink it, free its user frames (stack,
/// program, heap — but not jointly-owned shared-memory pages), its page
/// tables, its root, and the PCB itself.
fn reap(kernel: &mut Kernel, parent: Pid, child: Pid) -> i32 {
    kernel.processes.unlink_child(parent, child);
    let Some(mut proc) = kernel.processes.remove(child) else {
        return -1;
    };
    let status = proc.exit_code;
    proc.space.destroy_user_half(&mut kernel.frames, &kernel.window, |virt| {
        crate::ipc::shared_memory::in_attach_window(virt)
    });
    let root = proc.space.root();
    kernel.frames.free(root);
    log::debug!("reaped process {child} (status {status})");
    status
}

/// Set the user heap break to `new_break`, mapping zeroed pages on
/// growth and unmapping on shrink. On any failure the break is left
/// unchanged and returned as-is.
pub fn brk(kernel: &mut Kernel, new_break: u32) -> u32 {
    let Some(current) = kernel.processes.current() else {
        return 0;
    };
    let (heap_start, heap_end) = {
        let Some(proc) = kernel.processes.get(current) else {
            return 0;
        };
        (proc.heap_start, proc.heap_end)
    };

    if new_break < heap_start || new_break > heap_start.saturating_add(USER_HEAP_MAX) {
        return heap_end;
    }

    let Kernel {
        frames,
        window,
        processes,
        ..
    } = kernel;
    let proc = processes.get_mut(current).expect("current exists");

    let old_top = VirtAddr::new(heap_end).align_up().as_u32();
    let new_top = VirtAddr::new(new_break).align_up().as_u32();

    if new_top > old_top {
        let mut addr = old_top;
        while addr < new_top {
            match proc
                .space
                .alloc_page(frames, window, VirtAddr::new(addr), PageFlags::USER_RW)
            {
                Ok(frame) => window.zero(frame, PAGE_SIZE),
                Err(_) => {
                    // Unwind this growth attempt.
                    let mut undo = old_top;
                    while undo < addr {
                        let virt = VirtAddr::new(undo);
                        if let Some((phys, _)) = proc.space.translate(window, virt) {
                            proc.space.unmap(window, virt);
                            frames.free(phys.align_down());
                        }
                        undo += PAGE_SIZE as u32;
                    }
                    return heap_end;
                }
            }
            addr += PAGE_SIZE as u32;
        }
    } else if new_top < old_top {
        let mut addr = new_top;
        while addr < old_top {
            let virt = VirtAddr::new(addr);
            if let Some((phys, _)) = proc.space.translate(window, virt) {
                proc.space.unmap(window, virt);
                frames.free(phys.align_down());
            }
            addr += PAGE_SIZE as u32;
        }
    }

    proc.heap_end = new_break;
    new_break
}

/// Adjust the break by a signed increment, returning the new break.
pub fn sbrk(kernel: &mut Kernel, increment: i32) -> KernelResult<u32> {
    let current = kernel
        .processes
        .current()
        .ok_or(KernelError::NotFound)?;
    let heap_end = kernel
        .processes
        .get(current)
        .ok_or(KernelError::NotFound)?
        .heap_end;

    let target = heap_end.wrapping_add(increment as u32);
    let result = brk(kernel, target);
    if result != target && increment != 0 {
        return Err(KernelError::OutOfMemory);
    }
    Ok(result)
}

/// Replace the current process image: load the ELF at `path`, build the
/// `{argc, argv, strings}` block at the top of the user stack, and aim
/// the saved context at the new entry point. Does not return through the
/// old program on success.
pub fn exec(
    kernel: &mut Kernel,
    frame: &mut TrapFrame,
    path: &str,
    argv: &[String],
) -> KernelResult<()> {
    let current = kernel
        .processes
        .current()
        .ok_or(KernelError::NotFound)?;

    // Read up to one page of the image.
    let node = kernel.vfs.open(path, OpenFlags::RDONLY)?;
    let mut image = alloc::vec![0u8; PAGE_SIZE];
    let len = kernel.vfs.read(node, 0, &mut image)?;
    if len == 0 {
        return Err(KernelError::BadExecutable);
    }
    image.truncate(len);

    let (stack_top, entry) = {
        let Kernel {
            frames,
            window,
            processes,
            ..
        } = kernel;
        let proc = processes.get_mut(current).expect("current exists");
        let entry = elf::load(&mut proc.space, frames, window, &image)?;
        (proc.stack_top, entry)
    };

    let esp = build_argument_block(kernel, current, stack_top, path, argv)?;

    let proc = kernel.processes.get_mut(current).expect("current exists");
    proc.name = truncate_name(path);
    let mut regs = RegisterFrame {
        eip: entry,
        cs: crate::arch::USER_CODE_SELECTOR,
        eflags: USER_EFLAGS,
        esp,
        ss: crate::arch::USER_DATA_SELECTOR,
        ds: crate::arch::USER_DATA_SELECTOR,
        es: crate::arch::USER_DATA_SELECTOR,
        fs: crate::arch::USER_DATA_SELECTOR,
        gs: crate::arch::USER_DATA_SELECTOR,
        ..Default::default()
    };
    regs.eax = 0;
    proc.regs = regs;
    regs.restore_into(frame);
    Ok(())
}

/// Lay out `[strings] [argv pointers] [argc]` below `stack_top` and
/// return the 16-byte-aligned stack pointer. The whole block must fit
/// in one page.
fn build_argument_block(
    kernel: &mut Kernel,
    current: Pid,
    stack_top: u32,
    path: &str,
    argv: &[String],
) -> KernelResult<u32> {
    let args: Vec<&str> = if argv.is_empty() {
        alloc::vec![path]
    } else {
        argv.iter().map(|s| s.as_str()).collect()
    };
    let argc = args.len();

    // Per-string sizes, each padded to 4 bytes with its terminator.
    let string_bytes: usize = args.iter().map(|s| (s.len() + 1 + 3) & !3).sum();
    let pointer_bytes = (argc + 1) * 4;
    let block = string_bytes + pointer_bytes + 4;
    if block > PAGE_SIZE {
        return Err(KernelError::InvalidArgument);
    }

    let string_base = stack_top - string_bytes as u32;
    let argv_base = string_base - pointer_bytes as u32;
    let argc_base = argv_base - 4;

    let (space, window) = {
        let Kernel {
            processes, window, ..
        } = kernel;
        let proc = processes.get(current).expect("current exists");
        (&proc.space, window)
    };

    // Strings, each NUL-terminated at a 4-byte boundary.
    let mut offset = 0u32;
    let mut pointers = Vec::with_capacity(argc + 1);
    for arg in &args {
        let addr = string_base + offset;
        user_validation::copy_to_user(space, window, addr, arg.as_bytes())?;
        user_validation::copy_to_user(space, window, addr + arg.len() as u32, &[0])?;
        pointers.push(addr);
        offset += ((arg.len() + 1 + 3) & !3) as u32;
    }

    // argv array plus NULL terminator.
    for (i, ptr) in pointers.iter().enumerate() {
        user_validation::copy_to_user(
            space,
            window,
            argv_base + (i * 4) as u32,
            &ptr.to_le_bytes(),
        )?;
    }
    user_validation::copy_to_user(
        space,
        window,
        argv_base + (argc * 4) as u32,
        &0u32.to_le_bytes(),
    )?;
    user_validation::copy_to_user(space, window, argc_base, &(argc as u32).to_le_bytes())?;

    Ok(argc_base & !0xF)
}

fn truncate_name(name: &str) -> String {
    if name.len() <= NAME_MAX {
        name.to_string()
    } else {
        // Cut at a character boundary at or below the limit.
        let mut end = NAME_MAX;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name[..end].to_string()
    }
}
