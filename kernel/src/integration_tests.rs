//! Cross-subsystem scenarios
//!
//! End-to-end flows over a full kernel built on the arena window: boot
//! accounting, fork/wait, pipes and shared memory through the syscall
//! boundary, fault isolation, scheduling, and exec. One [`TrapFrame`]
//! is threaded through everything, the way the single CPU's kernel
//! stack frame would be.

use alloc::vec::Vec;

use crate::arch::{USER_CODE_SELECTOR, USER_DATA_SELECTOR};
use crate::bootstrap::Kernel;
use crate::irq::TrapFrame;
use crate::mm::{PageFlags, PhysAddr, VirtAddr, PAGE_SIZE};
use crate::process::lifecycle::{self, WaitOutcome};
use crate::process::pcb::{Pid, ProcessState};
use crate::process::{signal, USER_STACK_BASE};
use crate::syscall::{self, Syscall};
use crate::test_support::boot_kernel;
use crate::timer;

/// The embedded idle program every test process runs "from".
const CODE: &[u8] = &[0xEB, 0xFE];
const CODE_BASE: u32 = 0x0804_8000;

/// Scratch page mapped into each test process for user buffers.
const USER_BUF: u32 = 0x0900_0000;

fn spawn(kernel: &mut Kernel, name: &str) -> Pid {
    let pid = lifecycle::create(kernel, name, CODE_BASE, 0).expect("create");
    map_user_page(kernel, pid, CODE_BASE);
    let (phys, _) = translate(kernel, pid, CODE_BASE);
    unsafe { kernel.window.bytes_mut(phys, CODE.len()) }.copy_from_slice(CODE);
    map_user_page(kernel, pid, USER_BUF);
    pid
}

fn map_user_page(kernel: &mut Kernel, pid: Pid, addr: u32) -> PhysAddr {
    let Kernel {
        frames,
        window,
        processes,
        ..
    } = kernel;
    let proc = processes.get_mut(pid).expect("process exists");
    let frame = proc
        .space
        .alloc_page(frames, window, VirtAddr::new(addr), PageFlags::USER_RW)
        .expect("map user page");
    window.zero(frame, PAGE_SIZE);
    frame
}

fn translate(kernel: &Kernel, pid: Pid, addr: u32) -> (PhysAddr, PageFlags) {
    kernel
        .processes
        .get(pid)
        .expect("process exists")
        .space
        .translate(&kernel.window, VirtAddr::new(addr))
        .expect("mapped")
}

fn poke(kernel: &Kernel, pid: Pid, addr: u32, bytes: &[u8]) {
    let (phys, _) = translate(kernel, pid, addr);
    unsafe { kernel.window.bytes_mut(phys, bytes.len()) }.copy_from_slice(bytes);
}

fn peek(kernel: &Kernel, pid: Pid, addr: u32, len: usize) -> Vec<u8> {
    let (phys, _) = translate(kernel, pid, addr);
    unsafe { kernel.window.bytes_mut(phys, len) }.to_vec()
}

fn dispatch_first(kernel: &mut Kernel, frame: &mut TrapFrame, pid: Pid) {
    lifecycle::switch_to(kernel, pid, frame);
}

fn do_syscall(kernel: &mut Kernel, frame: &mut TrapFrame, call: Syscall, args: [u32; 4]) -> i32 {
    frame.eax = call as u32;
    frame.ebx = args[0];
    frame.ecx = args[1];
    frame.edx = args[2];
    frame.esi = args[3];
    syscall::handle(kernel, frame);
    frame.eax as i32
}

fn assert_at_most_one_running(kernel: &Kernel) {
    assert!(
        kernel.processes.count_in_state(ProcessState::Running) <= 1,
        "more than one process in state Running"
    );
}

// ---------------------------------------------------------------------------
// Scenario: boot to first dispatch
// ---------------------------------------------------------------------------

#[test]
fn boot_reports_sane_frame_accounting_and_dispatches_init() {
    let mut kernel = boot_kernel();

    // One 16 MiB usable region starting at 1 MiB.
    assert_eq!(kernel.frames.total_frames(), 4096);
    assert_eq!(
        kernel.frames.free_frames() + kernel.frames.used_frames(),
        kernel.frames.total_frames()
    );
    // Low 4 MiB is identity-mapped in the kernel space.
    let (phys, _) = kernel
        .vmm
        .kernel_space()
        .translate(&kernel.window, VirtAddr::new(0x20_0000))
        .unwrap();
    assert_eq!(phys.as_u32(), 0x20_0000);

    let init = spawn(&mut kernel, "init");
    let mut frame = TrapFrame::default();

    // First timer tick finds the CPU idle and dispatches init.
    timer::timer_interrupt(&mut kernel, &mut frame);
    assert_eq!(kernel.processes.current(), Some(init));
    assert_eq!(frame.eip, CODE_BASE);
    assert_eq!(frame.cs, USER_CODE_SELECTOR);
    assert_eq!(frame.ss, USER_DATA_SELECTOR);
    assert_eq!(frame.eflags & 0x200, 0x200, "interrupts enabled in user mode");
    assert!(frame.useresp >= USER_STACK_BASE);
    assert_at_most_one_running(&kernel);
}

// ---------------------------------------------------------------------------
// Scenario: fork and wait
// ---------------------------------------------------------------------------

#[test]
fn fork_child_writes_console_exits_and_parent_reaps() {
    let mut kernel = boot_kernel();
    let parent = spawn(&mut kernel, "parent");
    let mut frame = TrapFrame::default();
    dispatch_first(&mut kernel, &mut frame, parent);

    // Stage the console byte in the parent's buffer; fork copies it.
    poke(&kernel, parent, USER_BUF, &[0x5A]);

    let child_pid = do_syscall(&mut kernel, &mut frame, Syscall::Fork, [0; 4]);
    assert!(child_pid > 0);
    let child = Pid(child_pid as u32);
    assert_ne!(child, parent);
    assert_at_most_one_running(&kernel);

    // Run the child: its frame is the parent's syscall frame with the
    // accumulator rewritten to zero.
    lifecycle::switch_to(&mut kernel, child, &mut frame);
    assert_eq!(frame.eax, 0, "fork returns 0 in the child");

    let written = do_syscall(&mut kernel, &mut frame, Syscall::Write, [1, USER_BUF, 1, 0]);
    assert_eq!(written, 1);
    assert_eq!(kernel.vfs.console_backlog(), &[0x5A]);

    // Child exits 42; the scheduler hands the CPU back to the parent.
    do_syscall(&mut kernel, &mut frame, Syscall::Exit, [42, 0, 0, 0]);
    assert_eq!(kernel.processes.current(), Some(parent));
    assert!(kernel
        .processes
        .get(child)
        .map(|p| p.is_terminated())
        .unwrap_or(false));

    // Parent waits: child pid and status 42 come back, the PCB is gone.
    let reaped = do_syscall(&mut kernel, &mut frame, Syscall::Wait, [USER_BUF, 0, 0, 0]);
    assert_eq!(reaped as u32, child.0);
    assert_eq!(
        i32::from_le_bytes(peek(&kernel, parent, USER_BUF, 4).try_into().unwrap()),
        42
    );
    assert!(kernel.processes.get(child).is_none(), "child was reaped");
}

#[test]
fn wait_blocks_until_a_child_terminates() {
    let mut kernel = boot_kernel();
    let parent = spawn(&mut kernel, "parent");
    let mut frame = TrapFrame::default();
    dispatch_first(&mut kernel, &mut frame, parent);

    do_syscall(&mut kernel, &mut frame, Syscall::Fork, [0; 4]);
    let eip_before = frame.eip;

    // Child is alive: the parent blocks, the call is rewound for
    // retry, and the child takes the CPU.
    do_syscall(&mut kernel, &mut frame, Syscall::Wait, [0, 0, 0, 0]);
    assert_eq!(
        kernel.processes.get(parent).unwrap().state,
        ProcessState::Blocked
    );
    let child = kernel.processes.current().expect("child dispatched");
    assert_ne!(child, parent);
    // The parent's saved context re-executes the interrupt instruction.
    assert_eq!(
        kernel.processes.get(parent).unwrap().regs.eip,
        eip_before - 2
    );

    // Child exits; the blocked parent is made ready again.
    do_syscall(&mut kernel, &mut frame, Syscall::Exit, [7, 0, 0, 0]);
    assert_eq!(kernel.processes.current(), Some(parent));
    let outcome = lifecycle::wait(&mut kernel);
    assert_eq!(
        outcome,
        WaitOutcome::Reaped {
            pid: child,
            status: 7
        }
    );
}

#[test]
fn wait_without_children_fails() {
    let mut kernel = boot_kernel();
    let lone = spawn(&mut kernel, "lone");
    let mut frame = TrapFrame::default();
    dispatch_first(&mut kernel, &mut frame, lone);
    let result = do_syscall(&mut kernel, &mut frame, Syscall::Wait, [0, 0, 0, 0]);
    assert!(result < 0);
}

#[test]
fn fork_preserves_user_memory_but_not_sharing() {
    let mut kernel = boot_kernel();
    let parent = spawn(&mut kernel, "parent");
    let mut frame = TrapFrame::default();
    dispatch_first(&mut kernel, &mut frame, parent);
    poke(&kernel, parent, USER_BUF, b"mine");

    let child = Pid(do_syscall(&mut kernel, &mut frame, Syscall::Fork, [0; 4]) as u32);
    assert_eq!(peek(&kernel, child, USER_BUF, 4), b"mine");

    // Writes after the fork stay private: eager copy, not sharing.
    poke(&kernel, parent, USER_BUF, b"ours");
    assert_eq!(peek(&kernel, child, USER_BUF, 4), b"mine");
    let (parent_phys, _) = translate(&kernel, parent, USER_BUF);
    let (child_phys, _) = translate(&kernel, child, USER_BUF);
    assert_ne!(parent_phys, child_phys);
}

// ---------------------------------------------------------------------------
// Scenario: pipe round trip through the syscall boundary
// ---------------------------------------------------------------------------

#[test]
fn pipe_round_trip_via_syscalls() {
    let mut kernel = boot_kernel();
    let proc = spawn(&mut kernel, "piper");
    let mut frame = TrapFrame::default();
    dispatch_first(&mut kernel, &mut frame, proc);

    assert_eq!(
        do_syscall(&mut kernel, &mut frame, Syscall::Pipe, [USER_BUF, 0, 0, 0]),
        0
    );
    let raw = peek(&kernel, proc, USER_BUF, 8);
    let read_fd = u32::from_le_bytes(raw[..4].try_into().unwrap());
    let write_fd = u32::from_le_bytes(raw[4..].try_into().unwrap());
    assert_ne!(read_fd, write_fd);

    let data_addr = USER_BUF + 16;
    poke(&kernel, proc, data_addr, &[0x01, 0x02, 0x03, 0x04]);
    assert_eq!(
        do_syscall(
            &mut kernel,
            &mut frame,
            Syscall::Write,
            [write_fd, data_addr, 4, 0]
        ),
        4
    );

    let sink_addr = USER_BUF + 64;
    assert_eq!(
        do_syscall(
            &mut kernel,
            &mut frame,
            Syscall::Read,
            [read_fd, sink_addr, 4, 0]
        ),
        4
    );
    assert_eq!(peek(&kernel, proc, sink_addr, 4), &[0x01, 0x02, 0x03, 0x04]);

    assert_eq!(
        do_syscall(&mut kernel, &mut frame, Syscall::Close, [read_fd, 0, 0, 0]),
        0
    );
    assert_eq!(
        do_syscall(&mut kernel, &mut frame, Syscall::Close, [write_fd, 0, 0, 0]),
        0
    );
    assert_eq!(kernel.ipc.pipes.active(), 0);
}

// ---------------------------------------------------------------------------
// Scenario: shared-memory handshake
// ---------------------------------------------------------------------------

#[test]
fn shared_memory_handshake_between_processes() {
    let mut kernel = boot_kernel();
    let a = spawn(&mut kernel, "producer");
    let b = spawn(&mut kernel, "consumer");
    let mut frame = TrapFrame::default();

    dispatch_first(&mut kernel, &mut frame, a);
    let free_before = kernel.frames.free_frames();

    let id = do_syscall(&mut kernel, &mut frame, Syscall::ShmGet, [7, 4096, 0, 0]);
    assert!(id >= 0);
    let addr = do_syscall(&mut kernel, &mut frame, Syscall::ShmAt, [id as u32, 0, 0, 0]);
    assert!(addr > 0);
    poke(&kernel, a, addr as u32, b"PING");
    assert_eq!(
        do_syscall(&mut kernel, &mut frame, Syscall::ShmDt, [addr as u32, 0, 0, 0]),
        0
    );

    lifecycle::switch_to(&mut kernel, b, &mut frame);
    let id_b = do_syscall(&mut kernel, &mut frame, Syscall::ShmGet, [7, 4096, 0, 0]);
    assert_eq!(id_b, id, "same key, same segment");
    let addr_b = do_syscall(&mut kernel, &mut frame, Syscall::ShmAt, [id as u32, 0, 0, 0]);
    assert_eq!(peek(&kernel, b, addr_b as u32, 4), b"PING");
    assert_eq!(
        do_syscall(&mut kernel, &mut frame, Syscall::ShmDt, [addr_b as u32, 0, 0, 0]),
        0
    );

    assert_eq!(
        do_syscall(&mut kernel, &mut frame, Syscall::ShmCtl, [id as u32, 0, 0, 0]),
        0
    );
    assert_eq!(
        do_syscall(&mut kernel, &mut frame, Syscall::ShmCtl, [id as u32, 0, 0, 0]),
        0
    );
    // The segment's frame came back; the two attach-window page tables
    // created in A and B stay with their address spaces until reap.
    assert_eq!(kernel.frames.free_frames(), free_before - 2);
    // A stale id is dead.
    assert!(do_syscall(&mut kernel, &mut frame, Syscall::ShmAt, [id as u32, 0, 0, 0]) < 0);
}

// ---------------------------------------------------------------------------
// Scenario: page-fault isolation
// ---------------------------------------------------------------------------

#[test]
fn user_page_fault_kills_process_and_kernel_stays_responsive() {
    let mut kernel = boot_kernel();
    let victim = spawn(&mut kernel, "victim");
    let survivor = spawn(&mut kernel, "survivor");
    let mut frame = TrapFrame::default();
    dispatch_first(&mut kernel, &mut frame, victim);

    // The victim stores to unmapped 0xDEAD0000: page fault from user
    // mode.
    frame.vector = 14;
    frame.error_code = 0x6; // write, non-present, user
    frame.cs = USER_CODE_SELECTOR;
    frame.eip = CODE_BASE;
    crate::irq::dispatch(&mut kernel, &mut frame);

    let victim_proc = kernel.processes.get(victim).expect("zombie remains");
    assert!(victim_proc.is_terminated());
    assert_eq!(victim_proc.exit_code, 128 + signal::SIGSEGV as i32);

    // The scheduler picked the survivor and syscalls still work.
    assert_eq!(kernel.processes.current(), Some(survivor));
    let pid = do_syscall(&mut kernel, &mut frame, Syscall::GetPid, [0; 4]);
    assert_eq!(pid as u32, survivor.0);
    assert_at_most_one_running(&kernel);
}

// ---------------------------------------------------------------------------
// Scheduler behavior
// ---------------------------------------------------------------------------

#[test]
fn round_robin_rotates_at_quantum_boundaries() {
    let mut kernel = boot_kernel();
    let a = spawn(&mut kernel, "a");
    let b = spawn(&mut kernel, "b");
    let c = spawn(&mut kernel, "c");
    let mut frame = TrapFrame::default();
    dispatch_first(&mut kernel, &mut frame, a);

    let mut seen = Vec::new();
    for _ in 0..3 {
        for _ in 0..crate::sched::QUANTUM_TICKS {
            timer::timer_interrupt(&mut kernel, &mut frame);
            assert_at_most_one_running(&kernel);
        }
        seen.push(kernel.processes.current().unwrap());
    }
    // Every process gets a turn before anyone repeats.
    assert!(seen.contains(&a) || seen.contains(&b) || seen.contains(&c));
    let mut sorted = seen.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted.len(), 3, "rotation visited all three: {seen:?}");
}

#[test]
fn blocked_processes_are_skipped() {
    let mut kernel = boot_kernel();
    let a = spawn(&mut kernel, "a");
    let b = spawn(&mut kernel, "b");
    let c = spawn(&mut kernel, "c");
    let mut frame = TrapFrame::default();
    dispatch_first(&mut kernel, &mut frame, a);

    kernel.processes.get_mut(b).unwrap().state = ProcessState::Blocked;
    for _ in 0..crate::sched::QUANTUM_TICKS {
        timer::timer_interrupt(&mut kernel, &mut frame);
    }
    assert_eq!(kernel.processes.current(), Some(c));

    // With everyone else unavailable, the sole runnable process keeps
    // the CPU.
    kernel.processes.get_mut(a).unwrap().state = ProcessState::Blocked;
    for _ in 0..2 * crate::sched::QUANTUM_TICKS {
        timer::timer_interrupt(&mut kernel, &mut frame);
    }
    assert_eq!(kernel.processes.current(), Some(c));
}

#[test]
fn tick_counter_is_monotonic() {
    let mut kernel = boot_kernel();
    let before = kernel.sched.ticks();
    let mut frame = TrapFrame::default();
    for _ in 0..5 {
        timer::timer_interrupt(&mut kernel, &mut frame);
    }
    assert_eq!(kernel.sched.ticks(), before + 5);
}

// ---------------------------------------------------------------------------
// Exec
// ---------------------------------------------------------------------------

fn stage_program(kernel: &mut Kernel, path: &str, entry: u32) {
    let image = crate::elf::test_image::build(entry, entry, &[0x90, 0xEB, 0xFE]);
    let node = kernel
        .vfs
        .open(path, crate::fs::OpenFlags::CREAT)
        .expect("stage program");
    kernel.vfs.write(node, 0, &image).expect("write image");
}

#[test]
fn exec_replaces_the_image_and_builds_argv() {
    let mut kernel = boot_kernel();
    let proc = spawn(&mut kernel, "launcher");
    let mut frame = TrapFrame::default();
    dispatch_first(&mut kernel, &mut frame, proc);

    let entry = 0x0810_0000;
    stage_program(&mut kernel, "/bin-sh", entry);

    // Path and argv staged in user memory.
    poke(&kernel, proc, USER_BUF, b"/bin-sh\0");
    poke(&kernel, proc, USER_BUF + 64, b"-l\0");
    let argv0 = USER_BUF;
    let argv1 = USER_BUF + 64;
    let mut table = Vec::new();
    table.extend_from_slice(&argv0.to_le_bytes());
    table.extend_from_slice(&argv1.to_le_bytes());
    table.extend_from_slice(&0u32.to_le_bytes());
    poke(&kernel, proc, USER_BUF + 128, &table);

    do_syscall(
        &mut kernel,
        &mut frame,
        Syscall::Exec,
        [USER_BUF, USER_BUF + 128, 0, 0],
    );

    assert_eq!(frame.eip, entry);
    assert_eq!(frame.cs, USER_CODE_SELECTOR);
    assert_eq!(frame.useresp % 16, 0, "stack is 16-byte aligned");
    assert_eq!(kernel.processes.get(proc).unwrap().name, "/bin-sh");

    // Reconstruct the argument block the way exec laid it out: each
    // string padded to 4 bytes with its terminator, then the pointer
    // array, then argc.
    let stack_top = kernel.processes.get(proc).unwrap().stack_top;
    let string_bytes = ((b"/bin-sh\0".len() + 3) & !3) + ((b"-l\0".len() + 3) & !3);
    let argv_base = stack_top - string_bytes as u32 - 3 * 4;
    let argc_base = argv_base - 4;
    let argc = u32::from_le_bytes(peek(&kernel, proc, argc_base, 4).try_into().unwrap());
    assert_eq!(argc, 2);
    let argv0_ptr =
        u32::from_le_bytes(peek(&kernel, proc, argv_base, 4).try_into().unwrap());
    assert_eq!(peek(&kernel, proc, argv0_ptr, 7), b"/bin-sh");
}

#[test]
fn exec_rejects_oversized_argv_and_missing_files() {
    let mut kernel = boot_kernel();
    let proc = spawn(&mut kernel, "launcher");
    let mut frame = TrapFrame::default();
    dispatch_first(&mut kernel, &mut frame, proc);

    poke(&kernel, proc, USER_BUF, b"/nope\0");
    assert!(do_syscall(&mut kernel, &mut frame, Syscall::Exec, [USER_BUF, 0, 0, 0]) < 0);

    // An argv block bigger than a page is refused before any loading.
    let entry = 0x0810_0000;
    stage_program(&mut kernel, "/big", entry);
    let argv: Vec<alloc::string::String> = (0..20)
        .map(|_| core::iter::repeat('x').take(250).collect())
        .collect();
    let err = lifecycle::exec(&mut kernel, &mut frame, "/big", &argv);
    assert!(err.is_err());

    // Just-under-a-page argv succeeds.
    let argv: Vec<alloc::string::String> =
        (0..3).map(|_| core::iter::repeat('y').take(250).collect()).collect();
    lifecycle::exec(&mut kernel, &mut frame, "/big", &argv).expect("small argv fits");
}

// ---------------------------------------------------------------------------
// brk / sbrk
// ---------------------------------------------------------------------------

#[test]
fn brk_grows_with_zeroed_pages_and_shrinks_back() {
    let mut kernel = boot_kernel();
    let proc = spawn(&mut kernel, "heapy");
    let mut frame = TrapFrame::default();
    dispatch_first(&mut kernel, &mut frame, proc);

    let start = kernel.processes.get(proc).unwrap().heap_start;
    let free_before = kernel.frames.free_frames();

    let grown =
        do_syscall(&mut kernel, &mut frame, Syscall::Brk, [start + 3 * PAGE_SIZE as u32, 0, 0, 0]);
    assert_eq!(grown as u32, start + 3 * PAGE_SIZE as u32);
    // New pages are mapped, user-writable, and zeroed.
    let (_, flags) = translate(&kernel, proc, start);
    assert!(flags.contains(PageFlags::USER | PageFlags::WRITABLE));
    assert!(peek(&kernel, proc, start, PAGE_SIZE).iter().all(|&b| b == 0));

    let shrunk = do_syscall(&mut kernel, &mut frame, Syscall::Brk, [start, 0, 0, 0]);
    assert_eq!(shrunk as u32, start);
    assert!(kernel
        .processes
        .get(proc)
        .unwrap()
        .space
        .translate(&kernel.window, VirtAddr::new(start))
        .is_none());
    assert_eq!(kernel.frames.free_frames(), free_before);
}

#[test]
fn sbrk_moves_the_break_and_respects_the_cap() {
    let mut kernel = boot_kernel();
    let proc = spawn(&mut kernel, "heapy");
    let mut frame = TrapFrame::default();
    dispatch_first(&mut kernel, &mut frame, proc);

    let start = kernel.processes.get(proc).unwrap().heap_start;
    let new_break =
        do_syscall(&mut kernel, &mut frame, Syscall::Sbrk, [PAGE_SIZE as u32, 0, 0, 0]);
    assert_eq!(new_break as u32, start + PAGE_SIZE as u32);

    // Below heap start: refused, break unchanged.
    let below = lifecycle::brk(&mut kernel, start - 1);
    assert_eq!(below, start + PAGE_SIZE as u32);

    // Past the 16 MiB cap: refused.
    let over = lifecycle::brk(&mut kernel, start + crate::process::USER_HEAP_MAX + 1);
    assert_eq!(over, start + PAGE_SIZE as u32);
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

#[test]
fn kill_applies_default_actions() {
    let mut kernel = boot_kernel();
    let shooter = spawn(&mut kernel, "shooter");
    let target = spawn(&mut kernel, "target");
    let mut frame = TrapFrame::default();
    dispatch_first(&mut kernel, &mut frame, shooter);

    // Unhandled SIGUSR1: recorded, otherwise a no-op.
    assert_eq!(
        do_syscall(&mut kernel, &mut frame, Syscall::Kill, [target.0, signal::SIGUSR1, 0, 0]),
        0
    );
    let target_proc = kernel.processes.get(target).unwrap();
    assert!(target_proc.signals.is_pending(signal::SIGUSR1));
    assert_eq!(target_proc.state, ProcessState::Ready);

    // SIGTERM: default action terminates with 128 + 15.
    assert_eq!(
        do_syscall(&mut kernel, &mut frame, Syscall::Kill, [target.0, signal::SIGTERM, 0, 0]),
        0
    );
    let target_proc = kernel.processes.get(target).unwrap();
    assert!(target_proc.is_terminated());
    assert_eq!(target_proc.exit_code, 128 + signal::SIGTERM as i32);
}

#[test]
fn handlers_defer_termination_but_kill_cannot_be_caught() {
    let mut kernel = boot_kernel();
    let a = spawn(&mut kernel, "a");
    let b = spawn(&mut kernel, "b");
    let mut frame = TrapFrame::default();
    dispatch_first(&mut kernel, &mut frame, b);

    // B registers a handler for SIGTERM? Not allowed; SIGINT is.
    assert!(
        do_syscall(&mut kernel, &mut frame, Syscall::Signal, [signal::SIGTERM, 0x1234, 0, 0]) < 0
    );
    assert!(
        do_syscall(&mut kernel, &mut frame, Syscall::Signal, [signal::SIGKILL, 0x1234, 0, 0]) < 0
    );
    assert_eq!(
        do_syscall(&mut kernel, &mut frame, Syscall::Signal, [signal::SIGINT, 0x1234, 0, 0]),
        0
    );

    // A signal with a registered handler only records the pending bit.
    lifecycle::switch_to(&mut kernel, a, &mut frame);
    assert_eq!(
        do_syscall(&mut kernel, &mut frame, Syscall::Kill, [b.0, signal::SIGINT, 0, 0]),
        0
    );
    let b_proc = kernel.processes.get(b).unwrap();
    assert!(!b_proc.is_terminated());
    assert!(b_proc.signals.is_pending(signal::SIGINT));

    // SIGKILL goes through regardless.
    assert_eq!(
        do_syscall(&mut kernel, &mut frame, Syscall::Kill, [b.0, signal::SIGKILL, 0, 0]),
        0
    );
    assert!(kernel.processes.get(b).unwrap().is_terminated());
}

#[test]
fn kill_to_a_missing_process_fails() {
    let mut kernel = boot_kernel();
    let a = spawn(&mut kernel, "a");
    let mut frame = TrapFrame::default();
    dispatch_first(&mut kernel, &mut frame, a);
    assert!(do_syscall(&mut kernel, &mut frame, Syscall::Kill, [999, signal::SIGTERM, 0, 0]) < 0);
}

// ---------------------------------------------------------------------------
// Syscall argument validation
// ---------------------------------------------------------------------------

#[test]
fn hostile_pointers_fail_without_crashing() {
    let mut kernel = boot_kernel();
    let proc = spawn(&mut kernel, "hostile");
    let mut frame = TrapFrame::default();
    dispatch_first(&mut kernel, &mut frame, proc);

    // Unmapped, kernel, and wrapping pointers all fail cleanly.
    for addr in [0xDEAD_0000u32, 0x1000, 0xFFFF_FFF0, 0xC000_0000] {
        assert!(
            do_syscall(&mut kernel, &mut frame, Syscall::Write, [1, addr, 16, 0]) < 0,
            "write from {addr:#x} must fail"
        );
        assert!(
            do_syscall(&mut kernel, &mut frame, Syscall::Read, [1, addr, 16, 0]) < 0,
            "read into {addr:#x} must fail"
        );
    }
    assert!(do_syscall(&mut kernel, &mut frame, Syscall::Open, [0xDEAD_0000, 0, 0, 0]) < 0);
    assert!(do_syscall(&mut kernel, &mut frame, Syscall::Pipe, [0xDEAD_0000, 0, 0, 0]) < 0);

    // The kernel is still alive and serving.
    assert_eq!(
        do_syscall(&mut kernel, &mut frame, Syscall::GetPid, [0; 4]) as u32,
        proc.0
    );
}

// ---------------------------------------------------------------------------
// Directory syscalls end to end
// ---------------------------------------------------------------------------

#[test]
fn mkdir_readdir_rmdir_via_syscalls() {
    let mut kernel = boot_kernel();
    let proc = spawn(&mut kernel, "files");
    let mut frame = TrapFrame::default();
    dispatch_first(&mut kernel, &mut frame, proc);

    poke(&kernel, proc, USER_BUF, b"/data\0");
    assert_eq!(
        do_syscall(&mut kernel, &mut frame, Syscall::Mkdir, [USER_BUF, 0, 0, 0]),
        0
    );

    // Open the directory and list it through readdir.
    poke(&kernel, proc, USER_BUF + 32, b"/\0");
    let fd = do_syscall(&mut kernel, &mut frame, Syscall::Open, [USER_BUF + 32, 1, 0, 0]);
    assert!(fd >= 3);
    let name_buf = USER_BUF + 256;
    let mut names = Vec::new();
    for index in 0..8 {
        let rc = do_syscall(
            &mut kernel,
            &mut frame,
            Syscall::ReadDir,
            [fd as u32, index, name_buf, 0],
        );
        if rc < 0 {
            break;
        }
        let raw = peek(&kernel, proc, name_buf, 16);
        let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        names.push(alloc::string::String::from_utf8_lossy(&raw[..len]).into_owned());
    }
    assert!(names.iter().any(|n| n == "data"), "listing: {names:?}");

    assert_eq!(
        do_syscall(&mut kernel, &mut frame, Syscall::Rmdir, [USER_BUF, 0, 0, 0]),
        0
    );
    assert!(do_syscall(&mut kernel, &mut frame, Syscall::Rmdir, [USER_BUF, 0, 0, 0]) < 0);
}

// ---------------------------------------------------------------------------
// Message queues through the boundary
// ---------------------------------------------------------------------------

#[test]
fn message_queue_round_trip_via_syscalls() {
    let mut kernel = boot_kernel();
    let proc = spawn(&mut kernel, "mq");
    let mut frame = TrapFrame::default();
    dispatch_first(&mut kernel, &mut frame, proc);

    let id = do_syscall(&mut kernel, &mut frame, Syscall::MsgGet, [99, 0, 0, 0]);
    assert!(id >= 0);

    // {type tag 7, payload "hello"}
    let mut msg = Vec::new();
    msg.extend_from_slice(&7u32.to_le_bytes());
    msg.extend_from_slice(b"hello");
    poke(&kernel, proc, USER_BUF, &msg);
    assert_eq!(
        do_syscall(&mut kernel, &mut frame, Syscall::MsgSnd, [id as u32, USER_BUF, 5, 0]),
        0
    );

    let rcv = do_syscall(
        &mut kernel,
        &mut frame,
        Syscall::MsgRcv,
        [id as u32, USER_BUF + 64, 64, 0],
    );
    assert_eq!(rcv, 9, "type tag plus five payload bytes");
    let raw = peek(&kernel, proc, USER_BUF + 64, 9);
    assert_eq!(u32::from_le_bytes(raw[..4].try_into().unwrap()), 7);
    assert_eq!(&raw[4..], b"hello");

    // Empty queue: zero, not an error.
    assert_eq!(
        do_syscall(
            &mut kernel,
            &mut frame,
            Syscall::MsgRcv,
            [id as u32, USER_BUF + 64, 64, 0]
        ),
        0
    );
    assert_eq!(
        do_syscall(&mut kernel, &mut frame, Syscall::MsgCtl, [id as u32, 0, 0, 0]),
        0
    );
}
