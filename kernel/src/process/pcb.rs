//! Process control block
//!
//! The PCB carries everything the kernel needs to suspend, resume, and
//! reap one process: identity, state, the saved register file, the owned
//! address space, stack and heap extents, scheduling bookkeeping, the
//! descriptor table, and signal state. All inter-process links are pids
//! resolved through the process table, never pointers.

use alloc::string::String;

use crate::fs::file::FileTable;
use crate::irq::TrapFrame;
use crate::mm::AddressSpace;

use super::signal::SignalState;

/// Process identifier. Monotonically increasing, never reused within a
/// boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u32);

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessState {
    /// Being created, not yet schedulable
    New = 0,
    /// Ready to run
    Ready = 1,
    /// Currently executing (at most one process at any instant)
    Running = 2,
    /// Waiting (e.g. in `wait` for a child)
    Blocked = 3,
    /// Exited but not yet reaped by its parent
    Terminated = 4,
}

/// Saved user-mode register file.
///
/// Mirrors the layout restored into a [`TrapFrame`] on dispatch; a
/// process's first entry to user mode and every later resumption go
/// through the same path.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct RegisterFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
    pub ds: u32,
    pub es: u32,
    pub fs: u32,
    pub gs: u32,
}

impl RegisterFrame {
    /// Capture the user-visible registers from a kernel-entry frame.
    pub fn capture(frame: &TrapFrame) -> Self {
        Self {
            edi: frame.edi,
            esi: frame.esi,
            ebp: frame.ebp,
            ebx: frame.ebx,
            edx: frame.edx,
            ecx: frame.ecx,
            eax: frame.eax,
            eip: frame.eip,
            cs: frame.cs,
            eflags: frame.eflags,
            esp: frame.useresp,
            ss: frame.ss,
            ds: frame.ds,
            es: frame.es,
            fs: frame.fs,
            gs: frame.gs,
        }
    }

    /// Write this register file into a kernel-entry frame so the next
    /// `iret` lands in this process.
    pub fn restore_into(&self, frame: &mut TrapFrame) {
        frame.edi = self.edi;
        frame.esi = self.esi;
        frame.ebp = self.ebp;
        frame.ebx = self.ebx;
        frame.edx = self.edx;
        frame.ecx = self.ecx;
        frame.eax = self.eax;
        frame.eip = self.eip;
        frame.cs = self.cs;
        frame.eflags = self.eflags;
        frame.useresp = self.esp;
        frame.ss = self.ss;
        frame.ds = self.ds;
        frame.es = self.es;
        frame.fs = self.fs;
        frame.gs = self.gs;
    }
}

/// Process control block
pub struct Process {
    pub pid: Pid,
    pub ppid: Pid,
    pub name: String,
    pub state: ProcessState,
    /// Register file saved at last suspension (or prepared for first
    /// dispatch).
    pub regs: RegisterFrame,
    /// The owned address space; freed only on reap.
    pub space: AddressSpace,
    /// User stack extent.
    pub stack_bottom: u32,
    pub stack_top: u32,
    /// Shared kernel stack top used while this process traps in.
    pub kernel_stack_top: u32,
    /// User heap break.
    pub heap_start: u32,
    pub heap_end: u32,
    /// Remaining ticks in the current quantum.
    pub time_slice: u32,
    pub priority: u8,
    pub exit_code: i32,
    /// Tree links, all by pid.
    pub parent: Option<Pid>,
    pub first_child: Option<Pid>,
    pub next_sibling: Option<Pid>,
    /// Per-process descriptor table (0/1/2 are the console).
    pub files: FileTable,
    pub signals: SignalState,
}

impl Process {
    pub fn is_ready(&self) -> bool {
        self.state == ProcessState::Ready
    }

    pub fn is_terminated(&self) -> bool {
        self.state == ProcessState::Terminated
    }
}
