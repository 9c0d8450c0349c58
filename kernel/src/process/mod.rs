//! Process management
//!
//! The PCB ([`pcb`]), the fixed-capacity table with pid-indexed links
//! ([`table`]), lifecycle operations and the context switch
//! ([`lifecycle`]), eager-copy fork ([`fork`]), and per-process signal
//! bookkeeping ([`signal`]).

pub mod fork;
pub mod lifecycle;
pub mod pcb;
pub mod signal;
pub mod table;

pub use pcb::{Pid, Process, ProcessState, RegisterFrame};
pub use table::{ProcessTable, MAX_PROCESSES};

/// Base of the user stack mapping.
pub const USER_STACK_BASE: u32 = 0x40_0000;

/// Default user stack size (64 KiB).
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Cap on user heap growth above its start (16 MiB).
pub const USER_HEAP_MAX: u32 = 16 * 1024 * 1024;

/// Initial user-mode flags: interrupts enabled, IOPL 0.
pub const USER_EFLAGS: u32 = 0x202;
