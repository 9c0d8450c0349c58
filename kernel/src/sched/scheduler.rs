//! Core scheduler implementation
//!
//! Round-robin over the process list in insertion order. The scheduler
//! owns the tick counter and quantum policy and returns decisions as
//! values; whoever holds the trap frame (the timer handler or a syscall)
//! performs the actual context switch.

use crate::process::pcb::{Pid, ProcessState};
use crate::process::table::ProcessTable;

/// Ticks per time slice (100 ms at the 100 Hz timer).
pub const QUANTUM_TICKS: u32 = 10;

/// Scheduler state
pub struct Scheduler {
    ticks: u64,
    quantum: u32,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            ticks: 0,
            quantum: QUANTUM_TICKS,
        }
    }

    /// Total timer ticks observed.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Pick the next process to run.
    ///
    /// Walks the process list from just after the current process,
    /// wrapping at the tail, and returns the first *ready* process. If
    /// nothing else is ready and the current process still is, the
    /// current process keeps the CPU. With no current process the walk
    /// starts at the list head. Returns `None` when nothing is ready.
    pub fn next(&self, table: &ProcessTable) -> Option<Pid> {
        let order = table.order();
        if order.is_empty() {
            return None;
        }

        let current = table.current();
        let start = match current {
            Some(pid) => order.iter().position(|&p| p == pid).map(|i| i + 1).unwrap_or(0),
            None => 0,
        };

        for offset in 0..order.len() {
            let pid = order[(start + offset) % order.len()];
            if Some(pid) == current {
                continue;
            }
            if table.get(pid).map(|p| p.is_ready()).unwrap_or(false) {
                return Some(pid);
            }
        }

        // Nothing else is ready; keep the current process if it can run.
        current.filter(|&pid| table.get(pid).map(|p| p.is_ready()).unwrap_or(false))
    }

    /// Account one timer tick. Returns the pid to switch to when the
    /// running process exhausted its slice (or when the CPU is idle and
    /// a process became ready).
    pub fn tick(&mut self, table: &mut ProcessTable) -> Option<Pid> {
        self.ticks += 1;

        match table.current() {
            Some(pid) => {
                let slice = {
                    let proc = table.get_mut(pid)?;
                    if proc.time_slice > 0 {
                        proc.time_slice -= 1;
                    }
                    proc.time_slice
                };
                if slice > 0 {
                    return None;
                }
                match self.next(table) {
                    Some(next) if next != pid => Some(next),
                    _ => {
                        // Sole runnable process: hand it a fresh slice.
                        if let Some(proc) = table.get_mut(pid) {
                            proc.time_slice = self.quantum;
                        }
                        None
                    }
                }
            }
            None => self.next(table),
        }
    }

    /// Mark `pid` ready with a fresh slice.
    pub fn schedule(&self, table: &mut ProcessTable, pid: Pid) {
        if let Some(proc) = table.get_mut(pid) {
            proc.state = ProcessState::Ready;
            proc.time_slice = self.quantum;
        }
    }

    pub fn quantum(&self) -> u32 {
        self.quantum
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
