//! Global process table
//!
//! Fixed-capacity slot table. A pid hashes to its natural slot (`pid mod
//! capacity`) with linear probing from there; lookups compare the stored
//! pid, and pids are never reused within a boot, so a stale pid can
//! never resolve to a recycled slot's new occupant. The table also keeps
//! the process list order (most recent at the head) that the round-robin
//! scheduler walks, and tracks which process is currently running.

use alloc::vec::Vec;

use super::pcb::{Pid, Process, ProcessState};

/// Maximum number of live processes.
pub const MAX_PROCESSES: usize = 64;

/// The process table.
pub struct ProcessTable {
    slots: Vec<Option<Process>>,
    /// Process list in insertion order, newest first.
    order: Vec<Pid>,
    current: Option<Pid>,
    next_pid: u32,
}

impl ProcessTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_PROCESSES);
        for _ in 0..MAX_PROCESSES {
            slots.push(None);
        }
        Self {
            slots,
            order: Vec::new(),
            current: None,
            next_pid: 1,
        }
    }

    /// Hand out the next pid. Pids are never reused within a boot.
    pub fn allocate_pid(&mut self) -> Pid {
        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        pid
    }

    /// Insert a new process at the head of the process list. A full
    /// table hands the PCB back so the caller can tear it down.
    pub fn insert(&mut self, process: Process) -> Result<Pid, Process> {
        let pid = process.pid;
        let home = pid.0 as usize % MAX_PROCESSES;
        for probe in 0..MAX_PROCESSES {
            let index = (home + probe) % MAX_PROCESSES;
            if self.slots[index].is_none() {
                self.slots[index] = Some(process);
                self.order.insert(0, pid);
                return Ok(pid);
            }
        }
        Err(process)
    }

    /// Remove and return a process, dropping it from the list order and
    /// the current slot.
    pub fn remove(&mut self, pid: Pid) -> Option<Process> {
        let index = self.slot_index(pid)?;
        let process = self.slots[index].take();
        self.order.retain(|&p| p != pid);
        if self.current == Some(pid) {
            self.current = None;
        }
        process
    }

    pub fn get(&self, pid: Pid) -> Option<&Process> {
        let index = self.slot_index(pid)?;
        self.slots[index].as_ref()
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        let index = self.slot_index(pid)?;
        self.slots[index].as_mut()
    }

    pub fn current(&self) -> Option<Pid> {
        self.current
    }

    pub fn current_process(&self) -> Option<&Process> {
        self.get(self.current?)
    }

    pub fn current_process_mut(&mut self) -> Option<&mut Process> {
        let pid = self.current?;
        self.get_mut(pid)
    }

    pub fn set_current(&mut self, pid: Option<Pid>) {
        self.current = pid;
    }

    /// Process list in scheduler order.
    pub fn order(&self) -> &[Pid] {
        &self.order
    }

    pub fn count(&self) -> usize {
        self.order.len()
    }

    /// Children of `pid`, walking the sibling chain.
    pub fn children_of(&self, pid: Pid) -> Vec<Pid> {
        let mut out = Vec::new();
        let Some(parent) = self.get(pid) else {
            return out;
        };
        let mut cursor = parent.first_child;
        while let Some(child) = cursor {
            out.push(child);
            cursor = self.get(child).and_then(|c| c.next_sibling);
        }
        out
    }

    /// Detach `child` from its parent's child list.
    pub fn unlink_child(&mut self, parent: Pid, child: Pid) {
        let Some(next_sibling) = self.get(child).and_then(|c| c.next_sibling) else {
            // Still need the head fixup below even when the child has no
            // successor.
            return self.unlink_child_with(parent, child, None);
        };
        self.unlink_child_with(parent, child, Some(next_sibling));
    }

    fn unlink_child_with(&mut self, parent: Pid, child: Pid, successor: Option<Pid>) {
        let Some(parent_proc) = self.get(parent) else {
            return;
        };
        if parent_proc.first_child == Some(child) {
            if let Some(parent_proc) = self.get_mut(parent) {
                parent_proc.first_child = successor;
            }
            return;
        }
        // Find the predecessor in the sibling chain.
        let mut cursor = parent_proc.first_child;
        while let Some(pid) = cursor {
            let next = self.get(pid).and_then(|p| p.next_sibling);
            if next == Some(child) {
                if let Some(prev) = self.get_mut(pid) {
                    prev.next_sibling = successor;
                }
                return;
            }
            cursor = next;
        }
    }

    /// The number of processes in a given state (diagnostics and
    /// invariant checks).
    pub fn count_in_state(&self, state: ProcessState) -> usize {
        self.order
            .iter()
            .filter_map(|&pid| self.get(pid))
            .filter(|p| p.state == state)
            .count()
    }

    fn slot_index(&self, pid: Pid) -> Option<usize> {
        let home = pid.0 as usize % MAX_PROCESSES;
        for probe in 0..MAX_PROCESSES {
            let index = (home + probe) % MAX_PROCESSES;
            if let Some(p) = &self.slots[index] {
                if p.pid == pid {
                    return Some(index);
                }
            }
        }
        None
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}
