//! Per-process descriptor table
//!
//! Small-integer descriptors mapping to `{node, offset}`. Descriptors
//! 0/1/2 are reserved for the console and wired at table creation.

use super::NodeId;
use crate::error::{KernelError, KernelResult};

use bitflags::bitflags;

/// Descriptors per process.
pub const MAX_OPEN_FILES: usize = 32;

pub const STDIN_FD: usize = 0;
pub const STDOUT_FD: usize = 1;
pub const STDERR_FD: usize = 2;

/// `seek` whence values.
pub const SEEK_SET: u32 = 0;
pub const SEEK_CUR: u32 = 1;
pub const SEEK_END: u32 = 2;

bitflags! {
    /// `open` flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const RDONLY = 0x0001;
        const WRONLY = 0x0002;
        const RDWR   = 0x0004;
        const CREAT  = 0x0008;
        const TRUNC  = 0x0010;
        const APPEND = 0x0020;
    }
}

/// One open descriptor.
#[derive(Debug, Clone, Copy)]
pub struct OpenFile {
    pub node: NodeId,
    pub offset: u32,
    pub flags: OpenFlags,
}

/// The descriptor table.
#[derive(Clone)]
pub struct FileTable {
    entries: [Option<OpenFile>; MAX_OPEN_FILES],
}

impl FileTable {
    /// Fresh table with 0/1/2 attached to the console node.
    pub fn new(console: NodeId) -> Self {
        let mut entries = [None; MAX_OPEN_FILES];
        let stdio = OpenFile {
            node: console,
            offset: 0,
            flags: OpenFlags::RDWR,
        };
        entries[STDIN_FD] = Some(stdio);
        entries[STDOUT_FD] = Some(stdio);
        entries[STDERR_FD] = Some(stdio);
        Self { entries }
    }

    /// Install `file` at the lowest free descriptor at or above 3.
    pub fn open(&mut self, file: OpenFile) -> KernelResult<usize> {
        for (fd, slot) in self.entries.iter_mut().enumerate().skip(3) {
            if slot.is_none() {
                *slot = Some(file);
                return Ok(fd);
            }
        }
        Err(KernelError::TooManyOpenFiles)
    }

    pub fn get(&self, fd: usize) -> Option<OpenFile> {
        *self.entries.get(fd)?
    }

    pub fn get_mut(&mut self, fd: usize) -> Option<&mut OpenFile> {
        self.entries.get_mut(fd)?.as_mut()
    }

    /// Close a descriptor. Double close is a silent no-op.
    pub fn close(&mut self, fd: usize) {
        if fd >= 3 {
            if let Some(slot) = self.entries.get_mut(fd) {
                *slot = None;
            }
        }
    }

    pub fn is_console(&self, fd: usize, console: NodeId) -> bool {
        self.get(fd).map(|f| f.node == console).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_descriptors_point_at_the_console() {
        let table = FileTable::new(NodeId(7));
        for fd in [STDIN_FD, STDOUT_FD, STDERR_FD] {
            assert_eq!(table.get(fd).unwrap().node, NodeId(7));
        }
        assert!(table.get(3).is_none());
    }

    #[test]
    fn open_allocates_lowest_free_slot() {
        let mut table = FileTable::new(NodeId(0));
        let file = OpenFile {
            node: NodeId(1),
            offset: 0,
            flags: OpenFlags::RDONLY,
        };
        assert_eq!(table.open(file).unwrap(), 3);
        assert_eq!(table.open(file).unwrap(), 4);
        table.close(3);
        assert_eq!(table.open(file).unwrap(), 3);
    }

    #[test]
    fn table_exhaustion_is_an_error() {
        let mut table = FileTable::new(NodeId(0));
        let file = OpenFile {
            node: NodeId(1),
            offset: 0,
            flags: OpenFlags::RDONLY,
        };
        for _ in 3..MAX_OPEN_FILES {
            table.open(file).unwrap();
        }
        assert_eq!(table.open(file), Err(KernelError::TooManyOpenFiles));
    }

    #[test]
    fn close_is_idempotent_and_spares_stdio() {
        let mut table = FileTable::new(NodeId(0));
        table.close(1);
        assert!(table.get(STDOUT_FD).is_some(), "stdio survives close");
        table.close(17);
        table.close(17);
        table.close(MAX_OPEN_FILES + 5);
    }
}
