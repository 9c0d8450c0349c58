//! Kernel pipes
//!
//! A fixed pool of slots, each a 4 KiB circular byte buffer with read
//! and write cursors, a used-byte count, a reference count, and the pids
//! of the designated reader and writer. Read and write are byte-oriented
//! and non-blocking: a read from an empty pipe and a write to a full
//! pipe both transfer zero bytes.
//!
//! Descriptors pack `{slot, end}` as `PIPE_FD_BASE + slot * 2 + end`,
//! where end 0 is the read side. The tag base keeps pipe descriptors
//! disjoint from file descriptors so `read`/`write`/`close` can route on
//! the value alone.

use alloc::boxed::Box;

use crate::error::{KernelError, KernelResult};
use crate::process::pcb::Pid;

/// Slots in the pipe pool.
pub const MAX_PIPES: usize = 64;

/// Bytes per pipe buffer.
pub const PIPE_CAPACITY: usize = 4096;

/// Descriptor tag distinguishing pipe ends from file descriptors.
pub const PIPE_FD_BASE: usize = 0x1000;

/// Which end of a pipe a descriptor names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeEnd {
    Read = 0,
    Write = 1,
}

/// Pack a slot and end into a descriptor.
pub fn encode_fd(slot: usize, end: PipeEnd) -> usize {
    PIPE_FD_BASE + slot * 2 + end as usize
}

/// Unpack a descriptor; `None` when the value is not a pipe descriptor.
pub fn decode_fd(fd: usize) -> Option<(usize, PipeEnd)> {
    let raw = fd.checked_sub(PIPE_FD_BASE)?;
    let slot = raw / 2;
    if slot >= MAX_PIPES {
        return None;
    }
    let end = if raw % 2 == 0 {
        PipeEnd::Read
    } else {
        PipeEnd::Write
    };
    Some((slot, end))
}

/// One pipe slot.
struct Pipe {
    buffer: Box<[u8; PIPE_CAPACITY]>,
    read_pos: usize,
    write_pos: usize,
    count: usize,
    ref_count: u32,
    reader: Pid,
    writer: Pid,
}

/// The pipe pool.
pub struct PipePool {
    slots: [Option<Pipe>; MAX_PIPES],
    active: usize,
}

impl PipePool {
    pub fn new() -> Self {
        Self {
            slots: [const { None }; MAX_PIPES],
            active: 0,
        }
    }

    /// Create a pipe owned by `owner` and return its
    /// `(read_fd, write_fd)` pair. Both ends start with one reference
    /// each.
    pub fn create(&mut self, owner: Pid) -> KernelResult<(usize, usize)> {
        let slot = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(KernelError::NoFreeSlot)?;
        self.slots[slot] = Some(Pipe {
            buffer: Box::new([0; PIPE_CAPACITY]),
            read_pos: 0,
            write_pos: 0,
            count: 0,
            ref_count: 2,
            reader: owner,
            writer: owner,
        });
        self.active += 1;
        Ok((encode_fd(slot, PipeEnd::Read), encode_fd(slot, PipeEnd::Write)))
    }

    /// Read up to `buf.len()` bytes from the read end. Returns the byte
    /// count; zero when the pipe is empty.
    pub fn read(&mut self, fd: usize, buf: &mut [u8]) -> KernelResult<usize> {
        let (slot, end) = decode_fd(fd).ok_or(KernelError::InvalidArgument)?;
        if end != PipeEnd::Read {
            return Err(KernelError::NotPermitted);
        }
        let pipe = self.slots[slot].as_mut().ok_or(KernelError::NotFound)?;

        let mut transferred = 0;
        while transferred < buf.len() && pipe.count > 0 {
            buf[transferred] = pipe.buffer[pipe.read_pos];
            pipe.read_pos = (pipe.read_pos + 1) % PIPE_CAPACITY;
            pipe.count -= 1;
            transferred += 1;
        }
        Ok(transferred)
    }

    /// Write up to `bytes.len()` bytes to the write end. Returns the
    /// byte count; zero when the pipe is full.
    pub fn write(&mut self, fd: usize, bytes: &[u8]) -> KernelResult<usize> {
        let (slot, end) = decode_fd(fd).ok_or(KernelError::InvalidArgument)?;
        if end != PipeEnd::Write {
            return Err(KernelError::NotPermitted);
        }
        let pipe = self.slots[slot].as_mut().ok_or(KernelError::NotFound)?;

        let mut transferred = 0;
        while transferred < bytes.len() && pipe.count < PIPE_CAPACITY {
            pipe.buffer[pipe.write_pos] = bytes[transferred];
            pipe.write_pos = (pipe.write_pos + 1) % PIPE_CAPACITY;
            pipe.count += 1;
            transferred += 1;
        }
        Ok(transferred)
    }

    /// Drop one reference. At zero the buffer is released and the slot
    /// recycled. Closing a dead descriptor is an error surfaced to the
    /// caller, not a crash.
    pub fn close(&mut self, fd: usize) -> KernelResult<()> {
        let (slot, _) = decode_fd(fd).ok_or(KernelError::InvalidArgument)?;
        let pipe = self.slots[slot].as_mut().ok_or(KernelError::NotFound)?;
        pipe.ref_count -= 1;
        if pipe.ref_count == 0 {
            self.slots[slot] = None;
            self.active -= 1;
        }
        Ok(())
    }

    /// Bytes currently buffered in a pipe.
    pub fn buffered(&self, fd: usize) -> Option<usize> {
        let (slot, _) = decode_fd(fd)?;
        self.slots[slot].as_ref().map(|p| p.count)
    }

    /// Reader/writer pids recorded for a slot.
    pub fn endpoints(&self, fd: usize) -> Option<(Pid, Pid)> {
        let (slot, _) = decode_fd(fd)?;
        self.slots[slot].as_ref().map(|p| (p.reader, p.writer))
    }

    pub fn active(&self) -> usize {
        self.active
    }
}

impl Default for PipePool {
    fn default() -> Self {
        Self::new()
    }
}
