//! Inter-process communication
//!
//! Fixed pools for the three keyed/slotted primitives — pipes, message
//! queues, shared-memory segments — plus the per-process signal state
//! that lives in the PCB (see [`crate::process::signal`]). All pools are
//! kernel-owned and accessed under the single-threaded kernel, so their
//! only discipline is the interrupt masking the trap path provides.

pub mod message_queue;
pub mod pipe;
pub mod shared_memory;

#[cfg(test)]
mod tests;

pub use message_queue::MessageQueuePool;
pub use pipe::PipePool;
pub use shared_memory::SharedMemoryPool;

/// `msgctl`/`shmctl` command: remove the object once the last reference
/// drops.
pub const IPC_RMID: u32 = 0;

/// All IPC pool state.
pub struct IpcRegistry {
    pub pipes: PipePool,
    pub queues: MessageQueuePool,
    pub shm: SharedMemoryPool,
}

impl IpcRegistry {
    pub fn new() -> Self {
        Self {
            pipes: PipePool::new(),
            queues: MessageQueuePool::new(),
            shm: SharedMemoryPool::new(),
        }
    }
}

impl Default for IpcRegistry {
    fn default() -> Self {
        Self::new()
    }
}
