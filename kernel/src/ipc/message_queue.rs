//! System-V-style message queues
//!
//! A keyed pool of FIFO queues. Messages carry a 4-byte type tag and at
//! most 256 payload bytes; each queue holds at most 64 of them.
//! `msgget` returns an existing queue's handle (bumping its reference
//! count) or claims a fresh slot; `msgctl(IPC_RMID)` drops a reference
//! and frees the queue, pending messages included, when it hits zero.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};

/// Slots in the queue pool.
pub const MAX_QUEUES: usize = 32;

/// Messages per queue.
pub const MAX_MESSAGES: usize = 64;

/// Payload bytes per message; longer sends are truncated.
pub const MAX_MESSAGE_SIZE: usize = 256;

/// One queued message.
#[derive(Debug, Clone)]
pub struct Message {
    pub mtype: u32,
    pub payload: Vec<u8>,
}

struct MessageQueue {
    key: u32,
    messages: VecDeque<Message>,
    ref_count: u32,
}

/// The message-queue pool.
pub struct MessageQueuePool {
    slots: [Option<MessageQueue>; MAX_QUEUES],
}

impl MessageQueuePool {
    pub fn new() -> Self {
        Self {
            slots: [const { None }; MAX_QUEUES],
        }
    }

    /// Return the id of the queue with `key`, creating it when absent.
    /// An existing queue gains a reference.
    pub fn get(&mut self, key: u32) -> KernelResult<usize> {
        if let Some(id) = self.find_by_key(key) {
            let queue = self.slots[id].as_mut().expect("found slot is live");
            queue.ref_count += 1;
            return Ok(id);
        }
        let id = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(KernelError::NoFreeSlot)?;
        self.slots[id] = Some(MessageQueue {
            key,
            messages: VecDeque::new(),
            ref_count: 1,
        });
        Ok(id)
    }

    /// Append a message. The payload is truncated to
    /// [`MAX_MESSAGE_SIZE`]; a full queue rejects the send.
    pub fn send(&mut self, id: usize, mtype: u32, payload: &[u8]) -> KernelResult<()> {
        let queue = self.live_queue_mut(id)?;
        if queue.messages.len() >= MAX_MESSAGES {
            return Err(KernelError::QueueFull);
        }
        let take = payload.len().min(MAX_MESSAGE_SIZE);
        queue.messages.push_back(Message {
            mtype,
            payload: payload[..take].to_vec(),
        });
        Ok(())
    }

    /// Remove and return the head message, its payload clamped to
    /// `max_size`. Returns `None` when the queue is empty. The type
    /// argument of `msgrcv` is accepted by the syscall layer but not
    /// enforced here.
    pub fn receive(&mut self, id: usize, max_size: usize) -> KernelResult<Option<Message>> {
        let queue = self.live_queue_mut(id)?;
        let Some(mut message) = queue.messages.pop_front() else {
            return Ok(None);
        };
        message.payload.truncate(max_size);
        Ok(Some(message))
    }

    /// Drop one reference; at zero, free all pending messages and the
    /// slot.
    pub fn remove(&mut self, id: usize) -> KernelResult<()> {
        let queue = self.live_queue_mut(id)?;
        queue.ref_count -= 1;
        if queue.ref_count == 0 {
            self.slots[id] = None;
        }
        Ok(())
    }

    pub fn message_count(&self, id: usize) -> Option<usize> {
        self.slots.get(id)?.as_ref().map(|q| q.messages.len())
    }

    pub fn key_of(&self, id: usize) -> Option<u32> {
        self.slots.get(id)?.as_ref().map(|q| q.key)
    }

    fn find_by_key(&self, key: u32) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().map(|q| q.key == key).unwrap_or(false))
    }

    fn live_queue_mut(&mut self, id: usize) -> KernelResult<&mut MessageQueue> {
        self.slots
            .get_mut(id)
            .ok_or(KernelError::InvalidArgument)?
            .as_mut()
            .ok_or(KernelError::NotFound)
    }
}

impl Default for MessageQueuePool {
    fn default() -> Self {
        Self::new()
    }
}
