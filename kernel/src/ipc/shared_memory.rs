//! Shared-memory segments
//!
//! A keyed pool of segments, each owning a contiguous run of physical
//! frames. Attaching maps those frames user-writable at the segment's
//! fixed attach address in the caller's address space (each slot has its
//! own address, so several segments can be attached at once). The frames
//! are jointly owned by the attachments: process teardown skips the
//! attach window, and the frames return to the allocator only when
//! `shmctl(IPC_RMID)` drops the last reference.

use crate::error::{KernelError, KernelResult};
use crate::mm::{AddressSpace, FrameBitmap, PageFlags, PhysAddr, PhysWindow, VirtAddr, PAGE_SIZE};
use crate::process::pcb::Pid;

/// Slots in the segment pool.
pub const MAX_SEGMENTS: usize = 32;

/// Base of the attach window in user space.
pub const SHM_ATTACH_BASE: u32 = 0x5000_0000;

/// Virtual span reserved per slot (4 MiB), bounding segment size.
pub const SHM_SLOT_SPAN: u32 = 0x40_0000;

/// Fixed attach address for a slot.
pub fn attach_address(id: usize) -> u32 {
    SHM_ATTACH_BASE + id as u32 * SHM_SLOT_SPAN
}

/// Whether `virt` lies inside the shared-memory attach window. Used by
/// process teardown to leave jointly-owned frames alone.
pub fn in_attach_window(virt: VirtAddr) -> bool {
    let addr = virt.as_u32();
    addr >= SHM_ATTACH_BASE && addr < SHM_ATTACH_BASE + (MAX_SEGMENTS as u32) * SHM_SLOT_SPAN
}

struct Segment {
    key: u32,
    /// Page-rounded size in bytes.
    size: u32,
    phys: PhysAddr,
    ref_count: u32,
    attach_count: u32,
    owner: Pid,
}

/// The segment pool.
pub struct SharedMemoryPool {
    slots: [Option<Segment>; MAX_SEGMENTS],
}

impl SharedMemoryPool {
    pub fn new() -> Self {
        Self {
            slots: [const { None }; MAX_SEGMENTS],
        }
    }

    /// Return the id of the segment with `key`, allocating
    /// `ceil(size / page)` contiguous frames for a fresh one. An
    /// existing segment gains a reference; its size is not rechecked.
    pub fn get(
        &mut self,
        key: u32,
        size: u32,
        frames: &mut FrameBitmap,
        owner: Pid,
    ) -> KernelResult<usize> {
        if let Some(id) = self.find_by_key(key) {
            let segment = self.slots[id].as_mut().expect("found slot is live");
            segment.ref_count += 1;
            return Ok(id);
        }

        if size == 0 || size > SHM_SLOT_SPAN {
            return Err(KernelError::InvalidArgument);
        }
        let rounded = PhysAddr::new(size).align_up().as_u32();
        let page_count = (rounded as usize) / PAGE_SIZE;

        let id = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(KernelError::NoFreeSlot)?;
        let phys = frames.allocate_contiguous(page_count)?;
        self.slots[id] = Some(Segment {
            key,
            size: rounded,
            phys,
            ref_count: 1,
            attach_count: 0,
            owner,
        });
        Ok(id)
    }

    /// Map the segment into `space` at its fixed attach address and
    /// return that address. A failure mid-mapping unwinds the partial
    /// mappings before reporting.
    pub fn attach(
        &mut self,
        id: usize,
        space: &mut AddressSpace,
        frames: &mut FrameBitmap,
        window: &PhysWindow,
    ) -> KernelResult<u32> {
        let (phys, size) = {
            let segment = self.live_segment(id)?;
            (segment.phys, segment.size)
        };
        let base = attach_address(id);

        let mut offset = 0u32;
        while offset < size {
            let virt = VirtAddr::new(base + offset);
            if let Err(err) = space.map(
                frames,
                window,
                virt,
                phys.offset(offset),
                PageFlags::USER_RW,
            ) {
                // Unwind what was installed; the frames stay with the
                // segment.
                let mut undo = 0u32;
                while undo < offset {
                    space.unmap(window, VirtAddr::new(base + undo));
                    undo += PAGE_SIZE as u32;
                }
                return Err(err);
            }
            offset += PAGE_SIZE as u32;
        }

        let segment = self.live_segment_mut(id)?;
        segment.attach_count += 1;
        Ok(base)
    }

    /// Detach by attach address: unmap the window from `space` and drop
    /// one attachment.
    pub fn detach(
        &mut self,
        addr: u32,
        space: &mut AddressSpace,
        window: &PhysWindow,
    ) -> KernelResult<()> {
        let id = self
            .slots
            .iter()
            .enumerate()
            .position(|(id, s)| s.is_some() && attach_address(id) == addr)
            .ok_or(KernelError::NotFound)?;
        let size = self.live_segment(id)?.size;

        let mut offset = 0u32;
        while offset < size {
            space.unmap(window, VirtAddr::new(addr + offset));
            offset += PAGE_SIZE as u32;
        }

        let segment = self.live_segment_mut(id)?;
        segment.attach_count = segment.attach_count.saturating_sub(1);
        Ok(())
    }

    /// Drop one reference; at zero, return the frames to the allocator
    /// and recycle the slot.
    pub fn remove(&mut self, id: usize, frames: &mut FrameBitmap) -> KernelResult<()> {
        let segment = self.live_segment_mut(id)?;
        segment.ref_count -= 1;
        if segment.ref_count == 0 {
            let phys = segment.phys;
            let pages = segment.size as usize / PAGE_SIZE;
            self.slots[id] = None;
            frames.free_contiguous(phys, pages);
        }
        Ok(())
    }

    pub fn size_of(&self, id: usize) -> Option<u32> {
        self.slots.get(id)?.as_ref().map(|s| s.size)
    }

    pub fn owner_of(&self, id: usize) -> Option<Pid> {
        self.slots.get(id)?.as_ref().map(|s| s.owner)
    }

    pub fn attachments(&self, id: usize) -> Option<u32> {
        self.slots.get(id)?.as_ref().map(|s| s.attach_count)
    }

    fn find_by_key(&self, key: u32) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().map(|seg| seg.key == key).unwrap_or(false))
    }

    fn live_segment(&self, id: usize) -> KernelResult<&Segment> {
        self.slots
            .get(id)
            .ok_or(KernelError::InvalidArgument)?
            .as_ref()
            .ok_or(KernelError::NotFound)
    }

    fn live_segment_mut(&mut self, id: usize) -> KernelResult<&mut Segment> {
        self.slots
            .get_mut(id)
            .ok_or(KernelError::InvalidArgument)?
            .as_mut()
            .ok_or(KernelError::NotFound)
    }
}

impl Default for SharedMemoryPool {
    fn default() -> Self {
        Self::new()
    }
}
